//! # lorawan-ns-core
//!
//! The protocol core of a LoRaWAN network server: cross-gateway uplink
//! deduplication, frame-counter and MIC validation, the MAC-command
//! reconciliation engine, and RX1/RX2 downlink scheduling. Gateway
//! transport, the join server's OTAA cryptography, and the application
//! server are modeled as injected collaborators (`gateway`, `backends`)
//! rather than implemented here.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! lorawan-ns-core = "0.1.0"
//! ```
//!
//! ```rust,no_run
//! use lorawan_ns_core::{
//!     band::Eu868BandPlan, backends::RecordingApplicationBackend, config::Config,
//!     logging::init_logger, server::NetworkServer, session::InMemorySessionStore,
//! };
//! ```

pub mod backends;
pub mod band;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod dedup;
pub mod downlink;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod mac;
pub mod metrics;
pub mod server;
pub mod session;
pub mod types;
pub mod uplink;
pub mod util;

pub use error::NsError;
pub use logging::{init_logger, log_info};
pub use server::NetworkServer;
