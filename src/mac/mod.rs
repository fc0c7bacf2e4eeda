//! # MAC-Command Engine
//!
//! Catalog of command handlers (request-side and answer-side) plus the
//! pending/answer reconciliation protocol against the device session. This
//! module is the direct analogue of the teacher crate's protocol decoders:
//! one closed enum for the "frame type" (`Cid` here, `VIF`/`DIF` there), and
//! one handler per variant, rather than a single giant match spread across
//! the pipeline.

pub mod adr;
pub mod commands;
pub mod engine;

pub use adr::{AdrDecision, AdrEvaluator};
pub use commands::Cid;
pub use engine::MacEngine;
