//! # Utility Modules
//!
//! Common helpers shared across subsystems: hex encoding/decoding for
//! DevEUIs, DevAddrs and session-store keys, and the task wait-group used
//! for tracked shutdown.

pub mod hex;
pub mod wait_group;

pub use hex::{decode_hex, encode_hex};
pub use wait_group::WaitGroup;
