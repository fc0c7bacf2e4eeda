//! # Network Server Error Handling
//!
//! This module defines the `NsError` enum, the abstract error taxonomy shared
//! by every subsystem (deduplicator, MAC engine, uplink pipeline, downlink
//! scheduler, session store). Each kind maps onto a standard gRPC code at the
//! RPC boundary via [`NsError::grpc_code`], even though no gRPC transport is
//! wired up in this crate.

use thiserror::Error;

/// Represents the different error kinds that can occur in the network
/// server core.
#[derive(Debug, Error)]
pub enum NsError {
    /// Caller contract violated: bad FPort, bad FCnt, oversize payload, bad
    /// name, bad aggregation interval.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// No session, no pending MAC command, or an FCnt/MIC mismatch that
    /// leaves nothing to reconcile against.
    #[error("not found: {0}")]
    NotFound(String),

    /// Frame-counter or MIC rejects the frame; always handled silently by
    /// the caller (logged at debug level and metered, never surfaced).
    #[error("replay rejected")]
    Replay,

    /// Missing RX info, device not yet activated, or another precondition
    /// the caller must satisfy before retrying.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Store or backend I/O failed; retryable by the caller. On the
    /// downlink path this triggers fall-through to the next candidate
    /// frame; on the uplink path the frame is dropped and logged.
    #[error("transient error: {0}")]
    Transient(String),

    /// Band-plan misconfiguration, decoder bug, or any other condition that
    /// cannot be recovered from within the current pipeline run.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Already exists (e.g. a duplicate channel index registration).
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

/// Standard gRPC status codes, used only for the abstract mapping contract
/// described in the external-interfaces section — no `tonic` dependency is
/// pulled in since no RPC transport is in scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    InvalidArgument,
    FailedPrecondition,
    Internal,
    AlreadyExists,
    NotFound,
    Unavailable,
}

impl NsError {
    /// Map an abstract error kind onto the standard gRPC code taxonomy.
    pub fn grpc_code(&self) -> GrpcCode {
        match self {
            NsError::BadArgument(_) => GrpcCode::InvalidArgument,
            NsError::PreconditionFailed(_) => GrpcCode::FailedPrecondition,
            NsError::Fatal(_) => GrpcCode::Internal,
            NsError::AlreadyExists(_) => GrpcCode::AlreadyExists,
            NsError::NotFound(_) | NsError::Replay => GrpcCode::NotFound,
            NsError::Transient(_) => GrpcCode::Unavailable,
        }
    }

    /// True when the error must never be surfaced to a caller, only logged
    /// at debug level and metered ("Replay and MIC failures" policy).
    pub fn is_silent(&self) -> bool {
        matches!(self, NsError::Replay)
    }
}
