//! Crate-wide error taxonomy.
//!
//! Individual modules raise narrow local errors where useful (see
//! [`crate::codec::CodecError`]); this enum is the one callers across the
//! transport boundary are expected to match on.

use thiserror::Error;

use crate::codec::CodecError;

/// Everything that can go wrong crossing the DTP boundary.
#[derive(Debug, Error)]
pub enum DtpError {
    /// Header shorter than 24 bytes, or bad magic.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Priority or packet-type byte outside its declared enum.
    #[error("unknown enum value: {0}")]
    UnknownEnum(String),

    /// Scheduler queue was full and the incoming packet was rejected outright
    /// (LOW + DROPPABLE with nothing lower-priority to evict).
    #[error("queue full, packet rejected")]
    QueueFull,

    /// Packet's deadline had already elapsed.
    #[error("packet expired")]
    Expired,

    /// Admission controller rejected the packet for its priority class.
    #[error("admission rejected for priority class")]
    AdmissionRejected,

    /// A clock-sync round did not complete before its timeout.
    #[error("clock sync round timed out")]
    SyncRoundTimeout,

    /// I/O failure on the sender/receiver socket boundary.
    #[error("socket error: {0}")]
    SocketError(String),
}

impl From<CodecError> for DtpError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::MalformedHeader(msg) => DtpError::MalformedHeader(msg),
            CodecError::UnknownEnum(msg) => DtpError::UnknownEnum(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, DtpError>;
