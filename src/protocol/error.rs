//! Protocol error types.

use thiserror::Error;

/// Errors related to wire message handling.
///
/// Handlers treat every variant the same way: log and drop the packet.
/// None of these ever mutate link state.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("datagram too short: need at least {expected} bytes, got {got}")]
    DatagramTooShort { expected: usize, got: usize },

    #[error("header length {header} disagrees with datagram size {actual}")]
    LengthMismatch { header: usize, actual: usize },

    #[error("payload size mismatch: expected {expected}, got {got}")]
    PayloadSizeMismatch { expected: usize, got: usize },

    #[error("payload too short: need at least {expected} bytes, got {got}")]
    PayloadTooShort { expected: usize, got: usize },

    #[error("unknown packet type: {0}")]
    UnknownOpcode(u16),
}
