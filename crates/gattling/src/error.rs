//! Error types for the gattling library
//!
//! The attribute-protocol layer has its own, more granular error types
//! (`att::error`); everything a caller sees is folded into [`Error`] here.

use crate::att::error::{AttErrorCode, DecodeError};
use thiserror::Error;

/// Errors surfaced by the client state machine and the transport.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure on the underlying socket. Fatal to the session.
    #[error("transport failed: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer answered with a PDU that does not belong to the outstanding
    /// request. The state machine has been reset to idle.
    #[error("protocol desync: {0}")]
    Desync(String),

    /// The peer rejected a request with an ATT error response whose code is
    /// not a pagination terminator. Discovery results so far remain intact.
    #[error("peer rejected request at handle {handle:#06x}: {code:?}")]
    Peer { code: AttErrorCode, handle: u16 },

    /// A phase-entry operation was invoked while a request was already
    /// outstanding. No bytes were sent and no state was changed.
    #[error("operation only valid while the state machine is idle")]
    InvalidState,

    /// A subscription was requested that the characteristic cannot serve.
    /// Checked before any I/O.
    #[error("protocol misuse: {0}")]
    Misuse(String),

    /// A response PDU did not have the shape its opcode mandates.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;
