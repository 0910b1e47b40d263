//! The client's single error surface.
//!
//! Framing, sequencing and crypto failures are terminal for the channel. A
//! ServiceFault leaves the channel usable, and per-item status codes never
//! appear here at all: they live in the result arrays.

use opcua_core::crypto::CryptoError;
use opcua_core::types::StatusCode;
use opcua_core::wire::WireError;
use opcua_core::CodecError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("secure channel is closed")]
    ChannelClosed,

    #[error("session is not activated")]
    SessionNotActive,

    #[error("framing: {0}")]
    Framing(#[from] WireError),

    #[error("decoding: {0}")]
    Decoding(#[from] CodecError),

    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    #[error("sequencing: {0}")]
    Sequencing(#[from] SequencingError),

    /// Envelope-level ServiceFault or a bad serviceResult.
    #[error("service returned {0}")]
    Service(StatusCode),

    /// The server terminated the channel with an ERR chunk.
    #[error("server error {status}: {reason}")]
    ServerError { status: StatusCode, reason: String },

    #[error("browse continuation limit reached")]
    ContinuationExhausted,

    #[error("{0}")]
    Usage(String),
}

/// Replay and request-routing violations. All of these close the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequencingError {
    #[error("duplicate sequence number {0}")]
    Duplicate(u32),

    #[error("sequence number wrapped twice within one token")]
    DoubleRollover,

    #[error("response carries unknown request id {0}")]
    UnknownRequestId(u32),

    #[error("chunk carries unknown token id {0}")]
    UnknownTokenId(u32),

    #[error("chunk carries channel id {got}, expected {expected}")]
    ChannelIdMismatch { expected: u32, got: u32 },
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// The originating status code, when the server supplied one.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Service(status) => Some(*status),
            Error::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Does this error end the secure channel?
    pub fn is_fatal_for_channel(&self) -> bool {
        match self {
            Error::Transport(_)
            | Error::ChannelClosed
            | Error::Framing(_)
            | Error::Crypto(_)
            | Error::Sequencing(_)
            | Error::ServerError { .. } => true,
            Error::Decoding(_) => true,
            Error::Timeout
            | Error::SessionNotActive
            | Error::Service(_)
            | Error::ContinuationExhausted
            | Error::Usage(_) => false,
        }
    }
}
