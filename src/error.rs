use std::io;

use thiserror::Error;

/// Errors raised while decoding or serving a single protocol message, or by
/// the transport underneath a node.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message body has no `type` field")]
    MissingType,
    #[error("unsupported message type `{0}`")]
    Unsupported(String),
    #[error("node has not received `init` yet")]
    NotInitialized,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("transport closed")]
    TransportClosed,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// The numeric code sent back to the peer in an `error` reply.
    pub fn code(&self) -> u32 {
        match self {
            Error::Unsupported(_) => 10,
            Error::NotInitialized => 11,
            Error::Malformed(_) | Error::MissingType => 12,
            Error::Io(_) | Error::TransportClosed | Error::InvalidConfig(_) => 13,
        }
    }
}

/// Whether an `error` reply with `code` may succeed if the request is sent
/// again. Unsupported and malformed requests never will.
pub fn is_transient(code: u32) -> bool {
    matches!(code, 11 | 13)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
