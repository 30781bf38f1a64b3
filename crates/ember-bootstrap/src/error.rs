//! Handshake errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while joining a node or authorizing one.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to read cluster CA certificate {path:?}: {source}")]
    ReadCaCert {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot build TLS client: {0}")]
    Client(reqwest::Error),

    #[error("received unknown provider: {0:?}")]
    UnknownProvider(String),

    #[error("failed to retrieve instance identity document: {0}")]
    Metadata(reqwest::Error),

    /// The server replied with an explicit error. Terminal: the handshake
    /// is aborted immediately rather than retried.
    #[error("authorization rejected: {0}")]
    Rejected(String),

    #[error("handshake deadline exceeded while {0}")]
    DeadlineExceeded(&'static str),

    #[error("invalid document signature: {0}")]
    Signature(String),

    #[error("invalid identity document: {0}")]
    InvalidDocument(String),

    #[error("instance lookup failed: {0}")]
    InstanceLookup(String),

    #[error("failed to persist bootstrap token: {0}")]
    TokenStore(String),

    #[error("received malformed bootstrap token: {0}")]
    MalformedToken(#[from] ember_core::token::TokenParseError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
