//! Error types for the node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire codec or signature error
    #[error("wire error: {0}")]
    Wire(#[from] ownworld_wire::WireError),

    /// Persistence error
    #[error("store error: {0}")]
    Store(#[from] ownworld_store::StoreError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP error
    #[error("http error: {0}")]
    Http(String),

    /// Protocol violation by a peer
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}
