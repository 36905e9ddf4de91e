//! Error types for the chain connection

use thiserror::Error;

/// Errors that can occur while managing the streaming node connection
#[derive(Debug, Error)]
pub enum ChainError {
    /// The configured node URL could not be parsed
    #[error("Invalid node URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL is not streaming-capable; polling fallback is not allowed
    #[error("Node URL '{0}' is not a ws:// or wss:// endpoint; a streaming connection is required")]
    StreamingRequired(String),

    /// The connect attempt did not complete within the allowed time
    #[error("Timed out connecting to node at '{0}'")]
    ConnectTimeout(String),

    /// The transport layer rejected the connection
    #[error("Failed to connect to node at '{url}': {reason}")]
    ConnectFailed { url: String, reason: String },
}

/// Result type for chain connection operations
pub type Result<T> = std::result::Result<T, ChainError>;
