//! Error types for the chat synchronization core.

use thiserror::Error;

/// Errors that can occur during a chat send cycle.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Model provider rejected the request with a non-success status.
    #[error("Provider returned status {0}")]
    ProviderStatus(u16),

    /// The token stream failed mid-flight.
    #[error("Stream failed: {0}")]
    Stream(String),

    /// Persistence backend rejected the request with a non-success status.
    #[error("Backend returned status {0}")]
    BackendStatus(u16),

    /// Attachment upload rejected with a non-success status.
    #[error("Upload returned status {0}")]
    UploadStatus(u16),

    /// An attachment upload is already in flight.
    #[error("An attachment upload is already in progress")]
    UploadInProgress,

    /// No cached conversation for the given id.
    #[error("No conversation cached for id {0}")]
    MissingConversation(String),
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
