//! Error type for the completion client.

/// Errors returned by [`crate::ChatClient`].
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Client construction or credential error.
    #[error("llm config error: {0}")]
    Config(String),

    /// Transport-level failure (connect, timeout, TLS).
    #[error("llm network error: {0}")]
    Network(String),

    /// The API returned a non-success status or an error payload.
    #[error("llm API error: {0}")]
    Api(String),

    /// The response body could not be decoded.
    #[error("llm parse error: {0}")]
    Parse(String),
}

/// Convenience alias for completion client results.
pub type Result<T> = std::result::Result<T, LlmError>;
