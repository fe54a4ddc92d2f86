//! Error types for the paperdigest pipeline.
//!
//! Library crates use [`DigestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Run-level failures (`Fetch`, `Io`, `Config`) abort the run. Per-record
//! failures (`Download`, `Conversion`, `Summarize`) drop the record and let
//! the batch continue; `RankParse` degrades the run to the unranked
//! candidate set.

use std::path::PathBuf;

/// Top-level error type for all paperdigest operations.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Listing unreachable or its structure no longer matches (run-fatal).
    #[error("fetch error: {message}")]
    Fetch { message: String },

    /// Ranking response could not be mapped back to any known candidate.
    #[error("rank parse error: {0}")]
    RankParse(String),

    /// PDF download failure for a single record.
    #[error("download error: {0}")]
    Download(String),

    /// Conversion provider rejection or timeout for a single record.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Summarization provider error or empty response for a single record.
    #[error("summarize error: {0}")]
    Summarize(String),

    /// Filesystem I/O error (run-fatal at the point it occurs).
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (pipeline invariant violated, invalid format).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DigestError>;

impl DigestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error from any displayable message.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error drops a single record rather than aborting the run.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            Self::Download(_) | Self::Conversion(_) | Self::Summarize(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DigestError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DigestError::fetch("listing layout changed");
        assert!(err.to_string().contains("listing layout changed"));
    }

    #[test]
    fn per_record_classification() {
        assert!(DigestError::Download("404".into()).is_per_record());
        assert!(DigestError::Conversion("timeout".into()).is_per_record());
        assert!(DigestError::Summarize("empty".into()).is_per_record());
        assert!(!DigestError::fetch("down").is_per_record());
        assert!(!DigestError::RankParse("garbage".into()).is_per_record());
    }
}
