//! # Error Handling
//!
//! Error types for the KiriDB read path. Every error distinguishes
//! retryable conditions (transient I/O, interruption) from ones where the
//! caller must abandon the scan (invalid scan spec, oversized row,
//! corruption).

use thiserror::Error;

/// Result type alias for KiriDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for KiriDB
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {message}")]
    Io {
        message: String,
        source: Option<std::io::Error>,
    },

    #[error("corrupt source: {details}")]
    Corrupt { details: String },

    #[error("interrupted: {message}")]
    Interrupted { message: String },

    #[error("invalid scan: {message}")]
    InvalidScan { message: String },

    #[error("max row size allowed: {max_row_size}, but the row is bigger than that")]
    RowTooBig { max_row_size: u64 },
}

impl Error {
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            source: None,
        }
    }

    pub fn corrupt(details: impl Into<String>) -> Self {
        Error::Corrupt {
            details: details.into(),
        }
    }

    pub fn invalid_scan(message: impl Into<String>) -> Self {
        Error::InvalidScan {
            message: message.into(),
        }
    }

    /// Whether retrying the operation can succeed. `InvalidScan` and
    /// `RowTooBig` are permanent; retrying the same request will fail the
    /// same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io { .. } => true,
            Error::Interrupted { .. } => true,
            Error::Corrupt { .. } => false,
            Error::InvalidScan { .. } => false,
            Error::RowTooBig { .. } => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(Error::io("disk hiccup").is_retryable());
        assert!(!Error::invalid_scan("raw scan with columns").is_retryable());
        assert!(!Error::RowTooBig { max_row_size: 64 }.is_retryable());
    }
}
