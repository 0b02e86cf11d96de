//! Cache Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// The blob store failed to read or write a payload.
    #[display("blob storage error")]
    Storage,
    /// A stored row or identifier could not be converted to the model.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// Document IDs are strictly positive.
    #[display("invalid document id: {_0}")]
    InvalidDocumentId(#[error(not(source))] u64),
    #[display("invalid version: {_0}")]
    InvalidVersion(#[error(not(source))] String),
    /// A payload no longer matches the hash it was stored under.
    #[display("corrupt blob for content hash {_0}")]
    Corrupt(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidDocumentId(0).to_string(), "invalid document id: 0");
        assert_eq!(ErrorKind::InvalidVersion("vx".to_string()).to_string(), "invalid version: vx");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::Corrupt("abcd".to_string()).is_retryable());
        assert!(!ErrorKind::InvalidData("source").is_retryable());
    }
}
