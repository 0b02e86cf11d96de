//! Pipeline Error Types
//!
//! Per-item failures inside a request never surface here: they become a
//! [`Reason`](crate::Reason) on that item's outcome. These errors are for
//! whole-request problems (validation) and broken invariants.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The request was rejected before any work started.
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
    /// The version index and the cache store disagree.
    #[display("cache inconsistency: {_0}")]
    Inconsistent(#[error(not(source))] String),
    #[display("origin fetch failed: {_0}")]
    Fetch(#[error(not(source))] String),
    #[display("queue dispatch failed: {_0}")]
    Dispatch(#[error(not(source))] String),
    #[display("cache store error")]
    Cache,
    #[display("serialization error")]
    Serialization,
    /// The HTTP client could not be constructed from its configuration.
    #[display("invalid origin configuration: {_0}")]
    Origin(#[error(not(source))] String),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Dispatch(_) | Self::Cache)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::invalid("max_docs must be between 1 and 100").to_string(), "invalid request: max_docs must be between 1 and 100");
        assert_eq!(ErrorKind::Fetch("HTTP 503".to_string()).to_string(), "origin fetch failed: HTTP 503");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Dispatch("closed".to_string()).is_retryable());
        assert!(!ErrorKind::Inconsistent("183532 v2".to_string()).is_retryable());
        assert!(!ErrorKind::invalid("start_id > end_id").is_retryable());
    }
}
