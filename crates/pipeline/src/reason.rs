use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Machine-readable failure reason carried by every error response.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Fetching from the origin failed.
    #[display("api_failed")]
    ApiFailed,
    /// Replay asked for a document or version that is not cached.
    #[display("cache_miss")]
    CacheMiss,
    /// Dispatch after a successful fetch or cache hit failed.
    #[display("cache_send_failed")]
    CacheSendFailed,
    /// Dispatch of a replayed entry failed.
    #[display("queue_send_failed")]
    QueueSendFailed,
    #[display("invalid_request")]
    InvalidRequest,
    #[display("fetch_timeout")]
    FetchTimeout,
    #[display("dispatch_timeout")]
    DispatchTimeout,
    /// The cache store could not be read or written.
    #[display("cache_error")]
    CacheError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Reason::ApiFailed, "api_failed")]
    #[case(Reason::CacheSendFailed, "cache_send_failed")]
    #[case(Reason::DispatchTimeout, "dispatch_timeout")]
    #[case(Reason::CacheError, "cache_error")]
    fn test_wire_name_matches_display(#[case] reason: Reason, #[case] wire: &str) {
        assert_eq!(serde_json::to_value(reason).unwrap(), serde_json::Value::String(wire.to_string()));
        assert_eq!(reason.to_string(), wire);
    }
}
