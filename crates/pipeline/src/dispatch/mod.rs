//! Hand-off to the downstream processing queue.
//!
//! A [`Dispatcher`] accepts or rejects a [`QueueMessage`]; there are no
//! acknowledgements, ordering guarantees or retries beyond that.

mod channel;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod spool;

pub use self::channel::ChannelDispatcher;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockDispatcher;
pub use self::spool::SpoolDispatcher;
use crate::error::Result;
use crate::wire::rfc3339;
use async_trait::async_trait;
use norma_cache::CacheEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::UtcDateTime;

pub type DispatcherHandle = Arc<dyn Dispatcher>;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Name of the queue (used for logging only).
    fn name(&self) -> &str;

    /// Offer one message to the queue. `Ok` means accepted.
    async fn send(&self, message: QueueMessage) -> Result<()>;
}

/// Why a message is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Freshly fetched, or found in the cache by a process request.
    Acquired,
    /// Re-sent from the cache by a replay request.
    Replayed,
}

/// A cached document version on its way to the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub infoleg_id: u64,
    /// Rendered as `v<n>`.
    pub version: String,
    pub content_hash: String,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
    pub origin: Origin,
    /// RFC 3339
    pub sent_at: String,
}

impl QueueMessage {
    pub fn new(entry: &CacheEntry, origin: Origin) -> Self {
        Self {
            infoleg_id: entry.document_id.get(),
            version: entry.version.to_string(),
            content_hash: entry.content_hash.clone(),
            payload: entry.payload.clone(),
            origin,
            sent_at: rfc3339(UtcDateTime::now()),
        }
    }
}

/// Why a dispatch did not go through.
#[derive(Debug)]
pub(crate) enum DispatchFailure {
    TimedOut(Duration),
    Rejected(String),
}

pub(crate) async fn send_within(
    dispatcher: &dyn Dispatcher,
    message: QueueMessage,
    limit: Duration,
) -> std::result::Result<(), DispatchFailure> {
    match tokio::time::timeout(limit, dispatcher.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(DispatchFailure::Rejected((*err).to_string())),
        Err(_) => Err(DispatchFailure::TimedOut(limit)),
    }
}

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
