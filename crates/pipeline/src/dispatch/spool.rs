use super::{Dispatcher, QueueMessage};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use norma_storage::BackendHandle;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use time::UtcDateTime;
use tracing::debug;

/// Directory of pending messages that the downstream processor drains.
///
/// Each message is one JSON file under `pending/`, named so that a plain
/// lexical listing yields send order. Writes go through the storage backend,
/// so a consumer never observes a half-written message.
pub struct SpoolDispatcher {
    backend: BackendHandle,
    sequence: AtomicU64,
}

impl SpoolDispatcher {
    pub const PENDING_DIR: &'static str = "pending";

    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, sequence: AtomicU64::new(0) }
    }

    fn message_path(&self, message: &QueueMessage) -> PathBuf {
        let nanos = UtcDateTime::now().unix_timestamp_nanos();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        PathBuf::from(format!(
            "{}/{nanos:020}-{seq:06}-{}-{}.json",
            Self::PENDING_DIR,
            message.infoleg_id,
            message.version,
        ))
    }
}

#[async_trait]
impl Dispatcher for SpoolDispatcher {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn send(&self, message: QueueMessage) -> Result<()> {
        let path = self.message_path(&message);
        let json = serde_json::to_vec(&message).or_raise(|| ErrorKind::Serialization)?;
        self.backend
            .write(&path, &json)
            .await
            .or_raise(|| ErrorKind::Dispatch(format!("could not spool {}", path.display())))?;
        debug!(spool = %path.display(), "message spooled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Origin;
    use norma_storage::backend::{MockBackend, StorageBackend};
    use std::sync::Arc;

    fn message(id: u64) -> QueueMessage {
        QueueMessage {
            infoleg_id: id,
            version: "v1".to_string(),
            content_hash: "ab".repeat(32),
            payload: b"<html/>".to_vec(),
            origin: Origin::Acquired,
            sent_at: "2025-10-18T12:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_spooled_messages_are_listed_in_send_order() {
        let backend = Arc::new(MockBackend::default().with_name("spool"));
        let spool = SpoolDispatcher::new(backend.clone());
        for id in [30, 10, 20] {
            spool.send(message(id)).await.unwrap();
        }
        assert_eq!(spool.name(), "spool");

        let mut ids = Vec::new();
        for path in backend.paths(SpoolDispatcher::PENDING_DIR).await {
            let raw = backend.read(&path).await.unwrap();
            ids.push(serde_json::from_slice::<QueueMessage>(&raw).unwrap().infoleg_id);
        }
        assert_eq!(ids, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_write_failure_is_a_dispatch_error() {
        let backend = Arc::new(MockBackend::default());
        backend.fail_writes(true);
        let err = SpoolDispatcher::new(backend).send(message(1)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Dispatch(_)));
    }
}
