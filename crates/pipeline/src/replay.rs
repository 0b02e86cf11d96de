//! Redispatch of cached versions without refetching.

use crate::Limits;
use crate::dispatch::{DispatchFailure, DispatcherHandle, Origin, QueueMessage, send_within};
use crate::error::{ErrorKind, Result};
use crate::index::VersionIndex;
use crate::pool::run_ordered;
use crate::reason::Reason;
use norma_cache::{DocumentId, EntryInfo, StoreHandle, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Which version of a document to replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VersionSelector {
    /// The highest version known to the index.
    #[default]
    Latest,
    Exact(Version),
}

impl Display for VersionSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(version) => Display::fmt(version, f),
        }
    }
}

impl FromStr for VersionSelector {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        match s.parse::<Version>() {
            Ok(version) => Ok(Self::Exact(version)),
            Err(_) => exn::bail!(ErrorKind::invalid(format!("invalid version {s:?}, expected \"latest\" or \"v<n>\""))),
        }
    }
}

impl Serialize for VersionSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|err: crate::error::Error| serde::de::Error::custom(&*err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Sent to the queue.
    Dispatched(EntryInfo),
    Failed {
        reason: Reason,
        message: String,
        /// Set when the selector resolved before the failure.
        version: Option<Version>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayResult {
    pub document_id: DocumentId,
    pub requested: VersionSelector,
    pub outcome: ReplayOutcome,
}

impl ReplayResult {
    pub fn version_resolved(&self) -> Option<Version> {
        match &self.outcome {
            ReplayOutcome::Dispatched(info) => Some(info.version),
            ReplayOutcome::Failed { version, .. } => *version,
        }
    }

    pub fn reason(&self) -> Option<Reason> {
        match &self.outcome {
            ReplayOutcome::Failed { reason, .. } => Some(*reason),
            ReplayOutcome::Dispatched(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ReplayOutcome::Dispatched(_))
    }
}

/// Per-item replay results, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayBatch {
    pub results: Vec<ReplayResult>,
}

impl ReplayBatch {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|result| result.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total_count() - self.success_count()
    }

    pub fn total_count(&self) -> usize {
        self.results.len()
    }
}

/// Sends cached versions back to the queue. Never writes to the store.
#[derive(Clone)]
pub struct ReplayEngine {
    store: StoreHandle,
    dispatcher: DispatcherHandle,
    index: Arc<VersionIndex>,
    limits: Limits,
}

impl ReplayEngine {
    pub fn new(store: StoreHandle, dispatcher: DispatcherHandle, index: Arc<VersionIndex>, limits: Limits) -> Self {
        Self { store, dispatcher, index, limits }
    }

    /// Replay one cached version.
    ///
    /// Per-document problems are reported in the returned outcome. An `Err`
    /// means the index points at a version the store does not have, which
    /// should be impossible and is not something the caller can fix by
    /// retrying.
    #[instrument(skip(self), fields(infoleg_id = %id))]
    pub async fn replay_one(&self, id: DocumentId, selector: VersionSelector) -> Result<ReplayResult> {
        let outcome = self.outcome(id, selector).await?;
        if let ReplayOutcome::Failed { reason, message, .. } = &outcome {
            warn!(infoleg_id = %id, %reason, "{message}");
        }
        Ok(ReplayResult { document_id: id, requested: selector, outcome })
    }

    /// Replay several versions on the bounded pool.
    ///
    /// Items fail independently, except for an index inconsistency, which
    /// fails the whole batch.
    #[instrument(skip_all, fields(count = requests.len()))]
    pub async fn replay_batch(
        &self,
        requests: Vec<(DocumentId, VersionSelector)>,
        cancel: &CancellationToken,
    ) -> Result<ReplayBatch> {
        let results = run_ordered(requests, self.limits.workers, cancel, |(id, selector)| self.replay_one(id, selector))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let batch = ReplayBatch { results };
        info!(success = batch.success_count(), failed = batch.failed_count(), "replay batch completed");
        Ok(batch)
    }

    async fn outcome(&self, id: DocumentId, selector: VersionSelector) -> Result<ReplayOutcome> {
        let resolved = match selector {
            VersionSelector::Latest => self.index.latest(id),
            VersionSelector::Exact(version) => self.index.contains(id, version).then_some(version),
        };
        let Some(version) = resolved else {
            return Ok(ReplayOutcome::Failed {
                reason: Reason::CacheMiss,
                message: format!("Norm {id} has no cached version matching {selector}"),
                version: None,
            });
        };
        let entry = match self.store.get(id, version).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                error!(infoleg_id = %id, %version, "indexed version is missing from the cache store");
                exn::bail!(ErrorKind::Inconsistent(format!("norm {id} {version} is indexed but not stored")));
            },
            Err(err) => {
                return Ok(ReplayOutcome::Failed {
                    reason: Reason::CacheError,
                    message: format!("Reading norm {id} {version} from cache failed: {}", *err),
                    version: Some(version),
                });
            },
        };
        let message = QueueMessage::new(&entry, Origin::Replayed);
        match send_within(self.dispatcher.as_ref(), message, self.limits.dispatch_timeout).await {
            Ok(()) => {
                info!(infoleg_id = %id, %version, queue = self.dispatcher.name(), "norm replayed");
                let (info, _) = entry.into_parts();
                Ok(ReplayOutcome::Dispatched(info))
            },
            Err(DispatchFailure::TimedOut(limit)) => Ok(ReplayOutcome::Failed {
                reason: Reason::DispatchTimeout,
                message: format!("Replay of norm {id} {version} timed out after {limit:?}"),
                version: Some(version),
            }),
            Err(DispatchFailure::Rejected(why)) => Ok(ReplayOutcome::Failed {
                reason: Reason::QueueSendFailed,
                message: format!("Replay of norm {id} {version} failed: {why}"),
                version: Some(version),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MockDispatcher;
    use norma_cache::{CacheStore, MemoryStore, Source};
    use rstest::rstest;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        dispatcher: Arc<MockDispatcher>,
        engine: ReplayEngine,
    }

    async fn harness(seed: &[(u64, &str)]) -> Harness {
        let store = Arc::new(MemoryStore::new());
        for (n, payload) in seed {
            store.put(id(*n), payload.as_bytes(), Source::Scraped).await.unwrap();
        }
        let index = Arc::new(VersionIndex::new());
        index.rebuild(store.as_ref()).await.unwrap();
        let dispatcher = Arc::new(MockDispatcher::new());
        let limits = Limits { workers: 2, fetch_timeout: Duration::from_secs(1), dispatch_timeout: Duration::from_secs(1) };
        let engine = ReplayEngine::new(store.clone(), dispatcher.clone(), index, limits);
        Harness { store, dispatcher, engine }
    }

    fn id(n: u64) -> DocumentId {
        DocumentId::try_from(n).unwrap()
    }

    #[rstest]
    #[case("latest", VersionSelector::Latest)]
    #[case("LATEST", VersionSelector::Latest)]
    #[case("v4", VersionSelector::Exact(Version::new(4).unwrap()))]
    #[case("4", VersionSelector::Exact(Version::new(4).unwrap()))]
    fn test_selector_parse(#[case] input: &str, #[case] expected: VersionSelector) {
        assert_eq!(input.parse::<VersionSelector>().unwrap(), expected);
    }

    #[test]
    fn test_selector_rejects_garbage() {
        let err = "newest".parse::<VersionSelector>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRequest(_)));
        assert_eq!(VersionSelector::Exact(Version::FIRST).to_string(), "v1");
    }

    #[tokio::test]
    async fn test_latest_and_older_versions() {
        let h = harness(&[(7, "first"), (7, "second")]).await;

        let latest = h.engine.replay_one(id(7), VersionSelector::Latest).await.unwrap();
        assert_eq!(latest.version_resolved().map(|v| v.get()), Some(2));

        let old = h.engine.replay_one(id(7), "v1".parse().unwrap()).await.unwrap();
        assert_eq!(old.version_resolved(), Some(Version::FIRST));

        let sent = h.dispatcher.sent();
        assert_eq!(sent[0].payload, b"second");
        assert_eq!(sent[1].payload, b"first");
        assert!(sent.iter().all(|m| m.origin == Origin::Replayed));
        assert_eq!(h.store.get(id(7), Version::FIRST).await.unwrap().unwrap().payload, b"first");
    }

    #[tokio::test]
    async fn test_never_cached_is_a_miss_without_dispatch() {
        let h = harness(&[(7, "first")]).await;
        let result = h.engine.replay_one(id(8), VersionSelector::Latest).await.unwrap();
        assert_eq!(result.reason(), Some(Reason::CacheMiss));
        assert_eq!(result.version_resolved(), None);
        let result = h.engine.replay_one(id(7), "v2".parse().unwrap()).await.unwrap();
        assert_eq!(result.reason(), Some(Reason::CacheMiss));
        assert_eq!(h.dispatcher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let h = harness(&[(3, "payload")]).await;
        for _ in 0..2 {
            let result = h.engine.replay_one(id(3), VersionSelector::Latest).await.unwrap();
            assert!(result.is_success());
        }
        assert_eq!(h.dispatcher.sent().len(), 2);
        assert_eq!(h.store.puts(), 1);
        assert_eq!(h.store.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_queue_send_failed() {
        let h = harness(&[(3, "payload")]).await;
        h.dispatcher.reject_all(true);
        let result = h.engine.replay_one(id(3), VersionSelector::Latest).await.unwrap();
        assert_eq!(result.reason(), Some(Reason::QueueSendFailed));
        assert_eq!(result.version_resolved(), Some(Version::FIRST));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_timeout() {
        let h = harness(&[(3, "payload")]).await;
        h.dispatcher.delay(Duration::from_secs(5));
        let result = h.engine.replay_one(id(3), VersionSelector::Latest).await.unwrap();
        assert_eq!(result.reason(), Some(Reason::DispatchTimeout));
    }

    #[tokio::test]
    async fn test_read_failure_is_cache_error() {
        let h = harness(&[(3, "payload")]).await;
        h.store.fail_reads(true);
        let result = h.engine.replay_one(id(3), VersionSelector::Latest).await.unwrap();
        assert_eq!(result.reason(), Some(Reason::CacheError));
        assert_eq!(h.dispatcher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_index_store_divergence_is_fatal() {
        let h = harness(&[(3, "payload")]).await;
        assert!(h.store.forget(id(3), Version::FIRST).await);
        let err = h.engine.replay_one(id(3), VersionSelector::Latest).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Inconsistent(_)));
        assert!(!err.is_retryable());
        assert_eq!(h.dispatcher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_batch_keeps_request_order_and_isolates_failures() {
        let h = harness(&[(1, "one"), (3, "three"), (3, "three again")]).await;
        h.dispatcher.reject(1);
        let requests = vec![
            (id(3), VersionSelector::Exact(Version::FIRST)),
            (id(2), VersionSelector::Latest),
            (id(1), VersionSelector::Latest),
            (id(3), VersionSelector::Latest),
        ];
        let batch = h.engine.replay_batch(requests, &CancellationToken::new()).await.unwrap();
        let ids: Vec<u64> = batch.results.iter().map(|r| r.document_id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1, 3]);
        let reasons: Vec<_> = batch.results.iter().map(ReplayResult::reason).collect();
        assert_eq!(reasons, vec![None, Some(Reason::CacheMiss), Some(Reason::QueueSendFailed), None]);
        assert_eq!((batch.success_count(), batch.failed_count(), batch.total_count()), (2, 2, 4));
    }

    #[tokio::test]
    async fn test_batch_with_inconsistency_fails() {
        let h = harness(&[(1, "one"), (2, "two")]).await;
        h.store.forget(id(2), Version::FIRST).await;
        let requests = vec![(id(1), VersionSelector::Latest), (id(2), VersionSelector::Latest)];
        let err = h.engine.replay_batch(requests, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Inconsistent(_)));
    }
}
