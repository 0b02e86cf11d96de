//! Cache-aside acquisition of norms, with optional dispatch.
//!
//! `acquire` fills the cache; `process` does the same and then hands the
//! document to the queue. Both check the cache first unless forced, and both
//! report per-document outcomes rather than errors: a failing document never
//! aborts its batch.

use crate::Limits;
use crate::dispatch::{DispatchFailure, DispatcherHandle, Origin, QueueMessage, send_within};
use crate::fetch::FetcherHandle;
use crate::index::VersionIndex;
use crate::pool::run_ordered;
use crate::reason::Reason;
use norma_cache::{CacheEntry, DocumentId, EntryInfo, Source, StoreHandle};
use std::sync::Arc;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Validated range of IDs: `start..=end`, at most `max_docs` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    start: DocumentId,
    end: DocumentId,
    max_docs: u32,
}

impl IdRange {
    pub(crate) fn new(start: DocumentId, end: DocumentId, max_docs: u32) -> Self {
        Self { start, end, max_docs }
    }

    /// The IDs to attempt, ascending.
    pub fn ids(&self) -> impl Iterator<Item = DocumentId> + use<> {
        (self.start.get()..=self.end.get())
            .take(self.max_docs as usize)
            .filter_map(|n| DocumentId::try_from(n).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: Reason,
    pub message: String,
    /// The content came from the cache rather than the origin.
    pub cache_hit: bool,
    /// Cached version that was kept despite the failure (dispatch errors).
    pub entry: Option<EntryInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    /// Fetched from the origin and stored as a new version.
    Scraped(EntryInfo),
    /// Already cached; the origin was not contacted.
    Cached(EntryInfo),
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionResult {
    pub document_id: DocumentId,
    pub forced: bool,
    pub outcome: AcquisitionOutcome,
    pub timestamp: UtcDateTime,
}

impl AcquisitionResult {
    pub fn reason(&self) -> Option<Reason> {
        match &self.outcome {
            AcquisitionOutcome::Failed(failure) => Some(failure.reason),
            _ => None,
        }
    }
}

/// Per-document results of a range request, ascending by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionBatch {
    pub results: Vec<AcquisitionResult>,
}

impl AcquisitionBatch {
    pub fn scraped_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, AcquisitionOutcome::Scraped(_)))
    }

    pub fn cached_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, AcquisitionOutcome::Cached(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, AcquisitionOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&AcquisitionOutcome) -> bool) -> usize {
        self.results.iter().filter(|result| pred(&result.outcome)).count()
    }
}

/// Whether a successful acquisition is also sent to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Acquire,
    Process,
}

#[derive(Clone)]
pub struct AcquisitionEngine {
    store: StoreHandle,
    fetcher: FetcherHandle,
    dispatcher: DispatcherHandle,
    index: Arc<VersionIndex>,
    limits: Limits,
}

impl AcquisitionEngine {
    pub fn new(
        store: StoreHandle,
        fetcher: FetcherHandle,
        dispatcher: DispatcherHandle,
        index: Arc<VersionIndex>,
        limits: Limits,
    ) -> Self {
        Self { store, fetcher, dispatcher, index, limits }
    }

    /// Cache-aside retrieval of one norm.
    #[instrument(skip(self), fields(infoleg_id = %id))]
    pub async fn acquire_one(&self, id: DocumentId, force: bool) -> AcquisitionResult {
        self.run(id, force, Mode::Acquire).await
    }

    /// Cache-aside retrieval of one norm, then dispatch to the queue.
    #[instrument(skip(self), fields(infoleg_id = %id))]
    pub async fn process_one(&self, id: DocumentId, force: bool) -> AcquisitionResult {
        self.run(id, force, Mode::Process).await
    }

    #[instrument(skip(self, cancel))]
    pub async fn acquire_range(&self, range: IdRange, force: bool, cancel: &CancellationToken) -> AcquisitionBatch {
        self.run_range(range, force, Mode::Acquire, cancel).await
    }

    #[instrument(skip(self, cancel))]
    pub async fn process_range(&self, range: IdRange, force: bool, cancel: &CancellationToken) -> AcquisitionBatch {
        self.run_range(range, force, Mode::Process, cancel).await
    }

    async fn run_range(&self, range: IdRange, force: bool, mode: Mode, cancel: &CancellationToken) -> AcquisitionBatch {
        let results = run_ordered(range.ids(), self.limits.workers, cancel, |id| self.run(id, force, mode)).await;
        let batch = AcquisitionBatch { results };
        info!(
            scraped = batch.scraped_count(),
            cached = batch.cached_count(),
            failed = batch.failed_count(),
            "range completed"
        );
        batch
    }

    async fn run(&self, id: DocumentId, force: bool, mode: Mode) -> AcquisitionResult {
        let outcome = self.outcome(id, force, mode).await;
        if let AcquisitionOutcome::Failed(failure) = &outcome {
            warn!(infoleg_id = %id, reason = %failure.reason, "{}", failure.message);
        }
        AcquisitionResult { document_id: id, forced: force, outcome, timestamp: UtcDateTime::now() }
    }

    async fn outcome(&self, id: DocumentId, force: bool, mode: Mode) -> AcquisitionOutcome {
        let cached = if force {
            None
        } else {
            match self.store.latest(id).await {
                Ok(found) => found,
                Err(err) => return failed(Reason::CacheError, format!("Cache lookup for norm {id} failed: {}", *err)),
            }
        };
        let (entry, cache_hit) = match cached {
            Some(entry) => {
                // Keeps the index aligned when another writer shares the store.
                self.index.record(id, entry.version);
                debug!(infoleg_id = %id, version = %entry.version, "cache hit");
                (entry, true)
            },
            None => match self.fetch_and_store(id).await {
                Ok(entry) => (entry, false),
                Err(failure) => return AcquisitionOutcome::Failed(failure),
            },
        };
        if mode == Mode::Process
            && let Err(failure) = self.dispatch(&entry).await
        {
            let (reason, message) = match failure {
                DispatchFailure::TimedOut(limit) => {
                    (Reason::DispatchTimeout, format!("Dispatch of norm {id} timed out after {limit:?}"))
                },
                DispatchFailure::Rejected(why) => (Reason::CacheSendFailed, format!("Dispatch of norm {id} failed: {why}")),
            };
            let (info, _) = entry.into_parts();
            return AcquisitionOutcome::Failed(Failure { reason, message, cache_hit, entry: Some(info) });
        }
        let (info, _) = entry.into_parts();
        if cache_hit { AcquisitionOutcome::Cached(info) } else { AcquisitionOutcome::Scraped(info) }
    }

    async fn fetch_and_store(&self, id: DocumentId) -> Result<CacheEntry, Failure> {
        let limit = self.limits.fetch_timeout;
        let payload = match tokio::time::timeout(limit, self.fetcher.fetch(id)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(err)) => {
                return Err(failure(Reason::ApiFailed, format!("Fetching norm {id} from {} failed: {}", self.fetcher.name(), *err)));
            },
            Err(_) => {
                return Err(failure(Reason::FetchTimeout, format!("Fetching norm {id} timed out after {limit:?}")));
            },
        };
        let info = self
            .store
            .put(id, &payload, Source::Scraped)
            .await
            .map_err(|err| failure(Reason::CacheError, format!("Storing norm {id} failed: {}", *err)))?;
        self.index.record(id, info.version);
        info!(infoleg_id = %id, version = %info.version, size = info.size, "norm scraped and cached");
        Ok(CacheEntry::new(info, payload))
    }

    async fn dispatch(&self, entry: &CacheEntry) -> Result<(), DispatchFailure> {
        let message = QueueMessage::new(entry, Origin::Acquired);
        send_within(self.dispatcher.as_ref(), message, self.limits.dispatch_timeout).await?;
        info!(infoleg_id = %entry.document_id, version = %entry.version, queue = self.dispatcher.name(), "norm dispatched");
        Ok(())
    }
}

fn failure(reason: Reason, message: String) -> Failure {
    Failure { reason, message, cache_hit: false, entry: None }
}

fn failed(reason: Reason, message: String) -> AcquisitionOutcome {
    AcquisitionOutcome::Failed(failure(reason, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MockDispatcher;
    use crate::fetch::MockFetcher;
    use norma_cache::{CacheStore, MemoryStore, Version};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        fetcher: Arc<MockFetcher>,
        dispatcher: Arc<MockDispatcher>,
        index: Arc<VersionIndex>,
        engine: AcquisitionEngine,
    }

    fn harness(fetcher: MockFetcher) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(fetcher);
        let dispatcher = Arc::new(MockDispatcher::new());
        let index = Arc::new(VersionIndex::new());
        let limits = Limits {
            workers: 3,
            fetch_timeout: Duration::from_secs(2),
            dispatch_timeout: Duration::from_secs(1),
        };
        let engine = AcquisitionEngine::new(store.clone(), fetcher.clone(), dispatcher.clone(), index.clone(), limits);
        Harness { store, fetcher, dispatcher, index, engine }
    }

    fn id(n: u64) -> DocumentId {
        DocumentId::try_from(n).unwrap()
    }

    fn range(start: u64, end: u64, max_docs: u32) -> IdRange {
        IdRange::new(id(start), id(end), max_docs)
    }

    #[tokio::test]
    async fn test_second_acquire_is_served_from_cache() {
        let h = harness(MockFetcher::serving([183532]));

        let first = h.engine.acquire_one(id(183532), false).await;
        assert!(matches!(&first.outcome, AcquisitionOutcome::Scraped(info) if info.version == Version::FIRST));
        assert_eq!(h.fetcher.calls(), 1);

        let second = h.engine.acquire_one(id(183532), false).await;
        assert!(matches!(&second.outcome, AcquisitionOutcome::Cached(info) if info.version == Version::FIRST));
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.store.puts(), 1);
        assert_eq!(h.dispatcher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_force_always_fetches() {
        let h = harness(MockFetcher::serving([5]));
        h.engine.acquire_one(id(5), false).await;
        let cached = h.engine.acquire_one(id(5), false).await;
        assert!(matches!(cached.outcome, AcquisitionOutcome::Cached(_)));

        let forced = h.engine.acquire_one(id(5), true).await;
        assert!(forced.forced);
        assert!(matches!(&forced.outcome, AcquisitionOutcome::Scraped(info) if info.version.get() == 2));
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(h.index.latest(id(5)).map(|v| v.get()), Some(2));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache_untouched() {
        let h = harness(MockFetcher::new());
        let result = h.engine.acquire_one(id(9), false).await;
        assert_eq!(result.reason(), Some(Reason::ApiFailed));
        assert_eq!(h.store.puts(), 0);
        assert_eq!(h.index.latest(id(9)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let fetcher = MockFetcher::serving([9]);
        fetcher.delay(Duration::from_secs(60));
        let h = harness(fetcher);
        let result = h.engine.acquire_one(id(9), false).await;
        assert_eq!(result.reason(), Some(Reason::FetchTimeout));
        assert_eq!(h.store.puts(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_cache_error() {
        let h = harness(MockFetcher::serving([3]));
        h.store.fail_writes(true);
        assert_eq!(h.engine.acquire_one(id(3), false).await.reason(), Some(Reason::CacheError));
        h.store.fail_writes(false);
        h.store.fail_reads(true);
        assert_eq!(h.engine.acquire_one(id(3), false).await.reason(), Some(Reason::CacheError));
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_range_is_capped_by_max_docs() {
        let h = harness(MockFetcher::serving(100..=109));
        let batch = h.engine.acquire_range(range(100, 109, 5), false, &CancellationToken::new()).await;
        let ids: Vec<u64> = batch.results.iter().map(|r| r.document_id.get()).collect();
        assert_eq!(ids, vec![100, 101, 102, 103, 104]);
        let mut called = h.fetcher.called();
        called.sort_unstable();
        assert_eq!(called, vec![100, 101, 102, 103, 104]);
    }

    #[tokio::test]
    async fn test_range_isolates_failures_and_keeps_order() {
        let fetcher = MockFetcher::serving([1, 2, 3]);
        fetcher.fail(2);
        let h = harness(fetcher);
        let batch = h.engine.acquire_range(range(1, 3, 10), false, &CancellationToken::new()).await;
        assert_eq!((batch.scraped_count(), batch.cached_count(), batch.failed_count()), (2, 0, 1));
        let ids: Vec<u64> = batch.results.iter().map(|r| r.document_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(batch.results[1].reason(), Some(Reason::ApiFailed));
    }

    #[tokio::test]
    async fn test_range_mixes_cached_and_scraped() {
        let h = harness(MockFetcher::serving(1..=4));
        h.engine.acquire_one(id(2), false).await;
        let batch = h.engine.acquire_range(range(1, 4, 10), false, &CancellationToken::new()).await;
        assert_eq!((batch.scraped_count(), batch.cached_count(), batch.failed_count()), (3, 1, 0));
        assert!(matches!(batch.results[1].outcome, AcquisitionOutcome::Cached(_)));
    }

    #[tokio::test]
    async fn test_cancelled_range_attempts_nothing() {
        let h = harness(MockFetcher::serving(1..=10));
        let token = CancellationToken::new();
        token.cancel();
        let batch = h.engine.acquire_range(range(1, 10, 10), false, &token).await;
        assert!(batch.results.is_empty());
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_process_dispatches_after_fetch_and_after_hit() {
        let h = harness(MockFetcher::serving([11]));
        let first = h.engine.process_one(id(11), false).await;
        assert!(matches!(first.outcome, AcquisitionOutcome::Scraped(_)));
        let second = h.engine.process_one(id(11), false).await;
        assert!(matches!(second.outcome, AcquisitionOutcome::Cached(_)));

        let sent = h.dispatcher.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.infoleg_id == 11 && m.version == "v1" && m.origin == Origin::Acquired));
        assert_eq!(sent[0].payload, b"<html>norma 11</html>");
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_cache_entry() {
        let h = harness(MockFetcher::serving([12]));
        h.dispatcher.reject_all(true);
        let result = h.engine.process_one(id(12), false).await;
        let AcquisitionOutcome::Failed(failure) = &result.outcome else {
            panic!("expected failure, got {:?}", result.outcome);
        };
        assert_eq!(failure.reason, Reason::CacheSendFailed);
        assert!(!failure.cache_hit);
        assert_eq!(failure.entry.as_ref().map(|e| e.version), Some(Version::FIRST));
        assert!(h.store.latest(id(12)).await.unwrap().is_some());
        assert_eq!(h.index.latest(id(12)), Some(Version::FIRST));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_timeout() {
        let h = harness(MockFetcher::serving([13]));
        h.dispatcher.delay(Duration::from_secs(30));
        let result = h.engine.process_one(id(13), false).await;
        assert_eq!(result.reason(), Some(Reason::DispatchTimeout));
        assert_eq!(h.store.puts(), 1);
    }

    #[tokio::test]
    async fn test_process_range_reports_dispatch_failures_per_item() {
        let h = harness(MockFetcher::serving(20..=22));
        h.dispatcher.reject(21);
        let batch = h.engine.process_range(range(20, 22, 3), false, &CancellationToken::new()).await;
        assert_eq!((batch.scraped_count(), batch.failed_count()), (2, 1));
        assert_eq!(batch.results[1].reason(), Some(Reason::CacheSendFailed));
        assert_eq!(h.store.puts(), 3);
    }
}
