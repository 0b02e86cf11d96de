use crate::acquire::AcquisitionEngine;
use crate::dispatch::DispatcherHandle;
use crate::error::{ErrorKind, Result};
use crate::fetch::FetcherHandle;
use crate::index::VersionIndex;
use crate::replay::ReplayEngine;
use crate::wire::{
    AcquireRangeRequest, AcquireRangeResponse, AcquireRequest, AcquireResponse, CacheListRequest, CacheListResponse,
    CacheStatsResponse, ReplayBatchRequest, ReplayBatchResponse, ReplayRequest, ReplayResponse,
};
use exn::ResultExt;
use norma_cache::StoreHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Concurrency and latency bounds shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of documents in flight within one batch.
    pub workers: usize,
    pub fetch_timeout: Duration,
    pub dispatch_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            workers: 4,
            fetch_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

pub struct PipelineBuilder {
    store: StoreHandle,
    fetcher: FetcherHandle,
    dispatcher: DispatcherHandle,
    limits: Limits,
    cancel: CancellationToken,
}

impl PipelineBuilder {
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Token that stops batches from starting further documents.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rebuild the version index from the store and wire up both engines.
    pub async fn build(self) -> Result<Pipeline> {
        let index = Arc::new(VersionIndex::new());
        index.rebuild(self.store.as_ref()).await?;
        Ok(Pipeline {
            acquisition: AcquisitionEngine::new(
                self.store.clone(),
                self.fetcher,
                self.dispatcher.clone(),
                index.clone(),
                self.limits,
            ),
            replay: ReplayEngine::new(self.store.clone(), self.dispatcher, index.clone(), self.limits),
            store: self.store,
            index,
            cancel: self.cancel,
        })
    }
}

/// Request-level entry point: validates wire requests, runs them through the
/// engines and shapes the responses.
///
/// Every method returns `Err` only for whole-request problems: an
/// [`InvalidRequest`](ErrorKind::InvalidRequest) before any work started, or
/// an [`Inconsistent`](ErrorKind::Inconsistent) cache. Everything else is
/// reported per document inside the response.
pub struct Pipeline {
    store: StoreHandle,
    index: Arc<VersionIndex>,
    acquisition: AcquisitionEngine,
    replay: ReplayEngine,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn builder(store: StoreHandle, fetcher: FetcherHandle, dispatcher: DispatcherHandle) -> PipelineBuilder {
        PipelineBuilder { store, fetcher, dispatcher, limits: Limits::default(), cancel: CancellationToken::new() }
    }

    pub fn acquisition(&self) -> &AcquisitionEngine {
        &self.acquisition
    }

    pub fn replay_engine(&self) -> &ReplayEngine {
        &self.replay
    }

    pub fn index(&self) -> &VersionIndex {
        &self.index
    }

    pub async fn acquire(&self, request: &AcquireRequest) -> Result<AcquireResponse> {
        let id = request.validate()?;
        Ok(AcquireResponse::from(&self.acquisition.acquire_one(id, request.force).await))
    }

    pub async fn acquire_range(&self, request: &AcquireRangeRequest) -> Result<AcquireRangeResponse> {
        let range = request.validate()?;
        let batch = self.acquisition.acquire_range(range, request.force, &self.cancel).await;
        Ok(AcquireRangeResponse::from(&batch))
    }

    pub async fn process(&self, request: &AcquireRequest) -> Result<AcquireResponse> {
        let id = request.validate()?;
        Ok(AcquireResponse::from(&self.acquisition.process_one(id, request.force).await))
    }

    pub async fn process_range(&self, request: &AcquireRangeRequest) -> Result<AcquireRangeResponse> {
        let range = request.validate()?;
        let batch = self.acquisition.process_range(range, request.force, &self.cancel).await;
        Ok(AcquireRangeResponse::from(&batch))
    }

    pub async fn replay(&self, request: &ReplayRequest) -> Result<ReplayResponse> {
        let (id, selector) = request.validate()?;
        Ok(ReplayResponse::from(&self.replay.replay_one(id, selector).await?))
    }

    pub async fn replay_batch(&self, request: &ReplayBatchRequest) -> Result<ReplayBatchResponse> {
        let requests = request.validate()?;
        Ok(ReplayBatchResponse::from(&self.replay.replay_batch(requests, &self.cancel).await?))
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn cache_stats(&self) -> Result<CacheStatsResponse> {
        Ok(self.store.stats().await.or_raise(|| ErrorKind::Cache)?.into())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn cache_list(&self, request: &CacheListRequest) -> Result<CacheListResponse> {
        let limit = request.validate()?;
        let entries = self.store.list(limit).await.or_raise(|| ErrorKind::Cache)?;
        Ok(CacheListResponse::from(entries.as_slice()))
    }
}
