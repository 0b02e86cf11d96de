//! Wiring from configuration to a running pipeline, and command dispatch.

use crate::cli::{CacheCommand, Command};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use norma_cache::{Database, SqliteStore};
use norma_config::Config;
use norma_pipeline::dispatch::SpoolDispatcher;
use norma_pipeline::error::{Error as PipelineError, ErrorKind as PipelineErrorKind};
use norma_pipeline::fetch::HttpFetcher;
use norma_pipeline::wire::{
    AcquireRangeRequest, AcquireRequest, CacheListRequest, ErrorResponse, ReplayBatchRequest, ReplayRequest,
};
use norma_pipeline::{Limits, Pipeline, VersionSelector};
use norma_storage::backend::LocalBackend;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// What to print for a command.
#[derive(Debug)]
pub(crate) enum Outcome {
    Response(serde_json::Value),
    /// The request was rejected before any work started.
    Rejected(ErrorResponse),
}

/// A pipeline plus the database it must close on the way out.
pub(crate) struct Runtime {
    pub pipeline: Pipeline,
    db: Database,
}

impl Runtime {
    #[instrument(skip_all)]
    pub async fn start(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let blobs = LocalBackend::new("blobs", &config.storage.root).or_raise(|| ErrorKind::Setup("blob storage"))?;
        let spool = LocalBackend::new("spool", &config.queue.spool).or_raise(|| ErrorKind::Setup("queue spool"))?;
        if let Some(parent) = config.database.path.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Setup("database directory"))?;
        }
        let db = Database::connect(&config.database.path).await.or_raise(|| ErrorKind::Setup("cache database"))?;
        let store = SqliteStore::new(&db, Arc::new(blobs), config.storage.compression);
        let fetcher = HttpFetcher::new(&config.origin.base_url, &config.origin.user_agent)
            .or_raise(|| ErrorKind::Setup("origin client"))?;
        let limits = Limits {
            workers: config.limits.workers,
            fetch_timeout: config.limits.fetch_timeout(),
            dispatch_timeout: config.limits.dispatch_timeout(),
        };
        let pipeline = Pipeline::builder(Arc::new(store), Arc::new(fetcher), Arc::new(SpoolDispatcher::new(Arc::new(spool))))
            .limits(limits)
            .cancellation(cancel)
            .build()
            .await
            .or_raise(|| ErrorKind::Setup("pipeline"))?;
        info!(documents = pipeline.index().len(), "pipeline ready");
        Ok(Self { pipeline, db })
    }

    pub async fn shutdown(self) {
        self.db.close().await;
    }
}

pub(crate) async fn run(config_file: Option<&Path>, command: Command, cancel: CancellationToken) -> Result<Outcome> {
    let config = Config::load(config_file).or_raise(|| ErrorKind::Config)?;
    let runtime = Runtime::start(&config, cancel).await?;
    let outcome = execute(&runtime.pipeline, command).await;
    runtime.shutdown().await;
    outcome
}

pub(crate) async fn execute(pipeline: &Pipeline, command: Command) -> Result<Outcome> {
    match command {
        Command::Scrape(args) => respond(pipeline.acquire(&AcquireRequest::from(&args)).await),
        Command::ScrapeRange(args) => respond(pipeline.acquire_range(&AcquireRangeRequest::from(&args)).await),
        Command::Process(args) => respond(pipeline.process(&AcquireRequest::from(&args)).await),
        Command::ProcessRange(args) => respond(pipeline.process_range(&AcquireRangeRequest::from(&args)).await),
        Command::Replay { infoleg_id, version } => match version.parse::<VersionSelector>() {
            Ok(version) => respond(pipeline.replay(&ReplayRequest { infoleg_id, version }).await),
            Err(err) => respond(Err::<(), _>(err)),
        },
        Command::ReplayBatch { input } => {
            let raw = read_input(input).await?;
            match serde_json::from_slice::<ReplayBatchRequest>(&raw) {
                Ok(request) => respond(pipeline.replay_batch(&request).await),
                Err(err) => Ok(Outcome::Rejected(ErrorResponse::invalid_request(format!("malformed replay batch: {err}")))),
            }
        },
        Command::Cache { action: CacheCommand::Stats } => respond(pipeline.cache_stats().await),
        Command::Cache { action: CacheCommand::List { limit } } => {
            respond(pipeline.cache_list(&CacheListRequest { limit }).await)
        },
    }
}

fn respond<T: Serialize>(result: norma_pipeline::error::Result<T>) -> Result<Outcome> {
    match result {
        Ok(body) => Ok(Outcome::Response(serde_json::to_value(body).or_raise(|| ErrorKind::Output)?)),
        Err(err) => match rejection(&err) {
            Some(rejection) => Ok(Outcome::Rejected(rejection)),
            None => Err(err).or_raise(|| ErrorKind::Pipeline),
        },
    }
}

/// Validation failures become a rejection; anything else stays an error.
fn rejection(err: &PipelineError) -> Option<ErrorResponse> {
    match &**err {
        PipelineErrorKind::InvalidRequest(message) => Some(ErrorResponse::invalid_request(message.clone())),
        _ => None,
    }
}

async fn read_input(input: Option<PathBuf>) -> Result<Vec<u8>> {
    match input {
        Some(path) if path != Path::new("-") => tokio::fs::read(&path).await.or_raise(|| ErrorKind::Input),
        _ => {
            let mut raw = Vec::new();
            tokio::io::stdin().read_to_end(&mut raw).await.or_raise(|| ErrorKind::Input)?;
            Ok(raw)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SingleArgs;
    use norma_cache::{CacheStore, DocumentId, MemoryStore, Source};
    use norma_pipeline::dispatch::MockDispatcher;
    use norma_pipeline::fetch::MockFetcher;
    use serde_json::json;

    async fn pipeline() -> (Pipeline, Arc<MemoryStore>, Arc<MockDispatcher>) {
        let store = Arc::new(MemoryStore::new());
        store.put(DocumentId::try_from(7u64).unwrap(), b"<html>siete</html>", Source::Scraped).await.unwrap();
        let dispatcher = Arc::new(MockDispatcher::new());
        let pipeline = Pipeline::builder(store.clone(), Arc::new(MockFetcher::serving([1, 2, 3])), dispatcher.clone())
            .build()
            .await
            .unwrap();
        (pipeline, store, dispatcher)
    }

    fn response(outcome: Outcome) -> serde_json::Value {
        match outcome {
            Outcome::Response(body) => body,
            Outcome::Rejected(rejection) => panic!("unexpected rejection: {rejection:?}"),
        }
    }

    #[tokio::test]
    async fn test_scrape_prints_wire_shape() {
        let (pipeline, _, _) = pipeline().await;
        let body = response(execute(&pipeline, Command::Scrape(SingleArgs { infoleg_id: 1, force: false })).await.unwrap());
        assert_eq!(body["status"], "success");
        assert_eq!(body["source"], "scraped");
        assert_eq!(body["cache_hit"], false);
        assert_eq!(body["version"], "v1");
    }

    #[tokio::test]
    async fn test_replay_of_seeded_entry() {
        let (pipeline, _, dispatcher) = pipeline().await;
        let command = Command::Replay { infoleg_id: 7, version: "v1".to_string() };
        let body = response(execute(&pipeline, command).await.unwrap());
        assert_eq!(body, json!({
            "status": "success",
            "infoleg_id": 7,
            "version": "v1",
            "source": "cache",
            "message": "Norm 7 v1 replayed to the processing queue",
        }));
        assert_eq!(dispatcher.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_version_is_rejected() {
        let (pipeline, _, dispatcher) = pipeline().await;
        let command = Command::Replay { infoleg_id: 7, version: "yesterday".to_string() };
        let Outcome::Rejected(rejection) = execute(&pipeline, command).await.unwrap() else {
            panic!("expected rejection");
        };
        assert_eq!(serde_json::to_value(&rejection).unwrap()["reason"], "invalid_request");
        assert_eq!(dispatcher.attempts(), 0);
    }

    #[tokio::test]
    async fn test_zero_id_is_rejected() {
        let (pipeline, store, _) = pipeline().await;
        let outcome = execute(&pipeline, Command::Process(SingleArgs { infoleg_id: 0, force: false })).await.unwrap();
        assert!(matches!(outcome, Outcome::Rejected(_)));
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_inconsistency_is_an_error() {
        let (pipeline, store, _) = pipeline().await;
        store.forget(DocumentId::try_from(7u64).unwrap(), norma_cache::Version::FIRST).await;
        let err = execute(&pipeline, Command::Replay { infoleg_id: 7, version: "latest".to_string() }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Pipeline));
    }

    #[tokio::test]
    async fn test_replay_batch_from_file() {
        let (pipeline, _, _) = pipeline().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"documents": [{"infoleg_id": 7}, {"infoleg_id": 8}]}"#).unwrap();
        let body = response(execute(&pipeline, Command::ReplayBatch { input: Some(path) }).await.unwrap());
        assert_eq!(body["status"], "completed");
        assert_eq!(body["success_count"], 1);
        assert_eq!(body["failed_count"], 1);
        assert_eq!(body["results"][1]["reason"], "cache_miss");

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "[1, 2").unwrap();
        let outcome = execute(&pipeline, Command::ReplayBatch { input: Some(garbage) }).await.unwrap();
        assert!(matches!(outcome, Outcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_runtime_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().join("store");
        config.queue.spool = dir.path().join("spool");
        config.database.path = dir.path().join("db").join("cache.sqlite");

        let runtime = Runtime::start(&config, CancellationToken::new()).await.unwrap();
        let body = response(
            execute(&runtime.pipeline, Command::Cache { action: CacheCommand::Stats }).await.unwrap(),
        );
        assert_eq!(body["entries"], 0);
        runtime.shutdown().await;
        assert!(config.database.path.exists());
    }
}
