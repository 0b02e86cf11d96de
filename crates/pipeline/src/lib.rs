//! Acquisition, caching and dispatch of InfoLEG norms.
//!
//! # Architecture
//! - [`AcquisitionEngine`] implements cache-aside retrieval: look in the
//!   [cache store](norma_cache::CacheStore) unless forced, otherwise ask the
//!   [`Fetcher`](fetch::Fetcher) and store the result as a new version. The
//!   "process" variants also hand the document to a
//!   [`Dispatcher`](dispatch::Dispatcher).
//! - [`ReplayEngine`] resolves a version through the [`VersionIndex`] and
//!   sends the cached payload to the queue again, without refetching.
//! - Batches run on a bounded, order-preserving [pool](pool::run_ordered);
//!   one document failing never affects its siblings.
//! - [`Pipeline`] ties it together behind the request/response types in
//!   [`wire`].

pub mod acquire;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod index;
mod pipeline;
pub mod pool;
mod reason;
pub mod replay;
pub mod wire;

pub use crate::acquire::{AcquisitionBatch, AcquisitionEngine, AcquisitionOutcome, AcquisitionResult, IdRange};
pub use crate::index::VersionIndex;
pub use crate::pipeline::{Limits, Pipeline, PipelineBuilder};
pub use crate::reason::Reason;
pub use crate::replay::{ReplayBatch, ReplayEngine, ReplayOutcome, ReplayResult, VersionSelector};
