//! Versioned cache of acquired norms.
//!
//! Every successful acquisition of a norm is stored as a new, immutable
//! [`Version`] of that document. Payloads are content-addressed: identical
//! downloads share one blob in the [storage backend](norma_storage), while
//! each download still gets its own version row.
//!
//! # Architecture
//! - [`CacheStore`] is the contract the acquisition and replay engines use.
//!   Implementations assign versions, must be safe for concurrent use, and
//!   may be slow or remote.
//! - [`SqliteStore`] keeps version metadata in SQLite ([`Database`]) and
//!   payloads in a [`BackendHandle`](norma_storage::BackendHandle).
//! - `MemoryStore` (behind the `mock` feature) is a self-contained store for
//!   tests.

mod db;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod memory;
mod model;
mod row;
mod sqlite;
mod store;

pub use crate::db::Database;
#[cfg(any(test, feature = "mock"))]
pub use crate::memory::MemoryStore;
pub use crate::model::{CacheEntry, CacheStats, DocumentId, EntryInfo, Source, Version, content_hash};
pub use crate::sqlite::SqliteStore;
pub use crate::store::{CacheStore, StoreHandle};
