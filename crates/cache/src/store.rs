use crate::error::Result;
use crate::model::{CacheEntry, CacheStats, DocumentId, EntryInfo, Source, Version};
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a cache store.
pub type StoreHandle = Arc<dyn CacheStore>;

/// Versioned document cache.
///
/// Every [`put`](CacheStore::put) creates a new immutable version; the store,
/// not the caller, picks the version number, and two concurrent puts for the
/// same document must never receive the same one. Reads and writes may run
/// concurrently.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch one exact version of a document, payload included.
    async fn get(&self, id: DocumentId, version: Version) -> Result<Option<CacheEntry>>;

    /// Fetch the highest stored version of a document.
    async fn latest(&self, id: DocumentId) -> Result<Option<CacheEntry>>;

    /// Store a payload as the next version of a document.
    async fn put(&self, id: DocumentId, payload: &[u8], source: Source) -> Result<EntryInfo>;

    /// Most recently stored entries, newest first.
    async fn list(&self, limit: u32) -> Result<Vec<EntryInfo>>;

    async fn stats(&self) -> Result<CacheStats>;

    /// Every stored `(document, version)` key, ordered by document then
    /// version.
    async fn keys(&self) -> Result<Vec<(DocumentId, Version)>>;
}
