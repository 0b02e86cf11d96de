//! In-memory index of cached versions per document.
//!
//! The index answers "which versions of this document exist, and which is
//! the newest" without touching the store. It is derived state: the cache
//! store is the source of truth and the index is rebuilt from it on startup.
//! The lock is a plain `std` lock that is never held across an `.await`.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use norma_cache::{CacheStore, DocumentId, Version};
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{info, instrument};

#[derive(Debug, Default)]
pub struct VersionIndex {
    versions: RwLock<HashMap<DocumentId, BTreeSet<Version>>>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with the keys currently in `store`.
    #[instrument(level = "debug", skip_all)]
    pub async fn rebuild(&self, store: &dyn CacheStore) -> Result<()> {
        let keys = store.keys().await.or_raise(|| ErrorKind::Cache)?;
        let total = keys.len();
        let mut fresh: HashMap<DocumentId, BTreeSet<Version>> = HashMap::new();
        for (id, version) in keys {
            fresh.entry(id).or_default().insert(version);
        }
        let documents = fresh.len();
        *self.versions.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        info!(documents, versions = total, "version index rebuilt");
        Ok(())
    }

    /// Note that `version` of `id` exists in the store.
    pub fn record(&self, id: DocumentId, version: Version) {
        self.versions.write().unwrap_or_else(PoisonError::into_inner).entry(id).or_default().insert(version);
    }

    pub fn latest(&self, id: DocumentId) -> Option<Version> {
        let versions = self.versions.read().unwrap_or_else(PoisonError::into_inner);
        versions.get(&id).and_then(|set| set.last().copied())
    }

    pub fn contains(&self, id: DocumentId, version: Version) -> bool {
        let versions = self.versions.read().unwrap_or_else(PoisonError::into_inner);
        versions.get(&id).is_some_and(|set| set.contains(&version))
    }

    /// All known versions of `id`, oldest first.
    pub fn versions(&self, id: DocumentId) -> Vec<Version> {
        let versions = self.versions.read().unwrap_or_else(PoisonError::into_inner);
        versions.get(&id).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.versions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
