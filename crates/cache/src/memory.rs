//! In-memory cache store for testing.

use crate::error::{ErrorKind, Result};
use crate::model::{CacheEntry, CacheStats, DocumentId, EntryInfo, Source, Version, content_hash};
use crate::store::CacheStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// Cache store kept entirely in a [`BTreeMap`].
///
/// Besides behaving like a real store, it can be told to fail reads or
/// writes, counts successful puts, and can [`forget`](Self::forget) entries
/// behind the back of anything that indexed them.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(DocumentId, Version), CacheEntry>>,
    // Insertion order, for `list`.
    log: RwLock<Vec<(DocumentId, Version)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get`/`latest` fail with a storage error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `put` fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful puts since construction.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Drop one entry without anyone else noticing.
    pub async fn forget(&self, id: DocumentId, version: Version) -> bool {
        // Same lock order as `put` and `list`: entries, then log.
        let mut entries = self.entries.write().await;
        self.log.write().await.retain(|key| *key != (id, version));
        entries.remove(&(id, version)).is_some()
    }

    fn check(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Storage);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, id: DocumentId, version: Version) -> Result<Option<CacheEntry>> {
        Self::check(&self.fail_reads)?;
        Ok(self.entries.read().await.get(&(id, version)).cloned())
    }

    async fn latest(&self, id: DocumentId) -> Result<Option<CacheEntry>> {
        Self::check(&self.fail_reads)?;
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().find(|((doc, _), _)| *doc == id).map(|(_, entry)| entry.clone()))
    }

    async fn put(&self, id: DocumentId, payload: &[u8], source: Source) -> Result<EntryInfo> {
        Self::check(&self.fail_writes)?;
        // Hold the write lock across version assignment and insert.
        let mut entries = self.entries.write().await;
        let version = entries
            .keys()
            .rev()
            .find(|(doc, _)| *doc == id)
            .map_or(Version::FIRST, |(_, version)| version.next());
        let info = EntryInfo {
            document_id: id,
            version,
            content_hash: content_hash(payload),
            size: payload.len() as u64,
            fetched_at: UtcDateTime::now(),
            source,
        };
        entries.insert((id, version), CacheEntry::new(info.clone(), payload.to_vec()));
        self.log.write().await.push((id, version));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(info)
    }

    async fn list(&self, limit: u32) -> Result<Vec<EntryInfo>> {
        let entries = self.entries.read().await;
        let log = self.log.read().await;
        Ok(log
            .iter()
            .rev()
            .filter_map(|key| entries.get(key).map(|entry| entry.info().clone()))
            .take(limit as usize)
            .collect())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.read().await;
        let documents: HashSet<_> = entries.keys().map(|(doc, _)| *doc).collect();
        let blobs: HashSet<_> = entries.values().map(|entry| entry.content_hash.as_str()).collect();
        let payload_bytes = entries.values().map(|entry| entry.size).sum();
        Ok(CacheStats {
            entries: entries.len() as u64,
            documents: documents.len() as u64,
            blobs: blobs.len() as u64,
            payload_bytes,
            // Nothing is compressed in memory; count each blob once.
            stored_bytes: {
                let mut seen = HashSet::new();
                entries.values().filter(|e| seen.insert(e.content_hash.as_str())).map(|e| e.size).sum()
            },
        })
    }

    async fn keys(&self) -> Result<Vec<(DocumentId, Version)>> {
        Ok(self.entries.read().await.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn id(n: u64) -> DocumentId {
        DocumentId::try_from(n).unwrap()
    }

    #[tokio::test]
    async fn test_versions_are_per_document() {
        let store = MemoryStore::new();
        store.put(id(10), b"a", Source::Scraped).await.unwrap();
        store.put(id(2), b"b", Source::Scraped).await.unwrap();
        let info = store.put(id(10), b"c", Source::Replayed).await.unwrap();
        assert_eq!(info.version.get(), 2);
        assert_eq!(store.latest(id(10)).await.unwrap().unwrap().payload, b"c");
        assert_eq!(store.latest(id(2)).await.unwrap().unwrap().version, Version::FIRST);
        assert_eq!(store.puts(), 3);
    }

    #[tokio::test]
    async fn test_failure_knobs() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(store.put(id(1), b"x", Source::Scraped).await.is_err());
        store.fail_writes(false);
        store.put(id(1), b"x", Source::Scraped).await.unwrap();
        store.fail_reads(true);
        assert!(store.latest(id(1)).await.is_err());
        assert!(store.get(id(1), Version::FIRST).await.is_err());
    }

    #[tokio::test]
    async fn test_forget_and_list() {
        let store = MemoryStore::new();
        store.put(id(1), b"x", Source::Scraped).await.unwrap();
        store.put(id(2), b"x", Source::Scraped).await.unwrap();
        store.put(id(3), b"y", Source::Scraped).await.unwrap();
        assert!(store.forget(id(2), Version::FIRST).await);
        assert!(!store.forget(id(2), Version::FIRST).await);

        let listed: Vec<u64> = store.list(10).await.unwrap().iter().map(|e| e.document_id.get()).collect();
        assert_eq!(listed, vec![3, 1]);
        let stats = store.stats().await.unwrap();
        assert_eq!((stats.entries, stats.documents, stats.blobs), (2, 2, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_and_forget_complete() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..64u64)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    let info = store.put(id(n % 4 + 1), b"x", Source::Scraped).await.unwrap();
                    store.forget(info.document_id, info.version).await
                })
            })
            .collect();
        let forgotten = tokio::time::timeout(Duration::from_secs(10), async {
            let mut forgotten = 0;
            for handle in handles {
                forgotten += usize::from(handle.await.unwrap());
            }
            forgotten
        })
        .await
        .expect("put and forget stalled");
        assert_eq!(forgotten, 64);
        assert_eq!(store.puts(), 64);
        assert!(store.list(100).await.unwrap().is_empty());
    }
}
