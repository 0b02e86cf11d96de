use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::model::{CacheEntry, CacheStats, DocumentId, EntryInfo, Source, Version, content_hash};
use crate::row::{BlobRow, EntryRow, KeyRow, StatsRow};
use crate::store::CacheStore;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use norma_storage::error::ErrorKind as StorageErrorKind;
use norma_storage::{BackendHandle, Compression, blob_path};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tracing::{debug, instrument, warn};

/// Cache store with version metadata in SQLite and payloads in a storage
/// backend.
///
/// Payloads are written once per content hash under
/// `objects/<hh>/<hash>[.ext]`, compressed with the configured format. Rows
/// remember where their blob lives, so changing the compression format later
/// does not orphan existing entries.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    backend: BackendHandle,
    compression: Compression,
}

impl SqliteStore {
    pub fn new(db: &Database, backend: BackendHandle, compression: Compression) -> Self {
        Self { pool: db.pool().clone(), backend, compression }
    }

    fn sqlx_hates_paths(path: &Path) -> Result<String> {
        Ok(path.to_str().ok_or_raise(|| ErrorKind::InvalidData("blob path"))?.to_string())
    }

    fn row_id(id: DocumentId) -> Result<i64> {
        i64::try_from(id.get()).or_raise(|| ErrorKind::InvalidDocumentId(id.get()))
    }

    /// Make sure a blob for `hash` exists, returning its location and stored
    /// size.
    ///
    /// A blob already on record is reused only if the backend still holds it
    /// at the recorded size. Otherwise it is rewritten in place, keeping the
    /// recorded compression so older rows stay readable.
    async fn ensure_blob(&self, hash: &str, payload: &[u8]) -> Result<(PathBuf, u64)> {
        let existing: Option<BlobRow> = sqlx::query_as(include_str!("../queries/find_blob.sql"))
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let path = match existing {
            Some(row) => {
                let path = PathBuf::from(&row.blob_path);
                let recorded = u64::try_from(row.stored_size).or_raise(|| ErrorKind::InvalidData("stored size"))?;
                match self.backend.stat(&path).await {
                    Ok(info) if info.size == recorded => {
                        debug!(content_hash = hash, blob = %path.display(), "reusing existing blob");
                        return Ok((path, recorded));
                    },
                    Ok(info) => {
                        let found = info.size;
                        warn!(content_hash = hash, blob = %path.display(), found, recorded, "blob size mismatch, rewriting");
                    },
                    Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                        warn!(content_hash = hash, blob = %path.display(), "blob on record is missing, rewriting");
                    },
                    Err(err) => return Err(err).or_raise(|| ErrorKind::Storage),
                }
                path
            },
            None => blob_path(hash, self.compression).or_raise(|| ErrorKind::Storage)?,
        };
        let compressed = Compression::from_path(&path).compress(payload).or_raise(|| ErrorKind::Storage)?;
        self.backend.write(&path, &compressed).await.or_raise(|| ErrorKind::Storage)?;
        Ok((path, compressed.len() as u64))
    }

    async fn load(&self, row: Option<EntryRow>) -> Result<Option<CacheEntry>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let info = EntryInfo::try_from(&row)?;
        let path = row.blob_path();
        let stored = self.backend.read(&path).await.or_raise(|| ErrorKind::Storage)?;
        let payload = Compression::from_path(&path)
            .decompress(&stored)
            .or_raise(|| ErrorKind::Corrupt(info.content_hash.clone()))?;
        if content_hash(&payload) != info.content_hash {
            exn::bail!(ErrorKind::Corrupt(info.content_hash));
        }
        Ok(Some(CacheEntry::new(info, payload)))
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    #[instrument(level = "debug", skip_all, fields(infoleg_id = %id, version = %version))]
    async fn get(&self, id: DocumentId, version: Version) -> Result<Option<CacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(Self::row_id(id)?)
            .bind(i64::from(version.get()))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.load(row).await
    }

    #[instrument(level = "debug", skip_all, fields(infoleg_id = %id))]
    async fn latest(&self, id: DocumentId) -> Result<Option<CacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_latest_entry.sql"))
            .bind(Self::row_id(id)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.load(row).await
    }

    #[instrument(level = "debug", skip_all, fields(infoleg_id = %id, size = payload.len(), source = %source))]
    async fn put(&self, id: DocumentId, payload: &[u8], source: Source) -> Result<EntryInfo> {
        let hash = content_hash(payload);
        let (path, stored_size) = self.ensure_blob(&hash, payload).await?;
        let fetched_at = UtcDateTime::now().replace_nanosecond(0).or_raise(|| ErrorKind::InvalidData("fetch date"))?;
        let size = u64::try_from(payload.len()).or_raise(|| ErrorKind::InvalidData("content size"))?;
        // Version assignment happens inside the INSERT, so concurrent puts
        // for one document serialise on SQLite's write lock.
        let (version,): (i64,) = sqlx::query_as(include_str!("../queries/insert_entry.sql"))
            .bind(Self::row_id(id)?)
            .bind(&hash)
            .bind(i64::try_from(size).or_raise(|| ErrorKind::InvalidData("content size"))?)
            .bind(Self::sqlx_hates_paths(&path)?)
            .bind(i64::try_from(stored_size).or_raise(|| ErrorKind::InvalidData("stored size"))?)
            .bind(source.as_str())
            .bind(fetched_at.unix_timestamp())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(EntryInfo {
            document_id: id,
            version: Version::try_from(version)?,
            content_hash: hash,
            size,
            fetched_at,
            source,
        })
    }

    async fn list(&self, limit: u32) -> Result<Vec<EntryInfo>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_recent_entries.sql"))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.iter().map(EntryInfo::try_from).collect()
    }

    async fn stats(&self) -> Result<CacheStats> {
        let row: StatsRow = sqlx::query_as(include_str!("../queries/stats.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let count = |value: i64, what: &'static str| u64::try_from(value).or_raise(|| ErrorKind::InvalidData(what));
        Ok(CacheStats {
            entries: count(row.entries, "entry count")?,
            documents: count(row.documents, "document count")?,
            blobs: count(row.blobs, "blob count")?,
            payload_bytes: count(row.payload_bytes, "payload bytes")?,
            stored_bytes: count(row.stored_bytes, "stored bytes")?,
        })
    }

    async fn keys(&self) -> Result<Vec<(DocumentId, Version)>> {
        let rows: Vec<KeyRow> = sqlx::query_as(include_str!("../queries/list_keys.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(<(DocumentId, Version)>::try_from).collect()
    }
}
