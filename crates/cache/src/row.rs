use crate::error::{Error, ErrorKind};
use crate::model::{DocumentId, EntryInfo, Source, Version};
use exn::ResultExt;
use std::path::PathBuf;
use time::UtcDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) document_id: i64,
    pub(crate) version: i64,
    pub(crate) content_hash: String,
    pub(crate) content_size: i64,
    pub(crate) blob_path: String,
    pub(crate) stored_size: i64,
    pub(crate) source: String,
    pub(crate) fetched_at: i64,
}
impl EntryRow {
    /// Location of the payload blob inside the storage backend.
    pub(crate) fn blob_path(&self) -> PathBuf {
        PathBuf::from(&self.blob_path)
    }
}
impl TryFrom<&EntryRow> for EntryInfo {
    type Error = Error;
    fn try_from(row: &EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            document_id: DocumentId::try_from(row.document_id)?,
            version: Version::try_from(row.version)?,
            content_hash: row.content_hash.clone(),
            size: u64::try_from(row.content_size).or_raise(|| ErrorKind::InvalidData("content size"))?,
            fetched_at: UtcDateTime::from_unix_timestamp(row.fetched_at)
                .or_raise(|| ErrorKind::InvalidData("fetch date"))?,
            source: row.source.parse::<Source>()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct KeyRow {
    pub(crate) document_id: i64,
    pub(crate) version: i64,
}
impl TryFrom<KeyRow> for (DocumentId, Version) {
    type Error = Error;
    fn try_from(row: KeyRow) -> Result<Self, Self::Error> {
        Ok((DocumentId::try_from(row.document_id)?, Version::try_from(row.version)?))
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BlobRow {
    pub(crate) blob_path: String,
    pub(crate) stored_size: i64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct StatsRow {
    pub(crate) entries: i64,
    pub(crate) documents: i64,
    pub(crate) blobs: i64,
    pub(crate) payload_bytes: i64,
    pub(crate) stored_bytes: i64,
}
