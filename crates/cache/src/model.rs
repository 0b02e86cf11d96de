//! Cache model types.
//!
//! The cache store owns these; everything else refers to cached content by
//! `(DocumentId, Version)` key.

use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::num::NonZeroU64;
use std::ops::Deref;
use std::str::FromStr;
use time::UtcDateTime;

/// External identifier of a norm (the InfoLEG `id`). Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(NonZeroU64);
impl DocumentId {
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}
impl TryFrom<u64> for DocumentId {
    type Error = Error;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match NonZeroU64::new(value) {
            Some(id) => Ok(Self(id)),
            None => exn::bail!(ErrorKind::InvalidDocumentId(value)),
        }
    }
}
impl TryFrom<i64> for DocumentId {
    type Error = Error;
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u64::try_from(value) {
            Ok(value) => Self::try_from(value),
            Err(_) => exn::bail!(ErrorKind::InvalidData("document id")),
        }
    }
}
impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Per-document version number, assigned by the store on write.
///
/// The first stored version of a document is `v1`; each later write gets the
/// next number. Versions render as `v<n>` and parse from either `v<n>` or a
/// bare `<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u32);
impl Version {
    pub const FIRST: Version = Version(1);

    pub fn new(n: u32) -> Option<Self> {
        (n > 0).then_some(Self(n))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}
impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "v{}", self.0)
    }
}
impl FromStr for Version {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('v').or_else(|| s.strip_prefix('V')).unwrap_or(s);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Version::new)
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidVersion(s.to_string())))
    }
}
impl TryFrom<i64> for Version {
    type Error = Error;
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .ok()
            .and_then(Version::new)
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidData("version")))
    }
}

/// How a cache entry came to exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Source {
    /// Acquired from the origin.
    #[default]
    Scraped,
    /// Re-stored from another cache rather than fetched.
    Replayed,
}
impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Scraped => "scraped",
            Source::Replayed => "replayed",
        }
    }
}
impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for Source {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scraped" => Ok(Source::Scraped),
            "replayed" => Ok(Source::Replayed),
            _ => exn::bail!(ErrorKind::InvalidData("source")),
        }
    }
}

/// Hex BLAKE3 hash of a payload, the key its blob is stored under.
pub fn content_hash(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Metadata of one cached version, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub document_id: DocumentId,
    pub version: Version,
    /// BLAKE3 hash of the payload
    pub content_hash: String,
    /// Payload size in bytes (uncompressed)
    pub size: u64,
    pub fetched_at: UtcDateTime,
    pub source: Source,
}

/// One cached version of a document, payload included. Immutable once
/// written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    info: EntryInfo,
    pub payload: Vec<u8>,
}
impl CacheEntry {
    pub fn new(info: EntryInfo, payload: Vec<u8>) -> Self {
        Self { info, payload }
    }

    pub fn info(&self) -> &EntryInfo {
        &self.info
    }

    pub fn into_parts(self) -> (EntryInfo, Vec<u8>) {
        (self.info, self.payload)
    }
}
impl Deref for CacheEntry {
    type Target = EntryInfo;
    fn deref(&self) -> &EntryInfo {
        &self.info
    }
}

/// Aggregate figures for cache introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored versions across all documents
    pub entries: u64,
    /// Number of distinct documents
    pub documents: u64,
    /// Number of distinct payloads (blobs)
    pub blobs: u64,
    /// Sum of payload sizes over all versions (uncompressed)
    pub payload_bytes: u64,
    /// Bytes occupied by blobs in the storage backend
    pub stored_bytes: u64,
}
