//! Request and response shapes exchanged with callers.
//!
//! Field names here are a contract other systems depend on. Requests are
//! validated before any work starts; a request that fails validation is
//! answered with a single [`ErrorResponse`].

use crate::acquire::{AcquisitionBatch, AcquisitionOutcome, AcquisitionResult, IdRange};
use crate::error::{ErrorKind, Result};
use crate::reason::Reason;
use crate::replay::{ReplayBatch, ReplayOutcome, ReplayResult, VersionSelector};
use exn::ResultExt;
use norma_cache::{CacheStats, DocumentId, EntryInfo};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcDateTime};

pub const DEFAULT_MAX_DOCS: u32 = 10;
pub const MAX_DOCS_LIMIT: u32 = 100;
pub const DEFAULT_LIST_LIMIT: u32 = 20;
pub const LIST_LIMIT_MAX: u32 = 1000;

/// Format a timestamp as RFC 3339 (second precision).
pub(crate) fn rfc3339(at: UtcDateTime) -> String {
    OffsetDateTime::from_unix_timestamp(at.unix_timestamp())
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_default()
}

fn document_id(value: u64, field: &str) -> Result<DocumentId> {
    DocumentId::try_from(value).or_raise(|| ErrorKind::invalid(format!("{field} must be a positive integer")))
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcquireRequest {
    pub infoleg_id: u64,
    #[serde(default)]
    pub force: bool,
}
impl AcquireRequest {
    pub fn validate(&self) -> Result<DocumentId> {
        document_id(self.infoleg_id, "infoleg_id")
    }
}

fn default_max_docs() -> u32 {
    DEFAULT_MAX_DOCS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcquireRangeRequest {
    pub start_id: u64,
    pub end_id: u64,
    #[serde(default = "default_max_docs")]
    pub max_docs: u32,
    #[serde(default)]
    pub force: bool,
}
impl AcquireRangeRequest {
    pub fn validate(&self) -> Result<IdRange> {
        let start = document_id(self.start_id, "start_id")?;
        let end = document_id(self.end_id, "end_id")?;
        if start > end {
            exn::bail!(ErrorKind::invalid(format!(
                "start_id ({start}) must not be greater than end_id ({end})"
            )));
        }
        if !(1..=MAX_DOCS_LIMIT).contains(&self.max_docs) {
            exn::bail!(ErrorKind::invalid(format!(
                "max_docs must be between 1 and {MAX_DOCS_LIMIT}, got {}",
                self.max_docs
            )));
        }
        Ok(IdRange::new(start, end, self.max_docs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayRequest {
    pub infoleg_id: u64,
    #[serde(default)]
    pub version: VersionSelector,
}
impl ReplayRequest {
    pub fn validate(&self) -> Result<(DocumentId, VersionSelector)> {
        Ok((document_id(self.infoleg_id, "infoleg_id")?, self.version))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayBatchRequest {
    pub documents: Vec<ReplayRequest>,
}
impl ReplayBatchRequest {
    /// Validates every item; one bad item rejects the whole batch.
    pub fn validate(&self) -> Result<Vec<(DocumentId, VersionSelector)>> {
        self.documents
            .iter()
            .enumerate()
            .map(|(n, doc)| {
                let id = document_id(doc.infoleg_id, &format!("documents[{n}].infoleg_id"))?;
                Ok((id, doc.version))
            })
            .collect()
    }
}

fn default_list_limit() -> u32 {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheListRequest {
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}
impl Default for CacheListRequest {
    fn default() -> Self {
        Self { limit: DEFAULT_LIST_LIMIT }
    }
}
impl CacheListRequest {
    pub fn validate(&self) -> Result<u32> {
        if !(1..=LIST_LIMIT_MAX).contains(&self.limit) {
            exn::bail!(ErrorKind::invalid(format!("limit must be between 1 and {LIST_LIMIT_MAX}, got {}", self.limit)));
        }
        Ok(self.limit)
    }
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Cached,
    Error,
    Completed,
}

/// Where the content of an acquisition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Scraped,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub status: Status,
    pub infoleg_id: u64,
    pub source: ContentSource,
    pub cache_hit: bool,
    pub forced: bool,
    pub timestamp: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}
impl From<&AcquisitionResult> for AcquireResponse {
    fn from(result: &AcquisitionResult) -> Self {
        let id = result.document_id;
        let (status, cache_hit, entry, reason, message) = match &result.outcome {
            AcquisitionOutcome::Scraped(entry) => {
                (Status::Success, false, Some(entry), None, format!("Norm {id} scraped and cached as {}", entry.version))
            },
            AcquisitionOutcome::Cached(entry) => {
                (Status::Cached, true, Some(entry), None, format!("Norm {id} served from cache ({})", entry.version))
            },
            AcquisitionOutcome::Failed(failure) => {
                (Status::Error, failure.cache_hit, failure.entry.as_ref(), Some(failure.reason), failure.message.clone())
            },
        };
        Self {
            status,
            infoleg_id: id.get(),
            source: if cache_hit { ContentSource::Cache } else { ContentSource::Scraped },
            cache_hit,
            forced: result.forced,
            timestamp: rfc3339(result.timestamp),
            message,
            reason,
            version: entry.map(|entry| entry.version.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireRangeResponse {
    pub status: Status,
    pub scraped_count: usize,
    pub cached_count: usize,
    pub failed_count: usize,
    pub results: Vec<AcquireResponse>,
}
impl From<&AcquisitionBatch> for AcquireRangeResponse {
    fn from(batch: &AcquisitionBatch) -> Self {
        Self {
            status: Status::Completed,
            scraped_count: batch.scraped_count(),
            cached_count: batch.cached_count(),
            failed_count: batch.failed_count(),
            results: batch.results.iter().map(AcquireResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub status: Status,
    pub infoleg_id: u64,
    /// Resolved version, or the requested selector when nothing resolved.
    pub version: String,
    pub source: ContentSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}
impl From<&ReplayResult> for ReplayResponse {
    fn from(result: &ReplayResult) -> Self {
        let id = result.document_id;
        let version = result.version_resolved().map_or_else(|| result.requested.to_string(), |v| v.to_string());
        let (status, reason, message) = match &result.outcome {
            ReplayOutcome::Dispatched(entry) => {
                (Status::Success, None, format!("Norm {id} {} replayed to the processing queue", entry.version))
            },
            ReplayOutcome::Failed { reason, message, .. } => (Status::Error, Some(*reason), message.clone()),
        };
        Self { status, infoleg_id: id.get(), version, source: ContentSource::Cache, message, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayBatchResponse {
    pub status: Status,
    pub success_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    pub results: Vec<ReplayResponse>,
}
impl From<&ReplayBatch> for ReplayBatchResponse {
    fn from(batch: &ReplayBatch) -> Self {
        Self {
            status: Status::Completed,
            success_count: batch.success_count(),
            failed_count: batch.failed_count(),
            total_count: batch.total_count(),
            results: batch.results.iter().map(ReplayResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub entries: u64,
    pub documents: u64,
    pub blobs: u64,
    pub payload_bytes: u64,
    pub stored_bytes: u64,
}
impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entries,
            documents: stats.documents,
            blobs: stats.blobs,
            payload_bytes: stats.payload_bytes,
            stored_bytes: stats.stored_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntryView {
    pub infoleg_id: u64,
    pub version: String,
    pub content_hash: String,
    pub size: u64,
    pub fetched_at: String,
    pub source: String,
}
impl From<&EntryInfo> for CachedEntryView {
    fn from(info: &EntryInfo) -> Self {
        Self {
            infoleg_id: info.document_id.get(),
            version: info.version.to_string(),
            content_hash: info.content_hash.clone(),
            size: info.size,
            fetched_at: rfc3339(info.fetched_at),
            source: info.source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheListResponse {
    pub count: usize,
    pub entries: Vec<CachedEntryView>,
}
impl From<&[EntryInfo]> for CacheListResponse {
    fn from(entries: &[EntryInfo]) -> Self {
        Self { count: entries.len(), entries: entries.iter().map(CachedEntryView::from).collect() }
    }
}

/// Top-level rejection of a whole request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: Status,
    pub reason: Reason,
    pub message: String,
}
impl ErrorResponse {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self { status: Status::Error, reason: Reason::InvalidRequest, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_range_defaults() {
        let request: AcquireRangeRequest = serde_json::from_value(json!({"start_id": 100, "end_id": 109})).unwrap();
        assert_eq!(request.max_docs, 10);
        assert!(!request.force);
        let range = request.validate().unwrap();
        assert_eq!(range.ids().map(|id| id.get()).collect::<Vec<_>>(), (100..=109).collect::<Vec<_>>());
    }

    #[rstest]
    #[case(json!({"start_id": 0, "end_id": 5}))]
    #[case(json!({"start_id": 9, "end_id": 5}))]
    #[case(json!({"start_id": 1, "end_id": 5, "max_docs": 0}))]
    #[case(json!({"start_id": 1, "end_id": 5, "max_docs": 101}))]
    fn test_invalid_ranges(#[case] body: serde_json::Value) {
        let request: AcquireRangeRequest = serde_json::from_value(body).unwrap();
        let err = request.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRequest(_)));
    }

    #[rstest]
    #[case(json!({"start_id": -1, "end_id": 5}))]
    #[case(json!({"start_id": 1}))]
    #[case(json!({"start_id": 1, "end_id": 2, "limit": 3}))]
    fn test_malformed_ranges_do_not_parse(#[case] body: serde_json::Value) {
        assert!(serde_json::from_value::<AcquireRangeRequest>(body).is_err());
    }

    #[test]
    fn test_zero_id_is_rejected() {
        let request = AcquireRequest { infoleg_id: 0, force: true };
        assert!(request.validate().is_err());
    }

    #[rstest]
    #[case(json!({"infoleg_id": 7}), VersionSelector::Latest)]
    #[case(json!({"infoleg_id": 7, "version": "latest"}), VersionSelector::Latest)]
    #[case(json!({"infoleg_id": 7, "version": "v1"}), VersionSelector::Exact(norma_cache::Version::FIRST))]
    fn test_replay_versions(#[case] body: serde_json::Value, #[case] expected: VersionSelector) {
        let request: ReplayRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.version, expected);
    }

    #[test]
    fn test_replay_batch_rejects_one_bad_item() {
        let request: ReplayBatchRequest = serde_json::from_value(json!({
            "documents": [{"infoleg_id": 1}, {"infoleg_id": 0, "version": "v2"}]
        }))
        .unwrap();
        let err = request.validate().unwrap_err();
        assert!((*err).to_string().contains("documents[1]"));
        assert!(serde_json::from_value::<ReplayRequest>(json!({"infoleg_id": 1, "version": "v0"})).is_err());
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(1000, true)]
    #[case(1001, false)]
    fn test_list_limit(#[case] limit: u32, #[case] valid: bool) {
        assert_eq!(CacheListRequest { limit }.validate().is_ok(), valid);
        assert_eq!(CacheListRequest::default().limit, 20);
    }

    #[test]
    fn test_error_response_shape() {
        let value = serde_json::to_value(ErrorResponse::invalid_request("max_docs must be between 1 and 100")).unwrap();
        assert_eq!(value, json!({"status": "error", "reason": "invalid_request", "message": "max_docs must be between 1 and 100"}));
    }

    #[test]
    fn test_rfc3339() {
        let at = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(rfc3339(at), "2023-11-14T22:13:20Z");
    }
}
