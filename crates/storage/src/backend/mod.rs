//! Storage backend trait and implementations.
//!
//! [`StorageBackend`] is the unified interface the cache store and the spool
//! dispatcher use to persist bytes, whether they end up on the local
//! filesystem or in memory during tests.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use std::path::Path;

/// Unified interface for storage backends.
///
/// All operations are asynchronous so that slow or remote backends never
/// block the runtime. Objects are written whole and never deleted.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use norma_storage::{backend::StorageBackend, error::Result};
///
/// async fn stored_size(backend: &dyn StorageBackend, blob: &Path) -> Result<u64> {
///     if backend.exists(blob).await? {
///         Ok(backend.stat(blob).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Check if an object exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read object contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write object contents, replacing any existing object at `path`.
    ///
    /// Implementations create parent directories as needed and never expose
    /// a partially written object to readers.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Get object metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
