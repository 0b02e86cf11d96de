//! Blob storage for cached norm payloads.
//!
//! Backends are plain key/value object stores addressed by relative paths.
//! Content addressing (hashing, dedup) is the job of the caller; this crate
//! only knows how to put bytes somewhere and get them back.

pub mod backend;
mod codec;
pub mod error;
mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::codec::Compression;
pub use crate::file::FileInfo;
pub use crate::path::{blob_path, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
