//! Path validation and blob addressing.
//!
//! Every path handed to a backend is relative to that backend's root and
//! must never escape it.

use crate::Compression;
use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Directory under the storage root holding content-addressed blobs.
const OBJECTS_DIR: &str = "objects";

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use norma_storage::validate_path;
/// assert!(validate_path("objects/3f/3fa9.gz").is_ok());
/// assert!(validate_path("queue/a/../b.json").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("queue/./pending//b.json/").unwrap(),
///     Path::new("queue/pending/b.json")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // paths in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Location of a content-addressed blob.
///
/// Blobs fan out over 256 directories keyed by the first two hex characters
/// of their hash, and carry the extension of the format they were written
/// with.
///
/// ```
/// use std::path::Path;
/// use norma_storage::{Compression, blob_path};
/// assert_eq!(
///     blob_path("3fa9c0", Compression::Gzip).unwrap(),
///     Path::new("objects/3f/3fa9c0.gz")
/// );
/// assert!(blob_path("../x", Compression::None).is_err());
/// ```
pub fn blob_path(hash: &str, compression: Compression) -> Result<PathBuf> {
    if hash.len() < 2 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(hash)));
    }
    let path = format!("{OBJECTS_DIR}/{}/{hash}{}", &hash[..2], compression.extension());
    validate(path)
}
