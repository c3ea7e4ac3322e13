//! Disk-backed object and multipart storage engine for bucketd.
//!
//! The store persists objects under a fan-out directory layout keyed by the
//! MD5 prefix of the object key:
//!
//! ```text
//! <base>/buckets/<bucket>/objects/<hhhh>/<b64url(key)>/data
//! <base>/buckets/<bucket>/objects/<hhhh>/<b64url(key)>/meta.json
//! <multipart_base>/<upload-id>/meta.json
//! <multipart_base>/<upload-id>/part.NNNNN
//! <multipart_base>/<upload-id>/part.NNNNN.meta
//! ```
//!
//! Safety properties the layout and write protocol provide:
//!
//! - **Atomic visibility**: bodies stream to a `*.tmp` file that is fsynced
//!   and renamed into place, so readers observe either the previous
//!   complete object or the new one, never a torn body.
//! - **Path confinement**: keys are validated (no NUL, no leading `/`, no
//!   `..` component, no backslash) and base64-url encoded into a single
//!   path component, and every composed path is checked against the
//!   canonicalized base.
//! - **No in-memory index**: the filesystem is the only shared state;
//!   correctness under concurrency comes from POSIX rename atomicity, not
//!   from process-wide locks.
//!
//! All operations are `async` and suspend only on filesystem and body I/O.

pub mod checksums;
pub mod error;
pub mod list;
pub mod meta;
pub mod multipart;
pub mod object;
pub(crate) mod paths;
pub(crate) mod sink;
pub mod validation;

use std::path::PathBuf;

pub use error::StoreError;
pub use list::{ListOptions, ListResult};
pub use meta::{ObjectMeta, PartMeta, UploadMeta};
pub use object::{ByteRange, ObjectReader};
pub use sink::{ByteStream, bytes_stream};

/// The disk-backed store: object tree plus multipart staging area.
///
/// Cloning is cheap-ish (two `PathBuf`s); handlers typically share one
/// instance behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Store {
    /// Canonicalized object-store base directory.
    pub(crate) root: PathBuf,
    /// Canonicalized multipart staging base directory.
    pub(crate) multipart_root: PathBuf,
}

impl Store {
    /// Open (and create, if needed) a store rooted at the given directories.
    ///
    /// Both directories are created with mode `0700` and canonicalized so
    /// that later path-confinement checks chase symlinks exactly once, at
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if a directory cannot be created or
    /// canonicalized.
    pub async fn open(
        root: impl Into<PathBuf>,
        multipart_root: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        let multipart_root = multipart_root.into();

        paths::create_dir_all_private(&root).await?;
        paths::create_dir_all_private(&multipart_root).await?;

        Ok(Self {
            root: tokio::fs::canonicalize(&root).await?,
            multipart_root: tokio::fs::canonicalize(&multipart_root).await?,
        })
    }
}
