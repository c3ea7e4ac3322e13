//! Single-shot object operations: put, get, head, delete, copy.
//!
//! The commit point for every write is the rename of `data.tmp` onto
//! `data`; `meta.json` is installed after the body so a concurrent reader
//! can at worst pair new bytes with a briefly stale metadata record, never
//! with a torn body.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncSeekExt, ReadBuf};
use tracing::{debug, trace};

use crate::Store;
use crate::checksums::quote_etag;
use crate::error::StoreError;
use crate::meta::ObjectMeta;
use crate::paths::{self, DATA_FILE, META_FILE};
use crate::sink::{self, ByteStream};
use crate::validation::{validate_bucket_name, validate_object_key, validate_user_metadata};

/// The content type recorded when the client did not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A client-requested byte range, before resolution against the object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`, both inclusive.
    Bounded(u64, u64),
    /// `bytes=start-`, open-ended.
    From(u64),
    /// `bytes=-n`, the final `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Resolve against an object of `size` bytes into an inclusive
    /// `(start, end)` pair, clamping the upper bound to `size - 1`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRange`] if the range lies entirely
    /// outside the object.
    pub fn resolve(self, size: u64) -> Result<(u64, u64), StoreError> {
        let (start, end) = match self {
            Self::Bounded(start, end) => (start, end.min(size.saturating_sub(1))),
            Self::From(start) => (start, size.saturating_sub(1)),
            Self::Suffix(n) => (size.saturating_sub(n), size.saturating_sub(1)),
        };

        if start >= size || start > end {
            return Err(StoreError::InvalidRange { size });
        }
        Ok((start, end))
    }
}

/// A streaming handle onto an object's body (or a slice of it).
///
/// Implements [`AsyncRead`], truncating after the selected length; drop it
/// to close the underlying file.
#[derive(Debug)]
pub struct ObjectReader {
    file: tokio::fs::File,
    remaining: u64,
}

impl ObjectReader {
    /// Bytes left to read.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.remaining
    }

    /// Whether the reader is exhausted (or the selection was empty).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = usize::try_from(this.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());
        let dst = buf.initialize_unfilled_to(max);
        let mut limited = ReadBuf::new(dst);

        match Pin::new(&mut this.file).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let n = limited.filled().len();
                this.remaining -= n as u64;
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl Store {
    /// Store an object from a body stream.
    ///
    /// The body pipes through the MD5 accumulator and the `max_size`
    /// limiter into `data.tmp`, which is fsynced and renamed onto `data` at
    /// clean EOF; `meta.json` is then installed beside it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] for an invalid bucket, key, or
    ///   metadata entry.
    /// - [`StoreError::EntityTooLarge`] if the body exceeds `max_size`.
    /// - [`StoreError::Io`] on filesystem failure (the temp file is removed).
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        user_metadata: HashMap<String, String>,
        body: ByteStream,
        max_size: u64,
    ) -> Result<ObjectMeta, StoreError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        validate_user_metadata(&user_metadata)?;

        let dir = self.object_dir_checked(bucket, key)?;
        paths::create_dir_all_private(&dir).await?;

        let data_path = dir.join(DATA_FILE);
        let tmp = paths::tmp_path(&data_path);
        let outcome = sink::spool_to_file(&tmp, body, max_size).await?;
        tokio::fs::rename(&tmp, &data_path).await?;

        let meta = ObjectMeta {
            key: key.to_owned(),
            size: outcome.size,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned()),
            etag: quote_etag(&outcome.md5_hex),
            last_modified: Utc::now(),
            user_metadata,
        };
        paths::write_json_file(&dir.join(META_FILE), &meta).await?;

        debug!(bucket, key, size = meta.size, etag = %meta.etag, "stored object");
        Ok(meta)
    }

    /// Fetch an object's metadata and a reader over its full body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchKey`] if the object does not exist.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(ObjectMeta, ObjectReader), StoreError> {
        let (meta, file) = self.open_object(bucket, key).await?;
        let remaining = meta.size;
        Ok((meta, ObjectReader { file, remaining }))
    }

    /// Fetch a byte range of an object.
    ///
    /// On success returns the metadata, the resolved inclusive `(start,
    /// end)` pair, and a reader truncated to the selection.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoSuchKey`] if the object does not exist.
    /// - [`StoreError::InvalidRange`] if the range lies outside the object;
    ///   the error carries the total size for the `Content-Range: bytes */N`
    ///   reply.
    pub async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> Result<(ObjectMeta, (u64, u64), ObjectReader), StoreError> {
        let (meta, mut file) = self.open_object(bucket, key).await?;
        let (start, end) = range.resolve(meta.size)?;

        file.seek(SeekFrom::Start(start)).await?;
        let reader = ObjectReader {
            file,
            remaining: end - start + 1,
        };
        Ok((meta, (start, end), reader))
    }

    /// Fetch an object's metadata without opening the body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchKey`] if the object does not exist.
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let dir = self.object_dir_checked(bucket, key)?;
        paths::read_json_file::<ObjectMeta>(&dir.join(META_FILE))
            .await?
            .ok_or_else(|| StoreError::NoSuchKey {
                key: key.to_owned(),
            })
    }

    /// Delete an object. Succeeds whether or not the object existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for an invalid key and
    /// [`StoreError::Io`] for filesystem failures other than not-found.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let dir = self.object_dir_checked(bucket, key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => trace!(bucket, key, "deleted object"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Opportunistically drop the fan-out directory if this was its last
        // entry; failure (not empty, concurrent writer) is fine.
        if let Some(parent) = dir.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        Ok(())
    }

    /// Copy an object within the bucket.
    ///
    /// Content type and user metadata are carried over from the source; the
    /// destination ETag is the single-shot form even if the source was
    /// assembled from parts.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoSuchKey`] if the source does not exist.
    /// - Everything [`Store::put_object`] can return, for the destination.
    pub async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
        max_size: u64,
    ) -> Result<ObjectMeta, StoreError> {
        let (src_meta, file) = self.open_object(bucket, src_key).await?;

        debug!(bucket, src_key, dst_key, size = src_meta.size, "copying object");
        self.put_object(
            bucket,
            dst_key,
            Some(src_meta.content_type),
            src_meta.user_metadata,
            sink::reader_stream(file),
            max_size,
        )
        .await
    }

    /// Read metadata and open the data file for an existing object.
    async fn open_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(ObjectMeta, tokio::fs::File), StoreError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let dir = self.object_dir_checked(bucket, key)?;
        let meta = paths::read_json_file::<ObjectMeta>(&dir.join(META_FILE))
            .await?
            .ok_or_else(|| StoreError::NoSuchKey {
                key: key.to_owned(),
            })?;

        let file = match tokio::fs::File::open(dir.join(DATA_FILE)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NoSuchKey {
                    key: key.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        Ok((meta, file))
    }

    /// Compose and confine the directory for `(bucket, key)`.
    pub(crate) fn object_dir_checked(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<std::path::PathBuf, StoreError> {
        let dir = paths::object_dir(&self.root, bucket, key);
        paths::ensure_within_base(&self.root, &dir)?;
        Ok(dir)
    }
}
