//! The streaming write pipeline.
//!
//! Request bodies arrive as a chunk stream and flow through a single linear
//! pipeline: size limiter → MD5 accumulator → temp file. Nothing is
//! buffered beyond the chunk in flight; the caller commits the spooled file
//! with an atomic rename once the stream hits clean EOF.

use std::path::Path;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::checksums::Md5Accumulator;
use crate::error::StoreError;
use crate::paths;

/// The body input type for all store writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>>;

/// Build a [`ByteStream`] from in-memory bytes. Convenient for copies and
/// tests.
#[must_use]
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Build a [`ByteStream`] reading a file in 64 KiB chunks.
pub(crate) fn reader_stream(file: tokio::fs::File) -> ByteStream {
    Box::pin(futures::stream::unfold(file, |mut file| async move {
        let mut buf = vec![0u8; 64 * 1024];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), file))
            }
            Err(e) => Some((Err(StoreError::Io(e)), file)),
        }
    }))
}

/// The result of spooling a body to disk.
#[derive(Debug)]
pub(crate) struct SpoolOutcome {
    /// Unquoted hex MD5 of everything written.
    pub md5_hex: String,
    /// Total bytes written.
    pub size: u64,
}

/// Stream `body` into the file at `tmp`, accumulating MD5 and enforcing
/// `max_size`. The file is fsynced on success; on any failure it is removed
/// and the error propagated, leaving no partial artifact behind.
pub(crate) async fn spool_to_file(
    tmp: &Path,
    mut body: ByteStream,
    max_size: u64,
) -> Result<SpoolOutcome, StoreError> {
    let mut file = paths::create_private_file(tmp).await?;
    let mut md5 = Md5Accumulator::new();
    let mut size: u64 = 0;

    let result = async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            if size > max_size {
                return Err(StoreError::EntityTooLarge { limit: max_size });
            }
            md5.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }
    .await;

    drop(file);

    match result {
        Ok(()) => Ok(SpoolOutcome {
            md5_hex: md5.finalize_hex(),
            size,
        }),
        Err(e) => {
            let _ = tokio::fs::remove_file(tmp).await;
            Err(e)
        }
    }
}
