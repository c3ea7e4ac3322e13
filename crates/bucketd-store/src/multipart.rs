//! Multipart uploads: staging, assembly, abort, and reclamation.
//!
//! Each upload owns one staging directory named by its 128-bit random id.
//! Parts land as `part.NNNNN` (zero-padded so directory order and numeric
//! order coincide, though assembly always orders by the parsed number, not
//! the directory walk) with a `part.NNNNN.meta` record beside each.
//! Completing an upload concatenates the requested parts into the object
//! tree with the same tmp-and-rename commit used for single-shot puts, then
//! removes the staging directory. A failed complete leaves the staging area
//! intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::Store;
use crate::checksums::{compute_multipart_etag, quote_etag};
use crate::error::StoreError;
use crate::meta::{ObjectMeta, PartMeta, UploadMeta};
use crate::paths::{self, DATA_FILE, META_FILE};
use crate::sink::{self, ByteStream};
use crate::validation::{validate_bucket_name, validate_object_key, validate_user_metadata};

/// Inclusive part-number bounds.
pub const MIN_PART_NUMBER: u32 = 1;
/// Inclusive part-number bounds.
pub const MAX_PART_NUMBER: u32 = 10_000;

fn part_file_name(part_number: u32) -> String {
    format!("part.{part_number:05}")
}

fn part_meta_name(part_number: u32) -> String {
    format!("part.{part_number:05}.meta")
}

impl Store {
    /// Initiate a multipart upload, allocating a staging directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for an invalid bucket, key,
    /// or metadata entry, and [`StoreError::Io`] on filesystem failure.
    pub async fn create_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        user_metadata: HashMap<String, String>,
    ) -> Result<UploadMeta, StoreError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        validate_user_metadata(&user_metadata)?;

        let upload_id = format!("{:032x}", rand::random::<u128>());
        let dir = self.upload_dir_checked(&upload_id)?;
        paths::create_dir_all_private(&dir).await?;

        let meta = UploadMeta {
            upload_id: upload_id.clone(),
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            created: Utc::now(),
            content_type: content_type
                .unwrap_or_else(|| crate::object::DEFAULT_CONTENT_TYPE.to_owned()),
            user_metadata,
        };
        paths::write_json_file(&dir.join(META_FILE), &meta).await?;

        debug!(bucket, key, upload_id = %meta.upload_id, "initiated multipart upload");
        Ok(meta)
    }

    /// Stage one part of an upload, replacing any previous part with the
    /// same number.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] for a part number outside 1..=10000.
    /// - [`StoreError::NoSuchUpload`] for an unknown upload id.
    /// - [`StoreError::EntityTooLarge`] if the part exceeds `max_size`.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
        max_size: u64,
    ) -> Result<PartMeta, StoreError> {
        if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StoreError::invalid_argument(format!(
                "part number must be between {MIN_PART_NUMBER} and {MAX_PART_NUMBER}"
            )));
        }

        let dir = self.upload_dir_checked(upload_id)?;
        load_upload_meta(&dir, upload_id).await?;

        let part_path = dir.join(part_file_name(part_number));
        let tmp = paths::tmp_path(&part_path);
        let outcome = sink::spool_to_file(&tmp, body, max_size).await?;
        tokio::fs::rename(&tmp, &part_path).await?;

        let meta = PartMeta {
            part_number,
            etag: quote_etag(&outcome.md5_hex),
            size: outcome.size,
        };
        paths::write_json_file(&dir.join(part_meta_name(part_number)), &meta).await?;

        debug!(upload_id, part_number, size = meta.size, "staged part");
        Ok(meta)
    }

    /// Complete an upload: validate the part list, assemble the object, and
    /// remove the staging directory.
    ///
    /// `parts` is the client's ordered list of `(part_number, etag)`; ETags
    /// are compared after stripping surrounding quotes.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoSuchUpload`] for an unknown id or a `key` that does
    ///   not match the upload's recorded key.
    /// - [`StoreError::InvalidPartOrder`] if part numbers are not strictly
    ///   ascending.
    /// - [`StoreError::InvalidPart`] for a part never staged or whose ETag
    ///   does not match.
    ///
    /// Any failure leaves the staging directory intact.
    pub async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Result<ObjectMeta, StoreError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        let dir = self.upload_dir_checked(upload_id)?;
        let upload = load_upload_meta(&dir, upload_id).await?;
        if upload.key != key || upload.bucket != bucket {
            return Err(StoreError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            });
        }

        if parts.is_empty() {
            return Err(StoreError::invalid_argument(
                "complete requires at least one part",
            ));
        }
        if parts.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(StoreError::InvalidPartOrder);
        }

        // Validate every part against its staged record before touching the
        // object tree.
        let mut part_md5_hexes = Vec::with_capacity(parts.len());
        let mut total_size: u64 = 0;
        for (part_number, client_etag) in parts {
            let meta_path = dir.join(part_meta_name(*part_number));
            let staged = paths::read_json_file::<PartMeta>(&meta_path)
                .await?
                .ok_or(StoreError::InvalidPart {
                    part_number: *part_number,
                })?;

            let staged_hex = staged.etag.trim_matches('"');
            if client_etag.trim_matches('"') != staged_hex {
                return Err(StoreError::InvalidPart {
                    part_number: *part_number,
                });
            }
            part_md5_hexes.push(staged_hex.to_owned());
            total_size += staged.size;
        }

        // Assemble into the object tree under current key rules.
        let object_dir = self.object_dir_checked(bucket, key)?;
        paths::create_dir_all_private(&object_dir).await?;

        let data_path = object_dir.join(DATA_FILE);
        let tmp = paths::tmp_path(&data_path);
        if let Err(e) = concatenate_parts(&dir, parts, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp, &data_path).await?;

        let meta = ObjectMeta {
            key: key.to_owned(),
            size: total_size,
            content_type: upload.content_type,
            etag: compute_multipart_etag(&part_md5_hexes),
            last_modified: Utc::now(),
            user_metadata: upload.user_metadata,
        };
        paths::write_json_file(&object_dir.join(META_FILE), &meta).await?;

        tokio::fs::remove_dir_all(&dir).await?;

        debug!(
            bucket,
            key,
            upload_id,
            parts = parts.len(),
            size = total_size,
            etag = %meta.etag,
            "completed multipart upload"
        );
        Ok(meta)
    }

    /// Abort an upload, removing its staging directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchUpload`] if the upload does not exist.
    pub async fn abort_upload(&self, upload_id: &str) -> Result<(), StoreError> {
        let dir = self.upload_dir_checked(upload_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(upload_id, "aborted multipart upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove abandoned uploads older than `max_age`.
    ///
    /// Uploads with an unreadable `meta.json` age by their directory mtime.
    /// Stray `*.tmp` files directly under the staging root are scrubbed by
    /// the same cutoff. Best-effort and idempotent: one failed removal is
    /// logged and does not block the rest of the sweep.
    ///
    /// Returns the number of uploads removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] only if the staging root itself cannot be
    /// read.
    pub async fn reclaim_stale_uploads(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

        let mut entries = tokio::fs::read_dir(&self.multipart_root).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                if upload_age(&path).await <= cutoff {
                    match tokio::fs::remove_dir_all(&path).await {
                        Ok(()) => {
                            removed += 1;
                            debug!(path = %path.display(), "reclaimed abandoned upload");
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "failed to reclaim upload");
                        }
                    }
                }
            } else if path.extension() == Some(std::ffi::OsStr::new("tmp"))
                && file_mtime(&path).await.is_some_and(|m| m <= cutoff)
            {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }

        Ok(removed)
    }

    /// Compose and confine the staging directory for an upload id.
    fn upload_dir_checked(&self, upload_id: &str) -> Result<PathBuf, StoreError> {
        if upload_id.is_empty()
            || !upload_id.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(StoreError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            });
        }
        let dir = self.multipart_root.join(upload_id);
        paths::ensure_within_base(&self.multipart_root, &dir)?;
        Ok(dir)
    }
}

/// The creation time of an upload: its `meta.json` record, or the directory
/// mtime when the record is unreadable.
async fn upload_age(dir: &Path) -> DateTime<Utc> {
    if let Ok(Some(meta)) = paths::read_json_file::<UploadMeta>(&dir.join(META_FILE)).await {
        return meta.created;
    }
    file_mtime(dir).await.unwrap_or_else(Utc::now)
}

/// Concatenate the staged part files, in the client's order, into `tmp`.
async fn concatenate_parts(
    upload_dir: &Path,
    parts: &[(u32, String)],
    tmp: &Path,
) -> Result<(), StoreError> {
    let mut out = paths::create_private_file(tmp).await?;
    for (part_number, _) in parts {
        let mut part = tokio::fs::File::open(upload_dir.join(part_file_name(*part_number)))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StoreError::InvalidPart {
                        part_number: *part_number,
                    }
                } else {
                    e.into()
                }
            })?;
        tokio::io::copy(&mut part, &mut out).await?;
    }
    out.sync_all().await?;
    out.shutdown().await?;
    Ok(())
}

async fn load_upload_meta(dir: &Path, upload_id: &str) -> Result<UploadMeta, StoreError> {
    paths::read_json_file::<UploadMeta>(&dir.join(META_FILE))
        .await?
        .ok_or_else(|| StoreError::NoSuchUpload {
            upload_id: upload_id.to_owned(),
        })
}

/// A path's mtime as a UTC timestamp, if readable.
async fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let mtime = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(mtime))
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::checksums::compute_md5;
    use crate::sink::bytes_stream;

    const BUCKET: &str = "test-bucket";
    const MAX: u64 = 1 << 20;

    async fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("data"), dir.path().join("mp"))
            .await
            .expect("store opens");
        (dir, store)
    }

    async fn stage_part(store: &Store, upload_id: &str, n: u32, body: &'static [u8]) -> PartMeta {
        store
            .upload_part(upload_id, n, bytes_stream(body.into()), MAX)
            .await
            .expect("part stages")
    }

    async fn object_bytes(store: &Store, key: &str) -> Vec<u8> {
        let (_, mut reader) = store.get_object(BUCKET, key).await.expect("get");
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.expect("read");
        buf
    }

    #[tokio::test]
    async fn test_should_assemble_parts_in_order_with_composite_etag() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "multipart-test.txt", None, HashMap::new())
            .await
            .expect("initiate");
        assert_eq!(upload.upload_id.len(), 32);

        let p1 = stage_part(&store, &upload.upload_id, 1, b"Part 1 content").await;
        let p2 = stage_part(&store, &upload.upload_id, 2, b"Part 2 content").await;

        let meta = store
            .complete_upload(
                BUCKET,
                "multipart-test.txt",
                &upload.upload_id,
                &[(1, p1.etag.clone()), (2, p2.etag.clone())],
            )
            .await
            .expect("complete");

        assert_eq!(
            object_bytes(&store, "multipart-test.txt").await,
            b"Part 1 contentPart 2 content"
        );
        assert!(meta.etag.ends_with("-2\""));
        assert_eq!(
            meta.etag,
            compute_multipart_etag(&[
                compute_md5(b"Part 1 content"),
                compute_md5(b"Part 2 content"),
            ])
        );
        assert_eq!(meta.size, 28);

        // Staging area is gone; the id no longer resolves.
        assert!(matches!(
            store.abort_upload(&upload.upload_id).await,
            Err(StoreError::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_replace_reuploaded_part() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");

        stage_part(&store, &upload.upload_id, 1, b"old bytes").await;
        let replacement = stage_part(&store, &upload.upload_id, 1, b"new").await;
        assert_eq!(replacement.size, 3);

        let meta = store
            .complete_upload(BUCKET, "k", &upload.upload_id, &[(1, replacement.etag)])
            .await
            .expect("complete");
        assert_eq!(meta.size, 3);
        assert_eq!(object_bytes(&store, "k").await, b"new");
    }

    #[tokio::test]
    async fn test_should_reject_non_ascending_part_order() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");
        let p1 = stage_part(&store, &upload.upload_id, 1, b"a").await;
        let p2 = stage_part(&store, &upload.upload_id, 2, b"b").await;

        for parts in [
            vec![(2, p2.etag.clone()), (1, p1.etag.clone())],
            vec![(1, p1.etag.clone()), (1, p1.etag.clone())],
        ] {
            let result = store.complete_upload(BUCKET, "k", &upload.upload_id, &parts).await;
            assert!(matches!(result, Err(StoreError::InvalidPartOrder)));
        }

        // Staging area must survive the failed completes.
        let p3 = stage_part(&store, &upload.upload_id, 3, b"c").await;
        assert_eq!(p3.part_number, 3);
    }

    #[tokio::test]
    async fn test_should_reject_never_uploaded_part() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");
        let p1 = stage_part(&store, &upload.upload_id, 1, b"a").await;

        let result = store
            .complete_upload(
                BUCKET,
                "k",
                &upload.upload_id,
                &[(1, p1.etag), (2, "\"deadbeef\"".to_owned())],
            )
            .await;
        assert!(matches!(
            result,
            Err(StoreError::InvalidPart { part_number: 2 })
        ));
    }

    #[tokio::test]
    async fn test_should_reject_mismatched_part_etag() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");
        stage_part(&store, &upload.upload_id, 1, b"a").await;

        let result = store
            .complete_upload(
                BUCKET,
                "k",
                &upload.upload_id,
                &[(1, compute_md5(b"different").to_string())],
            )
            .await;
        assert!(matches!(
            result,
            Err(StoreError::InvalidPart { part_number: 1 })
        ));
    }

    #[tokio::test]
    async fn test_should_accept_unquoted_client_etags() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");
        stage_part(&store, &upload.upload_id, 1, b"bytes").await;

        // Clients may send the ETag without quotes.
        let meta = store
            .complete_upload(BUCKET, "k", &upload.upload_id, &[(1, compute_md5(b"bytes"))])
            .await
            .expect("complete");
        assert_eq!(meta.size, 5);
    }

    #[tokio::test]
    async fn test_should_refuse_unknown_upload_everywhere() {
        let (_tmp, store) = store().await;

        assert!(matches!(
            store
                .upload_part("0123456789abcdef0123456789abcdef", 1, bytes_stream(bytes::Bytes::new()), MAX)
                .await,
            Err(StoreError::NoSuchUpload { .. })
        ));
        assert!(matches!(
            store
                .complete_upload(BUCKET, "k", "0123456789abcdef0123456789abcdef", &[(1, String::new())])
                .await,
            Err(StoreError::NoSuchUpload { .. })
        ));
        assert!(matches!(
            store.abort_upload("0123456789abcdef0123456789abcdef").await,
            Err(StoreError::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_refuse_complete_against_wrong_key() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "intended-key", None, HashMap::new())
            .await
            .expect("initiate");
        let p1 = stage_part(&store, &upload.upload_id, 1, b"a").await;

        let result = store
            .complete_upload(BUCKET, "other-key", &upload.upload_id, &[(1, p1.etag)])
            .await;
        assert!(matches!(result, Err(StoreError::NoSuchUpload { .. })));
    }

    #[tokio::test]
    async fn test_should_reject_out_of_range_part_numbers() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");

        for n in [0, 10_001] {
            let result = store
                .upload_part(&upload.upload_id, n, bytes_stream(bytes::Bytes::new()), MAX)
                .await;
            assert!(matches!(result, Err(StoreError::InvalidArgument { .. })), "{n}");
        }
    }

    #[tokio::test]
    async fn test_should_enforce_part_size_cap() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");

        let result = store
            .upload_part(
                &upload.upload_id,
                1,
                bytes_stream(bytes::Bytes::from(vec![0u8; 64])),
                32,
            )
            .await;
        assert!(matches!(result, Err(StoreError::EntityTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_should_abort_and_remove_staging() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(BUCKET, "k", None, HashMap::new())
            .await
            .expect("initiate");
        stage_part(&store, &upload.upload_id, 1, b"a").await;

        store.abort_upload(&upload.upload_id).await.expect("abort");
        assert!(matches!(
            store.abort_upload(&upload.upload_id).await,
            Err(StoreError::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_inherit_upload_metadata_on_complete() {
        let (_tmp, store) = store().await;
        let upload = store
            .create_upload(
                BUCKET,
                "k",
                Some("text/plain".to_owned()),
                HashMap::from([("origin".to_owned(), "batch-7".to_owned())]),
            )
            .await
            .expect("initiate");
        let p1 = stage_part(&store, &upload.upload_id, 1, b"a").await;

        let meta = store
            .complete_upload(BUCKET, "k", &upload.upload_id, &[(1, p1.etag)])
            .await
            .expect("complete");
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.user_metadata.get("origin").map(String::as_str), Some("batch-7"));
    }

    #[tokio::test]
    async fn test_should_reclaim_only_stale_uploads() {
        let (_tmp, store) = store().await;

        let stale = store
            .create_upload(BUCKET, "old", None, HashMap::new())
            .await
            .expect("initiate");
        let fresh = store
            .create_upload(BUCKET, "new", None, HashMap::new())
            .await
            .expect("initiate");

        // Age the first upload by rewriting its record two days into the past.
        let stale_dir = store.multipart_root.join(&stale.upload_id);
        let mut aged = stale;
        aged.created = Utc::now() - chrono::Duration::hours(48);
        paths::write_json_file(&stale_dir.join(META_FILE), &aged)
            .await
            .expect("rewrite meta");

        let removed = store
            .reclaim_stale_uploads(Duration::from_secs(24 * 3600))
            .await
            .expect("sweep");
        assert_eq!(removed, 1);

        assert!(matches!(
            store.abort_upload(&aged.upload_id).await,
            Err(StoreError::NoSuchUpload { .. })
        ));
        // The fresh upload survives and is still usable.
        stage_part(&store, &fresh.upload_id, 1, b"still here").await;

        // A second sweep is a no-op.
        let removed = store
            .reclaim_stale_uploads(Duration::from_secs(24 * 3600))
            .await
            .expect("sweep");
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_should_reclaim_metaless_upload_by_mtime() {
        let (_tmp, store) = store().await;

        // A directory with no readable meta record ages by its own mtime;
        // with a zero max-age it is immediately eligible.
        let orphan = store.multipart_root.join("feedfacefeedfacefeedfacefeedface");
        paths::create_dir_all_private(&orphan).await.expect("mkdir");

        let removed = store
            .reclaim_stale_uploads(Duration::from_secs(0))
            .await
            .expect("sweep");
        assert_eq!(removed, 1);
        assert!(!orphan.exists());
    }
}
