//! On-disk path composition and confinement.
//!
//! Object keys never appear verbatim in paths: the key is base64-url
//! encoded into a single component, and its MD5 prefix picks one of 65536
//! fan-out directories so no single directory grows unbounded. Directories
//! are created with mode 0700, metadata and temp files with 0600.

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use digest::Digest;

use crate::error::StoreError;

/// Name of an object's body file within its directory.
pub(crate) const DATA_FILE: &str = "data";

/// Name of a metadata record within an object or upload directory.
pub(crate) const META_FILE: &str = "meta.json";

/// Suffix for in-flight temporary files.
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// The fan-out component: first two bytes of MD5(key), lowercase hex.
pub(crate) fn key_fanout(key: &str) -> String {
    let digest = md5::Md5::digest(key.as_bytes());
    hex::encode(&digest[..2])
}

/// Encode an object key into a single filesystem-safe path component.
pub(crate) fn encode_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode a previously encoded key component.
pub(crate) fn decode_key(encoded: &str) -> Result<String, StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| StoreError::invalid_argument("invalid key encoding"))?;
    String::from_utf8(bytes).map_err(|_| StoreError::invalid_argument("invalid key encoding"))
}

/// The objects tree for a bucket: `<root>/buckets/<bucket>/objects`.
pub(crate) fn bucket_objects_root(root: &Path, bucket: &str) -> PathBuf {
    root.join("buckets").join(bucket).join("objects")
}

/// The directory holding one object's `data` and `meta.json`.
pub(crate) fn object_dir(root: &Path, bucket: &str, key: &str) -> PathBuf {
    bucket_objects_root(root, bucket)
        .join(key_fanout(key))
        .join(encode_key(key))
}

/// Require `candidate` to be confined under the canonicalized `base`.
///
/// The validated key grammar and the base64 encoding already make escape
/// impossible by construction; this is the belt to that suspender, applied
/// before any filesystem touch.
pub(crate) fn ensure_within_base(base: &Path, candidate: &Path) -> Result<(), StoreError> {
    let escapes = candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes || !candidate.starts_with(base) {
        return Err(StoreError::invalid_argument(
            "resolved path escapes the storage root",
        ));
    }
    Ok(())
}

/// Create a directory tree with mode 0700 on every created component.
pub(crate) async fn create_dir_all_private(path: &Path) -> io::Result<()> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&path)
    })
    .await
    .map_err(io::Error::other)?
}

/// Open a file for writing with mode 0600, truncating any previous content.
pub(crate) async fn create_private_file(path: &Path) -> io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    options.open(path).await
}

/// Serialize `value` as JSON and atomically install it at `path`.
///
/// Writes to `<path>.tmp`, fsyncs, then renames over the destination so a
/// concurrent reader sees either the old or the new complete record.
pub(crate) async fn write_json_file<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;

    let json = serde_json::to_vec(value)?;
    let tmp = tmp_path(path);

    let mut file = create_private_file(&tmp).await?;
    if let Err(e) = async {
        file.write_all(&json).await?;
        file.sync_all().await
    }
    .await
    {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read and decode a JSON record, or `Ok(None)` if the file does not exist.
pub(crate) async fn read_json_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The temporary sibling of `path`.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(Default::default, std::ffi::OsStr::to_os_string);
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}
