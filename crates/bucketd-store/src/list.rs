//! Bucket listing with prefix, delimiter, and cursor pagination.
//!
//! The walker reads every `meta.json` under the bucket's objects tree,
//! sorts by key, and applies the prefix/delimiter/cursor filters in order.
//! Continuation tokens are the base64-url encoding of the last returned
//! key: opaque to clients, decodable only by this server.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{debug, trace};

use crate::Store;
use crate::error::StoreError;
use crate::meta::ObjectMeta;
use crate::paths::{self, META_FILE};
use crate::validation::validate_bucket_name;

/// The listing page-size ceiling; requests above it are clamped.
pub const MAX_KEYS_CEILING: usize = 1000;

/// Options for a list operation. All fields optional; defaults are a full,
/// ungrouped listing of up to 1000 keys.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only keys starting with this prefix are returned.
    pub prefix: Option<String>,
    /// Keys sharing a prefix up to this delimiter collapse into one common
    /// prefix entry.
    pub delimiter: Option<String>,
    /// Page size; clamped to at most 1000. Zero returns an empty page.
    pub max_keys: Option<usize>,
    /// Start-exclusive key cursor.
    pub start_after: Option<String>,
    /// Opaque cursor from a previous truncated response; overrides
    /// `start_after`.
    pub continuation_token: Option<String>,
}

/// One page of listing results, lexicographically ordered by key.
#[derive(Debug, Default)]
pub struct ListResult {
    /// Objects on this page.
    pub objects: Vec<ObjectMeta>,
    /// De-duplicated common prefixes, in first-appearance order.
    pub common_prefixes: Vec<String>,
    /// Whether more keys follow this page.
    pub is_truncated: bool,
    /// Cursor for the next page when truncated.
    pub next_continuation_token: Option<String>,
}

/// Encode a key into an opaque continuation token.
#[must_use]
pub fn encode_continuation_token(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode a continuation token back into the cursor key.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] for tokens this server did not
/// mint.
pub fn decode_continuation_token(token: &str) -> Result<String, StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StoreError::invalid_argument("invalid continuation token"))?;
    String::from_utf8(bytes).map_err(|_| StoreError::invalid_argument("invalid continuation token"))
}

impl Store {
    /// List objects in the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a bad bucket name or
    /// continuation token, and [`StoreError::Io`] for walk failures other
    /// than not-found (an empty bucket lists as empty, not as an error).
    pub async fn list_objects(
        &self,
        bucket: &str,
        options: &ListOptions,
    ) -> Result<ListResult, StoreError> {
        validate_bucket_name(bucket)?;

        let max_keys = options.max_keys.unwrap_or(MAX_KEYS_CEILING).min(MAX_KEYS_CEILING);

        let cursor = match &options.continuation_token {
            Some(token) => Some(decode_continuation_token(token)?),
            None => options.start_after.clone(),
        };

        let mut all = self.walk_bucket(bucket).await?;
        all.sort_unstable_by(|a, b| a.key.cmp(&b.key));

        let prefix = options.prefix.as_deref().unwrap_or("");
        let mut result = ListResult::default();
        if max_keys == 0 {
            return Ok(result);
        }

        let mut seen_prefixes = std::collections::HashSet::new();

        for meta in all {
            if let Some(cursor) = &cursor {
                if meta.key.as_str() <= cursor.as_str() {
                    continue;
                }
            }
            if !meta.key.starts_with(prefix) {
                continue;
            }

            if let Some(delimiter) = options.delimiter.as_deref() {
                let tail = &meta.key[prefix.len()..];
                if let Some(idx) = tail.find(delimiter) {
                    let common = format!("{prefix}{}", &tail[..idx + delimiter.len()]);
                    if seen_prefixes.insert(common.clone()) {
                        result.common_prefixes.push(common);
                    }
                    continue;
                }
            }

            let key = meta.key.clone();
            result.objects.push(meta);
            if result.objects.len() == max_keys {
                result.is_truncated = true;
                result.next_continuation_token = Some(encode_continuation_token(&key));
                break;
            }
        }

        debug!(
            bucket,
            prefix,
            returned = result.objects.len(),
            common_prefixes = result.common_prefixes.len(),
            is_truncated = result.is_truncated,
            "listed objects"
        );
        Ok(result)
    }

    /// Collect every readable metadata record under the bucket's tree.
    ///
    /// Records that vanish mid-walk (concurrent delete) or fail to decode
    /// are skipped; listing is a snapshot-ish view by design.
    async fn walk_bucket(&self, bucket: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let objects_root = paths::bucket_objects_root(&self.root, bucket);
        let mut fanouts = match tokio::fs::read_dir(&objects_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut collected = Vec::new();
        while let Some(fanout) = fanouts.next_entry().await? {
            if !fanout.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(fanout.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta_path = entry.path().join(META_FILE);
                match paths::read_json_file::<ObjectMeta>(&meta_path).await {
                    Ok(Some(meta)) => collected.push(meta),
                    Ok(None) => trace!(path = %meta_path.display(), "skipping entry without metadata"),
                    Err(e) => trace!(path = %meta_path.display(), error = %e, "skipping unreadable metadata"),
                }
            }
        }
        Ok(collected)
    }
}
