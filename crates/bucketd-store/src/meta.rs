//! Persisted metadata records.
//!
//! Each record is one JSON file written with the tmp-and-rename protocol so
//! readers never observe a half-written document. Timestamps serialize as
//! RFC 3339 UTC via chrono's serde support.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The `meta.json` record stored beside every object's `data` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The object key as the client supplied it.
    pub key: String,
    /// Body size in bytes.
    pub size: u64,
    /// The stored content type.
    pub content_type: String,
    /// The quoted ETag (single-shot or multipart form).
    pub etag: String,
    /// Last modification time, UTC.
    pub last_modified: DateTime<Utc>,
    /// User metadata: lowercased names without the `x-amz-meta-` prefix.
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

/// The `meta.json` record at the root of a multipart upload's staging
/// directory, captured at initiate time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMeta {
    /// The opaque upload id.
    pub upload_id: String,
    /// The bucket the upload targets.
    pub bucket: String,
    /// The key the assembled object will be stored under.
    pub key: String,
    /// Creation time, UTC; drives abandonment reclamation.
    pub created: DateTime<Utc>,
    /// Content type for the assembled object.
    pub content_type: String,
    /// User metadata for the assembled object.
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

/// The `part.NNNNN.meta` record beside each staged part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartMeta {
    /// Part number, 1 through 10000.
    pub part_number: u32,
    /// Quoted single-shot ETag over the part bytes.
    pub etag: String,
    /// Part size in bytes.
    pub size: u64,
}
