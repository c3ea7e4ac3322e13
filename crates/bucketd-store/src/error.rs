//! Error types for the storage engine.
//!
//! Every fallible store operation returns a [`StoreError`] whose variants
//! map one-to-one onto protocol error kinds; the HTTP layer translates them
//! without inspecting messages.

/// Errors produced by the object and multipart stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named bucket is not the one this store serves.
    #[error("bucket does not exist: {bucket}")]
    NoSuchBucket {
        /// The bucket name from the request.
        bucket: String,
    },

    /// The object does not exist.
    #[error("key does not exist: {key}")]
    NoSuchKey {
        /// The requested key.
        key: String,
    },

    /// The multipart upload does not exist (unknown id, or the target key
    /// does not match the upload's key).
    #[error("multipart upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The requested upload id.
        upload_id: String,
    },

    /// A request argument failed validation (bad key, bad part number,
    /// bad metadata value, bad continuation token).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable description of the violation.
        message: String,
    },

    /// A completed-multipart part was never uploaded or its ETag does not
    /// match the staged part.
    #[error("part {part_number} was not uploaded or does not match")]
    InvalidPart {
        /// The offending part number.
        part_number: u32,
    },

    /// Complete-multipart part numbers were not strictly ascending.
    #[error("part numbers are not in strictly ascending order")]
    InvalidPartOrder,

    /// An upload body exceeded the configured size cap.
    #[error("upload exceeds the configured limit of {limit} bytes")]
    EntityTooLarge {
        /// The configured cap in bytes.
        limit: u64,
    },

    /// The requested byte range lies entirely outside the object.
    #[error("requested range not satisfiable for object of {size} bytes")]
    InvalidRange {
        /// The object's total size, for the `Content-Range: bytes */N` reply.
        size: u64,
    },

    /// An underlying filesystem or body-read failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A metadata record exists but cannot be decoded.
    #[error("metadata record corrupt: {0}")]
    CorruptMeta(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for an [`StoreError::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
