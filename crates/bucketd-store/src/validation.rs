//! Validation for bucket names, object keys, and user metadata.
//!
//! Key validation is the first line of the path-safety defense: anything
//! that could traverse outside the bucket root is rejected before any path
//! is composed, and the base64-url key encoding removes the rest.

use std::collections::HashMap;

use crate::error::StoreError;

/// Maximum object key length in bytes.
const MAX_KEY_BYTES: usize = 1024;

/// Minimum bucket name length.
const MIN_BUCKET_NAME_LEN: usize = 3;

/// Maximum bucket name length.
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Validate a bucket name: 3-63 characters from `[a-z0-9-]`, not starting
/// or ending with `-`.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] if any rule is violated.
///
/// # Examples
///
/// ```
/// use bucketd_store::validation::validate_bucket_name;
///
/// assert!(validate_bucket_name("my-bucket").is_ok());
/// assert!(validate_bucket_name("ab").is_err());
/// assert!(validate_bucket_name("-bucket").is_err());
/// ```
pub fn validate_bucket_name(name: &str) -> Result<(), StoreError> {
    let len = name.len();
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return Err(StoreError::invalid_argument(format!(
            "bucket name must be between {MIN_BUCKET_NAME_LEN} and {MAX_BUCKET_NAME_LEN} characters"
        )));
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(StoreError::invalid_argument(
            "bucket name must only contain lowercase letters, digits, and hyphens",
        ));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(StoreError::invalid_argument(
            "bucket name must not start or end with a hyphen",
        ));
    }

    Ok(())
}

/// Validate an object key.
///
/// Rejected outright: empty keys, keys over 1024 bytes, embedded NUL,
/// a leading `/`, any backslash, and any `..` path component.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] if any rule is violated.
///
/// # Examples
///
/// ```
/// use bucketd_store::validation::validate_object_key;
///
/// assert!(validate_object_key("photos/2024/image.jpg").is_ok());
/// assert!(validate_object_key("a/../b").is_err());
/// assert!(validate_object_key("/absolute").is_err());
/// ```
pub fn validate_object_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::invalid_argument("object key must not be empty"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(StoreError::invalid_argument(format!(
            "object key must not exceed {MAX_KEY_BYTES} bytes"
        )));
    }
    if key.contains('\0') {
        return Err(StoreError::invalid_argument(
            "object key must not contain NUL",
        ));
    }
    if key.starts_with('/') {
        return Err(StoreError::invalid_argument(
            "object key must not start with '/'",
        ));
    }
    if key.contains('\\') {
        return Err(StoreError::invalid_argument(
            "object key must not contain backslashes",
        ));
    }
    if key.split('/').any(|component| component == "..") {
        return Err(StoreError::invalid_argument(
            "object key must not contain '..' components",
        ));
    }

    Ok(())
}

/// Validate user metadata names and values.
///
/// Values must be ASCII and free of CR, LF, and NUL; names likewise.
/// This is the header-injection defense for metadata echoed back on GET.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] naming the offending entry.
pub fn validate_user_metadata(metadata: &HashMap<String, String>) -> Result<(), StoreError> {
    for (name, value) in metadata {
        if name.is_empty() || !name.is_ascii() || name.bytes().any(is_forbidden_byte) {
            return Err(StoreError::invalid_argument(format!(
                "invalid metadata name: {name:?}"
            )));
        }
        if !value.is_ascii() || value.bytes().any(is_forbidden_byte) {
            return Err(StoreError::invalid_argument(format!(
                "invalid metadata value for {name:?}"
            )));
        }
    }
    Ok(())
}

fn is_forbidden_byte(b: u8) -> bool {
    b == b'\r' || b == b'\n' || b == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_accept_valid_bucket_names() {
        for name in ["abc", "my-bucket", "bucket-123", "0-0-0"] {
            assert!(validate_bucket_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_should_reject_invalid_bucket_names() {
        for name in ["ab", "-bucket", "bucket-", "My-Bucket", "has.dots", ""] {
            assert!(validate_bucket_name(name).is_err(), "{name}");
        }
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_should_accept_valid_keys() {
        for key in ["hello.txt", "a/b/c", "dots.in..name.ok/.hidden", "a b c"] {
            assert!(validate_object_key(key).is_ok(), "{key}");
        }
    }

    #[test]
    fn test_should_reject_traversal_keys() {
        for key in ["..", "a/../b", "/abs", "a\\..\\b", "key\0null", ""] {
            assert!(validate_object_key(key).is_err(), "{key:?}");
        }
        assert!(validate_object_key(&"k".repeat(1025)).is_err());
    }

    #[test]
    fn test_should_reject_metadata_with_control_bytes() {
        for bad in ["evil\r\nX-Injected: evil", "nul\0", "line\nfeed"] {
            let meta = HashMap::from([("tag".to_owned(), bad.to_owned())]);
            assert!(validate_user_metadata(&meta).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_should_reject_non_ascii_metadata() {
        let meta = HashMap::from([("tag".to_owned(), "héllo".to_owned())]);
        assert!(validate_user_metadata(&meta).is_err());
    }

    #[test]
    fn test_should_accept_clean_metadata() {
        let meta = HashMap::from([
            ("owner".to_owned(), "alice".to_owned()),
            ("purpose".to_owned(), "backup copy 2024".to_owned()),
        ]);
        assert!(validate_user_metadata(&meta).is_ok());
    }
}
