//! Header extraction and shaping: user metadata, copy sources, and
//! presigned response overrides.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

use crate::error::S3Error;
use crate::router::query_value;

/// The user-metadata header prefix.
const META_PREFIX: &str = "x-amz-meta-";

/// Query parameters a presigned GET may use to override response headers,
/// paired with the header each one sets.
const RESPONSE_OVERRIDES: &[(&str, &str)] = &[
    ("response-content-type", "Content-Type"),
    ("response-content-disposition", "Content-Disposition"),
    ("response-cache-control", "Cache-Control"),
];

/// Extract user metadata from `x-amz-meta-*` request headers.
///
/// The suffix after the prefix becomes the metadata name (header names are
/// already lowercase); the header's first value becomes the value. Values
/// that are not clean ASCII are rejected here, before the store re-validates
/// them, so the error stays close to the offending header.
///
/// # Errors
///
/// Returns an `InvalidArgument` error for a value containing CR, LF, NUL,
/// or non-ASCII bytes.
pub fn extract_user_metadata(
    headers: &http::HeaderMap,
) -> Result<HashMap<String, String>, S3Error> {
    let mut metadata = HashMap::new();

    for name in headers.keys() {
        let Some(suffix) = name.as_str().strip_prefix(META_PREFIX) else {
            continue;
        };
        if suffix.is_empty() {
            return Err(S3Error::invalid_argument("empty metadata name"));
        }

        let value = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                S3Error::invalid_argument(format!("invalid metadata value for {suffix}"))
            })?;
        if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) || !value.is_ascii() {
            return Err(S3Error::invalid_argument(format!(
                "invalid metadata value for {suffix}"
            )));
        }

        metadata.insert(suffix.to_owned(), value.to_owned());
    }

    Ok(metadata)
}

/// Parse an `x-amz-copy-source` header into `(bucket, key)`.
///
/// The value is percent-decoded once, one leading slash is stripped, and
/// the remainder splits at the first `/`.
///
/// # Errors
///
/// Returns an `InvalidArgument` error when no key component is present.
pub fn parse_copy_source(value: &str) -> Result<(String, String), S3Error> {
    let decoded = percent_decode_str(value).decode_utf8_lossy();
    let trimmed = decoded.strip_prefix('/').unwrap_or(&decoded);

    let (bucket, key) = trimmed
        .split_once('/')
        .ok_or_else(|| S3Error::invalid_argument("copy source must be /<bucket>/<key>"))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(S3Error::invalid_argument("copy source must be /<bucket>/<key>"));
    }

    Ok((bucket.to_owned(), key.to_owned()))
}

/// Response-header overrides from a presigned GET's query string.
///
/// Returns `(header name, value)` pairs for the recognized
/// `response-*` parameters. Values carrying CR, LF, or NUL are silently
/// dropped rather than rejected; the object itself is still served.
#[must_use]
pub fn response_overrides(query_params: &[(String, String)]) -> Vec<(&'static str, String)> {
    RESPONSE_OVERRIDES
        .iter()
        .filter_map(|(param, header)| {
            let value = query_value(query_params, param)?;
            if value.is_empty()
                || value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
                || !value.is_ascii()
            {
                return None;
            }
            Some((*header, value.to_owned()))
        })
        .collect()
}

/// Format a timestamp as an RFC 7231 HTTP-date (`Last-Modified` form).
#[must_use]
pub fn format_http_date(t: &DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> http::HeaderMap {
        let mut map = http::HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                http::header::HeaderValue::from_bytes(value.as_bytes()).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_should_extract_metadata_suffixes() {
        let map = headers(&[
            ("x-amz-meta-owner", "alice"),
            ("x-amz-meta-purpose", "backup"),
            ("content-type", "text/plain"),
        ]);
        let meta = extract_user_metadata(&map).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("owner").map(String::as_str), Some("alice"));
        assert_eq!(meta.get("purpose").map(String::as_str), Some("backup"));
    }

    #[test]
    fn test_should_reject_non_ascii_metadata() {
        // CR, LF, and NUL cannot survive HTTP header parsing at all; the
        // bytes that can arrive on the wire are obs-text, refused here.
        let mut map = http::HeaderMap::new();
        map.insert(
            http::header::HeaderName::from_static("x-amz-meta-bad"),
            http::header::HeaderValue::from_bytes("héllo".as_bytes()).unwrap(),
        );
        assert!(extract_user_metadata(&map).is_err());
    }

    #[test]
    fn test_should_parse_copy_source_forms() {
        assert_eq!(
            parse_copy_source("/src-bucket/a/b.txt").unwrap(),
            ("src-bucket".to_owned(), "a/b.txt".to_owned())
        );
        assert_eq!(
            parse_copy_source("src-bucket/key").unwrap(),
            ("src-bucket".to_owned(), "key".to_owned())
        );
        assert_eq!(
            parse_copy_source("/src-bucket/with%20space").unwrap(),
            ("src-bucket".to_owned(), "with space".to_owned())
        );
    }

    #[test]
    fn test_should_reject_copy_source_without_key() {
        for bad in ["/bucket", "bucket", "/", "", "/bucket/"] {
            assert!(parse_copy_source(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_should_collect_response_overrides() {
        let params = vec![
            ("response-content-type".to_owned(), "text/html".to_owned()),
            ("response-cache-control".to_owned(), "no-store".to_owned()),
            ("unrelated".to_owned(), "x".to_owned()),
        ];
        let overrides = response_overrides(&params);
        assert_eq!(
            overrides,
            vec![
                ("Content-Type", "text/html".to_owned()),
                ("Cache-Control", "no-store".to_owned()),
            ]
        );
    }

    #[test]
    fn test_should_silently_drop_injecting_overrides() {
        let params = vec![(
            "response-content-type".to_owned(),
            "text/html\r\nX-Injected: evil".to_owned(),
        )];
        assert!(response_overrides(&params).is_empty());
    }

    #[test]
    fn test_should_format_http_date() {
        let t: DateTime<Utc> = "2024-07-01T12:30:45Z".parse().unwrap();
        assert_eq!(format_http_date(&t), "Mon, 01 Jul 2024 12:30:45 GMT");
    }
}
