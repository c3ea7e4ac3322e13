//! Request routing: mapping (method, path depth, query keys) onto S3
//! operations.
//!
//! Paths are path-style only: `/<bucket>` is a bucket operation,
//! `/<bucket>/<key…>` an object operation. The bucket in the URL must match
//! the single configured bucket. The overloaded POST/PUT grammar
//! (`?uploads`, `?uploadId`, `?delete`, `x-amz-copy-source`) selects among
//! operations sharing a method and path shape.

use http::Method;
use percent_encoding::percent_decode_str;

use crate::error::{S3Error, S3ErrorCode};

/// The operations this server implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Operation {
    /// HEAD on the bucket.
    HeadBucket,
    /// HEAD on an object.
    HeadObject,
    /// GET on the bucket (list objects, V2 semantics).
    ListObjects,
    /// GET on an object (ranged or full).
    GetObject,
    /// PUT on an object.
    PutObject,
    /// PUT with `x-amz-copy-source`.
    CopyObject,
    /// PUT with `partNumber` and `uploadId`.
    UploadPart,
    /// POST with `?uploads`.
    CreateMultipartUpload,
    /// POST with `?uploadId`.
    CompleteMultipartUpload,
    /// POST with `?delete` on the bucket.
    DeleteObjects,
    /// DELETE with `?uploadId`.
    AbortMultipartUpload,
    /// DELETE on an object.
    DeleteObject,
}

impl S3Operation {
    /// Whether this operation mutates bucket state; the privilege gate
    /// requires a read-write credential for these.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::PutObject
                | Self::CopyObject
                | Self::UploadPart
                | Self::CreateMultipartUpload
                | Self::CompleteMultipartUpload
                | Self::DeleteObjects
                | Self::AbortMultipartUpload
                | Self::DeleteObject
        )
    }

    /// Wire-style operation name, for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HeadBucket => "HeadBucket",
            Self::HeadObject => "HeadObject",
            Self::ListObjects => "ListObjectsV2",
            Self::GetObject => "GetObject",
            Self::PutObject => "PutObject",
            Self::CopyObject => "CopyObject",
            Self::UploadPart => "UploadPart",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::DeleteObjects => "DeleteObjects",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
            Self::DeleteObject => "DeleteObject",
        }
    }
}

impl std::fmt::Display for S3Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of routing a request.
#[derive(Debug)]
pub struct Route {
    /// The identified operation.
    pub operation: S3Operation,
    /// The decoded object key, for object operations.
    pub key: Option<String>,
    /// Decoded query parameters.
    pub query_params: Vec<(String, String)>,
}

/// Resolve request parts to an operation against the configured bucket.
///
/// # Errors
///
/// - `NoSuchBucket` when the URL bucket is absent or does not match.
/// - `InvalidRequest` for a POST that is none of `?uploads`, `?uploadId`,
///   `?delete`.
/// - `MethodNotAllowed` for verbs and shapes outside the dispatch table.
pub fn resolve(parts: &http::request::Parts, bucket: &str) -> Result<Route, S3Error> {
    let (url_bucket, key) = parse_path(parts.uri.path());
    let query_params = parse_query_params(parts.uri.query().unwrap_or(""));

    if url_bucket.as_deref() != Some(bucket) {
        return Err(S3Error::new(S3ErrorCode::NoSuchBucket));
    }

    let operation = match key {
        Some(_) => identify_object_operation(&parts.method, &query_params, &parts.headers)?,
        None => identify_bucket_operation(&parts.method, &query_params)?,
    };

    Ok(Route {
        operation,
        key,
        query_params,
    })
}

/// Parse `/{bucket}` or `/{bucket}/{key…}`; both components decoded once.
fn parse_path(path: &str) -> (Option<String>, Option<String>) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return (None, None);
    }

    match trimmed.split_once('/') {
        Some((bucket, key_raw)) => {
            let key = if key_raw.is_empty() {
                None
            } else {
                Some(decode_uri_component(key_raw))
            };
            (Some(decode_uri_component(bucket)), key)
        }
        None => (Some(decode_uri_component(trimmed)), None),
    }
}

fn decode_uri_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Parse a query string into decoded key-value pairs.
fn parse_query_params(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (decode_uri_component(key), decode_uri_component(value)),
            None => (decode_uri_component(pair), String::new()),
        })
        .collect()
}

/// Look up a query parameter by name.
pub(crate) fn query_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn query_has_key(params: &[(String, String)], key: &str) -> bool {
    params.iter().any(|(k, _)| k == key)
}

fn identify_bucket_operation(
    method: &Method,
    params: &[(String, String)],
) -> Result<S3Operation, S3Error> {
    match *method {
        Method::HEAD => Ok(S3Operation::HeadBucket),
        Method::GET => Ok(S3Operation::ListObjects),
        Method::POST => {
            if query_has_key(params, "delete") {
                Ok(S3Operation::DeleteObjects)
            } else {
                Err(S3Error::new(S3ErrorCode::InvalidRequest))
            }
        }
        _ => Err(S3Error::new(S3ErrorCode::MethodNotAllowed)),
    }
}

fn identify_object_operation(
    method: &Method,
    params: &[(String, String)],
    headers: &http::HeaderMap,
) -> Result<S3Operation, S3Error> {
    let has_copy_source = headers.contains_key("x-amz-copy-source");

    match *method {
        Method::HEAD => Ok(S3Operation::HeadObject),
        Method::GET => Ok(S3Operation::GetObject),
        Method::PUT => {
            if query_has_key(params, "partNumber") && query_has_key(params, "uploadId") {
                Ok(S3Operation::UploadPart)
            } else if has_copy_source {
                Ok(S3Operation::CopyObject)
            } else {
                Ok(S3Operation::PutObject)
            }
        }
        Method::POST => {
            if query_has_key(params, "uploads") {
                Ok(S3Operation::CreateMultipartUpload)
            } else if query_has_key(params, "uploadId") {
                Ok(S3Operation::CompleteMultipartUpload)
            } else {
                Err(S3Error::new(S3ErrorCode::InvalidRequest))
            }
        }
        Method::DELETE => {
            if query_has_key(params, "uploadId") {
                Ok(S3Operation::AbortMultipartUpload)
            } else {
                Ok(S3Operation::DeleteObject)
            }
        }
        _ => Err(S3Error::new(S3ErrorCode::MethodNotAllowed)),
    }
}
