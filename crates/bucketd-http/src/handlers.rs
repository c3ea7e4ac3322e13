//! Per-operation handlers: the bridge from routed requests to the store.
//!
//! Each handler owns exactly one operation's request parsing and response
//! shaping; store errors propagate by kind and are translated to status
//! codes and XML by the service layer. The one exception is the 416 range
//! reply, which is built here because it carries the mandatory
//! `Content-Range: bytes */<size>` header.

use bucketd_store::list::MAX_KEYS_CEILING;
use bucketd_store::{ByteStream, ListOptions, ObjectMeta, StoreError};
use bytes::Bytes;
use tracing::debug;

use crate::body::S3ResponseBody;
use crate::error::{S3Error, S3ErrorCode};
use crate::headers::{
    extract_user_metadata, format_http_date, parse_copy_source, response_overrides,
};
use crate::range::parse_range_header;
use crate::router::query_value;
use crate::service::ServiceState;
use crate::xml;

type HandlerResult = Result<http::Response<S3ResponseBody>, S3Error>;

// ---------------------------------------------------------------------------
// Bucket operations
// ---------------------------------------------------------------------------

pub(crate) fn head_bucket() -> HandlerResult {
    build(
        http::Response::builder().status(http::StatusCode::OK),
        S3ResponseBody::empty(),
    )
}

pub(crate) async fn list_objects(
    state: &ServiceState,
    query_params: &[(String, String)],
) -> HandlerResult {
    let max_keys = match query_value(query_params, "max-keys") {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| S3Error::invalid_argument("max-keys must be a non-negative integer"))?,
        ),
        None => None,
    };

    let options = ListOptions {
        prefix: query_value(query_params, "prefix").map(str::to_owned),
        delimiter: query_value(query_params, "delimiter").map(str::to_owned),
        max_keys,
        start_after: query_value(query_params, "start-after").map(str::to_owned),
        continuation_token: query_value(query_params, "continuation-token").map(str::to_owned),
    };

    let listing = state.store.list_objects(&state.bucket, &options).await?;

    let result = xml::ListBucketResult {
        name: state.bucket.clone(),
        prefix: options.prefix.clone().unwrap_or_default(),
        start_after: options.start_after.clone(),
        delimiter: options.delimiter.clone(),
        max_keys: max_keys.unwrap_or(MAX_KEYS_CEILING).min(MAX_KEYS_CEILING),
        is_truncated: listing.is_truncated,
        continuation_token: options.continuation_token.clone(),
        next_continuation_token: listing.next_continuation_token,
        contents: listing
            .objects
            .into_iter()
            .map(|meta| xml::ListEntry {
                key: meta.key,
                last_modified: meta.last_modified,
                etag: meta.etag,
                size: meta.size,
            })
            .collect(),
        common_prefixes: listing.common_prefixes,
    };

    xml_response("ListBucketResult", &result)
}

pub(crate) async fn delete_objects(state: &ServiceState, body: Bytes) -> HandlerResult {
    let request = xml::parse_delete_objects(&body)?;

    let mut result = xml::DeleteResult {
        deleted: Vec::new(),
        errors: Vec::new(),
    };

    for key in request.keys {
        match state.store.delete_object(&state.bucket, &key).await {
            Ok(()) => {
                if !request.quiet {
                    result.deleted.push(key);
                }
            }
            Err(e) => {
                let s3_err = S3Error::from(e);
                result.errors.push(xml::DeleteErrorEntry {
                    key,
                    code: s3_err.code.as_str().to_owned(),
                    message: s3_err.message,
                });
            }
        }
    }

    debug!(
        deleted = result.deleted.len(),
        failed = result.errors.len(),
        "batch delete finished"
    );
    xml_response("DeleteResult", &result)
}

// ---------------------------------------------------------------------------
// Object operations
// ---------------------------------------------------------------------------

pub(crate) async fn head_object(state: &ServiceState, key: &str) -> HandlerResult {
    let meta = state.store.head_object(&state.bucket, key).await?;
    let builder = object_headers(
        http::Response::builder().status(http::StatusCode::OK),
        &meta,
    );
    build(
        builder.header(http::header::CONTENT_LENGTH, meta.size),
        S3ResponseBody::empty(),
    )
}

pub(crate) async fn get_object(
    state: &ServiceState,
    parts: &http::request::Parts,
    key: &str,
    query_params: &[(String, String)],
    presigned: bool,
) -> HandlerResult {
    let range_header = parts
        .headers
        .get(http::header::RANGE)
        .map(|v| {
            v.to_str()
                .map_err(|_| S3Error::invalid_argument("invalid Range header"))
        })
        .transpose()?;

    let (meta, content_range, reader) = match range_header {
        Some(raw) => {
            let range = parse_range_header(raw)?;
            match state.store.get_object_range(&state.bucket, key, range).await {
                Ok((meta, span, reader)) => (meta, Some(span), reader),
                Err(StoreError::InvalidRange { size }) => {
                    return range_not_satisfiable(size);
                }
                Err(e) => return Err(e.into()),
            }
        }
        None => {
            let (meta, reader) = state.store.get_object(&state.bucket, key).await?;
            (meta, None, reader)
        }
    };

    let mut builder = match content_range {
        Some((start, end)) => http::Response::builder()
            .status(http::StatusCode::PARTIAL_CONTENT)
            .header(
                http::header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", meta.size),
            )
            .header(http::header::CONTENT_LENGTH, end - start + 1),
        None => http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_LENGTH, meta.size),
    };
    builder = object_headers(builder, &meta);

    // Presigned GETs may override a fixed set of response headers; the
    // values were signed as query parameters, but still get the injection
    // screen. Non-presigned requests never honor them.
    if presigned {
        for (name, value) in response_overrides(query_params) {
            builder = builder.header(name, value);
        }
    }

    build(builder, S3ResponseBody::from_reader(reader))
}

pub(crate) async fn put_object(
    state: &ServiceState,
    parts: &http::request::Parts,
    key: &str,
    body: ByteStream,
) -> HandlerResult {
    let user_metadata = extract_user_metadata(&parts.headers)?;
    let content_type = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let meta = state
        .store
        .put_object(
            &state.bucket,
            key,
            content_type,
            user_metadata,
            body,
            state.max_object_size,
        )
        .await?;

    build(
        http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::ETAG, &meta.etag),
        S3ResponseBody::empty(),
    )
}

pub(crate) async fn copy_object(
    state: &ServiceState,
    parts: &http::request::Parts,
    key: &str,
) -> HandlerResult {
    let source = parts
        .headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::invalid_argument("invalid x-amz-copy-source header"))?;
    let (src_bucket, src_key) = parse_copy_source(source)?;

    // Only the configured bucket exists; a cross-bucket source is unknown.
    if src_bucket != state.bucket {
        return Err(S3Error::new(S3ErrorCode::NoSuchBucket));
    }

    let meta = state
        .store
        .copy_object(&state.bucket, &src_key, key, state.max_object_size)
        .await?;

    let result = xml::CopyObjectResult {
        etag: meta.etag,
        last_modified: meta.last_modified,
    };
    xml_response("CopyObjectResult", &result)
}

pub(crate) async fn delete_object(state: &ServiceState, key: &str) -> HandlerResult {
    state.store.delete_object(&state.bucket, key).await?;
    build(
        http::Response::builder().status(http::StatusCode::NO_CONTENT),
        S3ResponseBody::empty(),
    )
}

// ---------------------------------------------------------------------------
// Multipart operations
// ---------------------------------------------------------------------------

pub(crate) async fn create_multipart_upload(
    state: &ServiceState,
    parts: &http::request::Parts,
    key: &str,
) -> HandlerResult {
    let user_metadata = extract_user_metadata(&parts.headers)?;
    let content_type = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let upload = state
        .store
        .create_upload(&state.bucket, key, content_type, user_metadata)
        .await?;

    let result = xml::InitiateMultipartUploadResult {
        bucket: state.bucket.clone(),
        key: key.to_owned(),
        upload_id: upload.upload_id,
    };
    xml_response("InitiateMultipartUploadResult", &result)
}

pub(crate) async fn upload_part(
    state: &ServiceState,
    query_params: &[(String, String)],
    body: ByteStream,
) -> HandlerResult {
    let upload_id = required_query(query_params, "uploadId")?;
    let part_number: u32 = required_query(query_params, "partNumber")?
        .parse()
        .map_err(|_| S3Error::invalid_argument("partNumber must be an integer"))?;

    let part = state
        .store
        .upload_part(upload_id, part_number, body, state.max_part_size)
        .await?;

    build(
        http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::ETAG, &part.etag),
        S3ResponseBody::empty(),
    )
}

pub(crate) async fn complete_multipart_upload(
    state: &ServiceState,
    key: &str,
    query_params: &[(String, String)],
    body: Bytes,
) -> HandlerResult {
    let upload_id = required_query(query_params, "uploadId")?;
    let parts: Vec<(u32, String)> = xml::parse_complete_multipart(&body)?
        .into_iter()
        .map(|p| (p.part_number, p.etag))
        .collect();

    let meta = state
        .store
        .complete_upload(&state.bucket, key, upload_id, &parts)
        .await?;

    let result = xml::CompleteMultipartUploadResult {
        bucket: state.bucket.clone(),
        key: key.to_owned(),
        etag: meta.etag,
    };
    xml_response("CompleteMultipartUploadResult", &result)
}

pub(crate) async fn abort_multipart_upload(
    state: &ServiceState,
    query_params: &[(String, String)],
) -> HandlerResult {
    let upload_id = required_query(query_params, "uploadId")?;
    state.store.abort_upload(upload_id).await?;
    build(
        http::Response::builder().status(http::StatusCode::NO_CONTENT),
        S3ResponseBody::empty(),
    )
}

// ---------------------------------------------------------------------------
// Shared response plumbing
// ---------------------------------------------------------------------------

fn required_query<'a>(
    query_params: &'a [(String, String)],
    name: &str,
) -> Result<&'a str, S3Error> {
    query_value(query_params, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| S3Error::invalid_argument(format!("missing {name}")))
}

/// Standard object headers for GET and HEAD responses.
fn object_headers(
    mut builder: http::response::Builder,
    meta: &ObjectMeta,
) -> http::response::Builder {
    builder = builder
        .header(http::header::CONTENT_TYPE, &meta.content_type)
        .header(http::header::ETAG, &meta.etag)
        .header(
            http::header::LAST_MODIFIED,
            format_http_date(&meta.last_modified),
        )
        .header(http::header::ACCEPT_RANGES, "bytes");

    for (name, value) in &meta.user_metadata {
        if let Ok(header_value) = http::HeaderValue::from_str(value) {
            builder = builder.header(format!("x-amz-meta-{name}"), header_value);
        }
    }
    builder
}

/// The 416 reply with its mandatory `Content-Range: bytes */<size>`.
fn range_not_satisfiable(size: u64) -> HandlerResult {
    let err = S3Error::new(S3ErrorCode::InvalidRange);
    let doc = xml::ErrorDocument {
        code: err.code.as_str(),
        message: &err.message,
        request_id: None,
    };
    build(
        http::Response::builder()
            .status(http::StatusCode::RANGE_NOT_SATISFIABLE)
            .header(http::header::CONTENT_RANGE, format!("bytes */{size}"))
            .header(http::header::CONTENT_TYPE, "application/xml"),
        S3ResponseBody::from_xml(xml::to_xml("Error", &doc)?),
    )
}

fn xml_response<T: xml::S3Serialize>(root: &str, value: &T) -> HandlerResult {
    build(
        http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/xml"),
        S3ResponseBody::from_xml(xml::to_xml(root, value)?),
    )
}

fn build(
    builder: http::response::Builder,
    body: S3ResponseBody,
) -> HandlerResult {
    builder
        .body(body)
        .map_err(|e| S3Error::internal(format!("failed to build response: {e}")))
}
