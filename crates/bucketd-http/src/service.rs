//! The S3 HTTP service: authentication, routing, dispatch, and response
//! finishing.
//!
//! [`S3Service`] implements hyper's `Service` trait and processes every
//! request through the same pipeline:
//!
//! 1. Health and metrics endpoint interception (no SigV4)
//! 2. SigV4 verification (header form or presigned, selected by query
//!    parameters) with a fixed latency penalty on failure
//! 3. Routing to an operation against the configured bucket
//! 4. The privilege gate for mutating operations
//! 5. Handler dispatch; upload bodies stream through the aws-chunked
//!    decoder straight into the store, XML bodies are collected under a
//!    1 MiB cap
//! 6. Common response headers (`x-amz-request-id`, `Server`)
//!
//! Errors surface as S3 XML error documents with the status codes of the
//! protocol error table.

use std::convert::Infallible;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bucketd_auth::{CredentialProvider, is_presigned, verify_presigned, verify_sigv4};
use bucketd_store::{ByteStream, Store, StoreError};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::body::Incoming;
use hyper::service::Service;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::body::S3ResponseBody;
use crate::chunked::{AwsChunkedDecoder, is_aws_chunked};
use crate::error::{S3Error, S3ErrorCode};
use crate::handlers;
use crate::metrics::{Metrics, basic_auth_matches};
use crate::router::{self, S3Operation};
use crate::xml;

/// Cap on XML request bodies (complete-multipart, batch delete).
const XML_BODY_CAP: usize = 1 << 20;

/// Configuration for the S3 service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// The single bucket this server exposes.
    pub bucket: String,
    /// Per-object byte cap for puts and copies.
    pub max_object_size: u64,
    /// Per-part byte cap for multipart uploads.
    pub max_part_size: u64,
    /// Fixed latency applied before answering a failed authentication.
    pub auth_failure_delay: Duration,
    /// Basic-auth pair guarding `/metrics`; endpoint disabled when unset.
    pub metrics_auth: Option<(String, String)>,
    /// Proxies whose `X-Forwarded-For` is trusted for client-address logs.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bucket: "default".to_owned(),
            max_object_size: 5 * 1024 * 1024 * 1024,
            max_part_size: 5 * 1024 * 1024 * 1024,
            auth_failure_delay: Duration::from_millis(100),
            metrics_auth: None,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Shared per-process state behind the service.
pub(crate) struct ServiceState {
    pub(crate) store: Store,
    pub(crate) bucket: String,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) max_object_size: u64,
    pub(crate) max_part_size: u64,
    pub(crate) auth_failure_delay: Duration,
    pub(crate) metrics_auth: Option<(String, String)>,
    pub(crate) trusted_proxies: Vec<IpAddr>,
    pub(crate) metrics: Metrics,
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("bucket", &self.bucket)
            .field("max_object_size", &self.max_object_size)
            .field("max_part_size", &self.max_part_size)
            .finish_non_exhaustive()
    }
}

/// The hyper-compatible S3 service.
///
/// Clones share one [`ServiceState`]; [`S3Service::for_connection`]
/// produces a per-connection clone carrying the peer address for
/// client-attribution logs.
#[derive(Debug, Clone)]
pub struct S3Service {
    state: Arc<ServiceState>,
    remote: Option<IpAddr>,
}

impl S3Service {
    /// Create a service over the given store and credentials.
    #[must_use]
    pub fn new(
        store: Store,
        credentials: Arc<dyn CredentialProvider>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            state: Arc::new(ServiceState {
                store,
                bucket: config.bucket,
                credentials,
                max_object_size: config.max_object_size,
                max_part_size: config.max_part_size,
                auth_failure_delay: config.auth_failure_delay,
                metrics_auth: config.metrics_auth,
                trusted_proxies: config.trusted_proxies,
                metrics: Metrics::default(),
            }),
            remote: None,
        }
    }

    /// A clone bound to one accepted connection's peer address.
    #[must_use]
    pub fn for_connection(&self, remote: IpAddr) -> Self {
        Self {
            state: Arc::clone(&self.state),
            remote: Some(remote),
        }
    }
}

impl Service<http::Request<Incoming>> for S3Service {
    type Response = http::Response<S3ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let state = Arc::clone(&self.state);
        let remote = self.remote;
        Box::pin(async move { Ok(handle_request(&state, req, remote).await) })
    }
}

/// Process one request through the full pipeline.
pub(crate) async fn handle_request<B>(
    state: &ServiceState,
    req: http::Request<B>,
    remote: Option<IpAddr>,
) -> http::Response<S3ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    state.metrics.record_request();
    let request_id = Uuid::new_v4().to_string();

    let response = match process_request(state, req, remote, &request_id).await {
        Ok(response) => response,
        Err(err) => {
            state.metrics.record_error();
            debug!(code = %err.code, message = %err.message, request_id, "request failed");
            error_to_response(&err, &request_id)
        }
    };

    add_common_headers(response, &request_id)
}

async fn process_request<B>(
    state: &ServiceState,
    req: http::Request<B>,
    remote: Option<IpAddr>,
    request_id: &str,
) -> Result<http::Response<S3ResponseBody>, S3Error>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let (parts, body) = req.into_parts();
    let client = resolve_client_ip(state, remote, &parts.headers);

    // Operational endpoints sit outside the S3 namespace and skip SigV4.
    if parts.method == http::Method::GET {
        match parts.uri.path() {
            "/healthz" => return Ok(health_response()),
            "/metrics" => return Ok(metrics_response(state, &parts)),
            _ => {}
        }
    }

    let presigned = is_presigned(&parts);
    let auth_result = if presigned {
        verify_presigned(&parts, state.credentials.as_ref())
    } else {
        verify_sigv4(&parts, state.credentials.as_ref())
    };

    let credential = match auth_result {
        Ok(credential) => credential,
        Err(err) => {
            state.metrics.record_auth_failure();
            warn!(error = %err, request_id, "authentication failed");
            // Fixed penalty before answering, to blunt online brute force.
            tokio::time::sleep(state.auth_failure_delay).await;
            return Err(err.into());
        }
    };

    let route = router::resolve(&parts, &state.bucket)?;

    info!(
        operation = %route.operation,
        key = ?route.key,
        access_key_id = %credential.access_key_id,
        client = ?client,
        presigned,
        request_id,
        "dispatching request"
    );

    if route.operation.is_mutating() && !credential.privilege.can_write() {
        return Err(S3Error::new(S3ErrorCode::AccessDenied));
    }

    let key = route.key.as_deref().unwrap_or("");

    match route.operation {
        S3Operation::HeadBucket => handlers::head_bucket(),
        S3Operation::ListObjects => handlers::list_objects(state, &route.query_params).await,
        S3Operation::DeleteObjects => {
            let bytes = collect_capped(body, XML_BODY_CAP).await?;
            handlers::delete_objects(state, bytes).await
        }
        S3Operation::HeadObject => handlers::head_object(state, key).await,
        S3Operation::GetObject => {
            handlers::get_object(state, &parts, key, &route.query_params, presigned).await
        }
        S3Operation::PutObject => {
            let stream = request_body_stream(&parts, body);
            handlers::put_object(state, &parts, key, stream).await
        }
        S3Operation::CopyObject => handlers::copy_object(state, &parts, key).await,
        S3Operation::UploadPart => {
            let stream = request_body_stream(&parts, body);
            handlers::upload_part(state, &route.query_params, stream).await
        }
        S3Operation::CreateMultipartUpload => {
            handlers::create_multipart_upload(state, &parts, key).await
        }
        S3Operation::CompleteMultipartUpload => {
            let bytes = collect_capped(body, XML_BODY_CAP).await?;
            handlers::complete_multipart_upload(state, key, &route.query_params, bytes).await
        }
        S3Operation::AbortMultipartUpload => {
            handlers::abort_multipart_upload(state, &route.query_params).await
        }
        S3Operation::DeleteObject => handlers::delete_object(state, key).await,
    }
}

/// The client address for logs: the first `X-Forwarded-For` hop when the
/// peer is a trusted proxy, the peer itself otherwise.
fn resolve_client_ip(
    state: &ServiceState,
    remote: Option<IpAddr>,
    headers: &http::HeaderMap,
) -> Option<IpAddr> {
    let remote = remote?;
    if state.trusted_proxies.contains(&remote) {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if let Some(forwarded) = forwarded {
            return Some(forwarded);
        }
    }
    Some(remote)
}

// ---------------------------------------------------------------------------
// Body plumbing
// ---------------------------------------------------------------------------

/// The request body as a store stream, unwrapping aws-chunked framing when
/// the request declares it.
fn request_body_stream<B>(parts: &http::request::Parts, body: B) -> ByteStream
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let raw = raw_body_stream(body);
    if is_aws_chunked(parts) {
        AwsChunkedDecoder::stream(raw)
    } else {
        raw
    }
}

fn raw_body_stream<B>(body: B) -> ByteStream
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    Box::pin(
        http_body_util::BodyStream::new(body).filter_map(|result| async move {
            match result {
                // Trailer frames are dropped; only data reaches the store.
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(StoreError::Io(std::io::Error::other(e.into())))),
            }
        }),
    )
}

/// Collect an XML request body, refusing anything over `cap`.
async fn collect_capped<B>(body: B, cap: usize) -> Result<Bytes, S3Error>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    let mut stream = raw_body_stream(body);
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(S3Error::from)?;
        if buf.len() + chunk.len() > cap {
            return Err(S3Error::with_message(
                S3ErrorCode::MalformedXML,
                "request body exceeds the XML size limit",
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

// ---------------------------------------------------------------------------
// Response finishing
// ---------------------------------------------------------------------------

/// Render an error as its XML document with the mapped status code.
pub(crate) fn error_to_response(err: &S3Error, request_id: &str) -> http::Response<S3ResponseBody> {
    let doc = xml::ErrorDocument {
        code: err.code.as_str(),
        message: &err.message,
        request_id: Some(request_id),
    };
    let body = xml::to_xml("Error", &doc).unwrap_or_default();

    http::Response::builder()
        .status(err.status_code)
        .header(http::header::CONTENT_TYPE, "application/xml")
        .body(S3ResponseBody::from_xml(body))
        .expect("error response with static headers should build")
}

fn add_common_headers(
    mut response: http::Response<S3ResponseBody>,
    request_id: &str,
) -> http::Response<S3ResponseBody> {
    let headers = response.headers_mut();
    if let Ok(value) = http::HeaderValue::from_str(request_id) {
        headers.insert("x-amz-request-id", value);
    }
    headers.insert("Server", http::HeaderValue::from_static("bucketd"));
    response
}

fn health_response() -> http::Response<S3ResponseBody> {
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(S3ResponseBody::from_bytes(&br#"{"status":"ok"}"#[..]))
        .expect("static health response should build")
}

fn metrics_response(
    state: &ServiceState,
    parts: &http::request::Parts,
) -> http::Response<S3ResponseBody> {
    let Some((user, pass)) = &state.metrics_auth else {
        return http::Response::builder()
            .status(http::StatusCode::NOT_FOUND)
            .body(S3ResponseBody::empty())
            .expect("static response should build");
    };

    let authorized = basic_auth_matches(
        parts.headers.get(http::header::AUTHORIZATION),
        user,
        pass,
    );
    if !authorized {
        return http::Response::builder()
            .status(http::StatusCode::UNAUTHORIZED)
            .header("WWW-Authenticate", "Basic realm=\"metrics\"")
            .body(S3ResponseBody::empty())
            .expect("static response should build");
    }

    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(
            http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(S3ResponseBody::from_bytes(Bytes::from(state.metrics.render())))
        .expect("metrics response should build")
}
