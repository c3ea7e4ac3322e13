//! S3 protocol front-end for bucketd.
//!
//! This crate maps the overloaded S3 HTTP/XML grammar onto the storage
//! engine: routing and dispatch, SigV4 authentication wiring, streaming
//! body decoding, Range parsing, XML request/response shaping, error
//! mapping, and the privilege gate. [`S3Service`] is the hyper `Service`
//! the server binary mounts on its listener.
//!
//! # Modules
//!
//! - [`body`] - Response body modes (empty, buffered, file-streaming)
//! - [`chunked`] - Streaming aws-chunked decoder
//! - [`error`] - Protocol error codes and XML error documents
//! - [`headers`] - Metadata extraction, copy sources, response overrides
//! - [`metrics`] - Lock-free counters and the Prometheus endpoint
//! - [`range`] - `Range` header grammar
//! - [`router`] - Operation identification
//! - [`service`] - The request pipeline
//! - [`xml`] - Response serialization and request deserialization

pub mod body;
pub mod chunked;
pub mod error;
pub(crate) mod handlers;
pub mod headers;
pub mod metrics;
pub mod range;
pub mod router;
pub mod service;
pub mod xml;

pub use body::S3ResponseBody;
pub use error::{S3Error, S3ErrorCode};
pub use router::S3Operation;
pub use service::{S3Service, ServiceConfig};
