//! AWS Signature Version 4 request authentication for bucketd.
//!
//! This crate implements the verification side of SigV4: given an incoming
//! HTTP request and a credential store, it verifies that the request was
//! signed by a known access key with the correct secret key. Both
//! authentication forms are supported:
//!
//! - **Header form**: the signature travels in the `Authorization` header
//!   and the request is bound to a 15-minute clock-skew window around
//!   `X-Amz-Date`.
//! - **Presigned URLs**: the signature travels in `X-Amz-*` query
//!   parameters with an explicit validity duration (`X-Amz-Expires`, at
//!   most seven days).
//!
//! Verified requests resolve to a [`Credential`], which carries the
//! [`Privilege`] the caller uses for read/write authorization decisions.
//!
//! # Modules
//!
//! - [`canonical`] - Canonical request construction per the SigV4 specification
//! - [`credentials`] - Credential provider trait and in-memory implementation
//! - [`error`] - Authentication error types
//! - [`presigned`] - Presigned URL verification
//! - [`sigv4`] - Header-form SigV4 verification

pub mod canonical;
pub mod credentials;
pub mod error;
pub mod presigned;
pub mod sigv4;

pub use credentials::{Credential, CredentialProvider, Privilege, StaticCredentialProvider};
pub use error::AuthError;
pub use presigned::{is_presigned, verify_presigned};
pub use sigv4::verify_sigv4;
