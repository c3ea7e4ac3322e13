//! Error types for SigV4 authentication.
//!
//! All authentication failures are represented by [`AuthError`]. The variants
//! are deliberately distinct where the protocol requires distinct error codes
//! on the wire: a skewed clock, an expired presigned URL, an unknown access
//! key, and a signature mismatch all surface differently to clients.

/// Errors that can occur during AWS Signature Version 4 authentication.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header is missing from a header-form request.
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header or the presigned query parameters do not
    /// match the SigV4 grammar.
    #[error("Malformed authorization: {0}")]
    Malformed(String),

    /// The signing algorithm is not `AWS4-HMAC-SHA256`.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A required HTTP header referenced in `SignedHeaders` is missing.
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// A required presigned query parameter is missing or invalid.
    #[error("Missing required query parameter: {0}")]
    MissingQueryParam(String),

    /// The access key ID was not found in the credential store.
    #[error("Access key not found: {0}")]
    AccessKeyNotFound(String),

    /// The computed signature does not match the provided signature.
    #[error("Signature does not match")]
    SignatureDoesNotMatch,

    /// The request timestamp is outside the permitted clock-skew window,
    /// or a presigned URL is dated too far in the future.
    #[error("Request time too skewed")]
    RequestTimeTooSkewed,

    /// The presigned URL is past `X-Amz-Date` + `X-Amz-Expires`.
    #[error("Presigned URL has expired")]
    Expired,
}
