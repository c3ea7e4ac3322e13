//! S3 protocol error codes and the error response type.
//!
//! Every failure surfaces to clients as an S3-style
//! `<Error><Code>…</Code><Message>…</Message></Error>` document. The
//! `Resource` field is intentionally omitted so internal request paths are
//! never echoed back.

use std::fmt;

use bucketd_auth::AuthError;
use bucketd_store::StoreError;

/// Well-known S3 error codes served by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum S3ErrorCode {
    /// AccessDenied error.
    AccessDenied,
    /// AuthorizationHeaderMalformed error.
    AuthorizationHeaderMalformed,
    /// EntityTooLarge error.
    EntityTooLarge,
    /// ExpiredToken error.
    ExpiredToken,
    /// InternalError error.
    InternalError,
    /// InvalidAccessKeyId error.
    InvalidAccessKeyId,
    /// InvalidArgument error.
    InvalidArgument,
    /// InvalidPart error.
    InvalidPart,
    /// InvalidPartOrder error.
    InvalidPartOrder,
    /// InvalidRange error.
    InvalidRange,
    /// InvalidRequest error.
    InvalidRequest,
    /// MalformedXML error.
    MalformedXML,
    /// MethodNotAllowed error.
    MethodNotAllowed,
    /// NoSuchBucket error.
    NoSuchBucket,
    /// NoSuchKey error.
    NoSuchKey,
    /// NoSuchUpload error.
    NoSuchUpload,
    /// RequestTimeTooSkewed error.
    RequestTimeTooSkewed,
    /// SignatureDoesNotMatch error.
    SignatureDoesNotMatch,
}

impl S3ErrorCode {
    /// Returns the error code as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::AuthorizationHeaderMalformed => "AuthorizationHeaderMalformed",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::ExpiredToken => "ExpiredToken",
            Self::InternalError => "InternalError",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidPart => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidRange => "InvalidRange",
            Self::InvalidRequest => "InvalidRequest",
            Self::MalformedXML => "MalformedXML",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(self) -> http::StatusCode {
        match self {
            Self::AuthorizationHeaderMalformed
            | Self::InvalidArgument
            | Self::InvalidPart
            | Self::InvalidPartOrder
            | Self::InvalidRequest
            | Self::MalformedXML => http::StatusCode::BAD_REQUEST,
            Self::AccessDenied
            | Self::ExpiredToken
            | Self::InvalidAccessKeyId
            | Self::RequestTimeTooSkewed
            | Self::SignatureDoesNotMatch => http::StatusCode::FORBIDDEN,
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchUpload => {
                http::StatusCode::NOT_FOUND
            }
            Self::MethodNotAllowed => http::StatusCode::METHOD_NOT_ALLOWED,
            Self::EntityTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidRange => http::StatusCode::RANGE_NOT_SATISFIABLE,
            Self::InternalError => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the default wire message for this error.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::AccessDenied => "Access Denied",
            Self::AuthorizationHeaderMalformed => "The authorization header is malformed",
            Self::EntityTooLarge => "Your proposed upload exceeds the maximum allowed size",
            Self::ExpiredToken => "The provided token has expired",
            Self::InternalError => "Internal server error",
            Self::InvalidAccessKeyId => {
                "The AWS access key Id you provided does not exist in our records"
            }
            Self::InvalidArgument => "Invalid Argument",
            Self::InvalidPart => "One or more of the specified parts could not be found",
            Self::InvalidPartOrder => "The list of parts was not in ascending order",
            Self::InvalidRange => "The requested range cannot be satisfied",
            Self::InvalidRequest => "Invalid Request",
            Self::MalformedXML => "The XML you provided was not well-formed",
            Self::MethodNotAllowed => "The specified method is not allowed against this resource",
            Self::NoSuchBucket => "The specified bucket does not exist",
            Self::NoSuchKey => "The specified key does not exist",
            Self::NoSuchUpload => "The specified multipart upload does not exist",
            Self::RequestTimeTooSkewed => {
                "The difference between the request time and the server's time is too large"
            }
            Self::SignatureDoesNotMatch => {
                "The request signature we calculated does not match the signature you provided"
            }
        }
    }
}

impl fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An S3 error response.
#[derive(Debug)]
pub struct S3Error {
    /// The error code.
    pub code: S3ErrorCode,
    /// A human-readable message.
    pub message: String,
    /// The HTTP status code.
    pub status_code: http::StatusCode,
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3Error({}): {}", self.code, self.message)
    }
}

impl std::error::Error for S3Error {}

impl S3Error {
    /// Create an error with the code's default message.
    #[must_use]
    pub fn new(code: S3ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_owned(),
            status_code: code.status_code(),
        }
    }

    /// Create an error with a custom message.
    #[must_use]
    pub fn with_message(code: S3ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: code.status_code(),
        }
    }

    /// Shorthand for an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::InvalidArgument, message)
    }

    /// Shorthand for an `InternalError`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::InternalError, message)
    }
}

impl From<StoreError> for S3Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSuchBucket { .. } => Self::new(S3ErrorCode::NoSuchBucket),
            StoreError::NoSuchKey { .. } => Self::new(S3ErrorCode::NoSuchKey),
            StoreError::NoSuchUpload { .. } => Self::new(S3ErrorCode::NoSuchUpload),
            StoreError::InvalidArgument { message } => {
                Self::with_message(S3ErrorCode::InvalidArgument, message)
            }
            StoreError::InvalidPart { part_number } => Self::with_message(
                S3ErrorCode::InvalidPart,
                format!("Part {part_number} could not be found or does not match"),
            ),
            StoreError::InvalidPartOrder => Self::new(S3ErrorCode::InvalidPartOrder),
            StoreError::EntityTooLarge { .. } => Self::new(S3ErrorCode::EntityTooLarge),
            StoreError::InvalidRange { .. } => Self::new(S3ErrorCode::InvalidRange),
            StoreError::Io(e) => {
                tracing::error!(error = %e, "storage I/O failure");
                Self::new(S3ErrorCode::InternalError)
            }
            StoreError::CorruptMeta(e) => {
                tracing::error!(error = %e, "corrupt metadata record");
                Self::new(S3ErrorCode::InternalError)
            }
        }
    }
}

impl From<AuthError> for S3Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuthHeader
            | AuthError::Malformed(_)
            | AuthError::UnsupportedAlgorithm(_)
            | AuthError::MissingHeader(_)
            | AuthError::MissingQueryParam(_) => {
                Self::with_message(S3ErrorCode::AuthorizationHeaderMalformed, err.to_string())
            }
            AuthError::AccessKeyNotFound(_) => Self::new(S3ErrorCode::InvalidAccessKeyId),
            AuthError::SignatureDoesNotMatch => Self::new(S3ErrorCode::SignatureDoesNotMatch),
            AuthError::RequestTimeTooSkewed => Self::new(S3ErrorCode::RequestTimeTooSkewed),
            AuthError::Expired => Self::new(S3ErrorCode::ExpiredToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_codes_to_protocol_statuses() {
        assert_eq!(
            S3ErrorCode::NoSuchKey.status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            S3ErrorCode::EntityTooLarge.status_code(),
            http::StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            S3ErrorCode::InvalidRange.status_code(),
            http::StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            S3ErrorCode::ExpiredToken.status_code(),
            http::StatusCode::FORBIDDEN
        );
        assert_eq!(
            S3ErrorCode::AuthorizationHeaderMalformed.status_code(),
            http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_should_map_store_errors() {
        let err: S3Error = StoreError::NoSuchKey {
            key: "k".to_owned(),
        }
        .into();
        assert_eq!(err.code, S3ErrorCode::NoSuchKey);

        let err: S3Error = StoreError::InvalidPartOrder.into();
        assert_eq!(err.code, S3ErrorCode::InvalidPartOrder);

        let err: S3Error = StoreError::EntityTooLarge { limit: 5 }.into();
        assert_eq!(err.status_code, http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_should_map_auth_errors() {
        let err: S3Error = AuthError::Expired.into();
        assert_eq!(err.code, S3ErrorCode::ExpiredToken);

        let err: S3Error = AuthError::RequestTimeTooSkewed.into();
        assert_eq!(err.code, S3ErrorCode::RequestTimeTooSkewed);

        let err: S3Error = AuthError::AccessKeyNotFound("x".to_owned()).into();
        assert_eq!(err.code, S3ErrorCode::InvalidAccessKeyId);

        let err: S3Error = AuthError::MissingAuthHeader.into();
        assert_eq!(err.code, S3ErrorCode::AuthorizationHeaderMalformed);
    }
}
