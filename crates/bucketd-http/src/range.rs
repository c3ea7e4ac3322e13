//! `Range` header parsing.
//!
//! Grammar accepted: `bytes=` followed by exactly one of `start-end`,
//! `start-`, or `-suffix`. Multiple comma-separated ranges are rejected.
//! Numeric components are bounded well below `i64::MAX` so later offset
//! arithmetic cannot overflow.

use bucketd_store::ByteRange;

use crate::error::S3Error;

/// Upper bound on any numeric range component: `(2^63 - 1) / 2`.
const MAX_RANGE_BOUND: u64 = i64::MAX as u64 / 2;

/// Parse a `Range` header value into a [`ByteRange`].
///
/// # Errors
///
/// Returns an `InvalidArgument` error for anything outside the grammar:
/// missing `bytes=` prefix, multiple ranges, non-numeric or oversized
/// components, or an empty `-` spec.
pub fn parse_range_header(value: &str) -> Result<ByteRange, S3Error> {
    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| S3Error::invalid_argument("range must use the bytes unit"))?;

    if spec.contains(',') {
        return Err(S3Error::invalid_argument(
            "multiple byte ranges are not supported",
        ));
    }

    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| S3Error::invalid_argument("invalid range specification"))?;

    match (start.is_empty(), end.is_empty()) {
        // "-suffix"
        (true, false) => Ok(ByteRange::Suffix(parse_bound(end)?)),
        // "start-"
        (false, true) => Ok(ByteRange::From(parse_bound(start)?)),
        // "start-end"
        (false, false) => Ok(ByteRange::Bounded(parse_bound(start)?, parse_bound(end)?)),
        // "-"
        (true, true) => Err(S3Error::invalid_argument("invalid range specification")),
    }
}

fn parse_bound(s: &str) -> Result<u64, S3Error> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(S3Error::invalid_argument("range bound must be numeric"));
    }
    let value: u64 = s
        .parse()
        .map_err(|_| S3Error::invalid_argument("range bound out of range"))?;
    if value > MAX_RANGE_BOUND {
        return Err(S3Error::invalid_argument("range bound out of range"));
    }
    Ok(value)
}
