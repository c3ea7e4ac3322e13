//! Checksum computation for stored objects.
//!
//! ETags follow the S3 convention: the quoted lowercase hex MD5 of the
//! payload for single-shot objects, and for multipart objects the quoted
//! `hex(MD5(MD5(p1) ∥ … ∥ MD5(pN)))-N` composite over the parts' raw
//! digests.

use digest::Digest;

/// Incremental MD5 accumulator for streamed bodies.
///
/// The write pipeline feeds every chunk through this as it spools to disk,
/// so the ETag is available the moment the body hits EOF without a second
/// pass over the file.
#[derive(Debug, Default)]
pub struct Md5Accumulator {
    hasher: md5::Md5,
}

impl Md5Accumulator {
    /// Create a fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of body bytes.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finish and return the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Compute the hex-encoded MD5 digest of `data`.
///
/// # Examples
///
/// ```
/// use bucketd_store::checksums::compute_md5;
///
/// assert_eq!(compute_md5(b"hello"), "5d41402abc4b2a76b9719d911017c592");
/// ```
#[must_use]
pub fn compute_md5(data: &[u8]) -> String {
    hex::encode(md5::Md5::digest(data))
}

/// Quote a hex MD5 digest into ETag form.
#[must_use]
pub fn quote_etag(md5_hex: &str) -> String {
    format!("\"{md5_hex}\"")
}

/// Compute the quoted single-shot ETag of `data`.
///
/// # Examples
///
/// ```
/// use bucketd_store::checksums::compute_etag;
///
/// assert_eq!(compute_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
/// ```
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    quote_etag(&compute_md5(data))
}

/// Compute the composite ETag for a multipart upload.
///
/// Each entry in `part_md5_hexes` is the *unquoted* hex MD5 of one part, in
/// completion order. The composite is the MD5 of the concatenated raw
/// 16-byte digests, suffixed with `-<part count>`.
///
/// # Examples
///
/// ```
/// use bucketd_store::checksums::compute_multipart_etag;
///
/// let etag = compute_multipart_etag(&["5d41402abc4b2a76b9719d911017c592"]);
/// assert!(etag.starts_with('"') && etag.ends_with("-1\""));
/// ```
#[must_use]
pub fn compute_multipart_etag(part_md5_hexes: &[impl AsRef<str>]) -> String {
    let mut combined = Vec::with_capacity(part_md5_hexes.len() * 16);
    for hex_str in part_md5_hexes {
        let hex_str = hex_str.as_ref().trim_matches('"');
        if let Ok(bytes) = hex::decode(hex_str) {
            combined.extend_from_slice(&bytes);
        }
    }
    let final_md5 = hex::encode(md5::Md5::digest(&combined));
    format!("\"{final_md5}-{}\"", part_md5_hexes.len())
}
