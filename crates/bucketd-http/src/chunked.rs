//! Streaming AWS chunked transfer decoding.
//!
//! Clients signing streamed uploads (`Content-Encoding: aws-chunked` or
//! `X-Amz-Content-Sha256: STREAMING-AWS4-HMAC-SHA256-PAYLOAD`) frame the
//! body as:
//!
//! ```text
//! <hex-size>;chunk-signature=<sig>\r\n
//! <data>\r\n
//! 0;chunk-signature=<sig>\r\n
//! \r\n
//! ```
//!
//! [`AwsChunkedDecoder`] unwraps that framing incrementally: payload bytes
//! pass through as they arrive and only the frame header in progress is
//! buffered (bounded by [`MAX_HEADER_LINE`]). Chunk signatures are not
//! re-verified; the outer request signature already authenticates the
//! request, and presigned uploads declare the payload unsigned.

use std::pin::Pin;
use std::task::{Context, Poll};

use bucketd_store::{ByteStream, StoreError};
use bytes::{Bytes, BytesMut};
use futures::Stream;

/// Upper bound on a frame header line (hex size plus extensions).
const MAX_HEADER_LINE: usize = 8192;

/// Return `true` if the request body uses AWS chunked encoding.
///
/// Detection checks `Content-Encoding` for `aws-chunked` and
/// `x-amz-content-sha256` for a `STREAMING-` prefix.
#[must_use]
pub fn is_aws_chunked(parts: &http::request::Parts) -> bool {
    if let Some(ce) = parts.headers.get(http::header::CONTENT_ENCODING) {
        if let Ok(s) = ce.to_str() {
            if s.split(',').any(|v| v.trim().eq_ignore_ascii_case("aws-chunked")) {
                return true;
            }
        }
    }

    if let Some(sha) = parts.headers.get("x-amz-content-sha256") {
        if let Ok(s) = sha.to_str() {
            if s.starts_with("STREAMING-") {
                return true;
            }
        }
    }

    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Waiting for a complete `<hex-size>[;ext]\r\n` line.
    Header,
    /// Passing through payload bytes.
    Data { remaining: u64 },
    /// Expecting the `\r\n` that closes a data section.
    DataCrlf,
    /// Consuming trailer lines after the zero-size frame.
    Trailer,
    /// Terminal.
    Done,
}

/// Incremental decoder from the aws-chunked framing to a plain byte stream.
///
/// Wraps a [`ByteStream`] and yields only payload bytes; framing errors
/// surface as [`StoreError::InvalidArgument`] so the front-end maps them to
/// a 400.
pub struct AwsChunkedDecoder {
    inner: ByteStream,
    buf: BytesMut,
    state: DecoderState,
}

impl std::fmt::Debug for AwsChunkedDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsChunkedDecoder")
            .field("buffered", &self.buf.len())
            .field("state", &self.state)
            .finish()
    }
}

impl AwsChunkedDecoder {
    /// Wrap a raw body stream.
    #[must_use]
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            state: DecoderState::Header,
        }
    }

    /// Wrap and box, ready to hand to the store.
    #[must_use]
    pub fn stream(inner: ByteStream) -> ByteStream {
        Box::pin(Self::new(inner))
    }

    /// Try to make progress from buffered bytes alone.
    ///
    /// Returns `Ok(Some(bytes))` when payload is ready, `Ok(None)` when more
    /// input is needed (or the stream is logically finished).
    fn advance(&mut self) -> Result<Option<Bytes>, StoreError> {
        loop {
            match self.state {
                DecoderState::Header => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_HEADER_LINE {
                            return Err(framing_error("chunk header too long"));
                        }
                        return Ok(None);
                    };

                    let line = self.buf.split_to(line_end + 2);
                    let size = parse_chunk_size(&line[..line_end])?;
                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::Data { remaining: size }
                    };
                }
                DecoderState::Data { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let take = usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(self.buf.len());
                    let out = self.buf.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        DecoderState::DataCrlf
                    } else {
                        DecoderState::Data { remaining: left }
                    };
                    return Ok(Some(out));
                }
                DecoderState::DataCrlf => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(framing_error("missing CRLF after chunk data"));
                    }
                    let _ = self.buf.split_to(2);
                    self.state = DecoderState::Header;
                }
                DecoderState::Trailer => {
                    // Consume trailer lines (e.g. x-amz-trailer checksums)
                    // until the blank line that ends the body.
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_HEADER_LINE {
                            return Err(framing_error("trailer line too long"));
                        }
                        return Ok(None);
                    };
                    let line = self.buf.split_to(line_end + 2);
                    if line.len() == 2 {
                        self.state = DecoderState::Done;
                    }
                }
                DecoderState::Done => return Ok(None),
            }
        }
    }
}

impl Stream for AwsChunkedDecoder {
    type Item = Result<Bytes, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.advance() {
                Ok(Some(bytes)) => return Poll::Ready(Some(Ok(bytes))),
                Ok(None) if this.state == DecoderState::Done => return Poll::Ready(None),
                Ok(None) => {}
                Err(e) => {
                    this.state = DecoderState::Done;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match futures::ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => this.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    this.state = DecoderState::Done;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    // EOF. Clean only at Done, or at Trailer/Header
                    // boundaries with nothing buffered (tolerates clients
                    // that skip the final blank line or send no frames).
                    let clean = match this.state {
                        DecoderState::Done => true,
                        DecoderState::Trailer | DecoderState::Header => this.buf.is_empty(),
                        _ => false,
                    };
                    this.state = DecoderState::Done;
                    if clean {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Err(framing_error("truncated chunked body"))));
                }
            }
        }
    }
}

fn framing_error(detail: &str) -> StoreError {
    StoreError::invalid_argument(format!("malformed aws-chunked body: {detail}"))
}

/// Parse the hex size from a header line, ignoring `;extension` suffixes.
fn parse_chunk_size(line: &[u8]) -> Result<u64, StoreError> {
    let hex_part = line
        .iter()
        .position(|&b| b == b';')
        .map_or(line, |semi| &line[..semi]);

    let hex_str = std::str::from_utf8(hex_part)
        .map_err(|_| framing_error("invalid chunk size encoding"))?;
    u64::from_str_radix(hex_str.trim(), 16)
        .map_err(|_| framing_error("invalid chunk size"))
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
