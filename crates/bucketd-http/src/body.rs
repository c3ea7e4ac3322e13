//! Response body types: empty, buffered, and file-streaming modes.
//!
//! [`S3ResponseBody`] implements [`http_body::Body`] so it plugs directly
//! into hyper responses. XML payloads and error documents use the buffered
//! mode; object GETs stream straight from the store's file handle without
//! buffering the body in memory.

use std::pin::Pin;
use std::task::{Context, Poll};

use bucketd_store::ObjectReader;
use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use tokio::io::{AsyncRead, ReadBuf};

/// Read size for streamed file bodies.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// S3 response body supporting empty, buffered, and streaming modes.
#[derive(Debug, Default)]
pub enum S3ResponseBody {
    /// Empty body for 204 responses, DELETE confirmations, HEAD responses.
    #[default]
    Empty,
    /// Buffered body for XML payloads and error documents.
    Buffered(Full<Bytes>),
    /// Streaming body reading an object's data file.
    File(ObjectReader),
}

impl S3ResponseBody {
    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from an XML byte vector.
    #[must_use]
    pub fn from_xml(xml: Vec<u8>) -> Self {
        Self::Buffered(Full::new(Bytes::from(xml)))
    }

    /// Create a streaming body over an object reader.
    #[must_use]
    pub fn from_reader(reader: ObjectReader) -> Self {
        Self::File(reader)
    }
}

impl http_body::Body for S3ResponseBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Empty => Poll::Ready(None),
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::File(reader) => {
                if reader.is_empty() {
                    return Poll::Ready(None);
                }

                let want = usize::try_from(reader.len())
                    .unwrap_or(usize::MAX)
                    .min(STREAM_CHUNK_SIZE);
                let mut buf = BytesMut::zeroed(want);
                let mut read_buf = ReadBuf::new(&mut buf);

                match Pin::new(reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            // Data file shorter than its metadata claims;
                            // end the stream rather than spin.
                            Poll::Ready(None)
                        } else {
                            buf.truncate(n);
                            Poll::Ready(Some(Ok(http_body::Frame::data(buf.freeze()))))
                        }
                    }
                    Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Buffered(full) => full.is_end_stream(),
            Self::File(reader) => reader.is_empty(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Empty => http_body::SizeHint::with_exact(0),
            Self::Buffered(full) => full.size_hint(),
            Self::File(reader) => http_body::SizeHint::with_exact(reader.len()),
        }
    }
}
