//! S3 XML bodies: response serialization and request deserialization.
//!
//! Serialization follows the AWS S3 RestXml conventions:
//!
//! - Namespace: `http://s3.amazonaws.com/doc/2006-03-01/`
//! - Booleans: lowercase `true`/`false`
//! - Timestamps: ISO 8601 with milliseconds (`2006-02-03T16:45:09.000Z`)
//! - XML declaration: `<?xml version="1.0" encoding="UTF-8"?>`
//!
//! Error documents deliberately omit `Resource` so the request path is not
//! echoed, and successful responses omit `Location` so the Host header is
//! never reflected.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{S3Error, S3ErrorCode};

/// The S3 XML namespace.
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Trait for serializing response types to XML.
///
/// Implementors write their child elements into the current context; the
/// root element and namespace are handled by [`to_xml`]. Uses `io::Result`
/// because `quick_xml::Writer` inner-content closures require it.
pub trait S3Serialize {
    /// Serialize this value as XML child elements.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if writing fails.
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()>;
}

/// Serialize a value as a complete S3 XML document.
///
/// # Errors
///
/// Returns an internal error if serialization fails (it should not, for
/// in-memory writers).
pub fn to_xml<T: S3Serialize>(root_element: &str, value: &T) -> Result<Vec<u8>, S3Error> {
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| S3Error::internal(format!("XML serialization failed: {e}")))?;

    writer
        .create_element(root_element)
        .with_attribute(("xmlns", S3_NAMESPACE))
        .write_inner_content(|w| value.serialize_xml(w))
        .map_err(|e| S3Error::internal(format!("XML serialization failed: {e}")))?;

    Ok(buf)
}

// ---------------------------------------------------------------------------
// Write helpers
// ---------------------------------------------------------------------------

fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_optional_text<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<&str>,
) -> io::Result<()> {
    if let Some(v) = value {
        write_text_element(writer, tag, v)?;
    }
    Ok(())
}

fn write_bool<W: Write>(writer: &mut Writer<W>, tag: &str, value: bool) -> io::Result<()> {
    write_text_element(writer, tag, if value { "true" } else { "false" })
}

/// Format a timestamp as ISO 8601 with milliseconds and `Z` suffix.
fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ---------------------------------------------------------------------------
// Response documents
// ---------------------------------------------------------------------------

/// `<Error>` document body.
#[derive(Debug)]
pub struct ErrorDocument<'a> {
    /// The wire error code.
    pub code: &'a str,
    /// Human-readable message.
    pub message: &'a str,
    /// Request id, when one was assigned.
    pub request_id: Option<&'a str>,
}

impl S3Serialize for ErrorDocument<'_> {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Code", self.code)?;
        write_text_element(writer, "Message", self.message)?;
        write_optional_text(writer, "RequestId", self.request_id)?;
        Ok(())
    }
}

/// One `<Contents>` entry in a listing.
#[derive(Debug)]
pub struct ListEntry {
    /// Object key.
    pub key: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Quoted ETag.
    pub etag: String,
    /// Object size in bytes.
    pub size: u64,
}

/// `<ListBucketResult>` (V2 semantics).
#[derive(Debug)]
pub struct ListBucketResult {
    /// Bucket name.
    pub name: String,
    /// The request's prefix filter (always emitted, possibly empty).
    pub prefix: String,
    /// The request's start-after cursor.
    pub start_after: Option<String>,
    /// The request's delimiter.
    pub delimiter: Option<String>,
    /// The effective page-size limit.
    pub max_keys: usize,
    /// Whether more keys follow.
    pub is_truncated: bool,
    /// The continuation token the client supplied.
    pub continuation_token: Option<String>,
    /// The cursor for the next page.
    pub next_continuation_token: Option<String>,
    /// Objects on this page.
    pub contents: Vec<ListEntry>,
    /// Grouped common prefixes.
    pub common_prefixes: Vec<String>,
}

impl S3Serialize for ListBucketResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Name", &self.name)?;
        write_text_element(writer, "Prefix", &self.prefix)?;
        write_optional_text(writer, "StartAfter", self.start_after.as_deref())?;
        write_text_element(writer, "KeyCount", &self.contents.len().to_string())?;
        write_text_element(writer, "MaxKeys", &self.max_keys.to_string())?;
        write_optional_text(writer, "Delimiter", self.delimiter.as_deref())?;
        write_bool(writer, "IsTruncated", self.is_truncated)?;
        write_optional_text(writer, "ContinuationToken", self.continuation_token.as_deref())?;
        write_optional_text(
            writer,
            "NextContinuationToken",
            self.next_continuation_token.as_deref(),
        )?;

        for entry in &self.contents {
            writer.create_element("Contents").write_inner_content(|w| {
                write_text_element(w, "Key", &entry.key)?;
                write_text_element(w, "LastModified", &format_timestamp(&entry.last_modified))?;
                write_text_element(w, "ETag", &entry.etag)?;
                write_text_element(w, "Size", &entry.size.to_string())?;
                write_text_element(w, "StorageClass", "STANDARD")
            })?;
        }

        for prefix in &self.common_prefixes {
            writer
                .create_element("CommonPrefixes")
                .write_inner_content(|w| write_text_element(w, "Prefix", prefix))?;
        }

        Ok(())
    }
}

/// `<InitiateMultipartUploadResult>`.
#[derive(Debug)]
pub struct InitiateMultipartUploadResult {
    /// Bucket name.
    pub bucket: String,
    /// Target key.
    pub key: String,
    /// The allocated upload id.
    pub upload_id: String,
}

impl S3Serialize for InitiateMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "UploadId", &self.upload_id)?;
        Ok(())
    }
}

/// `<CompleteMultipartUploadResult>`. Location intentionally omitted.
#[derive(Debug)]
pub struct CompleteMultipartUploadResult {
    /// Bucket name.
    pub bucket: String,
    /// Assembled object key.
    pub key: String,
    /// Composite ETag.
    pub etag: String,
}

impl S3Serialize for CompleteMultipartUploadResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "Bucket", &self.bucket)?;
        write_text_element(writer, "Key", &self.key)?;
        write_text_element(writer, "ETag", &self.etag)?;
        Ok(())
    }
}

/// `<CopyObjectResult>`.
#[derive(Debug)]
pub struct CopyObjectResult {
    /// The destination's (single-shot) ETag.
    pub etag: String,
    /// The destination's last-modified time.
    pub last_modified: DateTime<Utc>,
}

impl S3Serialize for CopyObjectResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        write_text_element(writer, "ETag", &self.etag)?;
        write_text_element(writer, "LastModified", &format_timestamp(&self.last_modified))?;
        Ok(())
    }
}

/// One failed deletion in a `<DeleteResult>`.
#[derive(Debug)]
pub struct DeleteErrorEntry {
    /// The key that failed.
    pub key: String,
    /// The wire error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// `<DeleteResult>`. In quiet mode the `Deleted` entries are suppressed.
#[derive(Debug)]
pub struct DeleteResult {
    /// Keys deleted successfully (empty in quiet mode).
    pub deleted: Vec<String>,
    /// Keys that failed, with their error codes.
    pub errors: Vec<DeleteErrorEntry>,
}

impl S3Serialize for DeleteResult {
    fn serialize_xml<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        for key in &self.deleted {
            writer
                .create_element("Deleted")
                .write_inner_content(|w| write_text_element(w, "Key", key))?;
        }
        for error in &self.errors {
            writer.create_element("Error").write_inner_content(|w| {
                write_text_element(w, "Key", &error.key)?;
                write_text_element(w, "Code", &error.code)?;
                write_text_element(w, "Message", &error.message)
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request deserialization
// ---------------------------------------------------------------------------

/// One `<Part>` from a `CompleteMultipartUpload` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// The client's part number.
    pub part_number: u32,
    /// The client's ETag for that part.
    pub etag: String,
}

/// Parse a `<CompleteMultipartUpload>` request body into its parts, in
/// document order.
///
/// # Errors
///
/// Returns a `MalformedXML` error for unparseable documents or parts
/// missing a number or ETag.
pub fn parse_complete_multipart(xml: &[u8]) -> Result<Vec<CompletedPart>, S3Error> {
    let mut reader = reader_for(xml);
    enter_root(&mut reader)?;

    let mut parts = Vec::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                if e.name().as_ref() == b"Part" {
                    parts.push(parse_completed_part(&mut reader)?);
                } else {
                    skip_element(&mut reader)?;
                }
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

fn parse_completed_part(reader: &mut Reader<&[u8]>) -> Result<CompletedPart, S3Error> {
    let mut part_number = None;
    let mut etag = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.name().as_ref() {
                b"PartNumber" => {
                    let text = read_text_content(reader)?;
                    part_number = Some(text.trim().parse::<u32>().map_err(|_| {
                        S3Error::with_message(S3ErrorCode::MalformedXML, "invalid PartNumber")
                    })?);
                }
                b"ETag" => etag = Some(read_text_content(reader)?),
                _ => skip_element(reader)?,
            },
            Event::End(_) => break,
            Event::Eof => {
                return Err(S3Error::with_message(
                    S3ErrorCode::MalformedXML,
                    "unexpected EOF in Part",
                ));
            }
            _ => {}
        }
    }

    match (part_number, etag) {
        (Some(part_number), Some(etag)) => Ok(CompletedPart { part_number, etag }),
        _ => Err(S3Error::with_message(
            S3ErrorCode::MalformedXML,
            "Part requires PartNumber and ETag",
        )),
    }
}

/// A parsed `<Delete>` request body.
#[derive(Debug, Default)]
pub struct DeleteRequest {
    /// Keys to delete, in document order.
    pub keys: Vec<String>,
    /// Quiet mode suppresses the `Deleted` list in the response.
    pub quiet: bool,
}

/// Parse a `<Delete>` batch-delete request body.
///
/// # Errors
///
/// Returns a `MalformedXML` error for unparseable documents or objects
/// without a `Key`.
pub fn parse_delete_objects(xml: &[u8]) -> Result<DeleteRequest, S3Error> {
    let mut reader = reader_for(xml);
    enter_root(&mut reader)?;

    let mut request = DeleteRequest::default();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Object" => request.keys.push(parse_object_identifier(&mut reader)?),
                b"Quiet" => {
                    let text = read_text_content(&mut reader)?;
                    request.quiet = text.trim() == "true";
                }
                _ => skip_element(&mut reader)?,
            },
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(request)
}

fn parse_object_identifier(reader: &mut Reader<&[u8]>) -> Result<String, S3Error> {
    let mut key = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                if e.name().as_ref() == b"Key" {
                    key = Some(read_text_content(reader)?);
                } else {
                    skip_element(reader)?;
                }
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(S3Error::with_message(
                    S3ErrorCode::MalformedXML,
                    "unexpected EOF in Object",
                ));
            }
            _ => {}
        }
    }

    key.ok_or_else(|| S3Error::with_message(S3ErrorCode::MalformedXML, "Object requires Key"))
}

// ---------------------------------------------------------------------------
// Read helpers
// ---------------------------------------------------------------------------

fn reader_for(xml: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    reader
}

/// Position the reader just inside the document's root element.
fn enter_root(reader: &mut Reader<&[u8]>) -> Result<(), S3Error> {
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(_) => return Ok(()),
            Event::Eof => {
                return Err(S3Error::with_message(
                    S3ErrorCode::MalformedXML,
                    "missing root element",
                ));
            }
            _ => {}
        }
    }
}

/// Read the text content of the current element and consume its end tag.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, S3Error> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Text(e) => {
                let unescaped = e.unescape().map_err(malformed)?;
                text.push_str(&unescaped);
            }
            Event::End(_) => return Ok(text),
            Event::Eof => {
                return Err(S3Error::with_message(
                    S3ErrorCode::MalformedXML,
                    "unexpected EOF in text element",
                ));
            }
            _ => {}
        }
    }
}

/// Skip the current element and everything nested inside it.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), S3Error> {
    let mut depth = 1u32;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(S3Error::with_message(
                    S3ErrorCode::MalformedXML,
                    "unexpected EOF while skipping element",
                ));
            }
            _ => {}
        }
    }
}

fn malformed(e: impl std::fmt::Display) -> S3Error {
    S3Error::with_message(S3ErrorCode::MalformedXML, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xml_string<T: S3Serialize>(root: &str, value: &T) -> String {
        String::from_utf8(to_xml(root, value).expect("serializes")).expect("utf8")
    }

    #[test]
    fn test_should_serialize_error_document() {
        let doc = ErrorDocument {
            code: "NoSuchKey",
            message: "The specified key does not exist",
            request_id: Some("req-1"),
        };
        let xml = xml_string("Error", &doc);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Code>NoSuchKey</Code>"));
        assert!(xml.contains("<Message>The specified key does not exist</Message>"));
        assert!(xml.contains("<RequestId>req-1</RequestId>"));
        assert!(!xml.contains("<Resource>"));
    }

    #[test]
    fn test_should_serialize_list_bucket_result_in_protocol_order() {
        let result = ListBucketResult {
            name: "test-bucket".to_owned(),
            prefix: String::new(),
            start_after: None,
            delimiter: Some("/".to_owned()),
            max_keys: 1000,
            is_truncated: false,
            continuation_token: None,
            next_continuation_token: None,
            contents: vec![ListEntry {
                key: "b.txt".to_owned(),
                last_modified: "2024-07-01T12:00:00Z".parse().unwrap(),
                etag: "\"abc\"".to_owned(),
                size: 5,
            }],
            common_prefixes: vec!["a/".to_owned()],
        };

        let xml = xml_string("ListBucketResult", &result);
        assert!(xml.contains(
            "<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">"
        ));
        assert!(xml.contains("<Name>test-bucket</Name><Prefix></Prefix>"));
        assert!(xml.contains("<KeyCount>1</KeyCount><MaxKeys>1000</MaxKeys>"));
        assert!(xml.contains("<Delimiter>/</Delimiter><IsTruncated>false</IsTruncated>"));
        assert!(xml.contains("<Key>b.txt</Key>"));
        assert!(xml.contains("<LastModified>2024-07-01T12:00:00.000Z</LastModified>"));
        assert!(xml.contains("<Size>5</Size><StorageClass>STANDARD</StorageClass>"));
        assert!(xml.contains("<CommonPrefixes><Prefix>a/</Prefix></CommonPrefixes>"));

        let name_pos = xml.find("<Name>").unwrap();
        let key_count_pos = xml.find("<KeyCount>").unwrap();
        let contents_pos = xml.find("<Contents>").unwrap();
        assert!(name_pos < key_count_pos && key_count_pos < contents_pos);
    }

    #[test]
    fn test_should_serialize_truncated_listing_with_tokens() {
        let result = ListBucketResult {
            name: "test-bucket".to_owned(),
            prefix: "p/".to_owned(),
            start_after: Some("p/0".to_owned()),
            delimiter: None,
            max_keys: 2,
            is_truncated: true,
            continuation_token: Some("tok1".to_owned()),
            next_continuation_token: Some("tok2".to_owned()),
            contents: vec![],
            common_prefixes: vec![],
        };
        let xml = xml_string("ListBucketResult", &result);
        assert!(xml.contains("<StartAfter>p/0</StartAfter>"));
        assert!(xml.contains("<IsTruncated>true</IsTruncated>"));
        assert!(xml.contains("<ContinuationToken>tok1</ContinuationToken>"));
        assert!(xml.contains("<NextContinuationToken>tok2</NextContinuationToken>"));
    }

    #[test]
    fn test_should_serialize_multipart_results() {
        let initiate = InitiateMultipartUploadResult {
            bucket: "test-bucket".to_owned(),
            key: "k".to_owned(),
            upload_id: "deadbeef".to_owned(),
        };
        let xml = xml_string("InitiateMultipartUploadResult", &initiate);
        assert!(xml.contains("<Bucket>test-bucket</Bucket><Key>k</Key><UploadId>deadbeef</UploadId>"));

        let complete = CompleteMultipartUploadResult {
            bucket: "test-bucket".to_owned(),
            key: "k".to_owned(),
            etag: "\"abc-2\"".to_owned(),
        };
        let xml = xml_string("CompleteMultipartUploadResult", &complete);
        assert!(xml.contains("<Key>k</Key>"));
        assert!(xml.contains("abc-2"));
        assert!(!xml.contains("<Location>"));
    }

    #[test]
    fn test_should_serialize_delete_result_with_errors() {
        let result = DeleteResult {
            deleted: vec!["ok1".to_owned(), "ok2".to_owned()],
            errors: vec![DeleteErrorEntry {
                key: "bad".to_owned(),
                code: "InternalError".to_owned(),
                message: "boom".to_owned(),
            }],
        };
        let xml = xml_string("DeleteResult", &result);
        assert!(xml.contains("<Deleted><Key>ok1</Key></Deleted>"));
        assert!(xml.contains("<Deleted><Key>ok2</Key></Deleted>"));
        assert!(xml.contains("<Error><Key>bad</Key><Code>InternalError</Code><Message>boom</Message></Error>"));
    }

    #[test]
    fn test_should_parse_complete_multipart_request() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
        <CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>"aaa"</ETag></Part>
            <Part><ETag>bbb</ETag><PartNumber>2</PartNumber></Part>
        </CompleteMultipartUpload>"#;

        let parts = parse_complete_multipart(xml).expect("parses");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].etag, "\"aaa\"");
        // Element order inside Part does not matter.
        assert_eq!(parts[1].part_number, 2);
        assert_eq!(parts[1].etag, "bbb");
    }

    #[test]
    fn test_should_skip_unknown_elements_in_parts() {
        let xml = br"<CompleteMultipartUpload>
            <Part>
                <PartNumber>1</PartNumber>
                <ChecksumCRC32>abcd</ChecksumCRC32>
                <ETag>aaa</ETag>
            </Part>
        </CompleteMultipartUpload>";
        let parts = parse_complete_multipart(xml).expect("parses");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].etag, "aaa");
    }

    #[test]
    fn test_should_reject_part_without_etag() {
        let xml = br"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber></Part>
        </CompleteMultipartUpload>";
        let err = parse_complete_multipart(xml).unwrap_err();
        assert_eq!(err.code, S3ErrorCode::MalformedXML);
    }

    #[test]
    fn test_should_reject_garbage_xml() {
        assert!(parse_complete_multipart(b"this is not xml").is_err());
        assert!(parse_complete_multipart(b"<CompleteMultipartUpload><Part>").is_err());
        assert!(parse_delete_objects(b"").is_err());
    }

    #[test]
    fn test_should_parse_delete_request() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
        <Delete>
            <Object><Key>a.txt</Key></Object>
            <Object><Key>b/c.txt</Key><VersionId>ignored</VersionId></Object>
            <Quiet>true</Quiet>
        </Delete>"#;

        let request = parse_delete_objects(xml).expect("parses");
        assert_eq!(request.keys, vec!["a.txt", "b/c.txt"]);
        assert!(request.quiet);
    }

    #[test]
    fn test_should_default_quiet_to_false() {
        let xml = br"<Delete><Object><Key>k</Key></Object></Delete>";
        let request = parse_delete_objects(xml).expect("parses");
        assert!(!request.quiet);
        assert_eq!(request.keys, vec!["k"]);
    }

    #[test]
    fn test_should_unescape_keys() {
        let xml = br"<Delete><Object><Key>a&amp;b.txt</Key></Object></Delete>";
        let request = parse_delete_objects(xml).expect("parses");
        assert_eq!(request.keys, vec!["a&b.txt"]);
    }
}
