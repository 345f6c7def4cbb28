//! XML payloads of the multipart protocol
//!
//! Only the documents the upload engine exchanges are handled: the initiate
//! result, the completion manifest and result, and the `<Error>` document.
//! All of them are flat enough to be read as a map of leaf elements.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;

use crate::core::checksum::{ChecksumAlgorithm, PartChecksum};
use crate::error::{S3Error, S3Result};

/// Parsed `InitiateMultipartUploadResult`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// One entry of the completion manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,

    /// ETag without surrounding quotes
    pub etag: String,

    /// Per-part checksum, included for composite checksums
    pub checksum: Option<PartChecksum>,
}

/// Parsed `CompleteMultipartUploadResult`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteResult {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: String,

    /// Taken from the `x-amz-version-id` response header, not the body
    pub version_id: Option<String>,

    /// Checksum elements keyed by element name, e.g. `ChecksumCRC32`
    pub checksums: BTreeMap<String, String>,
}

impl CompleteResult {
    /// Object checksum echoed by the server for `algorithm`
    pub fn checksum(&self, algorithm: ChecksumAlgorithm) -> Option<&str> {
        let element = algorithm.xml_element()?;
        self.checksums.get(element).map(String::as_str)
    }
}

/// Parsed S3 `<Error>` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: String,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: Option<String>,
}

struct Document {
    root: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Document {
    fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }
}

fn read_document(xml_data: &[u8]) -> S3Result<Document> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut root = None;
    let mut fields = BTreeMap::new();
    let mut current_text: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                }
                current_text = None;
            }
            Ok(Event::Text(e)) => {
                current_text
                    .get_or_insert_with(String::new)
                    .push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                if let Some(text) = current_text.take() {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    fields.entry(name).or_insert(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::Xml(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    Ok(Document { root, fields })
}

/// Strip the quotes servers put around ETags
pub fn normalize_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

/// Parse the body of a successful initiate call
pub fn parse_initiate(xml_data: &[u8]) -> S3Result<InitiateResult> {
    let mut doc = read_document(xml_data)?;
    if doc.root.as_deref() == Some("Error") {
        return Err(error_from_document(200, doc));
    }

    let upload_id = doc
        .take("UploadId")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| S3Error::InvalidResponse("Missing UploadId in response".to_string()))?;

    Ok(InitiateResult {
        bucket: doc.take("Bucket").unwrap_or_default(),
        key: doc.take("Key").unwrap_or_default(),
        upload_id,
    })
}

/// Build the `CompleteMultipartUpload` request body
pub fn build_complete_request(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 100);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        let _ = write!(xml, "<Part><PartNumber>{}</PartNumber>", part.part_number);
        xml.push_str("<ETag>\"");
        escape_into(&mut xml, &part.etag);
        xml.push_str("\"</ETag>");
        if let Some(checksum) = &part.checksum {
            if let Some(element) = checksum.algorithm.xml_element() {
                let _ = write!(xml, "<{0}>{1}</{0}>", element, checksum.encoded());
            }
        }
        xml.push_str("</Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Parse the body of a completion call
///
/// S3 may answer 200 and still report failure in an `<Error>` body.
pub fn parse_complete(xml_data: &[u8]) -> S3Result<CompleteResult> {
    let mut doc = read_document(xml_data)?;
    match doc.root.as_deref() {
        Some("Error") => return Err(error_from_document(200, doc)),
        Some("CompleteMultipartUploadResult") => {}
        other => {
            return Err(S3Error::InvalidResponse(format!(
                "Unexpected completion document root: {:?}",
                other
            )))
        }
    }

    let etag = doc
        .take("ETag")
        .map(|e| normalize_etag(&e))
        .filter(|e| !e.is_empty())
        .ok_or_else(|| S3Error::InvalidResponse("Missing ETag in completion".to_string()))?;

    let checksums = doc
        .fields
        .iter()
        .filter(|(name, _)| name.starts_with("Checksum") && name.as_str() != "ChecksumType")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok(CompleteResult {
        location: doc.take("Location"),
        bucket: doc.take("Bucket").unwrap_or_default(),
        key: doc.take("Key").unwrap_or_default(),
        etag,
        version_id: None,
        checksums,
    })
}

/// Parse an `<Error>` document, None if the body is something else
pub fn parse_error(xml_data: &[u8]) -> Option<ErrorDocument> {
    let mut doc = read_document(xml_data).ok()?;
    if doc.root.as_deref() != Some("Error") {
        return None;
    }
    Some(ErrorDocument {
        code: doc.take("Code").unwrap_or_default(),
        message: doc.take("Message").unwrap_or_default(),
        resource: doc.take("Resource"),
        request_id: doc.take("RequestId"),
    })
}

fn error_from_document(status: u16, mut doc: Document) -> S3Error {
    S3Error::Service {
        status,
        code: doc.take("Code").unwrap_or_else(|| "Unknown".to_string()),
        message: doc.take("Message").unwrap_or_default(),
    }
}

/// Map a non-2xx response to a service error
pub fn error_from_response(status: u16, body: &[u8]) -> S3Error {
    match parse_error(body) {
        Some(doc) => S3Error::Service {
            status,
            code: if doc.code.is_empty() {
                "Unknown".to_string()
            } else {
                doc.code
            },
            message: doc.message,
        },
        None => S3Error::Service {
            status,
            code: "Unknown".to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

fn escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}
