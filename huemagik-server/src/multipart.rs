//! Parsing of multipart/form-data request bodies
//!
//! Only what the upload endpoint needs: text fields and file parts keyed by
//! their form name. Parts carrying a `filename` parameter are files,
//! everything else is a text field, matching how browsers submit forms.

use crate::http::find;
use std::collections::HashMap;
use thiserror::Error;

/// An uploaded file from a multipart form
#[derive(Debug)]
pub struct FilePart {
    /// The client-supplied file name, if any
    pub filename: String,
    /// The raw file bytes
    pub data: Vec<u8>,
}

/// The decoded contents of a multipart/form-data body
#[derive(Debug, Default)]
pub struct FormData {
    /// Text fields by form name
    fields: HashMap<String, String>,
    /// File parts by form name
    files: HashMap<String, FilePart>,
}

impl FormData {
    /// The value of the text field with the given name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The uploaded file with the given name
    pub fn file(&self, name: &str) -> Option<&FilePart> {
        self.files.get(name)
    }
}

/// Error cases for decoding a multipart body
#[derive(Debug, Error)]
pub enum MultipartError {
    /// The Content-Type was missing or not multipart/form-data
    #[error("request is not multipart/form-data")]
    NotMultipart,
    /// The Content-Type had no boundary parameter
    #[error("multipart content type is missing its boundary")]
    MissingBoundary,
    /// A part could not be split into headers and data
    #[error("malformed multipart body")]
    MalformedPart,
}

/// Parse a multipart/form-data body given the request's Content-Type value.
pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<FormData, MultipartError> {
    let content_type = content_type.ok_or(MultipartError::NotMultipart)?;
    let mut parameters = content_type.split(';').map(str::trim);

    if !parameters
        .next()
        .is_some_and(|mime| mime.eq_ignore_ascii_case("multipart/form-data"))
    {
        return Err(MultipartError::NotMultipart);
    }

    let boundary = parameters
        .find_map(|parameter| parameter.strip_prefix("boundary="))
        .map(|boundary| boundary.trim_matches('"'))
        .filter(|boundary| !boundary.is_empty())
        .ok_or(MultipartError::MissingBoundary)?;

    let mut form = FormData::default();
    for part in split_parts(body, boundary) {
        let (disposition, data) = parse_part(part)?;
        if let Some(name) = disposition.name {
            match disposition.filename {
                Some(filename) => {
                    form.files.insert(name, FilePart { filename, data: data.to_vec() });
                }
                None => {
                    form.fields.insert(name, String::from_utf8_lossy(data).into_owned());
                }
            }
        }
    }

    Ok(form)
}

/// Split the body at each boundary delimiter, dropping the preamble,
/// the closing marker, and the CRLF framing around each part.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut segments = Vec::new();
    let mut rest = body;
    // The bytes before the first delimiter are preamble per RFC 2046
    let Some(start) = find(rest, delimiter) else {
        return segments;
    };
    rest = &rest[start + delimiter.len()..];

    while let Some(end) = find(rest, delimiter) {
        segments.push(trim_crlf(&rest[..end]));
        rest = &rest[end + delimiter.len()..];
    }

    // `rest` now holds the closing "--" marker and the epilogue
    segments
}

/// Strip the leading and trailing CRLF that frame a part between delimiters
fn trim_crlf(part: &[u8]) -> &[u8] {
    let part = part.strip_prefix(b"\r\n".as_slice()).unwrap_or(part);
    part.strip_suffix(b"\r\n".as_slice()).unwrap_or(part)
}

/// The name and filename parameters of a part's Content-Disposition header
#[derive(Debug, Default)]
struct Disposition {
    /// The form field name
    name: Option<String>,
    /// The client-supplied file name, present only for file parts
    filename: Option<String>,
}

/// Split a part into its Content-Disposition parameters and its data
fn parse_part(part: &[u8]) -> Result<(Disposition, &[u8]), MultipartError> {
    let header_end = find(part, b"\r\n\r\n").ok_or(MultipartError::MalformedPart)?;
    let headers = std::str::from_utf8(&part[..header_end]).map_err(|_| MultipartError::MalformedPart)?;
    let data = &part[header_end + 4..];

    let mut disposition = Disposition::default();
    for header in headers.split("\r\n") {
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }

        for parameter in value.split(';').map(str::trim) {
            if let Some(name) = parameter.strip_prefix("name=") {
                disposition.name = Some(name.trim_matches('"').to_owned());
            } else if let Some(filename) = parameter.strip_prefix("filename=") {
                disposition.filename = Some(filename.trim_matches('"').to_owned());
            }
        }
    }

    Ok((disposition, data))
}
