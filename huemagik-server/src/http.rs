//! Minimal HTTP/1.1 request parsing and response writing over tokio streams
//!
//! The service has four fixed routes, no keep-alive, and no streaming,
//! so a full framework would be glue around glue. Requests are read whole
//! (head capped, body capped by configuration) and every response closes
//! the connection.

use std::str;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The maximum accepted size of the request head (request line plus headers)
const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Request methods the route table can match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
    /// Any other method; never matches a route and falls through to 404
    Other,
}

impl Method {
    /// Map a request line token to a [`Method`]
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "OPTIONS" => Self::Options,
            _ => Self::Other,
        }
    }
}

/// A fully read request
#[derive(Debug)]
pub struct Request {
    /// The request method
    pub method: Method,
    /// The request path, without the query string
    pub path: String,
    /// Header name/value pairs, names lowercased
    pub headers: Vec<(String, String)>,
    /// The request body
    pub body: Vec<u8>,
}

impl Request {
    /// The value of the first header with the given lowercase name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Error cases for reading a request off a connection
#[derive(Debug, Error)]
pub enum HttpError {
    /// The peer closed the connection before sending a request
    #[error("connection closed before a request was received")]
    Closed,
    /// The request could not be parsed as HTTP/1.1
    #[error("malformed request: {0}")]
    BadRequest(String),
    /// The declared body size exceeded the configured limit
    #[error("request body of {0} bytes exceeds the configured limit")]
    PayloadTooLarge(usize),
    /// The connection failed mid-request
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read and parse one request from the stream.
///
/// Bodies are read to completion per `Content-Length`, capped at `max_body`.
pub async fn read_request<S>(stream: &mut S, max_body: usize) -> Result<Request, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(1024);
    let head_end = loop {
        if let Some(end) = find(&buffer, b"\r\n\r\n") {
            break end;
        }
        if buffer.len() > MAX_HEAD_SIZE {
            return Err(HttpError::BadRequest("request head too large".to_owned()));
        }

        let mut chunk = [0u8; 4096];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            if buffer.is_empty() {
                return Err(HttpError::Closed);
            }
            return Err(HttpError::BadRequest("truncated request head".to_owned()));
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = str::from_utf8(&buffer[..head_end])
        .map_err(|_| HttpError::BadRequest("request head is not valid UTF-8".to_owned()))?;
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::BadRequest("missing request line".to_owned()))?;
    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) => (method, target, version),
        _ => return Err(HttpError::BadRequest("malformed request line".to_owned())),
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::BadRequest(format!("unsupported version: {version}")));
    }

    let method = Method::parse(method);
    let path = target
        .split('?')
        .next()
        .unwrap_or(target)
        .to_owned();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::BadRequest(format!("malformed header: {line}")))?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    let request = Request {
        method,
        path,
        headers,
        body: Vec::new(),
    };

    if request
        .header("transfer-encoding")
        .is_some_and(|value| !value.eq_ignore_ascii_case("identity"))
    {
        return Err(HttpError::BadRequest("chunked requests are not supported".to_owned()));
    }

    let content_length = match request.header("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| HttpError::BadRequest(format!("invalid content-length: {value}")))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(HttpError::PayloadTooLarge(content_length));
    }

    let mut body = buffer.split_off(head_end + 4);
    if body.len() > content_length {
        body.truncate(content_length);
    }
    while body.len() < content_length {
        let mut chunk = vec![0u8; usize::min(content_length - body.len(), 64 * 1024)];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(HttpError::BadRequest("truncated request body".to_owned()));
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(Request { body, ..request })
}

/// A response ready to be serialized onto the wire
#[derive(Debug)]
pub struct Response {
    /// The status code
    pub status: u16,
    /// Extra header name/value pairs beyond the automatic ones
    pub headers: Vec<(String, String)>,
    /// The response body
    pub body: Vec<u8>,
}

impl Response {
    /// A response with the given status and a JSON body
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            body: value.to_string().into_bytes(),
        }
    }

    /// A response with the given status and a plaintext body
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_owned(), "text/plain; charset=utf-8".to_owned())],
            body: body.as_bytes().to_vec(),
        }
    }

    /// A response with the given status and an empty body
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Serialize the response onto the stream
    pub async fn write_to<S>(&self, stream: &mut S) -> std::io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&self.body).await?;
        stream.flush().await
    }
}

impl HttpError {
    /// The response to send for this error, if the connection is still usable
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Closed | Self::Io(_) => None,
            Self::BadRequest(detail) => {
                log::warn!("Rejecting malformed request: {detail}");
                Some(Response::json(400, &serde_json::json!({"error": "Malformed request"})))
            }
            Self::PayloadTooLarge(size) => {
                log::warn!("Rejecting oversized request body of {size} bytes");
                Some(Response::json(413, &serde_json::json!({"error": "Payload too large"})))
            }
        }
    }
}

/// The reason phrase for the status codes this service produces
fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// First index of `needle` in `haystack`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
