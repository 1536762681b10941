//! The transport seam between the worker and the network.
//!
//! The worker sees HTTP as a single blocking call: hand a [`TransportRequest`]
//! to [`Transport::execute`] and get back a status code, headers and a body
//! that is pulled chunk by chunk. Everything below that line (connection
//! pooling, TLS, redirects, cookies on the wire) belongs to the transport.
//!
//! Every blocking call receives the running operation's [`CancellationToken`].
//! Implementations must return [`NetworkError::Cancelled`] promptly once it
//! fires. Dropping a [`TransportResponse`] before its body is exhausted
//! aborts the exchange.
//!
//! [`HttpTransport`] is the production implementation. Tests substitute a
//! scripted transport to drive the engine deterministically.

mod http_transport;

use std::collections::VecDeque;
use std::io::Read;

use bytes::{Bytes, BytesMut};
use horizon_courier_core::CancellationToken;
use http::HeaderMap;

use crate::error::{NetworkError, Result};

pub use http_transport::HttpTransport;

/// HTTP request methods used by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP HEAD method.
    Head,
    /// HTTP POST method.
    Post,
}

impl HttpMethod {
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Head => reqwest::Method::HEAD,
            Self::Post => reqwest::Method::POST,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Head => write!(f, "HEAD"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// One named part of a multipart body.
///
/// The transport pulls bytes from `reader` as it writes them to the wire.
pub struct MultipartPart {
    /// Form field name.
    pub name: String,
    /// File name reported for the part.
    pub file_name: Option<String>,
    /// MIME type of the part's content.
    pub mime_type: Option<String>,
    /// Source of the part's bytes.
    pub reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for MultipartPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartPart")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Request body variants.
#[derive(Debug, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A serialized JSON document.
    Json(Bytes),
    /// A `multipart/form-data` body.
    Multipart(Vec<MultipartPart>),
}

/// A request handed to the transport.
#[derive(Debug)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: RequestBody,
}

impl TransportRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Set a header, replacing any previous value.
    pub fn header(mut self, name: http::HeaderName, value: &'static str) -> Self {
        self.headers
            .insert(name, http::HeaderValue::from_static(value));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// A response body pulled one chunk at a time.
pub trait BodyStream: Send {
    /// Read the next chunk, or `None` at end of body.
    fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// A body whose chunks are already in memory.
#[derive(Debug, Default)]
pub struct BufferedBody {
    chunks: VecDeque<Bytes>,
}

impl BufferedBody {
    /// A body made of the given chunks, yielded in order.
    pub fn new(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }
}

impl BodyStream for BufferedBody {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunks.pop_front())
    }
}

/// Status, headers and streaming body returned by a transport.
pub struct TransportResponse {
    status: u16,
    headers: HeaderMap,
    body: Box<dyn BodyStream>,
}

impl TransportResponse {
    /// Assemble a response from its parts.
    pub fn new(status: u16, headers: HeaderMap, body: impl BodyStream + 'static) -> Self {
        Self {
            status,
            headers,
            body: Box::new(body),
        }
    }

    /// A response with an in-memory body delivered as one chunk.
    pub fn from_bytes(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let chunks = if body.is_empty() { Vec::new() } else { vec![body] };
        Self::new(status, headers, BufferedBody::new(chunks))
    }

    /// The HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The declared `Content-Length`, if present and well formed.
    pub fn content_length(&self) -> Option<u64> {
        self.header(http::header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Read the next body chunk.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.body.next_chunk()
    }

    /// Read the rest of the body into one buffer.
    pub fn bytes(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.body.next_chunk()? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Read the rest of the body as text, replacing invalid UTF-8.
    pub fn text(self) -> Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the rest of the body and parse it as JSON.
    pub fn json(self) -> Result<serde_json::Value> {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(NetworkError::from)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes requests on behalf of the worker.
///
/// A transport is owned by exactly one worker thread and never shared, so
/// implementations need no internal locking.
pub trait Transport: Send + 'static {
    /// Send `request` and return once the response head has arrived.
    fn execute(
        &mut self,
        request: TransportRequest,
        interrupt: &CancellationToken,
    ) -> Result<TransportResponse>;

    /// Drop pooled connections that are not in use.
    fn close_idle_connections(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, "1234".parse().unwrap());
        let response = TransportResponse::from_bytes(200, headers, Bytes::new());
        assert_eq!(response.content_length(), Some(1234));

        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, "lots".parse().unwrap());
        let response = TransportResponse::from_bytes(200, headers, Bytes::new());
        assert_eq!(response.content_length(), None);
    }

    #[test]
    fn test_success_range() {
        for (status, success) in [(199, false), (200, true), (204, true), (299, true), (304, false)] {
            let response = TransportResponse::from_bytes(status, HeaderMap::new(), Bytes::new());
            assert_eq!(response.is_success(), success, "status {status}");
        }
    }

    #[test]
    fn test_body_is_collected_across_chunks() {
        let body = BufferedBody::new([Bytes::from_static(b"hel"), Bytes::from_static(b"lo")]);
        let response = TransportResponse::new(200, HeaderMap::new(), body);
        assert_eq!(response.text().unwrap(), "hello");
    }

    #[test]
    fn test_json_decode_failure() {
        let response = TransportResponse::from_bytes(200, HeaderMap::new(), "{not json");
        assert!(matches!(response.json(), Err(NetworkError::Json(_))));
    }
}
