//! Buffered HTTP response and the [`IntoResponse`] conversion trait.
//!
//! [`Response`] plays two roles. Route handlers build one and return it, and
//! the server hands a fresh one to the middleware chain as the bottom-most
//! [`ResponseWriter`]. Either way, what ends up in it is what hyper sends.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::writer::ResponseWriter;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values the crate writes itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }

    pub(crate) fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts
///
/// ```rust
/// use http::StatusCode;
/// use tollgate::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// For JSON envelopes use [`envelope::success`](crate::envelope::success) and
/// friends instead of building the bytes by hand.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    wrote_header: bool,
    aborted: bool,
}

impl Response {
    /// An empty response whose status line has not been written yet.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            wrote_header: false,
            aborted: false,
        }
    }

    /// `200 OK` with `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().bytes(ContentType::Json, body)
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().bytes(ContentType::Text, body.into().into_bytes())
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn is_aborted(&self) -> bool { self.aborted }

    /// Replays this response through another writer.
    pub(crate) fn write_to(self, w: &mut dyn ResponseWriter) {
        if self.aborted {
            w.abort();
            return;
        }
        w.headers_mut().extend(self.headers);
        w.write_header(self.status);
        if !self.body.is_empty() {
            if let Err(e) = w.write(&self.body) {
                warn!("dropping response body: {e}");
            }
        }
    }

    /// Converts into the type hyper sends, or [`Error::Aborted`] when the
    /// reply was abandoned.
    pub(crate) fn into_http(self) -> Result<http::Response<Full<Bytes>>> {
        if self.aborted {
            return Err(Error::Aborted);
        }
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        Ok(res)
    }
}

impl Default for Response {
    fn default() -> Self { Self::new() }
}

impl ResponseWriter for Response {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.wrote_header {
            warn!(
                first = self.status.as_u16(),
                ignored = status.as_u16(),
                "superfluous write_header call"
            );
            return;
        }
        self.status = status;
        self.wrote_header = true;
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        if self.aborted {
            return Err(Error::Aborted);
        }
        if !self.wrote_header {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(chunk);
        Ok(chunk.len())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.bytes(ContentType::Json, body)
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into().into_bytes())
    }

    /// Terminate with a typed body.
    pub fn bytes(mut self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.headers.insert(CONTENT_TYPE, content_type.header_value());
        self.finish(BytesMut::from(&body[..]))
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        self.finish(BytesMut::new())
    }

    fn finish(self, body: BytesMut) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body,
            wrote_header: true,
            aborted: false,
        }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from route handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;

    /// What the router sees. Only `Result` overrides this, so that a handler
    /// error reaches the router and is answered with an error envelope.
    #[doc(hidden)]
    fn into_route_result(self) -> Result<Response>
    where
        Self: Sized,
    {
        Ok(self.into_response())
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// Outside the router an error becomes an empty `500`; the cause is logged.
/// Behind the router it becomes a generic `500` envelope.
impl<T: IntoResponse> IntoResponse for Result<T> {
    fn into_response(self) -> Response {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => {
                error!("handler failed: {e}");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn into_route_result(self) -> Result<Response> {
        self.map(IntoResponse::into_response)
    }
}
