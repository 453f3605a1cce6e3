//! The response-writer abstraction and the status-capturing decorator.
//!
//! Every stage of the middleware chain talks to the client through a
//! `&mut dyn ResponseWriter`. There is exactly one writer per request at the
//! bottom of the stack (a buffered [`Response`](crate::Response)); everything
//! else is a decorator forwarding to it.
//!
//! ```text
//! StatusRecorder ──▶ Response            (normal path)
//! TimeoutWriter  ──▶ shared buffer       (inside the timeout middleware)
//! ```

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::error::Result;

/// Write destination for a single request's reply.
///
/// The status line is write-once: the first [`write_header`] wins and later
/// calls are ignored. A [`write`] before any `write_header` implies `200 OK`.
///
/// [`write_header`]: ResponseWriter::write_header
/// [`write`]: ResponseWriter::write
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;

    /// Headers to send. Changes after `write_header` are not guaranteed to
    /// reach the client.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Finalises the status line.
    fn write_header(&mut self, status: StatusCode);

    /// Appends `chunk` to the body, returning the number of bytes accepted.
    fn write(&mut self, chunk: &[u8]) -> Result<usize>;

    /// Abandons the reply: the transport closes the connection (or resets the
    /// stream) instead of sending anything.
    fn abort(&mut self);

    /// The status recorded by a capturing wrapper.
    ///
    /// `None` unless this writer is a [`StatusRecorder`]. Middlewares that
    /// want the final status must therefore sit inside the wrapper.
    fn captured_status(&self) -> Option<StatusCode> {
        None
    }
}

/// Decorator that records the status code written for a request.
///
/// Forwards everything untouched except `write_header`, which is recorded
/// before delegating. The recorded status is the one passed to the last
/// `write_header` call, even if the writer below ignored it. A 503 additionally forces
/// `Content-Type: application/json`, because the timeout middleware's canned
/// body is JSON and is written without a content type.
pub struct StatusRecorder<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: Option<StatusCode>,
}

impl<'a> StatusRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { inner, status: None }
    }

    /// The last status passed to `write_header`; `200 OK` until one happens.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }
}

impl ResponseWriter for StatusRecorder<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        // Every call is recorded; the writer below decides what is sent.
        self.status = Some(status);

        if status == StatusCode::SERVICE_UNAVAILABLE {
            self.inner
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        self.inner.write_header(status);
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        self.inner.write(chunk)
    }

    fn abort(&mut self) {
        self.inner.abort();
    }

    fn captured_status(&self) -> Option<StatusCode> {
        Some(self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    #[test]
    fn defaults_to_ok_before_any_write() {
        let mut res = Response::new();
        let recorder = StatusRecorder::new(&mut res);
        assert_eq!(recorder.captured_status(), Some(StatusCode::OK));
    }

    #[test]
    fn records_the_status_and_forwards_it() {
        let mut res = Response::new();
        {
            let mut recorder = StatusRecorder::new(&mut res);
            recorder.write_header(StatusCode::CREATED);
            recorder.write(b"done").unwrap();
            assert_eq!(recorder.captured_status(), Some(StatusCode::CREATED));
            assert_eq!(recorder.captured_status(), Some(StatusCode::CREATED));
        }
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.body(), b"done");
    }

    #[test]
    fn records_the_last_header_write() {
        let mut res = Response::new();
        let mut recorder = StatusRecorder::new(&mut res);
        recorder.write_header(StatusCode::NOT_FOUND);
        recorder.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(recorder.captured_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        drop(recorder);
        // Only the first one reaches the client.
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn body_writes_leave_the_default_in_place() {
        let mut res = Response::new();
        let mut recorder = StatusRecorder::new(&mut res);
        recorder.write(b"x").unwrap();
        assert_eq!(recorder.status(), StatusCode::OK);
        recorder.write_header(StatusCode::BAD_REQUEST);
        assert_eq!(recorder.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn service_unavailable_forces_json_content_type() {
        let mut res = Response::new();
        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let mut recorder = StatusRecorder::new(&mut res);
        recorder.write_header(StatusCode::SERVICE_UNAVAILABLE);
        drop(recorder);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn other_statuses_leave_content_type_alone() {
        let mut res = Response::new();
        let mut recorder = StatusRecorder::new(&mut res);
        recorder.write_header(StatusCode::BAD_GATEWAY);
        drop(recorder);
        assert!(res.headers().get(CONTENT_TYPE).is_none());
    }
}
