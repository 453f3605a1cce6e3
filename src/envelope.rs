//! JSON response envelopes.
//!
//! Every API reply has one of three fixed shapes. Field order is part of the
//! wire contract (`ok` is always first), so the shapes are plain structs
//! serialised in declaration order rather than maps.
//!
//! ```text
//! {"ok":true,"result":…}
//! {"ok":false,"error_code":404,"description":"Not Found","timestamp":"…","path":"/x","message":"…"}
//! {"ok":false,"error_code":404,"description":"Not Found","timestamp":"…","path":"/x"}
//! ```

use std::borrow::Cow;
use std::io;

use chrono::{Local, SecondsFormat};
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::status::reason_phrase;
use crate::writer::ResponseWriter;

/// Body the timeout middleware sends in place of a handler that ran too long.
pub const TIMEOUT_BODY: &str = r#"{"ok":false,"error_code":503,"description":"Service Unavailable"}"#;

#[derive(Serialize)]
struct Success<'a, T: ?Sized> {
    ok: bool,
    result: &'a T,
}

#[derive(Serialize)]
struct Failure<'a> {
    ok: bool,
    error_code: u16,
    description: &'static str,
    timestamp: String,
    path: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl<'a> Failure<'a> {
    fn new(req: &'a Request, status: StatusCode, message: Option<&'a str>) -> Result<Self> {
        let description =
            reason_phrase(status).ok_or(Error::UnsupportedStatus(status.as_u16()))?;
        Ok(Self {
            ok: false,
            error_code: status.as_u16(),
            description,
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            path: req.decoded_path(),
            message,
        })
    }
}

/// Writes `{"ok":true,"result":<result>}` with `status`.
pub fn write_success<T>(w: &mut dyn ResponseWriter, status: StatusCode, result: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    write_json(w, status, &Success { ok: true, result })
}

/// Writes the detailed error envelope for `status` with a free-text message.
///
/// Fails with [`Error::UnsupportedStatus`], writing nothing, when `status`
/// has no registered reason phrase.
pub fn write_error(
    w: &mut dyn ResponseWriter,
    req: &Request,
    status: StatusCode,
    message: &str,
) -> Result<()> {
    let envelope = Failure::new(req, status, Some(message))?;
    write_json(w, status, &envelope)
}

/// Writes the generic error envelope (no `message`) for `status`.
pub fn write_generic_error(w: &mut dyn ResponseWriter, req: &Request, status: StatusCode) -> Result<()> {
    let envelope = Failure::new(req, status, None)?;
    write_json(w, status, &envelope)
}

/// Owned variant of [`write_success`] for route handlers.
///
/// ```rust
/// use http::StatusCode;
/// use tollgate::envelope;
///
/// let res = envelope::success(StatusCode::OK, &["alice", "bob"]).unwrap();
/// assert_eq!(res.body(), br#"{"ok":true,"result":["alice","bob"]}"#);
/// ```
pub fn success<T: Serialize + ?Sized>(status: StatusCode, result: &T) -> Result<Response> {
    let mut res = Response::new();
    write_success(&mut res, status, result)?;
    Ok(res)
}

/// Owned variant of [`write_error`].
pub fn error(req: &Request, status: StatusCode, message: &str) -> Result<Response> {
    let mut res = Response::new();
    write_error(&mut res, req, status, message)?;
    Ok(res)
}

/// Owned variant of [`write_generic_error`].
pub fn generic_error(req: &Request, status: StatusCode) -> Result<Response> {
    let mut res = Response::new();
    write_generic_error(&mut res, req, status)?;
    Ok(res)
}

fn write_json<T: Serialize>(w: &mut dyn ResponseWriter, status: StatusCode, value: &T) -> Result<()> {
    w.headers_mut().insert(CONTENT_TYPE, ContentType::Json.header_value());
    w.write_header(status);
    serde_json::to_writer(BodyWriter(w), value)?;
    Ok(())
}

/// `io::Write` view of a response body, so serde can stream into it.
struct BodyWriter<'a>(&'a mut dyn ResponseWriter);

impl io::Write for BodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
