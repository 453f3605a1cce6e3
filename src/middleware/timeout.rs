use std::panic;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use super::Middleware;
use crate::envelope::TIMEOUT_BODY;
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::writer::ResponseWriter;

/// Bounds the inner handler by a wall-clock deadline.
///
/// The inner handler runs on its own task and writes into a private buffer.
/// If it finishes within `limit`, the buffer is copied to the client. If not,
/// the client gets `503` with [`TIMEOUT_BODY`] and the buffer is sealed: the
/// handler keeps running in the background, but every later write fails with
/// [`Error::HandlerTimeout`]. Exactly one of the two replies is sent.
///
/// The canned body carries no content type of its own; the capturing wrapper
/// adds `application/json` to every 503.
pub fn timeout(limit: Duration) -> impl Middleware {
    move |next: BoxedHandler| -> BoxedHandler { Arc::new(Timeout { next, limit }) }
}

struct Timeout {
    next: BoxedHandler,
    limit: Duration,
}

impl Handler for Timeout {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        Box::pin(async move {
            let buffer = Arc::new(Mutex::new(Buffer::default()));
            let mut writer = TimeoutWriter { headers: HeaderMap::new(), buffer: Arc::clone(&buffer) };
            let next = Arc::clone(&self.next);
            let owned = req.clone();

            let mut task = tokio::spawn(async move {
                next.serve(&mut writer, &owned).await;
                writer.headers
            });

            tokio::select! {
                biased;

                joined = &mut task => match joined {
                    Ok(headers) => {
                        let buffered = std::mem::take(&mut *lock(&buffer));
                        buffered.replay(headers, w);
                    }
                    Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
                    Err(e) => {
                        debug!("timeout worker cancelled: {e}");
                        w.abort();
                    }
                },

                () = tokio::time::sleep(self.limit) => {
                    lock(&buffer).timed_out = true;
                    debug!(limit = ?self.limit, path = req.path(), "handler timed out");
                    w.write_header(StatusCode::SERVICE_UNAVAILABLE);
                    if let Err(e) = w.write(TIMEOUT_BODY.as_bytes()) {
                        debug!("write timeout body: {e}");
                    }
                    // Dropping `task` detaches it; the handler runs to completion.
                }
            }
        })
    }
}

/// What the inner handler has written so far.
#[derive(Default)]
struct Buffer {
    status: Option<StatusCode>,
    body: BytesMut,
    aborted: bool,
    timed_out: bool,
}

impl Buffer {
    fn replay(self, headers: HeaderMap, w: &mut dyn ResponseWriter) {
        w.headers_mut().extend(headers);
        if self.aborted {
            w.abort();
            return;
        }
        w.write_header(self.status.unwrap_or(StatusCode::OK));
        if !self.body.is_empty() {
            if let Err(e) = w.write(&self.body) {
                warn!("dropping buffered body: {e}");
            }
        }
    }
}

fn lock(buffer: &Mutex<Buffer>) -> MutexGuard<'_, Buffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The writer the inner handler sees.
///
/// Headers stay local to the handler's task; status and body go to the
/// shared buffer, which the timeout side seals under the same lock.
struct TimeoutWriter {
    headers: HeaderMap,
    buffer: Arc<Mutex<Buffer>>,
}

impl ResponseWriter for TimeoutWriter {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        let mut buffer = lock(&self.buffer);
        if buffer.timed_out {
            return;
        }
        match buffer.status {
            None => buffer.status = Some(status),
            Some(first) => warn!(
                first = first.as_u16(),
                ignored = status.as_u16(),
                "superfluous write_header call"
            ),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize> {
        let mut buffer = lock(&self.buffer);
        if buffer.timed_out {
            return Err(Error::HandlerTimeout);
        }
        if buffer.aborted {
            return Err(Error::Aborted);
        }
        buffer.status.get_or_insert(StatusCode::OK);
        buffer.body.extend_from_slice(chunk);
        Ok(chunk.len())
    }

    fn abort(&mut self) {
        let mut buffer = lock(&self.buffer);
        if !buffer.timed_out {
            buffer.aborted = true;
        }
    }
}
