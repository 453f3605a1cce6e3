use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::writer::ResponseWriter;

/// Emits one `INFO` line per request once the inner chain returns.
///
/// The `status` field is present only when the writer handed to the logger
/// is a capturing wrapper, i.e. when [`wrap_response_writer`] sits outside
/// it. Otherwise the line is written without it.
///
/// [`wrap_response_writer`]: super::wrap_response_writer
pub fn logger(next: BoxedHandler) -> BoxedHandler {
    Arc::new(Logger { next })
}

struct Logger {
    next: BoxedHandler,
}

impl Handler for Logger {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            self.next.serve(&mut *w, req).await;
            let elapsed = start.elapsed();

            match w.captured_status() {
                Some(status) => info!(
                    remote_addr = %req.remote_addr(),
                    status = status.as_u16(),
                    method = %req.method(),
                    uri = %req.uri(),
                    ?elapsed,
                    "request"
                ),
                None => info!(
                    remote_addr = %req.remote_addr(),
                    method = %req.method(),
                    uri = %req.uri(),
                    ?elapsed,
                    "request"
                ),
            }
        })
    }
}
