use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::writer::{ResponseWriter, StatusRecorder};

/// Hands the rest of the chain a [`StatusRecorder`] around the real writer.
///
/// Place it outermost: only middlewares inside it can read the final status.
pub fn wrap_response_writer(next: BoxedHandler) -> BoxedHandler {
    Arc::new(WrapResponseWriter { next })
}

struct WrapResponseWriter {
    next: BoxedHandler,
}

impl Handler for WrapResponseWriter {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        Box::pin(async move {
            let mut recorder = StatusRecorder::new(w);
            self.next.serve(&mut recorder, req).await;
        })
    }
}
