use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use futures::FutureExt;
use tracing::error;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::writer::ResponseWriter;

/// Panic payload that must never be swallowed.
///
/// Raise it with [`abort_handler`] to tear down the connection from inside a
/// handler. The recoverer re-raises it, and the connection task dies with it.
#[derive(Clone, Copy, Debug)]
pub struct AbortHandler;

/// Aborts the current request by unwinding with [`AbortHandler`].
pub fn abort_handler() -> ! {
    panic::panic_any(AbortHandler)
}

/// Per-request panic boundary.
///
/// A panic other than [`AbortHandler`] is logged at `ERROR` together with the
/// backtrace captured where it was raised, and the reply is abandoned: the
/// client sees the connection closed without a body, never an envelope,
/// because part of the reply may already be written.
pub fn recoverer(next: BoxedHandler) -> BoxedHandler {
    install_backtrace_hook();
    Arc::new(Recoverer { next })
}

struct Recoverer {
    next: BoxedHandler,
}

impl Handler for Recoverer {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        Box::pin(async move {
            let caught = AssertUnwindSafe(self.next.serve(&mut *w, req))
                .catch_unwind()
                .await;
            let Err(payload) = caught else { return };

            if payload.is::<AbortHandler>() {
                panic::resume_unwind(payload);
            }

            let backtrace = take_backtrace()
                .map_or_else(|| "unavailable".to_owned(), |bt| bt.to_string());
            error!(
                panic = panic_message(&*payload),
                method = %req.method(),
                path = req.path(),
                %backtrace,
                "recovered from panic"
            );
            w.abort();
        })
    }
}

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// The backtrace the hook recorded for the latest panic on this thread.
///
/// The hook runs on the panicking thread before unwinding, and the recoverer
/// catches on the same thread within the same poll, so the slot is fresh.
fn take_backtrace() -> Option<Backtrace> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

fn install_backtrace_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<AbortHandler>() {
                return;
            }
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "Box<dyn Any>"
    }
}
