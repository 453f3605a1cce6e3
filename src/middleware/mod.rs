//! Middleware layer.
//!
//! A middleware turns a `next` handler into a new handler. A [`Chain`] holds
//! an ordered list of them and composes right to left, so the first one
//! listed is the outermost:
//!
//! ```text
//! Chain::new().with(m1).with(m2).with(m3).then(t)  ==  m1(m2(m3(t)))
//! ```
//!
//! Order matters. The [`standard`] chain is
//!
//! ```text
//! wrap_response_writer → logger → timeout → recoverer → redirect_slashes → router
//! ```
//!
//! The logger can only report a status because it sits inside
//! [`wrap_response_writer`]; move it outside and its lines lose the status
//! field. The recoverer sits inside the timeout and so runs on the timeout's
//! worker task.

mod logger;
mod recover;
mod redirect;
mod timeout;
mod wrap;

use std::fmt;

use crate::config::ServerConfig;
use crate::handler::BoxedHandler;

pub use logger::logger;
pub use recover::{AbortHandler, abort_handler, recoverer};
pub use redirect::redirect_slashes;
pub use timeout::timeout;
pub use wrap::wrap_response_writer;

/// A request-processing stage wrapped around a `next` handler.
///
/// Implemented for every `Fn(BoxedHandler) -> BoxedHandler`, so plain
/// functions such as [`logger`] are middlewares as they are.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// An ordered list of middlewares.
#[derive(Default)]
pub struct Chain {
    layers: Vec<Box<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` inside every middleware added so far.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Box::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Composes the chain around `terminal`.
    pub fn then(&self, terminal: BoxedHandler) -> BoxedHandler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer.wrap(next))
    }
}

impl Middleware for Chain {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self.then(next)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("layers", &self.layers.len()).finish()
    }
}

/// The reference chain used by [`Server`](crate::Server).
pub fn standard(config: &ServerConfig) -> Chain {
    Chain::new()
        .with(wrap_response_writer)
        .with(logger)
        .with(timeout(config.write_timeout))
        .with(recoverer)
        .with(redirect_slashes)
}
