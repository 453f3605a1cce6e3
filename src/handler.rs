//! Handler traits and type erasure.
//!
//! Two kinds of handler exist:
//!
//! - [`Handler`] is what the middleware chain is made of. It receives the
//!   request and the response writer and produces nothing: whatever it wants
//!   the client to see goes through the writer.
//! - [`Endpoint`] is what route handlers are. It is automatically satisfied
//!   by any `async fn(Request) -> impl IntoResponse`; the router adapts it to
//!   a [`Handler`] by replaying the returned [`Response`] into the writer.
//!
//! ```text
//! async fn get_user(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.on(Method::GET, "/users/{id}", get_user)
//! get_user.into_boxed_endpoint()                      ← Endpoint blanket impl
//!        ↓  stored as BoxedEndpoint = Arc<dyn ErasedEndpoint>
//! Router::serve(w, req)                               ← a Handler
//!        ↓
//! endpoint.call(req).await?.write_to(w)             ← Err → 500 envelope
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::writer::ResponseWriter;

/// A heap-allocated, type-erased future.
pub type BoxFuture<'a, T = ()> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Handler ──────────────────────────────────────────────────────────────────

/// One stage of request processing.
///
/// Middlewares implement this around a `next` handler; the router implements
/// it at the bottom of the chain.
pub trait Handler: Send + Sync + 'static {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a>;
}

/// A shared, type-erased [`Handler`].
pub type BoxedHandler = Arc<dyn Handler>;

/// Adapts a closure into a [`BoxedHandler`].
///
/// ```rust
/// use http::StatusCode;
/// use tollgate::{ResponseWriter, handler_fn};
///
/// let teapot = handler_fn(|w, _req| Box::pin(async move {
///     w.write_header(StatusCode::IM_A_TEAPOT);
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut dyn ResponseWriter, &'a Request) -> BoxFuture<'a> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut dyn ResponseWriter, &'a Request) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        (self.0)(w, req)
    }
}

// ── Endpoint ─────────────────────────────────────────────────────────────────

/// Internal dispatch interface for route handlers.
#[doc(hidden)]
pub trait ErasedEndpoint {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response>>;
}

/// A heap-allocated, type-erased route handler shared across requests.
#[doc(hidden)]
pub type BoxedEndpoint = Arc<dyn ErasedEndpoint + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied for any
/// `async fn name(req: Request) -> impl IntoResponse`. The trait is sealed.
pub trait Endpoint: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_endpoint(self) -> BoxedEndpoint;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Endpoint for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_endpoint(self) -> BoxedEndpoint {
        Arc::new(FnEndpoint(self))
    }
}

/// Bridges a concrete route function to [`ErasedEndpoint`].
struct FnEndpoint<F>(F);

impl<F, Fut, R> ErasedEndpoint for FnEndpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response>> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_route_result() })
    }
}
