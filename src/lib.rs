//! # tollgate
//!
//! The request pipeline of a small JSON backend: a fixed middleware chain in
//! front of a router, uniform JSON envelopes, and a server that drains
//! in-flight work before it exits.
//!
//! ## The pipeline
//!
//! Every request passes through the same five layers, outermost first:
//!
//! 1. **wrap**: records the status the handler chose so the logger can see it
//! 2. **logger**: one `INFO` event per request with method, path, latency
//! 3. **timeout**: `503` with a canned JSON body once the write timeout passes
//! 4. **recoverer**: contains panics, logs the backtrace, drops the reply
//! 5. **redirect slashes**: `/users/` → `/users`
//!
//! Then the [`Router`] dispatches by method and path.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tollgate::{Method, Request, Response, Router, Server, StatusCode, envelope};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .on(Method::GET,  "/users/{id}", get_user)
//!         .on(Method::POST, "/users",      create_user);
//!
//!     let outcome = Server::bind("0.0.0.0:3000").serve(app).await;
//!     if let Err(e) = outcome.listen {
//!         eprintln!("listen: {e}");
//!     }
//!     if let Err(e) = outcome.shutdown {
//!         eprintln!("shutdown: {e}");
//!     }
//! }
//!
//! async fn get_user(req: Request) -> tollgate::Result<Response> {
//!     let id = req.param("id").unwrap_or("unknown");
//!     envelope::success(StatusCode::OK, &serde_json::json!({ "id": id }))
//! }
//!
//! async fn create_user(req: Request) -> tollgate::Result<Response> {
//!     if req.body().is_empty() {
//!         return envelope::error(&req, StatusCode::BAD_REQUEST, "empty body");
//!     }
//!     envelope::success(StatusCode::CREATED, &"created")
//! }
//! ```

mod config;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod writer;

pub mod envelope;
pub mod middleware;
pub mod status;
pub mod store;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use handler::{BoxFuture, BoxedHandler, Endpoint, Handler, handler_fn};
pub use http::{Method, StatusCode};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{ServeOutcome, Server};
pub use writer::{ResponseWriter, StatusRecorder};
