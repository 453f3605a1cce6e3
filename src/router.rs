//! Radix-tree request router: the terminal stage of the middleware chain.
//!
//! One tree per HTTP method. O(path-length) lookup. Misses are answered with
//! a generic error envelope: `405` (with `Allow`) when the path is known under
//! another method, `404` otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::error;

use crate::envelope;
use crate::handler::{BoxFuture, BoxedEndpoint, Endpoint, Handler};
use crate::request::Request;
use crate::writer::ResponseWriter;

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve).
/// Each [`Router::on`] call returns `self` so registrations chain naturally.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedEndpoint>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust
    /// # use http::{Method, StatusCode};
    /// # use tollgate::{Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> StatusCode { StatusCode::CREATED }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{name}", get_user)
    ///     .on(Method::POST, "/users",        create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics on a malformed or conflicting route. Routes are fixed at
    /// startup, so this is a programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Endpoint) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_endpoint())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedEndpoint, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let endpoint = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((endpoint, params))
    }

    /// Methods, sorted, under which `path` is registered.
    fn allowed(&self, path: &str) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        methods.sort_unstable();
        methods
    }
}

impl Handler for Router {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        Box::pin(async move {
            if let Some((endpoint, params)) = self.lookup(req.method(), req.path()) {
                match endpoint.call(req.clone().with_params(params)).await {
                    Ok(res) => res.write_to(w),
                    Err(e) => {
                        error!(method = %req.method(), path = req.path(), "handler failed: {e}");
                        let status = StatusCode::INTERNAL_SERVER_ERROR;
                        if let Err(e) = envelope::write_generic_error(w, req, status) {
                            error!(path = req.path(), "write {status} envelope: {e}");
                        }
                    }
                }
                return;
            }

            let allowed = self.allowed(req.path());
            let status = if allowed.is_empty() {
                StatusCode::NOT_FOUND
            } else {
                if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                    w.headers_mut().insert(ALLOW, value);
                }
                StatusCode::METHOD_NOT_ALLOWED
            };

            if let Err(e) = envelope::write_generic_error(w, req, status) {
                error!(path = req.path(), "write {status} envelope: {e}");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_request;
    use crate::response::Response;

    async fn hello(req: Request) -> String {
        format!("hello {}", req.param("name").unwrap_or("nobody"))
    }

    async fn created(_req: Request) -> StatusCode {
        StatusCode::CREATED
    }

    async fn failing(_req: Request) -> crate::Result<Response> {
        Err(crate::Error::StoreTimeout(std::time::Duration::from_secs(5)))
    }

    fn app() -> Router {
        Router::new()
            .on(Method::GET, "/users/{name}", hello)
            .on(Method::POST, "/users", created)
            .on(Method::PUT, "/users", created)
            .on(Method::GET, "/failing", failing)
    }

    #[tokio::test]
    async fn dispatches_with_params() {
        let mut res = Response::new();
        app().serve(&mut res, &test_request(Method::GET, "/users/alice")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"hello alice");
    }

    #[tokio::test]
    async fn unknown_path_is_a_404_envelope() {
        let mut res = Response::new();
        app().serve(&mut res, &test_request(Method::GET, "/nowhere")).await;

        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        let value: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(value["description"], "Not Found");
        assert_eq!(value["path"], "/nowhere");
    }

    #[tokio::test]
    async fn wrong_method_is_a_405_with_allow() {
        let mut res = Response::new();
        app().serve(&mut res, &test_request(Method::DELETE, "/users")).await;

        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()[ALLOW], "POST, PUT");
    }

    #[tokio::test]
    async fn handler_errors_are_a_500_envelope() {
        let mut res = Response::new();
        app().serve(&mut res, &test_request(Method::GET, "/failing")).await;

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()[http::header::CONTENT_TYPE], "application/json");
        let value: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error_code"], 500);
        assert_eq!(value["description"], "Internal Server Error");
        assert_eq!(value["path"], "/failing");
        assert!(value.get("message").is_none());
    }
}
