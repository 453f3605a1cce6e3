use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderValue, LOCATION};
use http::{Method, StatusCode};
use tracing::warn;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ContentType;
use crate::writer::ResponseWriter;

/// Redirects `/path/` to `/path`, keeping the query string.
///
/// `GET` gets `301 Moved Permanently`; every other method gets
/// `308 Permanent Redirect`, which obliges the client to replay the same
/// method and body. The root path `/` and paths without a trailing slash go
/// to `next` untouched.
///
/// The target always stays on this host: a run of leading slashes or
/// backslashes collapses to one `/`, so `//evil.com/` goes to `/evil.com`.
pub fn redirect_slashes(next: BoxedHandler) -> BoxedHandler {
    Arc::new(RedirectSlashes { next })
}

struct RedirectSlashes {
    next: BoxedHandler,
}

impl Handler for RedirectSlashes {
    fn serve<'a>(&'a self, w: &'a mut dyn ResponseWriter, req: &'a Request) -> BoxFuture<'a> {
        Box::pin(async move {
            match redirect_target(req) {
                Some((location, status)) => redirect(w, req.method(), &location, status),
                None => self.next.serve(w, req).await,
            }
        })
    }
}

/// Where `req` should be sent instead, if anywhere.
fn redirect_target(req: &Request) -> Option<(String, StatusCode)> {
    let path = req.path();
    if path.len() <= 1 || !path.ends_with('/') {
        return None;
    }

    let stripped = &path[..path.len() - 1];
    let mut location = format!("/{}", stripped.trim_start_matches(['/', '\\']));
    if let Some(query) = req.query().filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(query);
    }

    let status = if req.method() == Method::GET {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::PERMANENT_REDIRECT
    };
    Some((location, status))
}

fn redirect(w: &mut dyn ResponseWriter, method: &Method, location: &str, status: StatusCode) {
    let Ok(value) = HeaderValue::from_str(location) else {
        // Came from a parsed URI, so this only trips on exotic bytes.
        warn!(location, "unrepresentable redirect target");
        w.write_header(StatusCode::BAD_REQUEST);
        return;
    };
    w.headers_mut().insert(LOCATION, value);

    // Browsers show this if they refuse to follow the redirect.
    let with_body = (method == Method::GET || method == Method::HEAD)
        && !w.headers().contains_key(CONTENT_TYPE);
    if with_body {
        w.headers_mut().insert(CONTENT_TYPE, ContentType::Html.header_value());
    }

    w.write_header(status);

    if with_body && method == Method::GET {
        let reason = status.canonical_reason().unwrap_or_default();
        let body = format!("<a href=\"{}\">{reason}</a>.\n", html_escape(location));
        if let Err(e) = w.write(body.as_bytes()) {
            warn!("write redirect body: {e}");
        }
    }
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::handler_fn;
    use crate::request::test_request;
    use crate::response::Response;

    /// Terminal handler that counts calls and echoes the path it saw.
    fn echo(calls: &Arc<AtomicUsize>) -> BoxedHandler {
        let calls = Arc::clone(calls);
        handler_fn(move |w, req| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let _ = w.write(req.uri().to_string().as_bytes());
            })
        })
    }

    async fn run(method: Method, uri: &str) -> (Response, usize) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = redirect_slashes(echo(&calls));
        let mut res = Response::new();
        handler.serve(&mut res, &test_request(method, uri)).await;
        (res, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn get_with_trailing_slash_is_moved_permanently() {
        let (res, calls) = run(Method::GET, "/users/").await;
        assert_eq!(calls, 0);
        assert_eq!(res.status_code(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[LOCATION], "/users");
        assert_eq!(res.body(), b"<a href=\"/users\">Moved Permanently</a>.\n");
    }

    #[tokio::test]
    async fn query_string_is_preserved() {
        let (res, _) = run(Method::GET, "/users/?page=2&sort=name").await;
        assert_eq!(res.headers()[LOCATION], "/users?page=2&sort=name");
        let body = std::str::from_utf8(res.body()).unwrap();
        assert!(body.contains("/users?page=2&amp;sort=name"), "{body}");
    }

    #[tokio::test]
    async fn other_methods_get_permanent_redirect() {
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
            let (res, calls) = run(method.clone(), "/items/42/?x=1").await;
            assert_eq!(calls, 0);
            assert_eq!(res.status_code(), StatusCode::PERMANENT_REDIRECT, "{method}");
            assert_eq!(res.headers()[LOCATION], "/items/42?x=1");
            assert!(res.body().is_empty());
        }
    }

    #[tokio::test]
    async fn only_one_slash_is_stripped() {
        let (res, _) = run(Method::GET, "/a//").await;
        assert_eq!(res.headers()[LOCATION], "/a/");
    }

    #[tokio::test]
    async fn targets_never_leave_the_host() {
        for (uri, target) in [
            ("//evil.com/", "/evil.com"),
            ("///evil.com/?a=b", "/evil.com?a=b"),
            ("///", "/"),
        ] {
            let (res, calls) = run(Method::GET, uri).await;
            assert_eq!(calls, 0, "{uri}");
            assert_eq!(res.headers()[LOCATION], target, "{uri}");
        }
    }

    #[tokio::test]
    async fn root_and_clean_paths_pass_through() {
        for uri in ["/", "/users", "/users?page=2", "/a/b.json"] {
            let (res, calls) = run(Method::GET, uri).await;
            assert_eq!(calls, 1, "{uri}");
            assert_eq!(res.status_code(), StatusCode::OK);
            assert_eq!(res.body(), uri.as_bytes());
        }
    }
}
