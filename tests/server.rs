mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Reply, parse, request, spawn_server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, timeout};
use tollgate::envelope::{self, TIMEOUT_BODY};
use tollgate::{Error, Method, Request, Response, Router, ServerConfig, StatusCode};

fn config() -> ServerConfig {
    ServerConfig::new("127.0.0.1:0")
        .with_read_timeout(Duration::from_secs(2))
        .with_write_timeout(Duration::from_millis(300))
        .with_request_timeout(Duration::from_millis(700))
        .with_idle_timeout(Duration::from_secs(2))
}

async fn users(_req: Request) -> tollgate::Result<Response> {
    envelope::success(StatusCode::OK, &["ada", "grace"])
}

async fn teapot(req: Request) -> tollgate::Result<Response> {
    envelope::error(&req, StatusCode::IM_A_TEAPOT, "short and stout")
}

async fn echo(req: Request) -> Response {
    Response::text(String::from_utf8_lossy(req.body()).into_owned())
}

async fn slow(_req: Request) -> Response {
    sleep(Duration::from_secs(3)).await;
    Response::text("too late")
}

async fn boom(_req: Request) -> Response {
    panic!("handler exploded");
}

fn app() -> Router {
    Router::new()
        .on(Method::GET, "/users", users)
        .on(Method::GET, "/teapot", teapot)
        .on(Method::POST, "/echo", echo)
        .on(Method::GET, "/slow", slow)
        .on(Method::GET, "/panic", boom)
}

#[tokio::test]
async fn success_envelope_over_the_wire() {
    let server = spawn_server(app(), config()).await;

    let reply = request(server.addr, "GET", "/users", "").await.expect("reply");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-type"), Some("application/json"));
    assert_eq!(reply.body, r#"{"ok":true,"result":["ada","grace"]}"#);

    assert!(server.shutdown().await.is_ok());
}

#[tokio::test]
async fn error_envelope_keeps_field_order() {
    let server = spawn_server(app(), config()).await;

    let reply = request(server.addr, "GET", "/teapot", "").await.expect("reply");
    assert_eq!(reply.status, 418);
    assert!(reply.body.starts_with(r#"{"ok":false,"error_code":418,"description":"I'm a teapot","timestamp":""#));
    assert!(reply.body.ends_with(r#","path":"/teapot","message":"short and stout"}"#), "{}", reply.body);

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn unknown_routes_get_generic_envelopes() {
    let server = spawn_server(app(), config()).await;

    let missing = request(server.addr, "GET", "/nowhere", "").await.expect("reply");
    assert_eq!(missing.status, 404);
    let value = missing.json();
    assert_eq!(value["error_code"], 404);
    assert_eq!(value["path"], "/nowhere");
    assert!(value.get("message").is_none());

    let wrong = request(server.addr, "DELETE", "/users", "").await.expect("reply");
    assert_eq!(wrong.status, 405);
    assert_eq!(wrong.header("allow"), Some("GET"));

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn request_bodies_reach_handlers() {
    let server = spawn_server(app(), config()).await;

    let reply = request(server.addr, "POST", "/echo", "hello there").await.expect("reply");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "hello there");

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn trailing_slashes_redirect() {
    let server = spawn_server(app(), config()).await;

    let get = request(server.addr, "GET", "/users/?page=2", "").await.expect("reply");
    assert_eq!(get.status, 301);
    assert_eq!(get.header("location"), Some("/users?page=2"));
    assert_eq!(get.header("content-type"), Some("text/html; charset=utf-8"));

    let post = request(server.addr, "POST", "/echo/", "payload").await.expect("reply");
    assert_eq!(post.status, 308);
    assert_eq!(post.header("location"), Some("/echo"));
    assert!(post.body.is_empty());

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn slow_handlers_get_the_canned_503() {
    let server = spawn_server(app(), config()).await;

    let start = Instant::now();
    let reply = request(server.addr, "GET", "/slow", "").await.expect("reply");
    let elapsed = start.elapsed();

    assert_eq!(reply.status, 503);
    assert_eq!(reply.header("content-type"), Some("application/json"));
    assert_eq!(reply.body, TIMEOUT_BODY);
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn panics_drop_the_connection_but_not_the_server() {
    let server = spawn_server(app(), config()).await;

    assert!(request(server.addr, "GET", "/panic", "").await.is_none());

    let reply = request(server.addr, "GET", "/users", "").await.expect("server still up");
    assert_eq!(reply.status, 200);

    assert!(server.shutdown().await.is_ok());
}

#[tokio::test]
async fn idle_keep_alive_connections_are_closed() {
    let config = config().with_idle_timeout(Duration::from_millis(300));
    let server = spawn_server(app(), config).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /users HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    let reply: Reply = parse(&buf[..n]).expect("reply");
    assert_eq!(reply.status, 200);

    // Keep-alive: the server holds the connection open until it goes idle.
    let closed = timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
    assert!(matches!(closed, Ok(Ok(0)) | Ok(Err(_))), "{closed:?}");

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_in_flight_requests() {
    let started = Arc::new(Notify::new());
    let router = Router::new().on(Method::GET, "/work", {
        let started = Arc::clone(&started);
        move |_req: Request| {
            let started = Arc::clone(&started);
            async move {
                started.notify_one();
                sleep(Duration::from_millis(150)).await;
                Response::text("done")
            }
        }
    });
    let server = spawn_server(router, config()).await;
    let addr = server.addr;

    let in_flight = tokio::spawn(async move { request(addr, "GET", "/work", "").await });
    started.notified().await;

    let outcome = server.shutdown().await;
    assert!(outcome.listen.is_ok());
    assert!(outcome.shutdown.is_ok());

    let reply = in_flight.await.unwrap().expect("reply");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "done");

    // The listener is gone.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn idle_connections_do_not_hold_up_shutdown() {
    let server = spawn_server(app(), config()).await;

    // Connected, but no request sent yet.
    let _idle = TcpStream::connect(server.addr).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    let outcome = server.shutdown().await;
    assert!(outcome.is_ok());
    assert!(start.elapsed() < config().drain_timeout(), "{:?}", start.elapsed());
}

#[tokio::test]
async fn missed_drain_deadline_is_a_shutdown_failure() {
    let server = spawn_server(app(), config()).await;

    // Headers promise a body that never comes; the request stays in flight
    // for the whole read timeout, longer than the drain deadline.
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 64\r\n\r\npartial")
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    let outcome = server.shutdown().await;
    let elapsed = start.elapsed();

    assert!(outcome.listen.is_ok());
    assert!(matches!(outcome.shutdown, Err(Error::DrainTimeout(d)) if d == Duration::from_secs(1)));
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2), "{elapsed:?}");
}
