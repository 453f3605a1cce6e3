#![allow(dead_code)]

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tollgate::{Router, ServeOutcome, Server, ServerConfig};

pub struct TestServer {
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    outcome: JoinHandle<ServeOutcome>,
}

impl TestServer {
    /// Fires the shutdown trigger and waits for the server to stop.
    pub async fn shutdown(self) -> ServeOutcome {
        let _ = self.stop.send(());
        self.outcome.await.unwrap()
    }
}

pub async fn spawn_server(router: Router, config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let outcome = tokio::spawn(Server::from_listener(listener, config).serve_with_shutdown(
        router,
        async move {
            let _ = stopped.await;
        },
    ));

    TestServer { addr, stop, outcome }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Writes `raw` and reads until the server closes the connection.
pub async fn send(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut buf = Vec::new();
    // A reset after an abandoned reply still counts as "nothing received".
    let _ = stream.read_to_end(&mut buf).await;
    buf
}

/// One request on a fresh `Connection: close` connection. `None` if the
/// server hung up without replying.
pub async fn request(addr: SocketAddr, method: &str, path: &str, body: &str) -> Option<Reply> {
    let raw = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    parse(&send(addr, raw.as_bytes()).await)
}

pub fn parse(raw: &[u8]) -> Option<Reply> {
    if raw.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((&text, ""));
    let mut lines = head.lines();

    let status = lines.next()?.split_whitespace().nth(1)?.parse().ok()?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();

    Some(Reply { status, headers, body: body.to_owned() })
}
