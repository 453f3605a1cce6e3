//! HTTP server lifecycle and graceful shutdown.
//!
//! ```text
//! starting ──▶ listening ──signal──▶ draining ──▶ stopped
//!    │             │                     │
//!    └─bind error──┴──accept error───────┴──deadline──▶ failed
//! ```
//!
//! The accept loop runs on a background task; the caller's task waits for
//! SIGINT, SIGQUIT or SIGTERM. On the first one the server:
//! 1. Immediately stops accepting: the listener is dropped, new connections
//!    are refused.
//! 2. Asks every connection to shut down gracefully. Idle keep-alive
//!    connections close at once, in-flight requests run to completion.
//! 3. Waits at most `write_timeout + request_timeout` for that to happen,
//!    then abandons whatever is left.
//!
//! Failures are reported, not acted on. [`ServeOutcome`] carries the listen
//! failure and the shutdown failure separately; what to log and which exit
//! code to use is the caller's decision.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::BoxedHandler;
use crate::middleware;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// The two independent ways serving can fail.
#[derive(Debug)]
#[must_use]
pub struct ServeOutcome {
    /// `Err` only if the listener could not be bound or the accept loop
    /// stopped for a reason other than shutdown.
    pub listen: Result<()>,
    /// `Err` only if draining missed its deadline.
    pub shutdown: Result<()>,
}

impl ServeOutcome {
    fn listen_failed(e: Error) -> Self {
        error!("listen failed: {e}");
        Self { listen: Err(e), shutdown: Ok(()) }
    }

    pub fn is_ok(&self) -> bool {
        self.listen.is_ok() && self.shutdown.is_ok()
    }
}

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    listener: Option<TcpListener>,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) with default
    /// timeouts. Nothing is bound until [`serve`](Server::serve).
    ///
    /// ```rust,no_run
    /// use tollgate::{Router, Server};
    ///
    /// # async fn run() {
    /// let outcome = Server::bind("0.0.0.0:3000").serve(Router::new()).await;
    /// # }
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::with_config(ServerConfig::new(addr))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self { config, listener: None }
    }

    /// Serves on an already-bound listener; `config.addr` is ignored.
    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        Self { config, listener: Some(listener) }
    }

    /// Serves `router` behind the standard middleware chain until SIGINT,
    /// SIGQUIT or SIGTERM, then drains.
    pub async fn serve(self, router: Router) -> ServeOutcome {
        match TerminationSignals::install() {
            Ok(signals) => self.serve_with_shutdown(router, signals.recv()).await,
            Err(e) => ServeOutcome::listen_failed(e.into()),
        }
    }

    /// Like [`serve`](Server::serve), with `shutdown` standing in for the
    /// termination signal.
    pub async fn serve_with_shutdown<F>(self, router: Router, shutdown: F) -> ServeOutcome
    where
        F: Future<Output = ()> + Send,
    {
        let Self { config, listener } = self;

        // ── starting ─────────────────────────────────────────────────────────
        let listener = match listener {
            Some(listener) => listener,
            None => match TcpListener::bind(config.addr()).await {
                Ok(listener) => listener,
                Err(e) => return ServeOutcome::listen_failed(e.into()),
            },
        };
        let handler = middleware::standard(&config).then(Arc::new(router));
        let config = Arc::new(config);

        // ── listening ────────────────────────────────────────────────────────
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "listening"),
            Err(e) => warn!("listening on unknown address: {e}"),
        }
        let token = CancellationToken::new();
        let mut accept = tokio::spawn(accept_loop(
            listener,
            handler,
            Arc::clone(&config),
            token.clone(),
        ));

        tokio::pin!(shutdown);
        tokio::select! {
            joined = &mut accept => {
                let listen = flatten(joined);
                if let Err(e) = &listen {
                    error!("accept loop stopped: {e}");
                }
                return ServeOutcome { listen, shutdown: Ok(()) };
            }
            () = &mut shutdown => {}
        }

        // ── draining ─────────────────────────────────────────────────────────
        let deadline = config.drain_timeout();
        info!(?deadline, "shutting down, draining connections");
        token.cancel();

        // ── stopped ──────────────────────────────────────────────────────────
        match tokio::time::timeout(deadline, &mut accept).await {
            Ok(joined) => {
                info!("stopped");
                ServeOutcome { listen: flatten(joined), shutdown: Ok(()) }
            }
            Err(_) => {
                // Dropping the accept task's JoinSet aborts every connection.
                accept.abort();
                let _ = accept.await;
                warn!(?deadline, "drain deadline exceeded, abandoned remaining connections");
                ServeOutcome { listen: Ok(()), shutdown: Err(Error::DrainTimeout(deadline)) }
            }
        }
    }
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.unwrap_or_else(|e| Err(e.into()))
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    handler: BoxedHandler,
    config: Arc<ServerConfig>,
    token: CancellationToken,
) -> Result<()> {
    // JoinSet tracks every connection task so the drain can wait for them.
    let mut connections = JoinSet::new();
    let mut backoff: Option<Duration> = None;

    let failure = loop {
        tokio::select! {
            // Check shutdown first so it wins over a queue of pending accepts.
            biased;

            () = token.cancelled() => break None,

            res = listener.accept() => match res {
                Ok((stream, remote_addr)) => {
                    backoff = None;
                    connections.spawn(serve_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&handler),
                        Arc::clone(&config),
                        token.child_token(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    let delay = backoff.map_or(MIN_ACCEPT_BACKOFF, |d| (d * 2).min(MAX_ACCEPT_BACKOFF));
                    backoff = Some(delay);
                    warn!(retry_in = ?delay, "accept error: {e}");
                    tokio::select! {
                        () = token.cancelled() => break None,
                        () = sleep(delay) => {}
                    }
                }
                Err(e) => break Some(e),
            },

            // Reap finished connection tasks so the set stays small.
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                log_connection_exit(joined);
            }
        }
    };

    drop(listener);

    match failure {
        None => {
            info!(in_flight = connections.len(), "listener closed");
            while let Some(joined) = connections.join_next().await {
                log_connection_exit(joined);
            }
            Ok(())
        }
        Some(e) => {
            // Not a shutdown, but the socket is gone: let the open
            // connections finish as if it were one.
            token.cancel();
            let drained = tokio::time::timeout(config.drain_timeout(), async {
                while let Some(joined) = connections.join_next().await {
                    log_connection_exit(joined);
                }
            })
            .await;
            if drained.is_err() {
                warn!("abandoning connections after accept failure");
            }
            Err(e.into())
        }
    }
}

/// Accept errors worth retrying: the peer gave up, or we ran out of file
/// descriptors and may get some back.
fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut | OutOfMemory
    ) || matches!(e.raw_os_error(), Some(23 | 24)) // ENFILE, EMFILE
}

fn log_connection_exit(joined: std::result::Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => debug!("connection task unwound: {e}"),
        Err(e) => debug!("connection task cancelled: {e}"),
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    handler: BoxedHandler,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let activity = Arc::new(Activity::new());
    let read_timeout = config.read_timeout;

    // `service_fn` is called once per request on the connection.
    let svc = {
        let activity = Arc::clone(&activity);
        service_fn(move |req| {
            let busy = activity.begin();
            let handler = Arc::clone(&handler);
            async move {
                let _busy = busy;
                dispatch(handler, req, remote_addr, read_timeout).await
            }
        })
    };

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2.
    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout);
    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let mut closing = false;
    let result = loop {
        tokio::select! {
            res = conn.as_mut() => break res,

            () = shutdown.cancelled(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }

            () = activity.idle_for(config.idle_timeout), if !closing => {
                debug!(peer = %remote_addr, "closing idle connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        debug!(peer = %remote_addr, "connection closed: {e}");
    }
}

/// Core hot path: reads one request and runs it through the chain.
///
/// An `Err` makes hyper drop the connection (or reset the HTTP/2 stream)
/// without replying, which is what an abandoned reply should look like.
async fn dispatch(
    handler: BoxedHandler,
    req: http::Request<Incoming>,
    remote_addr: SocketAddr,
    read_timeout: Duration,
) -> Result<http::Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let body = match tokio::time::timeout(read_timeout, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            debug!(peer = %remote_addr, "read request body: {e}");
            return Err(e.into());
        }
        Err(_) => {
            debug!(peer = %remote_addr, "request body not read within {read_timeout:?}");
            return Err(Error::ReadTimeout(read_timeout));
        }
    };

    let req = Request::from_http(http::Request::from_parts(parts, body), remote_addr);
    let mut res = Response::new();
    handler.serve(&mut res, &req).await;
    res.into_http()
}

/// Per-connection bookkeeping for the idle timeout.
struct Activity {
    in_flight: AtomicUsize,
    last_seen: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self { in_flight: AtomicUsize::new(0), last_seen: Mutex::new(Instant::now()) }
    }

    fn begin(self: &Arc<Self>) -> Busy {
        self.touch();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Busy(Arc::clone(self))
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn since_last_seen(&self) -> Duration {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }

    /// Resolves once no request has been in flight for `limit`.
    ///
    /// While busy it re-checks once per `limit`.
    async fn idle_for(&self, limit: Duration) {
        loop {
            let since = self.since_last_seen();
            let wait = if self.in_flight.load(Ordering::Acquire) > 0 {
                limit
            } else if since >= limit {
                return;
            } else {
                limit - since
            };
            sleep(wait).await;
        }
    }
}

/// Marks a request in flight until dropped.
struct Busy(Arc<Activity>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Handlers for the signals that trigger a graceful shutdown.
///
/// Installed before binding so a failure is reported up front. On Unix these
/// are SIGINT (Ctrl-C), SIGQUIT and SIGTERM (what Kubernetes sends); on other
/// platforms only Ctrl-C is available.
struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    #[cfg(unix)]
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Resolves on the first termination signal.
    #[cfg(unix)]
    async fn recv(mut self) {
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.terminate.recv() => "SIGTERM",
        };
        info!(signal = name, "termination signal received");
    }

    #[cfg(not(unix))]
    async fn recv(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(signal = "ctrl-c", "termination signal received"),
            Err(e) => {
                error!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }
    }
}
