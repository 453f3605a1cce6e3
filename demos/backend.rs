//! A small account backend on the standard pipeline.
//!
//! Run with:
//!   LISTEN_ADDR=127.0.0.1:3000 cargo run --example backend
//!
//! Try:
//!   curl -X POST localhost:3000/users -d '{"username":"ada","password":"pw"}'
//!   curl -X POST localhost:3000/login -d '{"username":"ada","password":"pw"}'
//!   curl -i localhost:3000/users/          # 301 to /users
//!   curl -i localhost:3000/slow            # 503 after the write timeout
//!   curl -i localhost:3000/panic           # connection closed, no reply
//!
//! Ctrl-C drains in-flight requests before exiting.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tollgate::store::{CredentialStore, MemoryStore, StoreConfig, Timed};
use tollgate::{Error, Method, Request, Response, Router, Server, ServerConfig, StatusCode, envelope};
use tracing::{error, info};

type Store = Arc<Timed<MemoryStore>>;

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let store_config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("store config: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(host = %store_config.host, port = %store_config.port, "using in-memory store");
    let store: Store = match Timed::connect(&store_config, async { Ok(MemoryStore::new()) }).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("store connect: {e}");
            return ExitCode::FAILURE;
        }
    };

    let app = Router::new()
        .on(Method::GET, "/users", list_hint)
        .on(Method::POST, "/users", {
            let store = Arc::clone(&store);
            move |req| register(Arc::clone(&store), req)
        })
        .on(Method::POST, "/login", {
            let store = Arc::clone(&store);
            move |req| login(Arc::clone(&store), req)
        })
        .on(Method::GET, "/slow", slow)
        .on(Method::GET, "/panic", boom);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:80".to_owned());
    let outcome = Server::with_config(ServerConfig::new(addr)).serve(app).await;

    if let Err(e) = &outcome.listen {
        error!("listen: {e}");
    }
    if let Err(e) = &outcome.shutdown {
        error!("shutdown: {e}");
    }
    if outcome.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

async fn list_hint(_req: Request) -> tollgate::Result<Response> {
    envelope::success(StatusCode::OK, "POST a username and password here to register")
}

async fn register(store: Store, req: Request) -> tollgate::Result<Response> {
    let Ok(creds) = serde_json::from_slice::<Credentials>(req.body()) else {
        return envelope::error(&req, StatusCode::BAD_REQUEST, "expected {\"username\",\"password\"}");
    };
    if store.user_exists(&creds.username).await? {
        return envelope::error(&req, StatusCode::CONFLICT, "username taken");
    }

    // Password hashing is not this demo's concern.
    match store.create_user(&creds.username, creds.password.as_bytes()).await {
        Ok(()) => envelope::success(StatusCode::CREATED, &creds.username),
        Err(Error::UserExists(_)) => envelope::error(&req, StatusCode::CONFLICT, "username taken"),
        Err(e) => Err(e),
    }
}

async fn login(store: Store, req: Request) -> tollgate::Result<Response> {
    let Ok(creds) = serde_json::from_slice::<Credentials>(req.body()) else {
        return envelope::generic_error(&req, StatusCode::BAD_REQUEST);
    };
    match store.get_hashed_password(&creds.username).await {
        Ok(stored) if stored == creds.password.as_bytes() => envelope::success(StatusCode::OK, &true),
        Ok(_) | Err(Error::UserNotFound(_)) => {
            envelope::error(&req, StatusCode::UNAUTHORIZED, "wrong username or password")
        }
        Err(e) => Err(e),
    }
}

async fn slow(_req: Request) -> Response {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Response::text("you will not see this")
}

async fn boom(_req: Request) -> Response {
    panic!("demo panic");
}
