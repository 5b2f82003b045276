//! Mock bank service binary for integration testing
//!
//! An axum server answering the handful of Sandbox and Nexus routes the
//! scenarios exercise, so the harness can be tested without the real
//! services. State is kept in a JSON file that survives restarts, which is
//! exactly what the harness must reset between runs.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "mock-service", about = "Stand-in for the Sandbox and Nexus services")]
struct Args {
    /// Port to listen on
    #[arg(long)]
    port: u16,

    /// JSON file holding the service's persistent state
    #[arg(long)]
    state: Option<PathBuf>,

    /// Wait this long before accepting connections
    #[arg(long, default_value_t = 0)]
    startup_delay_ms: u64,

    /// Password the `admin` superuser authenticates with
    #[arg(long, default_value = "x")]
    admin_password: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ledger {
    users: Vec<String>,
    bank_connections: Vec<Value>,
    payments: HashMap<String, bool>,
    next_payment: u64,
}

struct Bank {
    ledger: Ledger,
    state_file: Option<PathBuf>,
    admin_password: String,
}

impl Bank {
    /// Write the ledger back after a successful change
    fn persist(&self) {
        let Some(file) = &self.state_file else { return };
        match serde_json::to_string(&self.ledger) {
            Ok(content) => {
                if let Err(e) = std::fs::write(file, content) {
                    eprintln!("mock-service: cannot write {}: {}", file.display(), e);
                }
            }
            Err(e) => eprintln!("mock-service: cannot encode state: {}", e),
        }
    }

    fn connection_index(&self, name: &str) -> Option<usize> {
        self.ledger
            .bank_connections
            .iter()
            .position(|c| c.get("name").and_then(Value::as_str) == Some(name))
    }
}

type Shared = Arc<Mutex<Bank>>;
type Reply = (StatusCode, Json<Value>);

fn ok(body: Value) -> Reply {
    (StatusCode::OK, Json(body))
}

fn error(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "error": message })))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let ledger = args
        .state
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| serde_json::from_str::<Ledger>(&content).ok())
        .unwrap_or_default();

    if args.startup_delay_ms > 0 {
        println!("mock-service: warming up for {}ms", args.startup_delay_ms);
        tokio::time::sleep(Duration::from_millis(args.startup_delay_ms)).await;
    }

    let bank = Arc::new(Mutex::new(Bank {
        ledger,
        state_file: args.state,
        admin_password: args.admin_password,
    }));

    let listener = match tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, args.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock-service: cannot listen on port {}: {}", args.port, e);
            std::process::exit(1);
        }
    };
    println!("mock-service: listening on port {}", args.port);

    if let Err(e) = axum::serve(listener, router(bank)).await {
        eprintln!("mock-service: server error: {}", e);
        std::process::exit(1);
    }
}

fn router(bank: Shared) -> Router {
    Router::new()
        // Sandbox administration
        .route("/admin/ebics/host", post(ebics_admin))
        .route("/admin/ebics/subscribers", post(ebics_admin))
        .route("/admin/ebics/bank-accounts", post(ebics_admin))
        // Nexus
        .route("/users", post(create_user))
        .route("/bank-connections", get(list_connections).post(create_connection))
        .route("/bank-connections/delete-connection", post(delete_connection))
        .route("/payment-initiations", post(prepare_payment))
        .route("/payment-initiations/{uuid}", get(show_payment))
        .route("/payment-initiations/{uuid}/submit", post(submit_payment))
        .fallback(|| async { error(StatusCode::NOT_FOUND, "Route not found") })
        .layer(middleware::from_fn(log_request))
        .with_state(bank)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    println!("mock-service: {} {} -> {}", method, path, response.status().as_u16());
    response
}

async fn ebics_admin(Json(_body): Json<Value>) -> Reply {
    ok(json!({}))
}

async fn create_user(State(bank): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    let mut bank = bank.lock().await;
    if basic_auth(&headers) != Some(("admin".to_string(), bank.admin_password.clone())) {
        return error(StatusCode::UNAUTHORIZED, "superuser credentials required");
    }
    let Some(username) = body.get("username").and_then(Value::as_str) else {
        return error(StatusCode::BAD_REQUEST, "missing username");
    };
    if bank.ledger.users.iter().any(|u| u == username) {
        return error(StatusCode::CONFLICT, "user exists");
    }
    bank.ledger.users.push(username.to_string());
    bank.persist();
    ok(json!({}))
}

async fn list_connections(State(bank): State<Shared>) -> Reply {
    let bank = bank.lock().await;
    ok(json!({ "bankConnections": bank.ledger.bank_connections }))
}

async fn create_connection(State(bank): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut bank = bank.lock().await;
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return error(StatusCode::BAD_REQUEST, "missing connection name");
    };
    if bank.connection_index(name).is_some() {
        return error(StatusCode::CONFLICT, "connection exists");
    }
    let kind = body.get("type").cloned().unwrap_or(Value::Null);
    bank.ledger.bank_connections.push(json!({ "name": name, "type": kind }));
    bank.persist();
    ok(json!({}))
}

async fn delete_connection(State(bank): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut bank = bank.lock().await;
    let id = body.get("bankConnectionId").and_then(Value::as_str).unwrap_or_default();
    match bank.connection_index(id) {
        Some(index) => {
            bank.ledger.bank_connections.remove(index);
            bank.persist();
            ok(json!({}))
        }
        None => error(StatusCode::NOT_FOUND, "no such connection"),
    }
}

async fn prepare_payment(State(bank): State<Shared>) -> Reply {
    let mut bank = bank.lock().await;
    bank.ledger.next_payment += 1;
    let uuid = format!("payment-{}", bank.ledger.next_payment);
    bank.ledger.payments.insert(uuid.clone(), false);
    bank.persist();
    ok(json!({ "uuid": uuid }))
}

async fn submit_payment(State(bank): State<Shared>, Path(uuid): Path<String>) -> Reply {
    let mut bank = bank.lock().await;
    match bank.ledger.payments.get(&uuid).copied() {
        Some(true) => error(StatusCode::CONFLICT, "payment already submitted"),
        Some(false) => {
            bank.ledger.payments.insert(uuid, true);
            bank.persist();
            ok(json!({}))
        }
        None => error(StatusCode::NOT_FOUND, "no such payment"),
    }
}

async fn show_payment(State(bank): State<Shared>, Path(uuid): Path<String>) -> Reply {
    let bank = bank.lock().await;
    match bank.ledger.payments.get(&uuid) {
        Some(submitted) => ok(json!({ "uuid": uuid, "submitted": submitted })),
        None => error(StatusCode::NOT_FOUND, "no such payment"),
    }
}

fn basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}
