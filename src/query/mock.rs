//! In-process stand-in for the Dune execute / status / results endpoints.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::config::API_KEY_HEADER;
use crate::query::QueryClient;
use crate::types::states;

pub const KEY: &str = "test-key";

/// One scripted answer of the status endpoint.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    State(&'static str),
    Throttle,
    Http(u16),
}

#[derive(Clone)]
pub struct MockDune {
    script: Arc<Mutex<VecDeque<Step>>>,
    pub execute_calls: Arc<AtomicUsize>,
    pub status_calls: Arc<AtomicUsize>,
    pub result_calls: Arc<AtomicUsize>,
    pub last_body: Arc<Mutex<Option<Value>>>,
    pub last_key: Arc<Mutex<Option<String>>>,
    pub omit_execution_id: bool,
    pub results_state: &'static str,
    pub rows: Value,
}

impl MockDune {
    /// Status answers are taken from `script`; once it runs dry every poll
    /// answers PENDING.
    pub fn new(script: &[Step]) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            execute_calls: Arc::new(AtomicUsize::new(0)),
            status_calls: Arc::new(AtomicUsize::new(0)),
            result_calls: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(Mutex::new(None)),
            last_key: Arc::new(Mutex::new(None)),
            omit_execution_id: false,
            results_state: states::COMPLETED,
            rows: json!([
                { "pool_address": "0x01", "eth_balance": 1.5, "spot_price": 0.2 },
                { "pool_address": "0x02", "eth_balance": null }
            ]),
        }
    }
}

async fn execute(
    State(mock): State<MockDune>,
    Path(_query_id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.execute_calls.fetch_add(1, Ordering::SeqCst);
    *mock.last_body.lock().unwrap() = Some(body);
    *mock.last_key.lock().unwrap() = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if mock.omit_execution_id {
        Json(json!({ "state": states::PENDING }))
    } else {
        Json(json!({ "execution_id": "01HTEST", "state": states::PENDING }))
    }
}

async fn status(State(mock): State<MockDune>, Path(_id): Path<String>) -> Response {
    mock.status_calls.fetch_add(1, Ordering::SeqCst);
    let step = mock
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Step::State(states::PENDING));
    match step {
        Step::State(state) => Json(json!({ "state": state })).into_response(),
        Step::Throttle => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "0")],
            "slow down",
        )
            .into_response(),
        Step::Http(code) => StatusCode::from_u16(code).unwrap().into_response(),
    }
}

async fn results(State(mock): State<MockDune>, Path(id): Path<String>) -> Json<Value> {
    mock.result_calls.fetch_add(1, Ordering::SeqCst);
    if mock.results_state != states::COMPLETED {
        return Json(json!({ "execution_id": id, "state": mock.results_state }));
    }
    Json(json!({
        "execution_id": id,
        "state": states::COMPLETED,
        "result": { "rows": mock.rows }
    }))
}

/// Serve `mock` on an ephemeral local port and return its base URL.
pub async fn spawn_mock(mock: MockDune) -> String {
    let app = Router::new()
        .route("/query/:id/execute", post(execute))
        .route("/execution/:id/status", get(status))
        .route("/execution/:id/results", get(results))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Plain HTTP client that never routes loopback traffic through a proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn query_client(base_url: &str) -> QueryClient {
    QueryClient::with_http_client(http_client(), base_url, KEY)
}
