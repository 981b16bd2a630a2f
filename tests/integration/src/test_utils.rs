//! Mock monitoring backend for end-to-end link tests.
//!
//! One axum server on an ephemeral port serves the HTTP endpoints and the
//! `/ws` upgrade. Every accepted socket with a valid token is handed to the
//! test as a [`MockConnection`], which scripts server frames and observes
//! what the client sends back.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use monitor_core::{GroupLayout, HistoryItem, TimingConfig, UpdateKind};
use monitor_link::{Session, SessionBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Credentials accepted by the mock login endpoint
pub const LOGIN: &str = "operator";
pub const PASSWORD: &str = "secret";

/// Upper bound for any single wait in a test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Route client logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Timings short enough for tests
pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        liveness_interval_ms: 2_000,
        reconnect_delay_ms: 50,
        connect_timeout_ms: 2_000,
        history_retry_delay_ms: 0,
    }
}

/// Layout with a single group
pub fn layout(group: &str, units: &[&str]) -> GroupLayout {
    let mut layout = GroupLayout::new();
    layout.insert(
        group.to_string(),
        units.iter().map(|unit| unit.to_string()).collect(),
    );
    layout
}

/// Wire form of a data item
pub fn data_item(group: &str, unit: &str, index: u64) -> Value {
    json!({
        "g": group,
        "u": unit,
        "i": index,
        "t": 1_660_565_313_000_i64 + index as i64,
        "y": "v",
        "v": "b2s=",
    })
}

/// History row for `index`
pub fn history_item(index: u64) -> HistoryItem {
    HistoryItem {
        index,
        timestamp: 1_660_565_313_000 + index as i64,
        kind: UpdateKind::Online,
        value: None,
    }
}

/// One `/hist` request as seen by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistRequest {
    pub from: u64,
    pub to: u64,
    pub group: String,
    pub unit: String,
}

/// Frame the test pushes to the client
#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// Frame the client sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Close(Option<u16>, String),
}

#[derive(Default)]
struct MockState {
    tokens: Mutex<HashSet<String>>,
    layout: Mutex<GroupLayout>,
    last: Mutex<Value>,
    history: Mutex<BTreeMap<(String, String), Vec<HistoryItem>>>,
    hist_failures: Mutex<VecDeque<u16>>,
    hist_requests: Mutex<Vec<HistRequest>>,
    issued: AtomicUsize,
    logins: AtomicUsize,
    connections: Mutex<Option<mpsc::UnboundedSender<MockConnection>>>,
}

impl MockState {
    fn issue(&self) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = format!("token-{n}");
        self.tokens.lock().unwrap().insert(token.clone());
        token
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get("sess")
            .and_then(|value| value.to_str().ok())
            .map_or(false, |token| self.tokens.lock().unwrap().contains(token))
    }
}

/// Scriptable backend
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Start serving `layout` on an ephemeral port
    pub async fn start(layout: GroupLayout) -> Self {
        let (tx, connections) = mpsc::unbounded_channel();
        let state = Arc::new(MockState::default());
        *state.layout.lock().unwrap() = layout;
        *state.last.lock().unwrap() = json!({});
        *state.connections.lock().unwrap() = Some(tx);

        let app = Router::new()
            .route("/login", post(login))
            .route("/wplace", get(wplace))
            .route("/wplace-last", get(wplace_last))
            .route("/hist", get(hist))
            .route("/ws", get(ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            connections,
            server,
        }
    }

    /// `host:port` without scheme
    pub fn uri(&self) -> String {
        self.addr.to_string()
    }

    /// Mint a valid token
    pub fn issue_token(&self) -> String {
        self.state.issue()
    }

    /// Invalidate a token
    pub fn revoke(&self, token: &str) {
        self.state.tokens.lock().unwrap().remove(token);
    }

    /// Number of successful logins
    pub fn login_count(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    /// Items served by `/hist` for one unit, in response order
    pub fn set_history(&self, group: &str, unit: &str, items: Vec<HistoryItem>) {
        self.state
            .history
            .lock()
            .unwrap()
            .insert((group.to_string(), unit.to_string()), items);
    }

    /// Answer the next `/hist` requests with these statuses, in order
    pub fn fail_history(&self, statuses: &[u16]) {
        self.state
            .hist_failures
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    /// Body served by `/wplace-last`
    pub fn set_last(&self, snapshot: Value) {
        *self.state.last.lock().unwrap() = snapshot;
    }

    /// Every `/hist` request so far
    pub fn hist_requests(&self) -> Vec<HistRequest> {
        self.state.hist_requests.lock().unwrap().clone()
    }

    /// Plaintext session negotiated with `token`
    pub async fn session(&self, token: &str) -> Session {
        SessionBuilder::new(self.uri())
            .unwrap()
            .token(token)
            .secure(false)
            .finalize()
            .await
            .unwrap()
    }

    /// Next socket accepted with a valid token
    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .expect("no connection within timeout")
            .expect("backend stopped")
    }

    /// Next socket, if one arrives within `wait`
    pub async fn try_next_connection(&mut self, wait: Duration) -> Option<MockConnection> {
        tokio::time::timeout(wait, self.connections.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Server side of one accepted socket
pub struct MockConnection {
    pub token: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

impl MockConnection {
    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.outgoing.send(Outgoing::Text(text.into()));
    }

    pub fn send_json(&self, value: Value) {
        self.send_raw(value.to_string());
    }

    /// Connect acknowledgment without snapshot
    pub fn connected(&self) {
        self.send_json(json!({"x": "c"}));
    }

    /// Connect acknowledgment carrying a snapshot map
    pub fn connected_with(&self, snapshot: Value) {
        self.send_json(json!({"x": "c", "m": snapshot}));
    }

    pub fn ping(&self, value: u64) {
        self.send_json(json!({"x": "p", "v": value}));
    }

    pub fn data(&self, items: Vec<Value>) {
        self.send_json(json!({"x": "d", "d": items}));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Outgoing::Close(code, reason.to_string()));
    }

    /// Next frame from the client
    pub async fn recv(&mut self) -> Option<Incoming> {
        tokio::time::timeout(STEP_TIMEOUT, self.incoming.recv())
            .await
            .expect("client sent nothing within timeout")
    }

    /// Expect a ping acknowledgment
    pub async fn expect_pong(&mut self, value: u64) {
        match self.recv().await {
            Some(Incoming::Text(text)) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame, json!({"t": "p", "v": value}));
            }
            other => panic!("expected pong {value}, got {other:?}"),
        }
    }

    /// Expect the client to close, returning code and reason
    pub async fn expect_close(&mut self) -> (Option<u16>, String) {
        loop {
            match self.recv().await {
                Some(Incoming::Close(code, reason)) => return (code, reason),
                Some(Incoming::Text(_)) => continue,
                None => return (None, String::new()),
            }
        }
    }
}

#[derive(Deserialize)]
struct LoginBody {
    l: String,
    p: String,
}

#[derive(Deserialize)]
struct HistParams {
    i: u64,
    a: u64,
    g: String,
    u: String,
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<LoginBody>) -> Response {
    if body.l != LOGIN || body.p != PASSWORD {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.logins.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, state.issue()).into_response()
}

async fn wplace(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let layout = state.layout.lock().unwrap().clone();
    Json(layout).into_response()
}

async fn wplace_last(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let last = state.last.lock().unwrap().clone();
    Json(last).into_response()
}

async fn hist(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HistParams>,
) -> Response {
    state.hist_requests.lock().unwrap().push(HistRequest {
        from: params.i,
        to: params.a,
        group: params.g.clone(),
        unit: params.u.clone(),
    });

    let failure = state.hist_failures.lock().unwrap().pop_front();
    if let Some(status) = failure {
        let status = StatusCode::from_u16(status).unwrap();
        return status.into_response();
    }
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    // Same range limit as the real backend
    if params.a < params.i || params.a - params.i >= 100 {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let items: Vec<HistoryItem> = state
        .history
        .lock()
        .unwrap()
        .get(&(params.g, params.u))
        .map(|items| {
            items
                .iter()
                .filter(|item| item.index >= params.i && item.index <= params.a)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(items).into_response()
}

async fn ws(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<MockState>) {
    let token = match socket.recv().await {
        Some(Ok(Message::Text(token))) => token,
        _ => return,
    };
    let valid = state.tokens.lock().unwrap().contains(&token);
    if !valid {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 3000,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    }

    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (incoming, incoming_rx) = mpsc::unbounded_channel();
    let connection = MockConnection {
        token,
        outgoing: outgoing_tx,
        incoming: incoming_rx,
    };
    let announced = state
        .connections
        .lock()
        .unwrap()
        .as_ref()
        .map_or(false, |tx| tx.send(connection).is_ok());
    if !announced {
        return;
    }

    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(Outgoing::Text(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                }
                None => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = incoming.send(Incoming::Text(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(frame.code), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    let _ = incoming.send(Incoming::Close(code, reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
}
