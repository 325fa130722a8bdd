//! Shared test utilities for tonearm-client integration tests: an in-process
//! audio node serving the v4 WebSocket and REST routes.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tonearm_client::tonearm_core::NodeConfig;

pub const PASSWORD: &str = "youshallnotpass";

/// A PATCH received by the fake node.
#[derive(Debug, Clone)]
pub struct RecordedPatch {
    pub guild_id: u64,
    pub no_replace: bool,
    pub body: Value,
}

pub struct FakeState {
    name: String,
    system_load: f64,
    accepting: AtomicBool,
    kill: Notify,
    frames: broadcast::Sender<String>,
    load_result: Mutex<Value>,
    pub handshakes: Mutex<Vec<HeaderMap>>,
    pub patches: Mutex<Vec<RecordedPatch>>,
    pub deletes: Mutex<Vec<u64>>,
    pub session_updates: Mutex<Vec<Value>>,
}

/// An audio node running on a random local port.
pub struct FakeNode {
    pub port: u16,
    pub state: Arc<FakeState>,
    server: JoinHandle<()>,
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl FakeNode {
    pub async fn start(name: &str, system_load: f64) -> Result<FakeNode> {
        let (frames, _) = broadcast::channel(64);
        let state = Arc::new(FakeState {
            name: name.to_string(),
            system_load,
            accepting: AtomicBool::new(true),
            kill: Notify::new(),
            frames,
            load_result: Mutex::new(json!({ "loadType": "empty", "data": {} })),
            handshakes: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            session_updates: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v4/websocket", get(websocket))
            .route(
                "/v4/sessions/:session_id/players/:guild_id",
                get(get_player).patch(update_player).delete(destroy_player),
            )
            .route("/v4/sessions/:session_id", patch(update_session))
            .route("/v4/loadtracks", get(load_tracks))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(FakeNode {
            port,
            state,
            server,
        })
    }

    pub fn config(&self, pool: &str) -> NodeConfig {
        NodeConfig::new(self.state.name.clone(), "127.0.0.1", self.port, PASSWORD, pool)
    }

    /// Pushes a raw frame to every connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.state.frames.send(frame.to_string());
    }

    /// Drops every open socket and refuses new ones until `revive`.
    pub fn kill(&self) {
        self.state.accepting.store(false, Ordering::SeqCst);
        self.state.kill.notify_waiters();
    }

    pub fn revive(&self) {
        self.state.accepting.store(true, Ordering::SeqCst);
    }

    pub fn set_load_result(&self, result: Value) {
        *self.state.load_result.lock() = result;
    }

    pub fn patches_for(&self, guild_id: u64) -> Vec<RecordedPatch> {
        self.state
            .patches
            .lock()
            .iter()
            .filter(|patch| patch.guild_id == guild_id)
            .cloned()
            .collect()
    }
}

pub fn session_id(name: &str) -> String {
    format!("{}-session", name)
}

async fn websocket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<FakeState>>,
) -> Response {
    if !state.accepting.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    state.handshakes.lock().push(headers);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<FakeState>) {
    let mut frames = state.frames.subscribe();
    let ready = json!({ "op": "ready", "resumed": false, "sessionId": session_id(&state.name) });
    let stats = json!({
        "op": "stats",
        "players": 0,
        "playingPlayers": 0,
        "uptime": 1000,
        "memory": { "free": 1, "used": 1, "allocated": 2, "reservable": 4 },
        "cpu": { "cores": 2, "systemLoad": state.system_load, "lavalinkLoad": state.system_load / 2.0 },
    });
    for frame in [ready, stats] {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.kill.notified() => return,
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if socket.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn player(guild_id: u64, body: &Value) -> Value {
    json!({
        "guildId": guild_id.to_string(),
        "track": null,
        "volume": body.get("volume").cloned().unwrap_or(json!(100)),
        "paused": body.get("paused").cloned().unwrap_or(json!(false)),
        "state": { "time": 0, "position": 0, "connected": body.get("voice").is_some(), "ping": -1 },
        "voice": body.get("voice").cloned().unwrap_or(json!({ "token": "", "endpoint": "", "sessionId": "" })),
        "filters": body.get("filters").cloned().unwrap_or(json!({})),
    })
}

async fn get_player(Path((_session_id, guild_id)): Path<(String, u64)>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": 404, "error": "Not Found", "message": format!("player {} not found", guild_id) })),
    )
        .into_response()
}

async fn update_player(
    State(state): State<Arc<FakeState>>,
    Path((_session_id, guild_id)): Path<(String, u64)>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let no_replace = query.get("noReplace").map(|v| v == "true").unwrap_or(false);
    state.patches.lock().push(RecordedPatch {
        guild_id,
        no_replace,
        body: body.clone(),
    });
    Json(player(guild_id, &body))
}

async fn destroy_player(
    State(state): State<Arc<FakeState>>,
    Path((_session_id, guild_id)): Path<(String, u64)>,
) -> StatusCode {
    state.deletes.lock().push(guild_id);
    StatusCode::NO_CONTENT
}

async fn update_session(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Json<Value> {
    state.session_updates.lock().push(body.clone());
    Json(body)
}

async fn load_tracks(State(state): State<Arc<FakeState>>) -> Json<Value> {
    Json(state.load_result.lock().clone())
}

/// Polls `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(25);
    let mut waited = Duration::ZERO;
    while waited < within {
        if condition() {
            return true;
        }
        sleep(step).await;
        waited += step;
    }
    condition()
}
