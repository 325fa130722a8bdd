use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::io::ErrorKind;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    error::ProtocolError,
    http::{HeaderValue, Request},
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use tonearm_core::{Frame, NodeConfig};
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, Result};
use crate::events::FailureCause;

/// Close code of a normal, intentional shutdown.
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code used when the socket ends without a close frame.
const NO_STATUS_CLOSE: u16 = 1005;

/// Wait before the next reconnect once `attempts` reconnects have been made.
pub fn backoff_interval(attempts: u32) -> Duration {
    let millis = (i64::from(attempts) * 2000 - 200).max(0);
    Duration::from_millis(millis as u64)
}

/// Receives what happens on a node socket.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_open(&self);

    async fn on_frame(&self, frame: Frame);

    /// The socket was closed with a close frame, by the node or locally.
    async fn on_closed(&self, code: u16, reason: String, by_remote: bool);

    /// The socket failed to open or broke without a close handshake.
    async fn on_failure(&self, cause: FailureCause, error: String);
}

/// Identity this client presents to every node.
#[derive(Debug, Clone)]
pub(crate) struct ClientIdentity {
    pub(crate) user_id: u64,
    pub(crate) client_name: String,
}

#[derive(Debug, Default)]
struct SocketState {
    open: AtomicBool,
    connecting: AtomicBool,
    reconnect_attempts: AtomicU32,
}

struct SocketTask {
    task: JoinHandle<()>,
    close_tx: mpsc::UnboundedSender<CloseFrame<'static>>,
}

/// WebSocket transport of one node, with a backoff-gated reconnect.
pub(crate) struct NodeConnection {
    node: String,
    url: String,
    password: String,
    identity: ClientIdentity,
    connect_timeout: Duration,
    state: Arc<SocketState>,
    may_reconnect: AtomicBool,
    last_reconnect_attempt: Mutex<Option<Instant>>,
    socket: Mutex<Option<SocketTask>>,
    handler: Arc<dyn ConnectionHandler>,
}

impl std::fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnection")
            .field("node", &self.node)
            .field("url", &self.url)
            .field("open", &self.is_open())
            .field("may_reconnect", &self.may_reconnect())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

impl NodeConnection {
    pub(crate) fn new(
        config: &NodeConfig,
        identity: ClientIdentity,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        NodeConnection {
            node: config.name.clone(),
            url: config.websocket_url(),
            password: config.password.clone(),
            identity,
            connect_timeout: Duration::from_millis(config.http_timeout_ms),
            state: Arc::new(SocketState::default()),
            may_reconnect: AtomicBool::new(true),
            last_reconnect_attempt: Mutex::new(None),
            socket: Mutex::new(None),
            handler,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    pub(crate) fn may_reconnect(&self) -> bool {
        self.may_reconnect.load(Ordering::SeqCst)
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.state.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Opens a new socket, dropping any previous one. `session_id` resumes a
    /// previous node session.
    pub(crate) fn connect(&self, session_id: Option<&str>) -> Result<()> {
        let request = self.handshake_request(session_id)?;

        let mut socket = self.socket.lock();
        if let Some(previous) = socket.take() {
            previous.task.abort();
        }

        self.state.open.store(false, Ordering::SeqCst);
        self.state.connecting.store(true, Ordering::SeqCst);
        self.may_reconnect.store(true, Ordering::SeqCst);

        info!(node = %self.node, url = %self.url, resuming = session_id.is_some(), "connecting to node");

        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            self.node.clone(),
            request,
            self.connect_timeout,
            Arc::clone(&self.state),
            Arc::clone(&self.handler),
            close_rx,
        ));
        *socket = Some(SocketTask { task, close_tx });
        Ok(())
    }

    /// Reconnects if the socket was opened once, is now closed, may reconnect
    /// and the backoff since the last attempt has elapsed. Returns whether a
    /// new connection was started.
    pub(crate) fn reconnect(&self, session_id: Option<&str>) -> Result<bool> {
        if self.socket.lock().is_none()
            || self.is_open()
            || self.state.connecting.load(Ordering::SeqCst)
            || !self.may_reconnect()
        {
            return Ok(false);
        }

        {
            let mut last_attempt = self.last_reconnect_attempt.lock();
            let wait = backoff_interval(self.reconnect_attempts());
            if let Some(last) = *last_attempt {
                if last.elapsed() <= wait {
                    return Ok(false);
                }
            }
            *last_attempt = Some(Instant::now());
        }

        let attempt = self.state.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(node = %self.node, attempt, "reconnecting to node");
        self.connect(session_id)?;
        Ok(true)
    }

    /// Closes the socket from this side. A normal close code disables reconnects.
    pub(crate) fn close(&self, code: u16, reason: &str) {
        if code == NORMAL_CLOSE {
            self.may_reconnect.store(false, Ordering::SeqCst);
        }

        let socket = self.socket.lock();
        let Some(socket) = socket.as_ref() else {
            return;
        };

        if self.is_open() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Owned(reason.to_string()),
            };
            if socket.close_tx.send(frame).is_err() {
                socket.task.abort();
            }
        } else {
            socket.task.abort();
            self.state.connecting.store(false, Ordering::SeqCst);
        }
    }

    fn handshake_request(&self, session_id: Option<&str>) -> Result<Request<()>> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.password)?);
        headers.insert("Client-Name", header_value(&self.identity.client_name)?);
        headers.insert("User-Id", header_value(&self.identity.user_id.to_string())?);
        if let Some(session_id) = session_id {
            headers.insert("Session-Id", header_value(session_id)?);
        }
        Ok(request)
    }
}

impl Drop for NodeConnection {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.get_mut().take() {
            socket.task.abort();
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::Configuration(format!("invalid handshake header: {}", e)))
}

/// Maps a socket error onto the cause reported to the handler.
pub(crate) fn classify(error: &tungstenite::Error) -> FailureCause {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            FailureCause::Eof
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            FailureCause::Eof
        }
        tungstenite::Error::Io(io) => match io.kind() {
            ErrorKind::ConnectionRefused => FailureCause::ConnectionRefused,
            ErrorKind::TimedOut => FailureCause::Timeout,
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => FailureCause::Eof,
            _ => FailureCause::Socket,
        },
        _ => FailureCause::Unknown,
    }
}

async fn run_socket(
    node: String,
    request: Request<()>,
    connect_timeout: Duration,
    state: Arc<SocketState>,
    handler: Arc<dyn ConnectionHandler>,
    mut close_rx: mpsc::UnboundedReceiver<CloseFrame<'static>>,
) {
    let stream = match timeout(connect_timeout, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            state.connecting.store(false, Ordering::SeqCst);
            handler.on_failure(classify(&e), e.to_string()).await;
            return;
        }
        Err(_) => {
            state.connecting.store(false, Ordering::SeqCst);
            handler
                .on_failure(FailureCause::Timeout, "connect timed out".to_string())
                .await;
            return;
        }
    };

    state.open.store(true, Ordering::SeqCst);
    state.connecting.store(false, Ordering::SeqCst);
    state.reconnect_attempts.store(0, Ordering::SeqCst);
    info!(node = %node, "node socket open");
    handler.on_open().await;

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            local = close_rx.recv() => {
                let Some(frame) = local else {
                    return;
                };
                let code = u16::from(frame.code);
                let reason = frame.reason.to_string();
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!(node = %node, error = %e, "unable to send close frame");
                }
                state.open.store(false, Ordering::SeqCst);
                handler.on_closed(code, reason, false).await;
                return;
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => handler.on_frame(frame).await,
                    Err(e) => warn!(node = %node, error = %e, "unable to decode node frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    state.open.store(false, Ordering::SeqCst);
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NO_STATUS_CLOSE, String::new()));
                    handler.on_closed(code, reason, true).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    state.open.store(false, Ordering::SeqCst);
                    handler.on_failure(classify(&e), e.to_string()).await;
                    return;
                }
                None => {
                    state.open.store(false, Ordering::SeqCst);
                    handler
                        .on_failure(FailureCause::Eof, "stream ended".to_string())
                        .await;
                    return;
                }
            }
        }
    }
}
