use thiserror::Error;
use tonearm_core::Pool;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("node {0} is unavailable")]
    NodeUnavailable(String),

    #[error("a node named {0} is already registered")]
    DuplicateNode(String),

    #[error("guild {0} has no desired pool")]
    NoDesiredPool(u64),

    #[error("no node of pool {0} can serve the guild")]
    NoCandidateNode(Pool),

    #[error("invalid bot token")]
    InvalidToken,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no player exists for guild {0}")]
    PlayerNotFound(u64),

    #[error("node answered with status {status}: {message}")]
    Rest { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("unable to decode payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("voice handshake for guild {0} timed out")]
    HandshakeTimeout(u64),

    #[error("voice handshake for guild {0} was abandoned")]
    HandshakeAborted(u64),
}

impl GatewayError {
    /// Configuration errors are fatal to startup; everything else is a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GatewayError::DuplicateNode(_)
                | GatewayError::NoDesiredPool(_)
                | GatewayError::InvalidToken
                | GatewayError::Configuration(_)
        )
    }
}
