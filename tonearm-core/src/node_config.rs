use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

fn default_http_timeout_ms() -> u64 {
    10_000
}

/// A logical partition of nodes serving one workload shape, e.g. nodes that
/// play short queued tracks versus nodes that hold continuous streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pool(String);

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Pool(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Pool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Pool {
    fn from(name: &str) -> Self {
        Pool::new(name)
    }
}

/// Immutable descriptor of one audio node, built once when the node list is
/// loaded. The `name` is the node's identity everywhere in the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// unique node name
    pub name: String,
    pub host: String,
    pub port: u16,
    /// use wss/https instead of ws/http
    #[serde(default)]
    pub secure: bool,
    /// shared secret sent as the `Authorization` header
    pub password: String,
    pub pool: Pool,
    /// optional region group, matched against a guild's voice region hint
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

impl NodeConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        pool: impl Into<Pool>,
    ) -> Self {
        NodeConfig {
            name: name.into(),
            host: host.into(),
            port,
            secure: false,
            password: password.into(),
            pool: pool.into(),
            region: None,
            http_timeout_ms: default_http_timeout_ms(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}
