use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration, Instant};
use tonearm_client::GatewayClient;
use tonearm_core::NodeConfig;

/// Environment variable holding the bot token when the file has none.
pub const BOT_TOKEN_ENV: &str = "TONEARM_BOT_TOKEN";

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[arg(
        long,
        short = 'c',
        default_value = "tonearm.yaml",
        help = "Path to the gateway configuration file. Default: tonearm.yaml"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        default_value_t = 5000,
        help = "How long to wait for nodes to report ready, in milliseconds"
    )]
    pub ready_timeout_ms: u64,
}

/// Gateway configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub reconnect_interval_ms: Option<u64>,
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
    #[serde(default)]
    pub resume_timeout_secs: Option<u64>,
    #[serde(default)]
    pub session_invalid_close_codes: Option<Vec<u16>>,
    pub nodes: Vec<NodeConfig>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(raw)?;
        if config.nodes.is_empty() {
            bail!("at least one node is required");
        }
        Ok(config)
    }

    /// Builds a client with every configured node.
    pub async fn connect(self) -> Result<GatewayClient> {
        let mut builder = GatewayClient::builder().add_nodes(self.nodes);

        match (self.user_id, self.bot_token) {
            (Some(user_id), _) => builder = builder.with_user_id(user_id),
            (None, Some(token)) => builder = builder.with_bot_token(token),
            (None, None) => {
                let token = std::env::var(BOT_TOKEN_ENV).with_context(|| {
                    format!("no user_id or bot_token configured and {} is not set", BOT_TOKEN_ENV)
                })?;
                builder = builder.with_bot_token(token);
            }
        }

        if let Some(name) = self.client_name {
            builder = builder.with_client_name(name);
        }
        if let Some(ms) = self.reconnect_interval_ms {
            builder = builder.with_reconnect_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.handshake_timeout_ms {
            builder = builder.with_handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = self.resume_timeout_secs {
            builder = builder.with_resume_timeout(Duration::from_secs(secs));
        }
        if let Some(codes) = self.session_invalid_close_codes {
            builder = builder.with_session_invalid_codes(codes);
        }

        Ok(builder.build().await?)
    }
}

impl ConfigArgs {
    /// Loads the configuration, connects and waits until every node reported
    /// stats or the ready timeout expires.
    pub async fn connect(&self) -> Result<GatewayClient> {
        let config = GatewayConfig::load(&self.config)?;
        let expected = config.nodes.len();
        let client = config.connect().await?;

        let deadline = Instant::now() + Duration::from_millis(self.ready_timeout_ms);
        loop {
            let ready = client
                .get_nodes(true)
                .iter()
                .filter(|node| node.stats().is_some())
                .count();
            if ready == expected || Instant::now() >= deadline {
                tracing::info!(ready, expected, "nodes connected");
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        Ok(client)
    }
}
