use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tonearm_core::{LoadResult, NodeConfig, PlayerMutation, PlayerSnapshot};
use tracing::trace;

use crate::errors::{GatewayError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionUpdate {
    resuming: bool,
    timeout: u64,
}

/// REST transport of one node (`/v4` routes).
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: Client,
    base_url: String,
}

impl RestClient {
    pub(crate) fn new(config: &NodeConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let password = header::HeaderValue::from_str(&config.password)
            .map_err(|e| GatewayError::Configuration(format!("invalid node password: {}", e)))?;
        headers.insert(header::AUTHORIZATION, password);

        let http = Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .default_headers(headers)
            .build()?;

        Ok(RestClient {
            http,
            base_url: config.http_url(),
        })
    }

    pub(crate) async fn get_player(&self, session_id: &str, guild_id: u64) -> Result<PlayerSnapshot> {
        let response = self
            .request(Method::GET, &player_path(session_id, guild_id))
            .send()
            .await?;
        let response = check(response, Some(guild_id)).await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn update_player(
        &self,
        session_id: &str,
        guild_id: u64,
        mutation: &PlayerMutation,
        no_replace: bool,
    ) -> Result<PlayerSnapshot> {
        let response = self
            .request(Method::PATCH, &player_path(session_id, guild_id))
            .query(&[("noReplace", no_replace)])
            .json(mutation)
            .send()
            .await?;
        let response = check(response, Some(guild_id)).await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn destroy_player(&self, session_id: &str, guild_id: u64) -> Result<()> {
        let response = self
            .request(Method::DELETE, &player_path(session_id, guild_id))
            .send()
            .await?;
        check(response, Some(guild_id)).await?;
        Ok(())
    }

    /// Enables session resuming for `timeout_secs` after a disconnect.
    pub(crate) async fn enable_resuming(&self, session_id: &str, timeout_secs: u64) -> Result<()> {
        let response = self
            .request(Method::PATCH, &format!("/v4/sessions/{}", session_id))
            .json(&SessionUpdate {
                resuming: true,
                timeout: timeout_secs,
            })
            .send()
            .await?;
        check(response, None).await?;
        Ok(())
    }

    pub(crate) async fn load_item(&self, identifier: &str) -> Result<LoadResult> {
        let response = self
            .request(Method::GET, "/v4/loadtracks")
            .query(&[("identifier", identifier)])
            .send()
            .await?;
        let response = check(response, None).await?;
        Ok(response.json().await?)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        trace!(%method, path, "node request");
        self.http.request(method, format!("{}{}", self.base_url, path))
    }
}

fn player_path(session_id: &str, guild_id: u64) -> String {
    format!("/v4/sessions/{}/players/{}", session_id, guild_id)
}

/// Maps error statuses. A 404 only means a missing player on player routes,
/// which pass their `guild_id`.
async fn check(response: Response, guild_id: Option<u64>) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(guild_id)) = (status, guild_id) {
        return Err(GatewayError::PlayerNotFound(guild_id));
    }
    let message = response.text().await.unwrap_or_default();
    Err(GatewayError::Rest {
        status: status.as_u16(),
        message,
    })
}
