use futures::future::BoxFuture;
use serde_json::Value;
use std::future::IntoFuture;
use std::sync::Arc;
use tonearm_core::{PlayerMutation, PlayerSnapshot, Track, VoiceState};

use crate::errors::Result;
use crate::node::Node;

/// Fluent, lazy partial update of one guild's player.
///
/// Nothing is sent until the builder is awaited. Awaiting it issues a single
/// `PATCH` to the node and, on success, refreshes the node's cached snapshot.
/// Fields that are never set stay out of the request body.
///
/// ```ignore
/// node.update_player(guild_id).set_volume(50).set_paused(false).await?;
/// ```
#[must_use = "a player update does nothing unless awaited"]
#[derive(Debug)]
pub struct PlayerUpdateBuilder {
    node: Arc<Node>,
    guild_id: u64,
    mutation: PlayerMutation,
    no_replace: bool,
}

impl PlayerUpdateBuilder {
    pub(crate) fn new(node: Arc<Node>, guild_id: u64) -> Self {
        PlayerUpdateBuilder {
            node,
            guild_id,
            mutation: PlayerMutation::new(),
            no_replace: false,
        }
    }

    pub(crate) fn with_mutation(node: Arc<Node>, guild_id: u64, mutation: PlayerMutation) -> Self {
        PlayerUpdateBuilder {
            node,
            guild_id,
            mutation,
            no_replace: false,
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn mutation(&self) -> &PlayerMutation {
        &self.mutation
    }

    pub fn set_track(mut self, track: &Track) -> Self {
        self.mutation.set_track(track);
        self
    }

    pub fn set_encoded_track(mut self, encoded: Option<String>) -> Self {
        self.mutation.set_encoded_track(encoded);
        self
    }

    pub fn set_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.mutation.set_identifier(identifier);
        self
    }

    /// Sets the track to an explicit null.
    pub fn stop_track(mut self) -> Self {
        self.mutation.stop_track();
        self
    }

    pub fn set_position(mut self, position_ms: u64) -> Self {
        self.mutation.set_position(position_ms);
        self
    }

    pub fn set_end_time(mut self, end_time_ms: Option<u64>) -> Self {
        self.mutation.set_end_time(end_time_ms);
        self
    }

    pub fn set_volume(mut self, volume: u16) -> Self {
        self.mutation.set_volume(volume);
        self
    }

    pub fn set_paused(mut self, paused: bool) -> Self {
        self.mutation.set_paused(paused);
        self
    }

    pub fn set_filters(mut self, filters: Value) -> Self {
        self.mutation.set_filters(filters);
        self
    }

    pub fn set_voice_state(mut self, voice: VoiceState) -> Self {
        self.mutation.set_voice_state(voice);
        self
    }

    /// When set, a track already playing on the node is not replaced.
    pub fn set_no_replace(mut self, no_replace: bool) -> Self {
        self.no_replace = no_replace;
        self
    }

    pub async fn execute(self) -> Result<PlayerSnapshot> {
        self.node
            .apply_mutation(self.guild_id, &self.mutation, self.no_replace)
            .await
    }
}

impl IntoFuture for PlayerUpdateBuilder {
    type Output = Result<PlayerSnapshot>;
    type IntoFuture = BoxFuture<'static, Result<PlayerSnapshot>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayError;
    use crate::health_tracker::HealthTracker;
    use serde_json::json;
    use tonearm_core::NodeConfig;

    fn node() -> Arc<Node> {
        let config = NodeConfig::new("n1", "127.0.0.1", 1, "secret", "queued");
        Node::detached(config, Arc::new(HealthTracker::new()))
    }

    #[test]
    fn builder_collects_only_what_was_set() {
        let builder = PlayerUpdateBuilder::new(node(), 7)
            .set_volume(50)
            .set_paused(true)
            .set_no_replace(true);

        let body = serde_json::to_value(builder.mutation()).unwrap();
        assert_eq!(body, json!({ "volume": 50, "paused": true }));
        assert_eq!(builder.guild_id(), 7);
    }

    #[test]
    fn stop_track_sends_null_track() {
        let builder = PlayerUpdateBuilder::new(node(), 7).stop_track();
        let body = serde_json::to_value(builder.mutation()).unwrap();
        assert_eq!(body, json!({ "track": { "encoded": null } }));
    }

    #[tokio::test]
    async fn awaiting_on_unavailable_node_fails_fast() {
        let node = node();
        let result = node.update_player(7).set_volume(10).await;
        assert!(matches!(result, Err(GatewayError::NodeUnavailable(name)) if name == "n1"));
        assert!(node.cached_player(7).is_none());
    }
}
