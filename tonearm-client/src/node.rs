use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tonearm_core::{LoadResult, NodeConfig, NodeStats, PlayerMutation, PlayerSnapshot, Pool};
use tracing::{debug, warn};

use crate::errors::{GatewayError, Result};
use crate::event_bus::{EventBus, EventStream};
use crate::events::GatewayEvent;
use crate::health_tracker::{HealthMetric, HealthTracker};
use crate::node_connection::{ClientIdentity, ConnectionHandler, NodeConnection};
use crate::player_update::PlayerUpdateBuilder;
use crate::rest_client::RestClient;

/// One backend audio node: its transports, its availability and the players
/// it currently holds.
///
/// A node is identified by its configured name only; runtime fields such as
/// availability or the session id never take part in identity.
pub struct Node {
    config: NodeConfig,
    seq: u64,
    available: AtomicBool,
    session_id: RwLock<Option<String>>,
    stats: RwLock<Option<NodeStats>>,
    players: DashMap<u64, PlayerSnapshot>,
    connection: NodeConnection,
    rest: RestClient,
    events: EventBus<GatewayEvent>,
    health: Arc<HealthTracker>,
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("pool", &self.config.pool)
            .field("region", &self.config.region)
            .field("available", &self.is_available())
            .field("players", &self.players.len())
            .finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.config.name == other.config.name
    }
}

impl Eq for Node {}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        seq: u64,
        identity: ClientIdentity,
        health: Arc<HealthTracker>,
        event_capacity: usize,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Arc<Node>> {
        let rest = RestClient::new(&config)?;
        let connection = NodeConnection::new(&config, identity, handler);
        Ok(Arc::new(Node {
            config,
            seq,
            available: AtomicBool::new(false),
            session_id: RwLock::new(None),
            stats: RwLock::new(None),
            players: DashMap::new(),
            connection,
            rest,
            events: EventBus::new(event_capacity),
            health,
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn pool(&self) -> &Pool {
        &self.config.pool
    }

    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    /// Registration order, used to keep candidate order deterministic.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub(crate) fn set_available(&self, available: bool) {
        let previous = self.available.swap(available, Ordering::SeqCst);
        if previous != available {
            debug!(node = %self.name(), available, "node availability changed");
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub(crate) fn set_session_id(&self, session_id: String) {
        *self.session_id.write() = Some(session_id);
    }

    /// Latest stats pushed by the node, if any.
    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    pub(crate) fn set_stats(&self, stats: NodeStats) {
        *self.stats.write() = Some(stats);
    }

    /// Reconnects made since the socket was last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    /// `false` once the node was closed normally, e.g. removed from the registry.
    pub fn may_reconnect(&self) -> bool {
        self.connection.may_reconnect()
    }

    pub(crate) fn connection(&self) -> &NodeConnection {
        &self.connection
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Events produced by this node only.
    pub fn subscribe(&self) -> EventStream<GatewayEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: GatewayEvent) {
        self.events.publish(event);
    }

    pub fn cached_player(&self, guild_id: u64) -> Option<PlayerSnapshot> {
        self.players.get(&guild_id).map(|player| player.clone())
    }

    pub fn cached_players(&self) -> Vec<PlayerSnapshot> {
        self.players.iter().map(|player| player.clone()).collect()
    }

    pub(crate) fn cache_player(&self, snapshot: PlayerSnapshot) {
        self.players.insert(snapshot.guild_id, snapshot);
    }

    pub(crate) fn take_cached_player(&self, guild_id: u64) -> Option<PlayerSnapshot> {
        self.players.remove(&guild_id).map(|(_, player)| player)
    }

    /// Applies `update` to the cached player of `guild_id`, if there is one.
    pub(crate) fn update_cached_player(&self, guild_id: u64, update: impl FnOnce(&mut PlayerSnapshot)) {
        if let Some(mut player) = self.players.get_mut(&guild_id) {
            update(&mut *player);
        }
    }

    /// Number of cached players with a track that is not paused.
    pub fn playing_player_count(&self) -> usize {
        self.players.iter().filter(|player| player.is_playing()).count()
    }

    fn require_session(&self) -> Result<String> {
        if !self.is_available() {
            return Err(GatewayError::NodeUnavailable(self.name().to_string()));
        }
        self.session_id()
            .ok_or_else(|| GatewayError::NodeUnavailable(self.name().to_string()))
    }

    /// Returns the player of `guild_id`, from the cache when possible. A player
    /// the node does not know is created.
    pub async fn get_player(self: &Arc<Self>, guild_id: u64) -> Result<PlayerSnapshot> {
        let session_id = self.require_session()?;

        if let Some(player) = self.cached_player(guild_id) {
            return Ok(player);
        }

        match self.rest.get_player(&session_id, guild_id).await {
            Ok(player) => {
                self.cache_player(player.clone());
                Ok(player)
            }
            Err(GatewayError::PlayerNotFound(_)) => {
                debug!(node = %self.name(), guild_id, "player not found, creating it");
                self.create_or_update_player(guild_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub fn create_or_update_player(self: &Arc<Self>, guild_id: u64) -> PlayerUpdateBuilder {
        PlayerUpdateBuilder::new(Arc::clone(self), guild_id)
    }

    pub fn update_player(self: &Arc<Self>, guild_id: u64) -> PlayerUpdateBuilder {
        self.create_or_update_player(guild_id)
    }

    pub(crate) fn restore_player(
        self: &Arc<Self>,
        guild_id: u64,
        mutation: PlayerMutation,
    ) -> PlayerUpdateBuilder {
        PlayerUpdateBuilder::with_mutation(Arc::clone(self), guild_id, mutation)
    }

    pub(crate) async fn apply_mutation(
        &self,
        guild_id: u64,
        mutation: &PlayerMutation,
        no_replace: bool,
    ) -> Result<PlayerSnapshot> {
        let session_id = self.require_session()?;
        let player = self
            .rest
            .update_player(&session_id, guild_id, mutation, no_replace)
            .await?;
        self.cache_player(player.clone());
        Ok(player)
    }

    /// Destroys the player of `guild_id` on the node and drops it from the cache.
    pub async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        let session_id = self.require_session()?;
        match self.rest.destroy_player(&session_id, guild_id).await {
            Ok(()) | Err(GatewayError::PlayerNotFound(_)) => {
                self.players.remove(&guild_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves `identifier` into tracks. Every attempt and every failure is
    /// counted towards the node's health.
    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult> {
        self.require_session()?;
        self.health.track_metric(self.name(), HealthMetric::LoadAttempt);

        match self.rest.load_item(identifier).await {
            Ok(result) => {
                if result.is_failure() {
                    self.health.track_metric(self.name(), HealthMetric::LoadFailed);
                }
                Ok(result)
            }
            Err(e) => {
                warn!(node = %self.name(), identifier, error = %e, "load request failed");
                self.health.track_metric(self.name(), HealthMetric::LoadFailed);
                Err(e)
            }
        }
    }

    /// Builds a node that never connects, for unit tests.
    #[cfg(test)]
    pub(crate) fn detached(config: NodeConfig, health: Arc<HealthTracker>) -> Arc<Node> {
        use crate::events::FailureCause;
        use async_trait::async_trait;
        use tonearm_core::Frame;

        struct Detached;

        #[async_trait]
        impl ConnectionHandler for Detached {
            async fn on_open(&self) {}
            async fn on_frame(&self, _frame: Frame) {}
            async fn on_closed(&self, _code: u16, _reason: String, _by_remote: bool) {}
            async fn on_failure(&self, _cause: FailureCause, _error: String) {}
        }

        let identity = ClientIdentity {
            user_id: 1,
            client_name: "tonearm-test".to_string(),
        };
        static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::SeqCst);
        Node::new(config, seq, identity, health, 16, Arc::new(Detached))
            .expect("test node config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonearm_core::{PlayerState, Track, TrackInfo};

    fn node() -> Arc<Node> {
        let config = NodeConfig::new("n1", "127.0.0.1", 1, "secret", "queued");
        Node::detached(config, Arc::new(HealthTracker::new()))
    }

    fn track() -> Track {
        Track {
            encoded: "encoded".to_string(),
            info: TrackInfo {
                identifier: "id".to_string(),
                is_seekable: true,
                author: "author".to_string(),
                length: 180_000,
                is_stream: false,
                position: 0,
                title: "title".to_string(),
                uri: None,
                artwork_url: None,
                isrc: None,
                source_name: "http".to_string(),
            },
            plugin_info: serde_json::Value::Null,
            user_data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn unavailable_node_rejects_every_operation() {
        let node = node();
        let unavailable = |e: GatewayError| matches!(e, GatewayError::NodeUnavailable(_));

        assert!(unavailable(node.get_player(1).await.unwrap_err()));
        assert!(unavailable(node.create_or_update_player(1).await.unwrap_err()));
        assert!(unavailable(node.destroy_player(1).await.unwrap_err()));
        assert!(unavailable(node.load_item("ytsearch:x").await.unwrap_err()));
    }

    #[tokio::test]
    async fn rejected_load_is_not_counted() {
        let health = Arc::new(HealthTracker::new());
        let config = NodeConfig::new("n1", "127.0.0.1", 1, "secret", "queued");
        let node = Node::detached(config, Arc::clone(&health));

        assert!(node.load_item("ytsearch:x").await.is_err());
        assert_eq!(health.aggregate("n1").load_attempt, 0);
    }

    #[tokio::test]
    async fn cached_player_is_served_without_network() {
        let node = node();
        node.set_available(true);
        node.set_session_id("session".to_string());

        let mut player = PlayerSnapshot::idle(9);
        player.volume = 30;
        node.cache_player(player);

        let player = node.get_player(9).await.unwrap();
        assert_eq!(player.volume, 30);
    }

    #[test]
    fn only_playing_players_are_counted() {
        let node = node();

        let mut playing = PlayerSnapshot::idle(1);
        playing.track = Some(track());
        playing.state = PlayerState {
            connected: true,
            ..PlayerState::default()
        };
        let mut paused = playing.clone();
        paused.guild_id = 2;
        paused.paused = true;

        node.cache_player(playing);
        node.cache_player(paused);
        node.cache_player(PlayerSnapshot::idle(3));

        assert_eq!(node.playing_player_count(), 1);
        assert_eq!(node.cached_players().len(), 3);
    }

    #[test]
    fn identity_is_the_name() {
        let health = Arc::new(HealthTracker::new());
        let a = Node::detached(
            NodeConfig::new("same", "10.0.0.1", 1, "x", "queued"),
            Arc::clone(&health),
        );
        let b = Node::detached(
            NodeConfig::new("same", "10.0.0.2", 2, "y", "queued"),
            health,
        );
        b.set_available(true);
        assert_eq!(*a, *b);
    }
}
