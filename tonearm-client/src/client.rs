use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tonearm_core::{NodeConfig, Pool, VoiceState};
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, Result};
use crate::event_bus::{EventBus, EventStream, DEFAULT_EVENT_CAPACITY};
use crate::events::GatewayEvent;
use crate::health_tracker::HealthTracker;
use crate::link::Link;
use crate::listener::{self, TrackListener};
use crate::load_balancer::LoadBalancer;
use crate::node::Node;
use crate::node_connection::{ClientIdentity, NORMAL_CLOSE};
use crate::node_handler::NodeHandler;
use crate::penalties::{PenaltyProvider, RegionPenalty};
use crate::reconnect_scheduler::{self, DEFAULT_RECONNECT_INTERVAL};
use crate::voice::VoiceInterceptor;

pub const DEFAULT_CLIENT_NAME: &str = concat!("tonearm/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close codes of a `WebSocketClosedEvent` after which the voice session
/// cannot be recovered: authentication failed, session no longer valid,
/// session timed out, disconnected.
pub const DEFAULT_SESSION_INVALID_CODES: [u16; 4] = [4004, 4006, 4009, 4014];

#[derive(Debug, Clone)]
pub(crate) struct ClientOptions {
    pub(crate) event_capacity: usize,
    pub(crate) handshake_timeout: Duration,
    pub(crate) resume_timeout: Option<Duration>,
    pub(crate) session_invalid_codes: HashSet<u16>,
}

/// State shared between the client handle, node socket callbacks and the
/// reconnect scheduler.
pub(crate) struct ClientShared {
    pub(crate) identity: ClientIdentity,
    pub(crate) options: ClientOptions,
    pub(crate) health: Arc<HealthTracker>,
    pub(crate) balancer: LoadBalancer,
    pub(crate) nodes: DashMap<String, Arc<Node>>,
    pub(crate) links: DashMap<u64, Arc<Link>>,
    pub(crate) desired_pools: DashMap<u64, Pool>,
    pub(crate) pending_handshakes: DashMap<u64, oneshot::Sender<VoiceState>>,
    /// Guilds in the middle of `transfer_to_pool`.
    pub(crate) pool_transfers: DashSet<u64>,
    pub(crate) events: EventBus<GatewayEvent>,
    voice: Option<Arc<dyn VoiceInterceptor>>,
    registry_lock: Mutex<()>,
    next_seq: AtomicU64,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<ClientShared>,
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
    }
}

impl ClientShared {
    /// Registered nodes in registration order.
    pub(crate) fn registered_nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = self.nodes.iter().map(|n| Arc::clone(n.value())).collect();
        nodes.sort_by_key(|node| node.seq());
        nodes
    }

    pub(crate) fn nodes_in_pool(&self, pool: &Pool) -> Vec<Arc<Node>> {
        self.registered_nodes()
            .into_iter()
            .filter(|node| node.pool() == pool)
            .collect()
    }

    pub(crate) fn links_on(&self, node: &Node) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .filter(|link| link.node().name() == node.name())
            .map(|link| Arc::clone(link.value()))
            .collect()
    }

    /// Session id to present when reconnecting `node`, if resuming is enabled.
    pub(crate) fn resume_session_id(&self, node: &Node) -> Option<String> {
        self.options.resume_timeout.and_then(|_| node.session_id())
    }

    /// Publishes on the node's bus and on the client bus.
    pub(crate) fn publish(&self, node: &Node, event: GatewayEvent) {
        node.publish(event.clone());
        self.events.publish(event);
    }

    fn create_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let handler = NodeHandler::new(config.name.clone(), seq, self.self_ref.clone());
        Node::new(
            config,
            seq,
            self.identity.clone(),
            Arc::clone(&self.health),
            self.options.event_capacity,
            Arc::new(handler),
        )
    }

    // callers hold `registry_lock`
    fn add_nodes_locked(&self, configs: Vec<NodeConfig>) -> Result<()> {
        let mut seen = HashSet::new();
        for config in &configs {
            if self.nodes.contains_key(&config.name) || !seen.insert(config.name.as_str()) {
                return Err(GatewayError::DuplicateNode(config.name.clone()));
            }
        }

        let nodes = configs
            .into_iter()
            .map(|config| self.create_node(config))
            .collect::<Result<Vec<_>>>()?;

        for node in nodes {
            info!(node = %node.name(), pool = %node.pool(), region = ?node.region(), "node added");
            self.nodes.insert(node.name().to_string(), Arc::clone(&node));
            if let Err(e) = node.connection().connect(None) {
                warn!(node = %node.name(), error = %e, "unable to start node connection");
            }
        }
        Ok(())
    }

    // callers hold `registry_lock`
    fn remove_node_locked(&self, name: &str) -> Option<Arc<Node>> {
        let (_, node) = self.nodes.remove(name)?;
        info!(node = %name, "node removed");
        node.set_available(false);
        node.connection().close(NORMAL_CLOSE, "node removed");
        self.on_node_disconnected(&node);
        Some(node)
    }

    pub(crate) async fn destroy_link(&self, guild_id: u64) -> Result<()> {
        self.pending_handshakes.remove(&guild_id);
        let Some((_, link)) = self.links.remove(&guild_id) else {
            return Ok(());
        };
        let node = link.node();
        debug!(guild_id, node = %node.name(), "destroying link");
        if node.is_available() {
            node.destroy_player(guild_id).await
        } else {
            node.take_cached_player(guild_id);
            Ok(())
        }
    }

    /// Runs the external voice handshake for `guild_id` and waits for the new
    /// voice state. `None` when there is no interceptor or the bot is not in a
    /// voice channel.
    async fn voice_handshake(&self, guild_id: u64) -> Result<Option<VoiceState>> {
        let Some(voice) = &self.voice else {
            return Ok(None);
        };
        let Some(channel_id) = voice.current_channel(guild_id).await else {
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        self.pending_handshakes.insert(guild_id, tx);

        voice.disconnect(guild_id).await;
        voice.connect(guild_id, channel_id).await;

        match timeout(self.options.handshake_timeout, rx).await {
            Ok(Ok(state)) => Ok(Some(state)),
            Ok(Err(_)) => Err(GatewayError::HandshakeAborted(guild_id)),
            Err(_) => {
                self.pending_handshakes.remove(&guild_id);
                warn!(guild_id, "voice handshake timed out");
                Err(GatewayError::HandshakeTimeout(guild_id))
            }
        }
    }
}

/// Marks a guild as moving between pools until dropped.
struct PoolTransfer<'a> {
    shared: &'a ClientShared,
    guild_id: u64,
}

impl<'a> PoolTransfer<'a> {
    fn begin(shared: &'a ClientShared, guild_id: u64) -> Self {
        shared.pool_transfers.insert(guild_id);
        PoolTransfer { shared, guild_id }
    }
}

impl Drop for PoolTransfer<'_> {
    fn drop(&mut self) {
        self.shared.pool_transfers.remove(&self.guild_id);
    }
}

/// Entry point of the audio gateway.
///
/// The client owns the node registry, the guild-to-node links and each
/// guild's desired pool. It reacts to node failures by moving links onto
/// healthy nodes of the same pool and reclaims orphaned players once a node
/// becomes available again.
#[derive(Clone)]
pub struct GatewayClient {
    pub(crate) shared: Arc<ClientShared>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("user_id", &self.shared.identity.user_id)
            .field("client_name", &self.shared.identity.client_name)
            .field("nodes", &self.shared.nodes.len())
            .field("links", &self.shared.links.len())
            .finish()
    }
}

impl GatewayClient {
    pub fn builder() -> GatewayClientBuilder {
        GatewayClientBuilder::default()
    }

    pub fn user_id(&self) -> u64 {
        self.shared.identity.user_id
    }

    pub fn load_balancer(&self) -> &LoadBalancer {
        &self.shared.balancer
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.shared.health
    }

    /// Registers and connects `configs`. If any name is already registered,
    /// or appears twice in `configs`, nothing is added.
    pub fn add_nodes(&self, configs: Vec<NodeConfig>) -> Result<()> {
        let _guard = self.shared.registry_lock.lock();
        self.shared.add_nodes_locked(configs)
    }

    /// Disconnects and unregisters the node named `name`. Its links fail over
    /// like on a node failure.
    pub fn remove_node(&self, name: &str) -> bool {
        let _guard = self.shared.registry_lock.lock();
        self.shared.remove_node_locked(name).is_some()
    }

    pub fn remove_all_nodes(&self) {
        let _guard = self.shared.registry_lock.lock();
        for node in self.shared.registered_nodes() {
            self.shared.remove_node_locked(node.name());
        }
    }

    /// Replaces the registry with `configs`: unknown names are added, missing
    /// ones removed and changed ones reconnected. Unchanged nodes keep running.
    pub fn reload_nodes(&self, configs: Vec<NodeConfig>) -> Result<()> {
        let mut wanted: HashMap<String, NodeConfig> = HashMap::with_capacity(configs.len());
        for config in configs {
            if wanted.contains_key(&config.name) {
                return Err(GatewayError::DuplicateNode(config.name));
            }
            wanted.insert(config.name.clone(), config);
        }

        let _guard = self.shared.registry_lock.lock();
        for node in self.shared.registered_nodes() {
            match wanted.get(node.name()) {
                Some(config) if config == node.config() => {
                    wanted.remove(node.name());
                }
                _ => {
                    self.shared.remove_node_locked(node.name());
                }
            }
        }

        let mut added: Vec<NodeConfig> = wanted.into_values().collect();
        added.sort_by(|a, b| a.name.cmp(&b.name));
        self.shared.add_nodes_locked(added)
    }

    /// Registered nodes in registration order, optionally only available ones.
    pub fn get_nodes(&self, only_available: bool) -> Vec<Arc<Node>> {
        self.shared
            .registered_nodes()
            .into_iter()
            .filter(|node| !only_available || node.is_available())
            .collect()
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.shared.nodes.get(name).map(|node| Arc::clone(node.value()))
    }

    pub fn update_desired_pool(&self, guild_id: u64, pool: Pool) {
        debug!(guild_id, pool = %pool, "desired pool updated");
        self.shared.desired_pools.insert(guild_id, pool);
    }

    pub fn desired_pool(&self, guild_id: u64) -> Option<Pool> {
        self.shared.desired_pools.get(&guild_id).map(|pool| pool.clone())
    }

    /// Returns the guild's link, creating it on the best node of its desired
    /// pool. `region` is the guild's voice region hint.
    pub fn get_or_create_link(&self, guild_id: u64, region: Option<&str>) -> Result<Arc<Link>> {
        if let Some(link) = self.get_link_if_cached(guild_id) {
            if let Some(region) = region {
                link.set_last_region(region);
            }
            return Ok(link);
        }

        let pool = self
            .desired_pool(guild_id)
            .ok_or(GatewayError::NoDesiredPool(guild_id))?;
        let candidates = self.shared.nodes_in_pool(&pool);
        let node = self
            .shared
            .balancer
            .select_node(&candidates, region)
            .ok_or_else(|| GatewayError::NoCandidateNode(pool.clone()))?;

        let link = self
            .shared
            .links
            .entry(guild_id)
            .or_insert_with(|| {
                debug!(guild_id, node = %node.name(), pool = %pool, "link created");
                Arc::new(Link::new(guild_id, Arc::clone(&node), region))
            })
            .clone();
        Ok(link)
    }

    pub fn get_link_if_cached(&self, guild_id: u64) -> Option<Arc<Link>> {
        self.shared.links.get(&guild_id).map(|link| Arc::clone(link.value()))
    }

    /// Moves the guild onto `pool`. Returns `false` when `pool` has no
    /// available node. `on_transferred` runs once the guild is served by
    /// `pool`, right away when it already is.
    pub async fn transfer_to_pool<F>(&self, guild_id: u64, pool: Pool, on_transferred: F) -> Result<bool>
    where
        F: FnOnce() + Send,
    {
        let link = self.get_link_if_cached(guild_id);
        if let Some(link) = &link {
            if link.node().pool() == &pool {
                self.update_desired_pool(guild_id, pool);
                on_transferred();
                return Ok(true);
            }
        }

        let candidates: Vec<Arc<Node>> = self
            .shared
            .nodes_in_pool(&pool)
            .into_iter()
            .filter(|node| node.is_available())
            .collect();
        let region = link.as_ref().and_then(|link| link.last_region());
        let Some(target) = self.shared.balancer.select_node(&candidates, region.as_deref()) else {
            info!(guild_id, pool = %pool, "no available node to transfer to");
            return Ok(false);
        };

        let Some(link) = link else {
            self.update_desired_pool(guild_id, pool);
            self.shared
                .links
                .insert(guild_id, Arc::new(Link::new(guild_id, target, None)));
            on_transferred();
            return Ok(true);
        };

        let _transfer = PoolTransfer::begin(&self.shared, guild_id);
        let voice = self.shared.voice_handshake(guild_id).await?;
        link.transfer_to_pool(target, voice).await?;
        self.update_desired_pool(guild_id, pool);
        on_transferred();
        Ok(true)
    }

    /// Failover entry point, normally driven by the node's socket.
    pub fn on_node_disconnected(&self, node: &Arc<Node>) {
        self.shared.on_node_disconnected(node);
    }

    /// Reclamation entry point, normally driven by the node's `ready`.
    pub fn transfer_orphans_to(&self, node: &Arc<Node>) {
        self.shared.transfer_orphans_to(node);
    }

    /// Number of players on available nodes that belong to `guild_ids`.
    pub fn get_players_count_for_guilds(&self, guild_ids: &[u64]) -> usize {
        let guilds: HashSet<u64> = guild_ids.iter().copied().collect();
        self.get_nodes(true)
            .iter()
            .flat_map(|node| node.cached_players())
            .filter(|player| guilds.contains(&player.guild_id))
            .count()
    }

    /// Feeds a voice server update from the voice platform. Completes a
    /// pending pool transfer, or pushes the voice state to the guild's node.
    pub async fn on_voice_server_update(&self, guild_id: u64, voice: VoiceState) -> Result<()> {
        if let Some((_, pending)) = self.shared.pending_handshakes.remove(&guild_id) {
            if pending.send(voice).is_err() {
                debug!(guild_id, "voice handshake was no longer awaited");
            }
            return Ok(());
        }

        let Some(link) = self.get_link_if_cached(guild_id) else {
            debug!(guild_id, "voice update for a guild without link");
            return Ok(());
        };
        link.update_player().set_voice_state(voice).await?;
        Ok(())
    }

    /// The bot left the guild's voice channel. Ignored while the guild is
    /// being moved to another pool, whose handshake leaves the channel itself.
    pub async fn on_voice_disconnected(&self, guild_id: u64) -> Result<()> {
        if self.shared.pool_transfers.contains(&guild_id) {
            debug!(guild_id, "voice disconnect during pool transfer");
            return Ok(());
        }
        self.destroy_link(guild_id).await
    }

    /// Drops the guild's link and destroys its player.
    pub async fn destroy_link(&self, guild_id: u64) -> Result<()> {
        self.shared.destroy_link(guild_id).await
    }

    /// Every event of every node.
    pub fn subscribe(&self) -> EventStream<GatewayEvent> {
        self.shared.events.subscribe()
    }

    /// Events of one kind, e.g. `subscribe_to::<NodeEvent<TrackStartEvent>>()`.
    pub fn subscribe_to<T>(&self) -> EventStream<T>
    where
        T: TryFrom<GatewayEvent> + Send + 'static,
    {
        self.shared.events.subscribe_to::<T>()
    }

    /// Forwards track events to `listener` until the client is dropped.
    pub fn register_listener(&self, track_listener: Arc<dyn TrackListener>) -> JoinHandle<()> {
        use futures::StreamExt;

        let mut events = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                listener::dispatch(track_listener.as_ref(), &event).await;
            }
        })
    }

    /// Stops reconnecting, closes every node and forgets every link.
    pub fn close(&self) {
        if let Some(task) = self.shared.reconnect_task.lock().take() {
            task.abort();
        }
        let _guard = self.shared.registry_lock.lock();
        self.shared.links.clear();
        self.shared.pending_handshakes.clear();
        for node in self.shared.registered_nodes() {
            self.shared.nodes.remove(node.name());
            node.set_available(false);
            node.connection().close(NORMAL_CLOSE, "client closed");
        }
        info!("gateway client closed");
    }

    #[cfg(test)]
    pub(crate) fn insert_node(&self, node: Arc<Node>) {
        self.shared.nodes.insert(node.name().to_string(), node);
    }
}

/// Configures and builds a [`GatewayClient`].
#[derive(Default)]
pub struct GatewayClientBuilder {
    user_id: Option<u64>,
    bot_token: Option<String>,
    client_name: Option<String>,
    reconnect_interval: Option<Duration>,
    event_capacity: Option<usize>,
    handshake_timeout: Option<Duration>,
    resume_timeout: Option<Duration>,
    session_invalid_codes: Option<Vec<u16>>,
    voice_interceptor: Option<Arc<dyn VoiceInterceptor>>,
    penalty_providers: Vec<Arc<dyn PenaltyProvider>>,
    nodes: Vec<NodeConfig>,
}

impl GatewayClientBuilder {
    /// The bot's user id, sent to every node.
    pub fn with_user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Derives the user id from the bot token. Ignored when a user id is set.
    pub fn with_bot_token(mut self, token: impl Into<String>) -> Self {
        self.bot_token = Some(token.into());
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Tick of the reconnect sweep, 500ms by default.
    pub fn with_reconnect_interval(mut self, every: Duration) -> Self {
        self.reconnect_interval = Some(every);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    pub fn with_voice_interceptor(mut self, interceptor: Arc<dyn VoiceInterceptor>) -> Self {
        self.voice_interceptor = Some(interceptor);
        self
    }

    /// How long a pool transfer waits for the new voice state.
    pub fn with_handshake_timeout(mut self, wait: Duration) -> Self {
        self.handshake_timeout = Some(wait);
        self
    }

    /// Enables session resuming; nodes keep players for `keep` after a disconnect.
    pub fn with_resume_timeout(mut self, keep: Duration) -> Self {
        self.resume_timeout = Some(keep);
        self
    }

    pub fn with_session_invalid_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.session_invalid_codes = Some(codes.into_iter().collect());
        self
    }

    /// Adds a penalty source on top of the region preference.
    pub fn with_penalty_provider(mut self, provider: Arc<dyn PenaltyProvider>) -> Self {
        self.penalty_providers.push(provider);
        self
    }

    pub fn add_node(mut self, config: NodeConfig) -> Self {
        self.nodes.push(config);
        self
    }

    pub fn add_nodes(mut self, configs: impl IntoIterator<Item = NodeConfig>) -> Self {
        self.nodes.extend(configs);
        self
    }

    /// Builds the client, starts the reconnect sweep and connects the nodes
    /// added so far.
    pub async fn build(self) -> Result<GatewayClient> {
        let user_id = match (self.user_id, &self.bot_token) {
            (Some(user_id), _) => user_id,
            (None, Some(token)) => user_id_from_token(token)?,
            (None, None) => {
                return Err(GatewayError::Configuration(
                    "a user id or a bot token is required".to_string(),
                ))
            }
        };

        let identity = ClientIdentity {
            user_id,
            client_name: self
                .client_name
                .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
        };
        let options = ClientOptions {
            event_capacity: self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY),
            handshake_timeout: self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            resume_timeout: self.resume_timeout,
            session_invalid_codes: self
                .session_invalid_codes
                .unwrap_or_else(|| DEFAULT_SESSION_INVALID_CODES.to_vec())
                .into_iter()
                .collect(),
        };

        let health = Arc::new(HealthTracker::new());
        let mut providers: Vec<Arc<dyn PenaltyProvider>> = vec![Arc::new(RegionPenalty)];
        providers.extend(self.penalty_providers);
        let balancer = LoadBalancer::with_providers(Arc::clone(&health), providers);

        let shared = Arc::new_cyclic(|self_ref| ClientShared {
            identity,
            events: EventBus::new(options.event_capacity),
            options,
            health,
            balancer,
            nodes: DashMap::new(),
            links: DashMap::new(),
            desired_pools: DashMap::new(),
            pending_handshakes: DashMap::new(),
            pool_transfers: DashSet::new(),
            voice: self.voice_interceptor,
            registry_lock: Mutex::new(()),
            next_seq: AtomicU64::new(0),
            reconnect_task: Mutex::new(None),
            self_ref: self_ref.clone(),
        });

        let every = self.reconnect_interval.unwrap_or(DEFAULT_RECONNECT_INTERVAL);
        *shared.reconnect_task.lock() = Some(reconnect_scheduler::spawn(Arc::downgrade(&shared), every));

        let client = GatewayClient { shared };
        if !self.nodes.is_empty() {
            client.add_nodes(self.nodes)?;
        }

        info!(user_id, "gateway client started");
        Ok(client)
    }
}

/// Decodes the user id carried in the first segment of a bot token.
pub fn user_id_from_token(token: &str) -> Result<u64> {
    const ENGINE: GeneralPurpose = GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
    );

    let segment = token
        .strip_prefix("Bot ")
        .unwrap_or(token)
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or(GatewayError::InvalidToken)?;
    let decoded = ENGINE
        .decode(segment)
        .map_err(|_| GatewayError::InvalidToken)?;
    let text = String::from_utf8(decoded).map_err(|_| GatewayError::InvalidToken)?;
    text.parse::<u64>().map_err(|_| GatewayError::InvalidToken)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;
