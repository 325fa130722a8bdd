use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tonearm_core::{LoadResult, PlayerMutation, PlayerSnapshot, VoiceState};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::node::Node;
use crate::player_update::PlayerUpdateBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Binding of one guild to the node currently serving it.
#[derive(Debug)]
pub struct Link {
    guild_id: u64,
    node: RwLock<Arc<Node>>,
    state: RwLock<Option<LinkState>>,
    last_region: RwLock<Option<String>>,
}

impl Link {
    pub(crate) fn new(guild_id: u64, node: Arc<Node>, region: Option<&str>) -> Self {
        Link {
            guild_id,
            node: RwLock::new(node),
            state: RwLock::new(None),
            last_region: RwLock::new(region.map(str::to_string)),
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node.read())
    }

    /// `None` until the first player update for this guild arrives.
    pub fn state(&self) -> Option<LinkState> {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        let previous = self.state.write().replace(state);
        if previous != Some(state) {
            debug!(guild_id = self.guild_id, ?state, "link state changed");
        }
    }

    pub fn last_region(&self) -> Option<String> {
        self.last_region.read().clone()
    }

    pub(crate) fn set_last_region(&self, region: &str) {
        *self.last_region.write() = Some(region.to_string());
    }

    pub fn cached_player(&self) -> Option<PlayerSnapshot> {
        self.node().cached_player(self.guild_id)
    }

    pub async fn get_player(&self) -> Result<PlayerSnapshot> {
        self.node().get_player(self.guild_id).await
    }

    pub fn create_or_update_player(&self) -> PlayerUpdateBuilder {
        self.node().create_or_update_player(self.guild_id)
    }

    pub fn update_player(&self) -> PlayerUpdateBuilder {
        self.node().update_player(self.guild_id)
    }

    pub async fn destroy_player(&self) -> Result<()> {
        self.node().destroy_player(self.guild_id).await
    }

    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult> {
        self.node().load_item(identifier).await
    }

    fn swap_node(&self, new_node: Arc<Node>) -> Arc<Node> {
        std::mem::replace(&mut *self.node.write(), new_node)
    }

    /// Repoints the guild to `new_node` in place. The player cached on the
    /// previous node moves along and is replayed onto `new_node` in the
    /// background.
    pub fn transfer_node(&self, new_node: Arc<Node>) {
        let old_node = self.swap_node(Arc::clone(&new_node));
        if old_node.name() == new_node.name() {
            return;
        }

        info!(
            guild_id = self.guild_id,
            from = %old_node.name(),
            to = %new_node.name(),
            "link moved to another node"
        );

        let Some(player) = old_node.take_cached_player(self.guild_id) else {
            return;
        };
        new_node.cache_player(player.clone());

        let guild_id = self.guild_id;
        let mutation = PlayerMutation::restore(&player, player.position_at(now_millis()));
        tokio::spawn(async move {
            if let Err(e) = new_node.restore_player(guild_id, mutation).await {
                warn!(guild_id, node = %new_node.name(), error = %e, "unable to replay player");
            }
            if old_node.is_available() {
                if let Err(e) = old_node.destroy_player(guild_id).await {
                    debug!(guild_id, node = %old_node.name(), error = %e, "unable to destroy moved player");
                }
            }
        });
    }

    /// Moves the guild onto `new_node` of another pool once the voice session
    /// has been re-established, replaying the player with `voice`.
    ///
    /// The link and the old node's cached player are only touched after the
    /// replay succeeded; on error the guild stays where it was.
    pub(crate) async fn transfer_to_pool(
        &self,
        new_node: Arc<Node>,
        voice: Option<VoiceState>,
    ) -> Result<()> {
        let old_node = self.node();
        if old_node.name() == new_node.name() {
            return Ok(());
        }

        let mut mutation = match old_node.cached_player(self.guild_id) {
            Some(player) => PlayerMutation::restore(&player, player.position_at(now_millis())),
            None => PlayerMutation::new(),
        };
        if let Some(voice) = voice {
            mutation.set_voice_state(voice);
        }

        if !mutation.is_empty() {
            new_node.restore_player(self.guild_id, mutation).await?;
        }

        let old_node = self.swap_node(Arc::clone(&new_node));
        old_node.take_cached_player(self.guild_id);
        info!(
            guild_id = self.guild_id,
            from = %old_node.name(),
            to = %new_node.name(),
            "link moved to another pool"
        );

        if old_node.is_available() {
            if let Err(e) = old_node.destroy_player(self.guild_id).await {
                debug!(guild_id = self.guild_id, node = %old_node.name(), error = %e, "unable to destroy moved player");
            }
        }
        Ok(())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health_tracker::HealthTracker;
    use tonearm_core::NodeConfig;

    fn node(name: &str) -> Arc<Node> {
        Node::detached(
            NodeConfig::new(name, "127.0.0.1", 1, "secret", "queued"),
            Arc::new(HealthTracker::new()),
        )
    }

    #[test]
    fn state_is_undefined_until_set() {
        let link = Link::new(1, node("a"), Some("europe"));
        assert_eq!(link.state(), None);
        assert_eq!(link.last_region().as_deref(), Some("europe"));

        link.set_state(LinkState::Connected);
        assert_eq!(link.state(), Some(LinkState::Connected));
    }

    #[tokio::test]
    async fn transfer_moves_cached_player() {
        let a = node("a");
        let b = node("b");
        let mut player = PlayerSnapshot::idle(1);
        player.volume = 40;
        a.cache_player(player);

        let link = Link::new(1, Arc::clone(&a), None);
        link.transfer_node(Arc::clone(&b));

        assert_eq!(link.node().name(), "b");
        assert!(a.cached_player(1).is_none());
        assert_eq!(link.cached_player().map(|p| p.volume), Some(40));
    }

    #[tokio::test]
    async fn transfer_to_same_node_is_noop() {
        let a = node("a");
        a.cache_player(PlayerSnapshot::idle(1));

        let link = Link::new(1, Arc::clone(&a), None);
        link.transfer_node(Arc::clone(&a));

        assert!(a.cached_player(1).is_some());
    }
}
