use std::sync::Arc;
use tracing::{info, warn};

use crate::client::ClientShared;
use crate::link::LinkState;
use crate::node::Node;

impl ClientShared {
    /// Moves the links of a node that went down onto the best remaining node
    /// of its pool. When the pool has nothing left the links are only marked
    /// disconnected.
    pub(crate) fn on_node_disconnected(&self, node: &Arc<Node>) {
        node.set_available(false);
        let pool_nodes = self.nodes_in_pool(node.pool());

        if pool_nodes.len() == 1 && pool_nodes[0].name() == node.name() {
            warn!(node = %node.name(), pool = %node.pool(), "sole node of pool is down");
            for link in self.links.iter() {
                link.set_state(LinkState::Disconnected);
            }
            return;
        }

        if pool_nodes.iter().all(|candidate| !candidate.is_available()) {
            warn!(node = %node.name(), pool = %node.pool(), "every node of pool is down");
            for link in self.links_on(node) {
                link.set_state(LinkState::Disconnected);
            }
            return;
        }

        let candidates: Vec<Arc<Node>> = pool_nodes
            .into_iter()
            .filter(|candidate| candidate.name() != node.name())
            .collect();

        let links = self.links_on(node);
        if !links.is_empty() {
            info!(node = %node.name(), links = links.len(), "failing links over");
        }
        for link in links {
            let region = link.last_region();
            match self.balancer.select_node(&candidates, region.as_deref()) {
                Some(target) => link.transfer_node(target),
                None => link.set_state(LinkState::Disconnected),
            }
        }
    }

    /// Brings players parked on unavailable nodes back onto `node` once it is
    /// available again. Only links of `node`'s pool with a voice session move.
    pub(crate) fn transfer_orphans_to(&self, node: &Arc<Node>) {
        if !node.is_available() {
            return;
        }

        for parked_on in self.registered_nodes() {
            if parked_on.is_available() || parked_on.name() == node.name() {
                continue;
            }

            for player in parked_on.cached_players() {
                if player.voice.is_empty() {
                    continue;
                }
                let Some(link) = self.links.get(&player.guild_id).map(|l| Arc::clone(l.value())) else {
                    continue;
                };
                let current = link.node();
                if current.name() != parked_on.name() || current.pool() != node.pool() {
                    continue;
                }
                info!(
                    guild_id = player.guild_id,
                    from = %parked_on.name(),
                    to = %node.name(),
                    "reclaiming orphaned player"
                );
                link.transfer_node(Arc::clone(node));
            }
        }
    }
}
