use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tonearm_core::{Event, Frame, PlayerMutation, PlayerUpdate, Ready};
use tracing::{debug, info, trace, warn};

use crate::client::ClientShared;
use crate::events::{FailureCause, GatewayEvent, NodeDisconnected, NodeEvent};
use crate::health_tracker::HealthMetric;
use crate::link::{now_millis, LinkState};
use crate::node::Node;
use crate::node_connection::ConnectionHandler;

/// Routes the socket callbacks of one node into the client.
pub(crate) struct NodeHandler {
    node: String,
    seq: u64,
    client: Weak<ClientShared>,
}

impl NodeHandler {
    pub(crate) fn new(node: String, seq: u64, client: Weak<ClientShared>) -> Self {
        NodeHandler { node, seq, client }
    }

    // None once the client is gone or the node was removed or replaced
    fn resolve(&self) -> Option<(Arc<ClientShared>, Arc<Node>)> {
        let client = self.client.upgrade()?;
        let node = client.nodes.get(&self.node).map(|n| Arc::clone(n.value()))?;
        if node.seq() != self.seq {
            return None;
        }
        Some((client, node))
    }
}

#[async_trait]
impl ConnectionHandler for NodeHandler {
    async fn on_open(&self) {
        debug!(node = %self.node, "node socket open, waiting for ready");
    }

    async fn on_frame(&self, frame: Frame) {
        let Some((client, node)) = self.resolve() else {
            return;
        };
        client.handle_frame(&node, frame);
    }

    async fn on_closed(&self, code: u16, reason: String, by_remote: bool) {
        let Some((client, node)) = self.resolve() else {
            return;
        };
        if by_remote {
            warn!(node = %self.node, code, reason = %reason, "node closed the connection");
        } else {
            info!(node = %self.node, code, reason = %reason, "node connection closed");
        }
        client.handle_disconnect(
            &node,
            NodeDisconnected {
                code: Some(code),
                reason,
                cause: None,
            },
        );
    }

    async fn on_failure(&self, cause: FailureCause, error: String) {
        let Some((client, node)) = self.resolve() else {
            return;
        };
        warn!(node = %self.node, %cause, error = %error, "node connection failed");
        client.handle_disconnect(
            &node,
            NodeDisconnected {
                code: None,
                reason: error,
                cause: Some(cause),
            },
        );
    }
}

impl ClientShared {
    pub(crate) fn handle_disconnect(self: &Arc<Self>, node: &Arc<Node>, disconnected: NodeDisconnected) {
        node.set_available(false);
        self.publish(
            node,
            GatewayEvent::NodeDisconnected(NodeEvent::new(node.name(), disconnected)),
        );
        self.on_node_disconnected(node);
    }

    pub(crate) fn handle_frame(self: &Arc<Self>, node: &Arc<Node>, frame: Frame) {
        match frame {
            Frame::Ready(ready) => self.on_ready(node, ready),
            Frame::Stats(stats) => {
                trace!(node = %node.name(), playing = stats.playing_players, "stats received");
                node.set_stats(stats.clone());
                self.publish(node, GatewayEvent::Stats(NodeEvent::new(node.name(), stats)));
            }
            Frame::PlayerUpdate(update) => self.on_player_update(node, update),
            Frame::Event(event) => self.on_event(node, event),
            Frame::Unknown => debug!(node = %node.name(), "ignoring unknown op"),
        }
    }

    fn on_ready(self: &Arc<Self>, node: &Arc<Node>, ready: Ready) {
        info!(node = %node.name(), resumed = ready.resumed, session_id = %ready.session_id, "node ready");

        if !ready.resumed {
            self.health.reset(node.name());
        }
        node.set_session_id(ready.session_id.clone());
        node.set_available(true);

        if let (Some(keep), false) = (self.options.resume_timeout, ready.resumed) {
            let node = Arc::clone(node);
            let session_id = ready.session_id.clone();
            tokio::spawn(async move {
                if let Err(e) = node.rest().enable_resuming(&session_id, keep.as_secs()).await {
                    warn!(node = %node.name(), error = %e, "unable to enable session resuming");
                }
            });
        }

        for player in node.cached_players() {
            if player.voice.is_empty() {
                continue;
            }
            let node = Arc::clone(node);
            tokio::spawn(async move {
                let guild_id = player.guild_id;
                let mutation = PlayerMutation::restore(&player, player.position_at(now_millis()));
                if let Err(e) = node.restore_player(guild_id, mutation).set_no_replace(true).await {
                    warn!(node = %node.name(), guild_id, error = %e, "unable to replay player");
                }
            });
        }

        self.publish(node, GatewayEvent::Ready(NodeEvent::new(node.name(), ready)));
        self.transfer_orphans_to(node);
    }

    fn on_player_update(&self, node: &Arc<Node>, update: PlayerUpdate) {
        let guild_id = update.guild_id;
        node.update_cached_player(guild_id, |player| player.state = update.state);

        if let Some(link) = self.links.get(&guild_id) {
            if link.node().name() == node.name() {
                let state = if update.state.connected {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                };
                link.set_state(state);
            }
        }

        self.publish(node, GatewayEvent::PlayerUpdate(NodeEvent::new(node.name(), update)));
    }

    fn on_event(self: &Arc<Self>, node: &Arc<Node>, event: Event) {
        let name = node.name();
        let published = match event {
            Event::TrackStart(event) => {
                let track = event.track.clone();
                node.update_cached_player(event.guild_id, |player| player.track = Some(track));
                GatewayEvent::TrackStart(NodeEvent::new(name, event))
            }
            Event::TrackEnd(event) => {
                node.update_cached_player(event.guild_id, |player| player.track = None);
                GatewayEvent::TrackEnd(NodeEvent::new(name, event))
            }
            Event::TrackStuck(event) => {
                warn!(node = %name, guild_id = event.guild_id, threshold_ms = event.threshold_ms, "track stuck");
                self.health.track_metric(name, HealthMetric::TrackStuck);
                GatewayEvent::TrackStuck(NodeEvent::new(name, event))
            }
            Event::TrackException(event) => {
                warn!(node = %name, guild_id = event.guild_id, cause = %event.exception.cause, "track exception");
                self.health.track_metric(name, HealthMetric::TrackException);
                GatewayEvent::TrackException(NodeEvent::new(name, event))
            }
            Event::WebSocketClosed(event) => {
                if self.options.session_invalid_codes.contains(&event.code) {
                    info!(node = %name, guild_id = event.guild_id, code = event.code, "voice session ended by node");
                    let client = Arc::clone(self);
                    let guild_id = event.guild_id;
                    tokio::spawn(async move {
                        if let Err(e) = client.destroy_link(guild_id).await {
                            debug!(guild_id, error = %e, "unable to destroy player of closed session");
                        }
                    });
                }
                GatewayEvent::WebSocketClosed(NodeEvent::new(name, event))
            }
            Event::Unknown => {
                debug!(node = %name, "ignoring unknown event type");
                return;
            }
        };
        self.publish(node, published);
    }
}
