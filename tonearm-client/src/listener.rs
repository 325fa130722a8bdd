use async_trait::async_trait;
use tonearm_core::{
    TrackEndEvent, TrackExceptionEvent, TrackStartEvent, TrackStuckEvent, WebSocketClosedEvent,
};

use crate::events::GatewayEvent;

/// Per-guild track callbacks. Every method defaults to doing nothing.
#[async_trait]
pub trait TrackListener: Send + Sync {
    async fn on_track_start(&self, _node: &str, _event: &TrackStartEvent) {}

    async fn on_track_end(&self, _node: &str, _event: &TrackEndEvent) {}

    async fn on_track_stuck(&self, _node: &str, _event: &TrackStuckEvent) {}

    async fn on_track_exception(&self, _node: &str, _event: &TrackExceptionEvent) {}

    async fn on_close_ws_connection(&self, _node: &str, _event: &WebSocketClosedEvent) {}
}

/// Forwards one gateway event to the matching listener callback.
pub(crate) async fn dispatch(listener: &dyn TrackListener, event: &GatewayEvent) {
    match event {
        GatewayEvent::TrackStart(e) => listener.on_track_start(&e.node, &e.payload).await,
        GatewayEvent::TrackEnd(e) => listener.on_track_end(&e.node, &e.payload).await,
        GatewayEvent::TrackStuck(e) => listener.on_track_stuck(&e.node, &e.payload).await,
        GatewayEvent::TrackException(e) => listener.on_track_exception(&e.node, &e.payload).await,
        GatewayEvent::WebSocketClosed(e) => {
            listener.on_close_ws_connection(&e.node, &e.payload).await
        }
        _ => {}
    }
}
