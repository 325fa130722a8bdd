use tonearm_core::{
    NodeStats, PlayerUpdate, Ready, TrackEndEvent, TrackExceptionEvent, TrackStartEvent,
    TrackStuckEvent, WebSocketClosedEvent,
};

/// A payload tagged with the name of the node that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent<T> {
    pub node: String,
    pub payload: T,
}

impl<T> NodeEvent<T> {
    pub fn new(node: impl Into<String>, payload: T) -> Self {
        NodeEvent {
            node: node.into(),
            payload,
        }
    }
}

/// Why a node connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Eof,
    Timeout,
    ConnectionRefused,
    Socket,
    Unknown,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Eof => write!(f, "eof"),
            FailureCause::Timeout => write!(f, "timeout"),
            FailureCause::ConnectionRefused => write!(f, "connection refused"),
            FailureCause::Socket => write!(f, "socket error"),
            FailureCause::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDisconnected {
    pub code: Option<u16>,
    pub reason: String,
    pub cause: Option<FailureCause>,
}

/// Everything the gateway publishes on node buses and on the client bus.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Ready(NodeEvent<Ready>),
    Stats(NodeEvent<NodeStats>),
    PlayerUpdate(NodeEvent<PlayerUpdate>),
    TrackStart(NodeEvent<TrackStartEvent>),
    TrackEnd(NodeEvent<TrackEndEvent>),
    TrackStuck(NodeEvent<TrackStuckEvent>),
    TrackException(NodeEvent<TrackExceptionEvent>),
    WebSocketClosed(NodeEvent<WebSocketClosedEvent>),
    NodeDisconnected(NodeEvent<NodeDisconnected>),
}

impl GatewayEvent {
    pub fn node(&self) -> &str {
        match self {
            GatewayEvent::Ready(e) => &e.node,
            GatewayEvent::Stats(e) => &e.node,
            GatewayEvent::PlayerUpdate(e) => &e.node,
            GatewayEvent::TrackStart(e) => &e.node,
            GatewayEvent::TrackEnd(e) => &e.node,
            GatewayEvent::TrackStuck(e) => &e.node,
            GatewayEvent::TrackException(e) => &e.node,
            GatewayEvent::WebSocketClosed(e) => &e.node,
            GatewayEvent::NodeDisconnected(e) => &e.node,
        }
    }
}

macro_rules! typed_event {
    ($variant:ident, $payload:ty) => {
        impl TryFrom<GatewayEvent> for NodeEvent<$payload> {
            type Error = GatewayEvent;

            fn try_from(event: GatewayEvent) -> Result<Self, Self::Error> {
                match event {
                    GatewayEvent::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }

        impl From<NodeEvent<$payload>> for GatewayEvent {
            fn from(event: NodeEvent<$payload>) -> Self {
                GatewayEvent::$variant(event)
            }
        }
    };
}

typed_event!(Ready, Ready);
typed_event!(Stats, NodeStats);
typed_event!(PlayerUpdate, PlayerUpdate);
typed_event!(TrackStart, TrackStartEvent);
typed_event!(TrackEnd, TrackEndEvent);
typed_event!(TrackStuck, TrackStuckEvent);
typed_event!(TrackException, TrackExceptionEvent);
typed_event!(WebSocketClosed, WebSocketClosedEvent);
typed_event!(NodeDisconnected, NodeDisconnected);
