//! Tonearm-Client
//!
//! Tonearm-Client -- load-balancing gateway to a pool of audio nodes

mod client;
pub use client::{
    user_id_from_token, GatewayClient, GatewayClientBuilder, DEFAULT_CLIENT_NAME,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SESSION_INVALID_CODES,
};

pub mod errors;

pub mod event_bus;
pub use event_bus::{EventBus, EventStream};

pub mod events;
pub use events::{FailureCause, GatewayEvent, NodeDisconnected, NodeEvent};

pub mod health_tracker;
pub use health_tracker::{HealthMetric, HealthTracker, MetricCounts};

pub mod penalties;
pub use penalties::{
    PenaltyProvider, Penalties, RegionPenalty, PENALTY_BLOCK, PENALTY_SOFT_BLOCK,
};

mod load_balancer;
pub use load_balancer::LoadBalancer;

mod node;
pub use node::Node;

mod node_connection;
pub use node_connection::{backoff_interval, NORMAL_CLOSE};

mod node_handler;

mod rest_client;

mod link;
pub use link::{Link, LinkState};

mod player_update;
pub use player_update::PlayerUpdateBuilder;

mod failover;

mod reconnect_scheduler;
pub use reconnect_scheduler::DEFAULT_RECONNECT_INTERVAL;

mod voice;
pub use voice::VoiceInterceptor;

mod listener;
pub use listener::TrackListener;

pub use tonearm_core;
