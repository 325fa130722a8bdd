//! Frames pushed by an audio node over its WebSocket, discriminated by `op`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::player::{PlayerState, Track};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Frame {
    Ready(Ready),
    Stats(NodeStats),
    PlayerUpdate(PlayerUpdate),
    Event(Event),
    /// any op this client does not understand
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    /// whole-system load in the range 0.0..=1.0
    pub system_load: f64,
    /// load caused by the node process in the range 0.0..=1.0
    #[serde(alias = "lavalinkLoad")]
    pub process_load: f64,
}

/// Audio frame counters over the last minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

/// Periodic health snapshot of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    /// uptime in milliseconds
    #[serde(default)]
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub state: PlayerState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "TrackStartEvent")]
    TrackStart(TrackStartEvent),
    #[serde(rename = "TrackEndEvent")]
    TrackEnd(TrackEndEvent),
    #[serde(rename = "TrackStuckEvent")]
    TrackStuck(TrackStuckEvent),
    #[serde(rename = "TrackExceptionEvent")]
    TrackException(TrackExceptionEvent),
    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed(WebSocketClosedEvent),
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn guild_id(&self) -> Option<u64> {
        match self {
            Event::TrackStart(e) => Some(e.guild_id),
            Event::TrackEnd(e) => Some(e.guild_id),
            Event::TrackStuck(e) => Some(e.guild_id),
            Event::TrackException(e) => Some(e.guild_id),
            Event::WebSocketClosed(e) => Some(e.guild_id),
            Event::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartEvent {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub track: Track,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether a queue should advance to its next track after this end.
    pub fn may_start_next(&self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

impl Display for TrackEndReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackEndReason::Finished => write!(f, "finished"),
            TrackEndReason::LoadFailed => write!(f, "loadFailed"),
            TrackEndReason::Stopped => write!(f, "stopped"),
            TrackEndReason::Replaced => write!(f, "replaced"),
            TrackEndReason::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndEvent {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub track: Track,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckEvent {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub track: Track,
    pub threshold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionEvent {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub track: Track,
    pub exception: crate::load_result::LoadException,
}

/// The node's voice connection for a guild was closed by the voice platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedEvent {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}
