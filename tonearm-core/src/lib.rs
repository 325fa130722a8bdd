//! Tonearm-Core
//!
//! Wire types shared between the Tonearm gateway client and its tools: the
//! frames an audio node pushes over its WebSocket, the player representation
//! returned by its REST API, partial player mutations and node descriptors.

pub mod guild_id;
pub mod load_result;
pub mod mutation;
pub mod node_config;
pub mod player;
pub mod protocol;

pub use load_result::{LoadException, LoadResult, Playlist, PlaylistInfo, Severity};
pub use mutation::{Omissible, PlayerMutation, TrackUpdate};
pub use node_config::{NodeConfig, Pool};
pub use player::{PlayerSnapshot, PlayerState, Track, TrackInfo, VoiceState};
pub use protocol::{
    Cpu, Event, Frame, FrameStats, Memory, NodeStats, PlayerUpdate, Ready, TrackEndEvent,
    TrackEndReason, TrackExceptionEvent, TrackStartEvent, TrackStuckEvent, WebSocketClosedEvent,
};
