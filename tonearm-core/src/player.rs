use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata describing an audio track as resolved by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// track length in milliseconds
    pub length: u64,
    pub is_stream: bool,
    /// start position in milliseconds
    pub position: u64,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

/// A track reference: the node-encoded blob plus its decoded info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Value,
    #[serde(default)]
    pub user_data: Value,
}

/// Voice-session descriptor handed out by the voice platform for one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub session_id: String,
}

impl VoiceState {
    pub fn new(
        token: impl Into<String>,
        endpoint: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        VoiceState {
            token: token.into(),
            endpoint: endpoint.into(),
            session_id: session_id.into(),
        }
    }

    /// A voice state is only usable by a node when every part is present.
    pub fn is_empty(&self) -> bool {
        self.token.is_empty() || self.endpoint.is_empty() || self.session_id.is_empty()
    }
}

/// Position anchor reported by the node: `position` was valid at `time`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// unix timestamp in milliseconds
    #[serde(default)]
    pub time: u64,
    /// playback position in milliseconds
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
    /// voice gateway ping in milliseconds, -1 when not connected
    #[serde(default)]
    pub ping: i64,
}

/// The node-side player of one guild, as last seen by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    #[serde(with = "crate::guild_id")]
    pub guild_id: u64,
    #[serde(default)]
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    #[serde(default)]
    pub state: PlayerState,
    #[serde(default)]
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Value,
}

impl PlayerSnapshot {
    /// An idle player with default volume, used before the node has answered.
    pub fn idle(guild_id: u64) -> Self {
        PlayerSnapshot {
            guild_id,
            track: None,
            volume: 100,
            paused: false,
            state: PlayerState::default(),
            voice: VoiceState::default(),
            filters: Value::Null,
        }
    }

    /// True when a track is loaded and the player is not paused.
    pub fn is_playing(&self) -> bool {
        self.track.is_some() && !self.paused
    }

    /// Playback position at `now_ms`, extrapolated from the last state anchor
    /// while a track is playing and clamped to the track length.
    pub fn position_at(&self, now_ms: u64) -> u64 {
        let Some(track) = &self.track else {
            return 0;
        };

        if self.paused || !self.state.connected {
            return self.state.position.min(track.info.length);
        }

        let elapsed = now_ms.saturating_sub(self.state.time);
        let position = self.state.position.saturating_add(elapsed);

        if track.info.is_stream {
            position
        } else {
            position.min(track.info.length)
        }
    }
}
