//! Partial player updates (`PATCH /v4/sessions/{id}/players/{guild}`).
//!
//! Every field is three-state: left untouched, set to a value, or explicitly
//! cleared. Untouched fields never appear in the serialized body, so the node
//! keeps its current value for them.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::player::{PlayerSnapshot, Track, VoiceState};

/// A field that is either omitted, explicitly `null`, or carries a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Omissible<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Default for Omissible<T> {
    fn default() -> Self {
        Omissible::Omitted
    }
}

impl<T> Omissible<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Omissible::Omitted)
    }

    pub fn is_present(&self) -> bool {
        !self.is_omitted()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Omissible::Value(value) => Some(value),
            Omissible::Omitted | Omissible::Null => None,
        }
    }
}

impl<T> From<Option<T>> for Omissible<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Omissible::Value(value),
            None => Omissible::Null,
        }
    }
}

impl<T: Serialize> Serialize for Omissible<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Omissible::Value(value) => value.serialize(serializer),
            // an omitted field is skipped by its container; if it is reached
            // anyway it degrades to null
            Omissible::Omitted | Omissible::Null => serializer.serialize_none(),
        }
    }
}

/// Track part of a player mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdate {
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub encoded: Omissible<String>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub identifier: Omissible<String>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub user_data: Omissible<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMutation {
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub track: Omissible<TrackUpdate>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub position: Omissible<u64>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub end_time: Omissible<u64>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub volume: Omissible<u16>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub paused: Omissible<bool>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub filters: Omissible<Value>,
    #[serde(skip_serializing_if = "Omissible::is_omitted")]
    pub voice: Omissible<VoiceState>,
}

pub const MAX_VOLUME: u16 = 1000;

impl PlayerMutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plays `track`, carrying over its user data.
    pub fn set_track(&mut self, track: &Track) -> &mut Self {
        let user_data = if track.user_data.is_null() {
            Omissible::Omitted
        } else {
            Omissible::Value(track.user_data.clone())
        };
        self.track = Omissible::Value(TrackUpdate {
            encoded: Omissible::Value(track.encoded.clone()),
            identifier: Omissible::Omitted,
            user_data,
        });
        self
    }

    pub fn set_encoded_track(&mut self, encoded: Option<String>) -> &mut Self {
        self.track = Omissible::Value(TrackUpdate {
            encoded: encoded.into(),
            ..TrackUpdate::default()
        });
        self
    }

    /// Lets the node resolve and play `identifier` itself.
    pub fn set_identifier(&mut self, identifier: impl Into<String>) -> &mut Self {
        self.track = Omissible::Value(TrackUpdate {
            identifier: Omissible::Value(identifier.into()),
            ..TrackUpdate::default()
        });
        self
    }

    /// Stops playback by clearing the encoded track.
    pub fn stop_track(&mut self) -> &mut Self {
        self.set_encoded_track(None)
    }

    pub fn set_position(&mut self, position_ms: u64) -> &mut Self {
        self.position = Omissible::Value(position_ms);
        self
    }

    pub fn set_end_time(&mut self, end_time_ms: Option<u64>) -> &mut Self {
        self.end_time = end_time_ms.into();
        self
    }

    pub fn set_volume(&mut self, volume: u16) -> &mut Self {
        self.volume = Omissible::Value(volume.min(MAX_VOLUME));
        self
    }

    pub fn set_paused(&mut self, paused: bool) -> &mut Self {
        self.paused = Omissible::Value(paused);
        self
    }

    pub fn set_filters(&mut self, filters: Value) -> &mut Self {
        self.filters = Omissible::Value(filters);
        self
    }

    pub fn set_voice_state(&mut self, voice: VoiceState) -> &mut Self {
        self.voice = Omissible::Value(voice);
        self
    }

    /// Whether nothing has been set.
    pub fn is_empty(&self) -> bool {
        self == &PlayerMutation::default()
    }

    /// Full state of `player` at `position_ms`, used to restore a player on a
    /// node that lost it or to move it onto another node.
    pub fn restore(player: &PlayerSnapshot, position_ms: u64) -> Self {
        let mut mutation = PlayerMutation::new();
        if let Some(track) = &player.track {
            mutation.set_track(track).set_position(position_ms);
        }
        mutation
            .set_volume(player.volume)
            .set_paused(player.paused)
            .set_voice_state(player.voice.clone());
        if !player.filters.is_null() {
            mutation.set_filters(player.filters.clone());
        }
        mutation
    }
}
