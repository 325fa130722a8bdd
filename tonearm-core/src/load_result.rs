use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::player::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// Failure description reported by a node for a load or a playing track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// index of the selected track, -1 when none is selected
    #[serde(default = "no_selected_track")]
    pub selected_track: i32,
}

fn no_selected_track() -> i32 {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: Value,
    pub tracks: Vec<Track>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum LoadType {
    Track,
    Playlist,
    Search,
    Empty,
    Error,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadResult {
    load_type: LoadType,
    #[serde(default)]
    data: Value,
}

/// Result of resolving an identifier on a node (`GET /v4/loadtracks`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawLoadResult")]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    Empty,
    Error(LoadException),
}

impl LoadResult {
    /// Whether the node failed to load the identifier, as opposed to finding nothing.
    pub fn is_failure(&self) -> bool {
        matches!(self, LoadResult::Error(_))
    }

    pub fn tracks(&self) -> Vec<&Track> {
        match self {
            LoadResult::Track(track) => vec![track],
            LoadResult::Playlist(playlist) => playlist.tracks.iter().collect(),
            LoadResult::Search(tracks) => tracks.iter().collect(),
            LoadResult::Empty | LoadResult::Error(_) => Vec::new(),
        }
    }
}

impl RawLoadResult {
    fn decode(self) -> Result<LoadResult, serde_json::Error> {
        let result = match self.load_type {
            LoadType::Track => LoadResult::Track(serde_json::from_value(self.data)?),
            LoadType::Playlist => LoadResult::Playlist(serde_json::from_value(self.data)?),
            LoadType::Search => LoadResult::Search(serde_json::from_value(self.data)?),
            LoadType::Empty => LoadResult::Empty,
            LoadType::Error => LoadResult::Error(serde_json::from_value(self.data)?),
        };
        Ok(result)
    }
}

impl TryFrom<RawLoadResult> for LoadResult {
    type Error = serde_json::Error;

    fn try_from(raw: RawLoadResult) -> Result<Self, serde_json::Error> {
        raw.decode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK: &str = r#"{"encoded":"QAAAjQIAJVJpY2sgQXN0bGV5","info":{"identifier":"dQw4w9WgXcQ",
        "isSeekable":true,"author":"RickAstleyVEVO","length":212000,"isStream":false,"position":0,
        "title":"Never Gonna Give You Up","uri":"https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "artworkUrl":null,"isrc":null,"sourceName":"youtube"},"pluginInfo":{},"userData":{}}"#;

    #[test]
    fn decode_single_track() {
        let json = format!(r#"{{"loadType":"track","data":{}}}"#, TRACK);
        let result: LoadResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result.tracks().len(), 1);
        assert!(!result.is_failure());
    }

    #[test]
    fn decode_search() {
        let json = format!(r#"{{"loadType":"search","data":[{},{}]}}"#, TRACK, TRACK);
        let result: LoadResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result.tracks().len(), 2);
    }

    #[test]
    fn decode_empty_with_and_without_data() {
        let result: LoadResult = serde_json::from_str(r#"{"loadType":"empty","data":{}}"#).unwrap();
        assert_eq!(result, LoadResult::Empty);
        let result: LoadResult = serde_json::from_str(r#"{"loadType":"empty"}"#).unwrap();
        assert_eq!(result, LoadResult::Empty);
    }

    #[test]
    fn decode_error() {
        let result: LoadResult = serde_json::from_str(
            r#"{"loadType":"error","data":{"message":"Video unavailable","severity":"common","cause":"x"}}"#,
        )
        .unwrap();
        assert!(result.is_failure());
        assert!(result.tracks().is_empty());
    }
}
