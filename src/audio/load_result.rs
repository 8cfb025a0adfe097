//! Classification of track/search load responses.
//!
//! Decoding never fails: a payload this version cannot make sense of (an
//! unknown `loadType`, a missing track list, an undecodable track) becomes
//! [`LoadResult::Unknown`] and is logged, so newer nodes do not break older
//! clients.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::audio::track::{Track, TrackDecoder};

/// How bad a load failure was, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Expected failure, e.g. the track is unavailable.
    Common,
    /// Unexpected but probably not a bug.
    Suspicious,
    /// Something broke on the node.
    Fault,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "COMMON" => Ok(Severity::Common),
            "SUSPICIOUS" => Ok(Severity::Suspicious),
            "FAULT" => Ok(Severity::Fault),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Common => "COMMON",
            Severity::Suspicious => "SUSPICIOUS",
            Severity::Fault => "FAULT",
        };
        f.write_str(s)
    }
}

/// An ordered list of tracks, from a playlist or a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    name: Option<String>,
    tracks: Vec<Track>,
    selected_index: i32,
}

impl Playlist {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Index of the track the query pointed at, `-1` if none.
    pub fn selected_index(&self) -> i32 {
        self.selected_index
    }

    /// Present exactly when `selected_index() >= 0`.
    pub fn selected_track(&self) -> Option<&Track> {
        usize::try_from(self.selected_index)
            .ok()
            .and_then(|i| self.tracks.get(i))
    }
}

/// Outcome of asking the node to resolve a track or search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    /// Same shape as a playlist, produced by a search query.
    SearchResult(Playlist),
    Failed { cause: String, severity: Severity },
    NoMatches,
    Unknown,
}

impl LoadResult {
    /// Classify a load payload, resolving anything unrecognised to `Unknown`.
    pub fn decode(payload: &Value, decoder: &dyn TrackDecoder) -> Self {
        let load_type = payload
            .get("loadType")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match Self::classify(load_type, payload, decoder) {
            Ok(result) => {
                debug!(load_type, "Load result decoded");
                result
            }
            Err(reason) => {
                warn!(load_type, %reason, "Unrecognised load result");
                LoadResult::Unknown
            }
        }
    }

    fn classify(
        load_type: &str,
        payload: &Value,
        decoder: &dyn TrackDecoder,
    ) -> std::result::Result<Self, String> {
        match load_type {
            "TRACK_LOADED" => {
                let tracks = decode_tracks(payload, decoder)?;
                tracks
                    .into_iter()
                    .next()
                    .map(LoadResult::Track)
                    .ok_or_else(|| "TRACK_LOADED without a track".to_string())
            }
            "PLAYLIST_LOADED" => decode_playlist(payload, decoder).map(LoadResult::Playlist),
            "SEARCH_RESULT" => decode_playlist(payload, decoder).map(LoadResult::SearchResult),
            "LOAD_FAILED" => decode_failure(payload),
            "NO_MATCHES" => Ok(LoadResult::NoMatches),
            "" => Err("missing loadType".to_string()),
            other => Err(format!("unknown loadType '{other}'")),
        }
    }

    /// Tracks carried by this result, empty for failures.
    pub fn tracks(&self) -> &[Track] {
        match self {
            LoadResult::Track(track) => std::slice::from_ref(track),
            LoadResult::Playlist(p) | LoadResult::SearchResult(p) => p.tracks(),
            _ => &[],
        }
    }

    pub fn is_search(&self) -> bool {
        matches!(self, LoadResult::SearchResult(_))
    }
}

fn decode_tracks(payload: &Value, decoder: &dyn TrackDecoder) -> std::result::Result<Vec<Track>, String> {
    let entries = payload
        .get("tracks")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing tracks array".to_string())?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            // Either the bare encoded string or an object wrapping it.
            let encoded = entry
                .as_str()
                .or_else(|| entry.get("track").and_then(Value::as_str))
                .or_else(|| entry.get("encoded").and_then(Value::as_str))
                .ok_or_else(|| format!("track {i} has no encoded form"))?;
            decoder
                .decode(encoded)
                .map_err(|e| format!("track {i}: {e}"))
        })
        .collect()
}

fn decode_playlist(payload: &Value, decoder: &dyn TrackDecoder) -> std::result::Result<Playlist, String> {
    let tracks = decode_tracks(payload, decoder)?;
    let info = payload.get("playlistInfo");

    let name = info
        .and_then(|i| i.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let selected_index = match info.and_then(|i| i.get("selectedTrack")).and_then(Value::as_i64) {
        None => -1,
        Some(i) if i < 0 => -1,
        Some(i) if (i as usize) < tracks.len() => i as i32,
        Some(i) => {
            return Err(format!(
                "selectedTrack {i} out of range for {} tracks",
                tracks.len()
            ))
        }
    };

    Ok(Playlist {
        name,
        tracks,
        selected_index,
    })
}

fn decode_failure(payload: &Value) -> std::result::Result<LoadResult, String> {
    // Older nodes nest both fields under `exception`.
    let exception = payload.get("exception");

    let cause = payload
        .get("cause")
        .and_then(|c| c.get("message"))
        .or_else(|| exception.and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let severity = payload
        .get("severity")
        .or_else(|| exception.and_then(|e| e.get("severity")))
        .and_then(Value::as_str)
        .ok_or_else(|| "LOAD_FAILED without severity".to_string())?
        .parse::<Severity>()?;

    Ok(LoadResult::Failed { cause, severity })
}
