//! Node events (node -> application).
//!
//! Every inbound frame that is not a command echo becomes a [`NodeEvent`]
//! and is handed to whatever event bus the application runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::audio::load_result::Severity;
use crate::node::stats::NodeStats;
use crate::node::transport::Frame;

/// Player position report sent periodically by the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    /// Node wall-clock time of the report, epoch milliseconds.
    pub time: i64,
    /// Track position in milliseconds.
    pub position: i64,
    pub connected: bool,
    /// Voice gateway ping in milliseconds, `-1` if unknown.
    pub ping: i64,
}

/// Informational events from a node.
///
/// New variants may be added; always include a `_ =>` catch-all.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum NodeEvent {
    Stats(NodeStats),

    PlayerUpdate {
        guild_id: u64,
        state: PlayerState,
    },

    TrackStart {
        guild_id: u64,
        track: Option<String>,
    },

    TrackEnd {
        guild_id: u64,
        track: Option<String>,
        reason: String,
    },

    TrackException {
        guild_id: u64,
        track: Option<String>,
        message: Option<String>,
        severity: Option<Severity>,
    },

    TrackStuck {
        guild_id: u64,
        track: Option<String>,
        threshold_ms: u64,
    },

    /// The node's voice connection for a guild closed.
    WebSocketClosed {
        guild_id: u64,
        code: u16,
        reason: String,
        by_remote: bool,
    },

    /// The connection to the node ended.
    Disconnected {
        node: String,
        /// Commands failed with `ConnectionLost`.
        abandoned: usize,
    },

    /// A frame this version does not recognise.
    Unhandled(Frame),
}

impl NodeEvent {
    /// Decode a non-echo frame received from `node`.
    pub fn from_frame(node: &str, frame: Frame) -> Self {
        match str_field(&frame, "op").as_deref() {
            Some("stats") => match NodeStats::decode(node, &frame) {
                Ok(stats) => NodeEvent::Stats(stats),
                Err(e) => {
                    warn!(node, error = %e, "Malformed stats frame");
                    NodeEvent::Unhandled(frame)
                }
            },
            Some("playerUpdate") => match guild_id(&frame) {
                Some(guild_id) => {
                    let state = frame
                        .get("state")
                        .cloned()
                        .and_then(|s| serde_json::from_value(s).ok())
                        .unwrap_or_default();
                    NodeEvent::PlayerUpdate { guild_id, state }
                }
                None => NodeEvent::Unhandled(frame),
            },
            Some("event") => Self::from_event(frame),
            other => {
                debug!(node, op = ?other, "RX: unhandled op");
                NodeEvent::Unhandled(frame)
            }
        }
    }

    fn from_event(frame: Frame) -> Self {
        let Some(guild_id) = guild_id(&frame) else {
            return NodeEvent::Unhandled(frame);
        };
        let track = str_field(&frame, "track");

        match str_field(&frame, "type").as_deref() {
            Some("TrackStartEvent") => NodeEvent::TrackStart { guild_id, track },
            Some("TrackEndEvent") => NodeEvent::TrackEnd {
                guild_id,
                track,
                reason: str_field(&frame, "reason").unwrap_or_default(),
            },
            Some("TrackExceptionEvent") => {
                let exception = frame.get("exception");
                NodeEvent::TrackException {
                    guild_id,
                    track,
                    message: exception
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .or_else(|| frame.get("error").and_then(Value::as_str))
                        .map(str::to_string),
                    severity: exception
                        .and_then(|e| e.get("severity"))
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok()),
                }
            }
            Some("TrackStuckEvent") => NodeEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms: frame.get("thresholdMs").and_then(Value::as_u64).unwrap_or_default(),
            },
            Some("WebSocketClosedEvent") => NodeEvent::WebSocketClosed {
                guild_id,
                code: frame
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or_default(),
                reason: str_field(&frame, "reason").unwrap_or_default(),
                by_remote: frame.get("byRemote").and_then(Value::as_bool).unwrap_or(false),
            },
            _ => NodeEvent::Unhandled(frame),
        }
    }
}

fn str_field(frame: &Frame, key: &str) -> Option<String> {
    frame.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Guild ids travel as strings; accept numbers too.
pub(crate) fn guild_id(frame: &Frame) -> Option<u64> {
    match frame.get("guildId")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}
