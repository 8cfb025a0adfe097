//! Read-only node snapshots.
//!
//! Nodes omit whole blocks (no `frameStats` until a player has played, no
//! `cpu` on some builds); missing or null blocks and fields decode as zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Load share reported under `cpu`, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    /// Whole-machine load.
    pub system: f64,
    /// Load caused by the node process itself.
    pub andesite: f64,
}

/// Audio frames over the last minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct PlayerCounts {
    total: u32,
    playing: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct Runtime {
    uptime: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StatsFields {
    #[serde(deserialize_with = "null_as_default")]
    players: PlayerCounts,
    #[serde(deserialize_with = "null_as_default")]
    runtime: Runtime,
    #[serde(deserialize_with = "null_as_default")]
    cpu: CpuStats,
    #[serde(deserialize_with = "null_as_default")]
    frame_stats: FrameStats,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Periodic load report from one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
    pub node: String,
    /// `players.total`
    pub players: u32,
    /// `players.playing`
    pub playing_players: u32,
    /// `runtime.uptime`, milliseconds since the node started.
    pub uptime: u64,
    pub cpu: CpuStats,
    pub frame_stats: FrameStats,
    pub received_at: DateTime<Utc>,
    raw: Value,
}

impl NodeStats {
    /// Decode a `stats` payload sent by `node`.
    pub fn decode(node: impl Into<String>, payload: &Value) -> Result<Self> {
        let fields: StatsFields = serde_json::from_value(payload.clone())?;
        Ok(Self {
            node: node.into(),
            players: fields.players.total,
            playing_players: fields.players.playing,
            uptime: fields.runtime.uptime,
            cpu: fields.cpu,
            frame_stats: fields.frame_stats,
            received_at: Utc::now(),
            raw: payload.clone(),
        })
    }

    /// The payload as received, for fields this version does not model
    /// (memory, threads, GC).
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Load score for picking a node; lower is better.
    ///
    /// Playing players, plus exponential terms for system CPU load and for
    /// deficit and nulled frames out of the 3000 expected per minute.
    pub fn penalty(&self) -> f64 {
        let players = f64::from(self.playing_players);
        let cpu = 1.05f64.powf(100.0 * self.cpu.system) * 10.0 - 10.0;

        let (deficit, nulled) = if self.frame_stats.sent == 0 && self.frame_stats.deficit == 0 {
            (0.0, 0.0)
        } else {
            let per_minute = 3000.0;
            let deficit = 1.03f64.powf(500.0 * (self.frame_stats.deficit as f64 / per_minute)) * 600.0 - 600.0;
            let nulled = (1.03f64.powf(500.0 * (self.frame_stats.nulled as f64 / per_minute)) * 300.0 - 300.0) * 2.0;
            (deficit, nulled)
        };

        players + cpu + deficit + nulled
    }
}

/// What a node is and what it can do, as reported on request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: String,
    pub version_major: String,
    pub version_minor: String,
    pub version_revision: String,
    pub version_commit: Option<String>,
    pub version_build: Option<i64>,
    pub node_region: Option<String>,
    pub node_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub enabled_sources: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub loaded_plugins: Vec<String>,
}

impl NodeInfo {
    pub fn decode(payload: &Value) -> Result<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    /// Whether the node has the named audio source enabled.
    pub fn has_source(&self, source: &str) -> bool {
        self.enabled_sources.iter().any(|s| s.eq_ignore_ascii_case(source))
    }

    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.loaded_plugins.iter().any(|p| p == plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn stats_read_nested_blocks() {
        let payload = json!({
            "op": "stats",
            "players": {"total": 3, "playing": 1},
            "cpu": {"system": 0.5, "andesite": 0.1},
            "runtime": {"uptime": 90_000, "pid": 7},
            "frameStats": {"sent": 2900, "nulled": 40, "deficit": 60},
        });
        let stats = NodeStats::decode("main", &payload).unwrap();

        assert_eq!(stats.node, "main");
        assert_eq!((stats.players, stats.playing_players), (3, 1));
        assert_eq!(stats.uptime, 90_000);
        assert_eq!(stats.cpu, CpuStats { system: 0.5, andesite: 0.1 });
        assert_eq!(
            stats.frame_stats,
            FrameStats {
                sent: 2900,
                nulled: 40,
                deficit: 60,
            }
        );
        assert_eq!(stats.raw()["runtime"]["pid"], 7);
    }

    #[test]
    fn stats_with_missing_blocks_decode_as_zero() {
        let payload = json!({"op": "stats", "players": {"total": 2, "playing": 0}});
        let stats = NodeStats::decode("main", &payload).unwrap();

        assert_eq!(stats.players, 2);
        assert_eq!(stats.uptime, 0);
        assert_eq!(stats.cpu, CpuStats::default());
        assert_eq!(stats.frame_stats, FrameStats::default());
        assert_eq!(stats.raw()["op"], "stats");
    }

    #[test]
    fn null_blocks_decode_as_zero() {
        let stats = NodeStats::decode(
            "main",
            &json!({"players": null, "runtime": null, "frameStats": null, "cpu": null}),
        )
        .unwrap();
        assert_eq!(stats.players, 0);
        assert_eq!(stats.frame_stats, FrameStats::default());
        assert_eq!(stats.cpu.andesite, 0.0);
    }

    #[test]
    fn stats_keep_unmodelled_fields() {
        let payload = json!({
            "players": {"total": 1, "playing": 1},
            "memory": {"heap": {"used": 20}},
            "gc": [{"name": "G1", "collectionCount": 2}],
        });
        let stats = NodeStats::decode("eu", &payload).unwrap();

        assert_eq!(stats.raw()["memory"]["heap"]["used"], 20);
        assert_eq!(stats.raw()["gc"][0]["collectionCount"], 2);
    }

    #[test]
    fn malformed_block_is_a_json_error() {
        let result = NodeStats::decode("main", &json!({"players": {"total": "many"}}));
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn idle_node_has_low_penalty() {
        let idle = NodeStats::decode("a", &json!({})).unwrap();
        let busy = NodeStats::decode(
            "b",
            &json!({
                "players": {"total": 20, "playing": 20},
                "cpu": {"system": 0.8},
                "frameStats": {"sent": 2000, "deficit": 500, "nulled": 100},
            }),
        )
        .unwrap();

        assert_eq!(idle.penalty(), 0.0);
        assert!(busy.penalty() > idle.penalty());
    }

    #[test]
    fn info_decodes_version_and_sources() {
        let info = NodeInfo::decode(&json!({
            "version": "0.20.2",
            "versionMajor": "0",
            "versionMinor": "20",
            "versionRevision": "2",
            "versionCommit": "a1b2c3d",
            "versionBuild": 412,
            "nodeRegion": "eu-west",
            "nodeId": "node-1",
            "enabledSources": ["youtube", "soundcloud", "http"],
            "loadedPlugins": [],
        }))
        .unwrap();

        assert_eq!(info.version_minor, "20");
        assert_eq!(info.version_build, Some(412));
        assert_eq!(info.node_region.as_deref(), Some("eu-west"));
        assert!(info.has_source("YouTube"));
        assert!(!info.has_source("twitch"));
        assert!(!info.has_plugin("lyrics"));
    }

    #[test]
    fn info_tolerates_partial_payload() {
        let info = NodeInfo::decode(&json!({"version": "0.20.2", "nodeId": null, "loadedPlugins": null})).unwrap();

        assert_eq!(info.version, "0.20.2");
        assert_eq!(info.node_id, None);
        assert!(info.enabled_sources.is_empty());
        assert!(info.loaded_plugins.is_empty());
    }
}
