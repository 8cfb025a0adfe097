//! # Node Module
//!
//! Client side of one audio node connection.
//!
//! ## Components
//!
//! ### [`correlation`] - Request/response
//! - Pairs every command with a token-carrying heartbeat
//! - Resolves command handles when the node echoes the token
//!
//! ### [`transport`] - Outgoing sink
//! - The [`FrameSink`] seam the connection implements
//!
//! ### [`events`] / [`stats`] - Inbound
//! - Typed node events and load snapshots
//!
//! The [`Node`] ties these together: it owns the player sessions, offers
//! every inbound frame to the correlation engine and turns the rest into
//! [`NodeEvent`]s on a bounded channel.

pub mod correlation;
pub mod events;
pub mod stats;
pub mod transport;

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::{
    audio::{
        load_result::LoadResult,
        player::PlayerSession,
        track::{LavaplayerDecoder, Track, TrackDecoder},
    },
    config::NodeConfig,
    error::Result,
};

pub use correlation::{CommandHandle, CorrelationEngine, CorrelationToken};
pub use events::{NodeEvent, PlayerState};
pub use stats::{NodeInfo, NodeStats};
pub use transport::{Frame, FrameSink};

/// One connected node and the player sessions living on it.
pub struct Node {
    name: String,
    engine: CorrelationEngine,
    players: DashMap<u64, Arc<PlayerSession>>,
    stats: RwLock<Option<NodeStats>>,
    events: mpsc::Sender<NodeEvent>,
    track_decoder: Arc<dyn TrackDecoder>,
    this: Weak<Node>,
}

impl Node {
    /// Create a node sending through `sink`, with the Lavaplayer track
    /// decoder. Events are delivered on the returned receiver.
    pub fn new(config: &NodeConfig, sink: Arc<dyn FrameSink>) -> (Arc<Self>, mpsc::Receiver<NodeEvent>) {
        Self::with_track_decoder(config, sink, Arc::new(LavaplayerDecoder))
    }

    pub fn with_track_decoder(
        config: &NodeConfig,
        sink: Arc<dyn FrameSink>,
        track_decoder: Arc<dyn TrackDecoder>,
    ) -> (Arc<Self>, mpsc::Receiver<NodeEvent>) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let engine = CorrelationEngine::new(sink, config.command_timeout);

        let node = Arc::new_cyclic(|this| Self {
            name: config.name.clone(),
            engine,
            players: DashMap::new(),
            stats: RwLock::new(None),
            events: tx,
            track_decoder,
            this: this.clone(),
        });

        info!("🎵 {}", config.summary());
        (node, rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    /// Get the session for `guild_id`, creating it if needed.
    pub fn player(&self, guild_id: u64) -> Arc<PlayerSession> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                debug!(guild_id, node = %self.name, "Creating player session");
                Arc::new(PlayerSession::new(
                    guild_id,
                    self.name.clone(),
                    self.engine.clone(),
                    self.this.clone(),
                ))
            })
            .clone()
    }

    pub fn get_player(&self, guild_id: u64) -> Option<Arc<PlayerSession>> {
        self.players.get(&guild_id).map(|p| p.clone())
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub(crate) fn remove_player(&self, guild_id: u64) {
        self.players.remove(&guild_id);
    }

    /// Latest `stats` report, if the node has sent one.
    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    /// Classify a load response using this node's track decoder.
    pub fn load_result(&self, payload: &Value) -> LoadResult {
        LoadResult::decode(payload, self.track_decoder.as_ref())
    }

    pub fn decode_track(&self, encoded: &str) -> Result<Track> {
        self.track_decoder.decode(encoded)
    }

    /// Process one inbound frame.
    ///
    /// Echoes resolve their command; everything else becomes a
    /// [`NodeEvent`].
    pub fn handle_frame(&self, frame: Frame) {
        let Some(frame) = self.engine.try_match(frame) else {
            return;
        };

        let event = NodeEvent::from_frame(&self.name, frame);
        if let NodeEvent::Stats(stats) = &event {
            trace!(node = %self.name, players = stats.players, "Stats updated");
            *self.stats.write() = Some(stats.clone());
        }
        self.emit(event);
    }

    /// The connection is gone: fail pending commands, drop every session.
    ///
    /// Returns the number of commands abandoned.
    pub fn handle_disconnect(&self) -> usize {
        let abandoned = self.engine.abandon_all();

        let mut lost = 0usize;
        self.players.retain(|_, player| {
            if player.mark_destroyed() {
                lost += 1;
            }
            false
        });

        warn!(node = %self.name, abandoned, players = lost, "Node disconnected");
        self.emit(NodeEvent::Disconnected {
            node: self.name.clone(),
            abandoned,
        });
        abandoned
    }

    /// Feed inbound frames until the stream ends, then handle the
    /// disconnect.
    pub async fn run<S>(&self, frames: S)
    where
        S: Stream<Item = Frame>,
    {
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            self.handle_frame(frame);
        }
        self.handle_disconnect();
    }

    fn emit(&self, event: NodeEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(node = %self.name, ?event, "Event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                trace!(node = %self.name, "No event receiver");
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("players", &self.players.len())
            .field("pending", &self.engine.pending_count())
            .finish()
    }
}
