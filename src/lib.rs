//! # Open Music Node
//!
//! Client-side protocol layer for a remote audio node.
//!
//! The node's WebSocket protocol is fire-and-forget: commands are never
//! acknowledged. This crate pairs every command with a heartbeat carrying
//! a correlation token and resolves the command's [`CommandHandle`] when the
//! node echoes that heartbeat back, so callers can `await` a command and
//! know it has been applied.
//!
//! The crate does not own the socket. Outbound frames go through a
//! [`FrameSink`]; inbound frames are handed to [`Node::handle_frame`] (or
//! streamed through [`Node::run`]).
//!
//! ```rust,ignore
//! use open_music_node::{Node, NodeConfig};
//!
//! let config = NodeConfig::load()?;
//! let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(64);
//! let (node, mut events) = Node::new(&config, std::sync::Arc::new(outbound_tx));
//!
//! // spawn the socket writer (outbound_rx) and `node.run(inbound_frames)`
//!
//! let player = node.player(guild_id);
//! player.voice_update(&session_id, &token, &endpoint).await?;
//! player.play().track(encoded).send().await?.await?;
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod node;

pub use audio::filters::{Filter, FilterSet};
pub use audio::load_result::{LoadResult, Playlist, Severity};
pub use audio::player::{CommandAck, PlayerSession, SessionState};
pub use audio::track::{LavaplayerDecoder, Track, TrackDecoder, TrackInfo};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{CommandHandle, CorrelationToken, Frame, FrameSink, Node, NodeEvent};
