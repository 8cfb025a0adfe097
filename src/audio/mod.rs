//! # Audio Module
//!
//! Player-facing types for controlling playback on a remote node.
//!
//! ## Architecture
//!
//! ### [`player`] - Player Session
//! - One session per guild, created by [`Node::player`](crate::node::Node::player)
//! - Builds `play`, `pause`, `seek`, `volume`, `filters`, `mixer` and `destroy` commands
//! - Rejects every command once the session is destroyed
//!
//! ### [`filters`] / [`equalizer`] - Audio Filters
//! - Validated filter values, checked when built
//! - 15-band equalizer with presets
//! - Serialized as `kind -> fragment` entries of a `filters` command
//!
//! ### [`load_result`] / [`track`] - Track Loading
//! - Classifies node load responses, never failing on unknown shapes
//! - Decodes Lavaplayer track strings into metadata
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use open_music_node::audio::equalizer::Equalizer;
//! use open_music_node::audio::filters::{Filter, Timescale, Volume};
//!
//! # async fn example(node: std::sync::Arc<open_music_node::Node>, encoded: String) -> open_music_node::Result<()> {
//! let player = node.player(123456789);
//!
//! player.play().track(encoded).volume(80).send().await?.await?;
//!
//! let chain: [Filter; 3] = [
//!     Equalizer::from_preset("bass")?.into(),
//!     Timescale::builder().speed(1.25).build()?.into(),
//!     Volume::new(0.8)?.into(),
//! ];
//! player.filters(chain).await?.await?;
//! # Ok(())
//! # }
//! ```

pub mod equalizer;
pub mod filters;
pub mod load_result;
pub mod player;
pub mod track;
