use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        filters::{Filter, FilterSet},
        track::Track,
    },
    error::{Error, Result},
    node::{
        correlation::{CommandHandle, CorrelationEngine},
        transport::Frame,
        Node,
    },
};

/// Highest volume the node accepts, in percent.
pub const MAX_VOLUME: u16 = 1000;

/// Lifecycle of a [`PlayerSession`]. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Destroyed,
}

/// Result of a command once the node has echoed it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub guild_id: u64,
    pub op: &'static str,
    /// The heartbeat echo that confirmed the command.
    pub echo: Frame,
}

/// Control handle for one remote player, scoped to a guild.
///
/// Created by [`Node::player`]. Every command checks the lifecycle, builds
/// its payload and hands it to the node's correlation engine; the returned
/// [`CommandHandle`] resolves once the node has applied the command.
pub struct PlayerSession {
    guild_id: u64,
    node: String,
    engine: CorrelationEngine,
    owner: Weak<Node>,
    destroyed: AtomicBool,
}

impl PlayerSession {
    pub(crate) fn new(guild_id: u64, node: impl Into<String>, engine: CorrelationEngine, owner: Weak<Node>) -> Self {
        Self {
            guild_id,
            node: node.into(),
            engine,
            owner,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// Name of the node this session lives on.
    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn state(&self) -> SessionState {
        if self.destroyed.load(Ordering::Acquire) {
            SessionState::Destroyed
        } else {
            SessionState::Active
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    /// Start building a `play` command.
    pub fn play(&self) -> PlayCommand<'_> {
        PlayCommand::new(self)
    }

    /// Pause playback.
    pub async fn pause(&self) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        self.submit("pause", fields([("pause", Value::Bool(true))])).await
    }

    /// Resume paused playback.
    pub async fn resume(&self) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        self.submit("pause", fields([("pause", Value::Bool(false))])).await
    }

    /// Stop the current track.
    pub async fn stop(&self) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        self.submit("stop", Map::new()).await
    }

    /// Jump to `position` milliseconds into the current track.
    pub async fn seek(&self, position: u64) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        self.submit("seek", fields([("position", Value::from(position))])).await
    }

    /// Set the player volume, `0..=1000` with 100 as unity.
    pub async fn volume(&self, volume: u16) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        check_volume(volume)?;
        self.submit("volume", fields([("volume", Value::from(volume))])).await
    }

    /// Replace the player's filter chain.
    ///
    /// Filters are keyed by kind; when a kind appears more than once the
    /// last one is sent.
    pub async fn filters<I, F>(&self, filters: I) -> Result<CommandHandle<CommandAck>>
    where
        I: IntoIterator<Item = F>,
        F: Into<Filter>,
    {
        self.ensure_active()?;
        let mut set = FilterSet::new();
        for filter in filters {
            if let Some(replaced) = set.insert(filter) {
                debug!(guild_id = self.guild_id, kind = replaced.kind(), "Duplicate filter kind, keeping the last");
            }
        }
        self.submit("filters", set.to_fragments()).await
    }

    /// Send a prepared [`FilterSet`].
    pub async fn filter_set(&self, set: &FilterSet) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        self.submit("filters", set.to_fragments()).await
    }

    /// Start building a `mixer` command.
    pub fn mixer(&self) -> MixerCommand<'_> {
        MixerCommand { session: self }
    }

    /// Forward a Discord voice server update so the node can connect.
    pub async fn voice_update(
        &self,
        session_id: &str,
        token: &str,
        endpoint: &str,
    ) -> Result<CommandHandle<CommandAck>> {
        self.ensure_active()?;
        let event = fields([
            ("token", Value::from(token)),
            ("endpoint", Value::from(endpoint)),
            ("guild_id", Value::from(self.guild_id.to_string())),
        ]);
        self.submit(
            "voiceUpdate",
            fields([
                ("sessionId", Value::from(session_id)),
                ("event", Value::Object(event)),
            ]),
        )
        .await
    }

    /// Destroy the remote player and end this session.
    ///
    /// The session is `Destroyed` as soon as this is called, before the
    /// frame goes out. Commands already in flight still resolve.
    pub async fn destroy(&self) -> Result<CommandHandle<CommandAck>> {
        if !self.mark_destroyed() {
            return Err(Error::Lifecycle {
                guild_id: self.guild_id,
            });
        }
        if let Some(node) = self.owner.upgrade() {
            node.remove_player(self.guild_id);
        }
        info!(guild_id = self.guild_id, node = %self.node, "🗑️ Player destroyed");
        self.submit("destroy", Map::new()).await
    }

    /// Flip to `Destroyed`. Returns `false` if already destroyed.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_destroyed() {
            warn!(guild_id = self.guild_id, "Command on destroyed player rejected");
            return Err(Error::Lifecycle {
                guild_id: self.guild_id,
            });
        }
        Ok(())
    }

    fn payload(&self, op: &'static str, body: Map<String, Value>) -> Frame {
        let mut payload = body;
        payload.insert("op".to_string(), Value::from(op));
        payload.insert("guildId".to_string(), Value::from(self.guild_id.to_string()));
        Value::Object(payload)
    }

    async fn submit(&self, op: &'static str, body: Map<String, Value>) -> Result<CommandHandle<CommandAck>> {
        let payload = self.payload(op, body);
        debug!(guild_id = self.guild_id, op, "Submitting command");
        Ok(self.engine.submit(payload, ack(self.guild_id, op)).await)
    }

    /// Submit on a spawned task; used by the chaining helpers.
    fn spawn_submit(&self, op: &'static str, body: Map<String, Value>) {
        let payload = self.payload(op, body);
        let engine = self.engine.clone();
        let guild_id = self.guild_id;
        tokio::spawn(async move {
            if let Err(e) = engine.submit(payload, ack(guild_id, op)).await.await {
                debug!(guild_id, op, error = %e, "Dispatched command failed");
            }
        });
    }
}

impl fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerSession")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node)
            .field("state", &self.state())
            .finish()
    }
}

fn ack(guild_id: u64, op: &'static str) -> impl FnOnce(Frame) -> Result<CommandAck> + Send + Sync + 'static {
    move |echo| Ok(CommandAck { guild_id, op, echo })
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn check_volume(volume: u16) -> Result<()> {
    if volume > MAX_VOLUME {
        return Err(Error::validation(format!(
            "volume must be between 0 and {MAX_VOLUME}, got {volume}"
        )));
    }
    Ok(())
}

/// Builder for a `play` command. Only fields set explicitly are sent.
#[derive(Debug)]
#[must_use = "a play command does nothing until sent"]
pub struct PlayCommand<'a> {
    session: &'a PlayerSession,
    track: Option<String>,
    start_time: Option<u64>,
    end_time: Option<u64>,
    paused: Option<bool>,
    volume: Option<u16>,
    no_replace: Option<bool>,
}

impl<'a> PlayCommand<'a> {
    fn new(session: &'a PlayerSession) -> Self {
        Self {
            session,
            track: None,
            start_time: None,
            end_time: None,
            paused: None,
            volume: None,
            no_replace: None,
        }
    }

    /// Encoded track string, as returned in a load result.
    pub fn track(mut self, encoded: impl Into<String>) -> Self {
        self.track = Some(encoded.into());
        self
    }

    pub fn track_handle(self, track: &Track) -> Self {
        self.track(track.encoded())
    }

    /// Start offset in milliseconds.
    pub fn start_time(mut self, ms: u64) -> Self {
        self.start_time = Some(ms);
        self
    }

    /// Stop offset in milliseconds.
    pub fn end_time(mut self, ms: u64) -> Self {
        self.end_time = Some(ms);
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Keep the current track if one is already playing.
    pub fn no_replace(mut self, no_replace: bool) -> Self {
        self.no_replace = Some(no_replace);
        self
    }

    fn build(&self) -> Result<Map<String, Value>> {
        self.session.ensure_active()?;
        let track = self
            .track
            .as_deref()
            .ok_or_else(|| Error::validation("play requires a track"))?;

        let mut body = fields([("track", Value::from(track))]);
        if let Some(start) = self.start_time {
            body.insert("start".to_string(), Value::from(start));
        }
        if let Some(end) = self.end_time {
            body.insert("end".to_string(), Value::from(end));
        }
        if let Some(paused) = self.paused {
            body.insert("pause".to_string(), Value::from(paused));
        }
        if let Some(volume) = self.volume {
            check_volume(volume)?;
            body.insert("volume".to_string(), Value::from(volume));
        }
        if let Some(no_replace) = self.no_replace {
            body.insert("noReplace".to_string(), Value::from(no_replace));
        }
        Ok(body)
    }

    pub async fn send(self) -> Result<CommandHandle<CommandAck>> {
        let body = self.build()?;
        self.session.submit("play", body).await
    }

    /// Validate, submit in the background and return the session.
    ///
    /// Must be called from within a Tokio runtime. Nothing waits for the
    /// node; use [`send`](Self::send) when ordering matters.
    #[deprecated(note = "use `send` and await the handle")]
    pub fn dispatch(self) -> Result<&'a PlayerSession> {
        let body = self.build()?;
        self.session.spawn_submit("play", body);
        Ok(self.session)
    }
}

/// Builder for the `mixer` command; `enable`/`disable` send it.
#[derive(Debug)]
#[must_use = "a mixer command does nothing until enabled or disabled"]
pub struct MixerCommand<'a> {
    session: &'a PlayerSession,
}

impl<'a> MixerCommand<'a> {
    pub async fn enable(self) -> Result<CommandHandle<CommandAck>> {
        self.send(true).await
    }

    pub async fn disable(self) -> Result<CommandHandle<CommandAck>> {
        self.send(false).await
    }

    async fn send(self, enable: bool) -> Result<CommandHandle<CommandAck>> {
        self.session.ensure_active()?;
        self.session.submit("mixer", fields([("enable", Value::Bool(enable))])).await
    }

    #[deprecated(note = "use `enable` and await the handle")]
    pub fn dispatch_enable(self) -> Result<&'a PlayerSession> {
        self.dispatch(true)
    }

    #[deprecated(note = "use `disable` and await the handle")]
    pub fn dispatch_disable(self) -> Result<&'a PlayerSession> {
        self.dispatch(false)
    }

    fn dispatch(self, enable: bool) -> Result<&'a PlayerSession> {
        self.session.ensure_active()?;
        self.session
            .spawn_submit("mixer", fields([("enable", Value::Bool(enable))]));
        Ok(self.session)
    }
}
