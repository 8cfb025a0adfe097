//! Request/response on top of a fire-and-forget node connection.
//!
//! The node never acknowledges commands, but it echoes `ping` frames back
//! with any extra fields intact. Each submitted command is followed by a
//! ping carrying a fresh [`CorrelationToken`]; when that ping comes back the
//! command has been applied (the node processes a connection's frames in
//! order) and the waiting [`CommandHandle`] resolves.
//!
//! ```text
//!  submit ─► register token ─► send payload ─► send ping{token}
//!                                                     │
//!  handle ◄── fulfil slot ◄── try_match(frame{token}) ◄┘
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep, Sleep};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::node::transport::{Frame, FrameSink};

/// Reserved field carrying the token in heartbeat frames and their echoes.
pub const TOKEN_FIELD: &str = "__correlation_token";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static TOKEN_PREFIX: OnceLock<String> = OnceLock::new();

/// Opaque identifier matching an echo to the command that caused it.
///
/// Tokens are unique for the lifetime of the process: a random per-process
/// prefix followed by a monotonic counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    fn generate() -> Self {
        let prefix = TOKEN_PREFIX.get_or_init(|| format!("{:08x}", fastrand::u32(..)));
        let n = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CorrelationToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry entry for one in-flight command.
///
/// The completion closure owns the command's decoder and the sending half
/// of its result slot, so it can run at most once.
struct PendingCommand {
    complete: Box<dyn FnOnce(Result<Frame>) + Send + Sync>,
}

impl PendingCommand {
    fn fulfill(self, outcome: Result<Frame>) {
        (self.complete)(outcome)
    }
}

struct Inner {
    sink: Arc<dyn FrameSink>,
    pending: DashMap<CorrelationToken, PendingCommand>,
    /// Held across a command's payload+heartbeat pair.
    send_lock: Mutex<()>,
    default_timeout: Option<Duration>,
}

impl Inner {
    fn abandon(&self, token: &str, reason: Error) -> bool {
        match self.pending.remove(token) {
            Some((_, pending)) => {
                debug!(%token, %reason, "Abandoning pending command");
                pending.fulfill(Err(reason));
                true
            }
            None => false,
        }
    }
}

/// Matches node echoes to the commands waiting for them.
///
/// Cheap to clone; clones share one registry and one outgoing sink.
#[derive(Clone)]
pub struct CorrelationEngine {
    inner: Arc<Inner>,
}

impl CorrelationEngine {
    /// Create an engine sending through `sink`.
    ///
    /// `default_timeout` is applied to every handle this engine returns;
    /// `None` lets commands wait for their echo indefinitely.
    pub fn new(sink: Arc<dyn FrameSink>, default_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                pending: DashMap::new(),
                send_lock: Mutex::new(()),
                default_timeout,
            }),
        }
    }

    /// Send `payload` and return a handle resolving once the node echoes it.
    ///
    /// The token is registered before anything is sent. Transport failures
    /// do not surface here; they complete the returned handle.
    pub async fn submit<T, F>(&self, payload: Frame, decode: F) -> CommandHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Frame) -> Result<T> + Send + Sync + 'static,
    {
        let token = CorrelationToken::generate();
        let (tx, rx) = oneshot::channel();
        let pending = PendingCommand {
            complete: Box::new(move |outcome: Result<Frame>| {
                let _ = tx.send(outcome.and_then(decode));
            }),
        };
        self.inner.pending.insert(token.clone(), pending);

        // Built before sending so a dropped submit future still deregisters.
        let handle = CommandHandle::new(
            token.clone(),
            rx,
            Arc::downgrade(&self.inner),
            self.inner.default_timeout,
        );

        let op = payload
            .get("op")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        trace!(%token, %op, "TX: command");

        if let Err(e) = self.send_pair(payload, &token).await {
            warn!(%token, %op, error = %e, "Failed to send command");
            self.inner.abandon(token.as_str(), e);
        }

        handle
    }

    async fn send_pair(&self, payload: Frame, token: &CorrelationToken) -> Result<()> {
        let _guard = self.inner.send_lock.lock().await;
        self.inner.sink.send(payload).await?;
        self.inner.sink.send(heartbeat(token)).await
    }

    /// Offer an inbound frame to the registry.
    ///
    /// Returns `None` when the frame resolved a pending command, otherwise
    /// hands the frame back for the general event path.
    pub fn try_match(&self, frame: Frame) -> Option<Frame> {
        let Some(token) = frame.get(TOKEN_FIELD).and_then(Value::as_str) else {
            return Some(frame);
        };

        match self.inner.pending.remove(token) {
            Some((token, pending)) => {
                trace!(%token, "RX: echo matched");
                pending.fulfill(Ok(frame));
                None
            }
            None => {
                trace!(%token, "RX: echo for unknown token");
                Some(frame)
            }
        }
    }

    /// Abandon one pending command, completing its handle with `reason`.
    ///
    /// Returns `false` if the token was already resolved or abandoned.
    pub fn abandon(&self, token: &CorrelationToken, reason: Error) -> bool {
        self.inner.abandon(token.as_str(), reason)
    }

    /// Abandon every pending command with [`Error::ConnectionLost`].
    ///
    /// Returns how many commands were abandoned.
    pub fn abandon_all(&self) -> usize {
        let tokens: Vec<CorrelationToken> = self
            .inner
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut abandoned = 0;
        for token in tokens {
            if let Some((_, pending)) = self.inner.pending.remove(&token) {
                pending.fulfill(Err(Error::ConnectionLost));
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Number of commands still waiting for their echo.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, token: &CorrelationToken) -> bool {
        self.inner.pending.contains_key(token.as_str())
    }
}

fn heartbeat(token: &CorrelationToken) -> Frame {
    json!({ "op": "ping", TOKEN_FIELD: token.as_str() })
}

/// Awaitable outcome of one submitted command.
///
/// Resolves with the decoded echo, or with `Cancelled`, `Timeout`,
/// `ConnectionLost` or `Transport`. Dropping an unresolved handle abandons
/// the command.
#[must_use = "a command handle does nothing unless awaited"]
pub struct CommandHandle<T> {
    token: CorrelationToken,
    rx: oneshot::Receiver<Result<T>>,
    registry: Weak<Inner>,
    deadline: Option<Pin<Box<Sleep>>>,
    done: bool,
}

impl<T> CommandHandle<T> {
    fn new(
        token: CorrelationToken,
        rx: oneshot::Receiver<Result<T>>,
        registry: Weak<Inner>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            token,
            rx,
            registry,
            deadline: default_timeout.map(|d| Box::pin(sleep(d))),
            done: false,
        }
    }

    pub fn token(&self) -> &CorrelationToken {
        &self.token
    }

    /// Replace the deadline, counted from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.deadline = Some(Box::pin(sleep(duration)));
        self
    }

    /// Abandon the command. Awaiting the handle afterwards yields
    /// [`Error::Cancelled`] unless the echo had already been matched.
    pub fn cancel(&self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.abandon(
                self.token.as_str(),
                Error::Cancelled {
                    token: self.token.to_string(),
                },
            );
        }
    }

    fn finish(&mut self, outcome: std::result::Result<Result<T>, oneshot::error::RecvError>) -> Result<T> {
        self.done = true;
        // Sender dropped without a value: the engine itself went away.
        outcome.unwrap_or(Err(Error::ConnectionLost))
    }
}

impl<T> Future for CommandHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(this.finish(outcome));
        }

        let expired = match this.deadline.as_mut() {
            Some(deadline) => deadline.as_mut().poll(cx).is_ready(),
            None => false,
        };
        if expired {
            this.deadline = None;
            match this.registry.upgrade() {
                Some(inner) => {
                    inner.abandon(
                        this.token.as_str(),
                        Error::Timeout {
                            token: this.token.to_string(),
                        },
                    );
                }
                None => {
                    this.done = true;
                    return Poll::Ready(Err(Error::ConnectionLost));
                }
            }
            // Either our abandonment or a racing match has filled the slot,
            // or a match is about to; the receiver's waker covers the latter.
            if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
                return Poll::Ready(this.finish(outcome));
            }
        }

        Poll::Pending
    }
}

impl<T> Drop for CommandHandle<T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            if inner.pending.remove(self.token.as_str()).is_some() {
                trace!(token = %self.token, "Handle dropped, command abandoned");
            }
        }
    }
}

impl<T> fmt::Debug for CommandHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("token", &self.token)
            .field("done", &self.done)
            .finish()
    }
}
