//! Seam to the transport that owns the actual duplex connection.
//!
//! The transport opens the socket, reconnects and frames bytes. This crate
//! only needs somewhere to push outbound frames and a stream of inbound
//! ones (see [`Node::run`](crate::node::Node::run)).

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// One structured message on the node connection.
pub type Frame = Value;

/// Outbound half of a node connection.
///
/// Each call to `send` must enqueue exactly one whole frame, and frames
/// must reach the node in the order `send` was called on the same sink.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Enqueue one frame for delivery.
    async fn send(&self, frame: Frame) -> Result<()>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<Frame> {
    async fn send(&self, frame: Frame) -> Result<()> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| Error::Transport("outbound channel closed".to_string()))
    }
}

#[async_trait]
impl FrameSink for mpsc::UnboundedSender<Frame> {
    async fn send(&self, frame: Frame) -> Result<()> {
        mpsc::UnboundedSender::send(self, frame)
            .map_err(|_| Error::Transport("outbound channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bounded_channel_preserves_order() {
        let (tx, mut rx) = mpsc::channel::<Frame>(4);
        let sink: &dyn FrameSink = &tx;

        sink.send(json!({"op": "play"})).await.unwrap();
        sink.send(json!({"op": "ping"})).await.unwrap();

        assert_eq!(rx.recv().await.unwrap()["op"], "play");
        assert_eq!(rx.recv().await.unwrap()["op"], "ping");
    }

    #[tokio::test]
    async fn closed_channel_is_transport_error() {
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        drop(rx);

        let err = FrameSink::send(&tx, json!({"op": "stop"})).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
