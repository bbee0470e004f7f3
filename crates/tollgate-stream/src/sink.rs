//! Outbound side of a connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{StreamError, StreamResult};
use crate::event::SseFrame;

/// Where a connection's frames go.
///
/// Implemented by the transport layer. Returning [`StreamError::SinkClosed`]
/// means the client severed the connection; no further frames are sent.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one frame, in order.
    async fn send(&self, frame: SseFrame) -> StreamResult<()>;

    /// Whether the client is still there.
    ///
    /// Polled at cancellation checkpoints. A transport that learns of a
    /// disconnect before a write fails reports it here; the connection then
    /// stops the turn and still writes its terminal frame.
    fn is_connected(&self) -> bool {
        true
    }
}

/// [`EventSink`] that forwards frames into a bounded channel.
///
/// Dropping the receiver is treated as a client disconnect.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<SseFrame>,
}

impl ChannelSink {
    /// Create a sink and the receiver the transport drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SseFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, frame: SseFrame) -> StreamResult<()> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| StreamError::SinkClosed)
    }

    fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
