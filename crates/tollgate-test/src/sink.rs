//! Recording event sink.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tollgate_core::CallId;
use tollgate_stream::{EventSink, SseFrame, StreamError, StreamEvent, StreamResult};

/// [`EventSink`] that keeps every frame it is given.
///
/// Clones share the same recording, so a test can hand one clone to the
/// service and inspect another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<SseFrame>>>,
    close_after: Option<usize>,
    disconnect_after: Option<usize>,
}

impl RecordingSink {
    /// A sink that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send once `frames` frames were accepted, as if the client
    /// severed the connection.
    #[must_use]
    pub fn close_after(mut self, frames: usize) -> Self {
        self.close_after = Some(frames);
        self
    }

    /// Report the client gone once `frames` frames were accepted, while
    /// still accepting writes.
    #[must_use]
    pub fn disconnect_after(mut self, frames: usize) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    /// Every accepted frame, in order.
    #[must_use]
    pub fn frames(&self) -> Vec<SseFrame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Every accepted event, in order.
    #[must_use]
    pub fn events(&self) -> Vec<StreamEvent> {
        self.frames()
            .into_iter()
            .map(SseFrame::into_event)
            .collect()
    }

    /// The `type` of every accepted event.
    #[must_use]
    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(StreamEvent::event_type).collect()
    }

    /// The concatenated wire text.
    #[must_use]
    pub fn wire(&self) -> String {
        self.frames().iter().map(SseFrame::to_wire).collect()
    }

    /// How many `stream_end` frames were written.
    #[must_use]
    pub fn stream_ends(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }

    /// Events correlated with `call_id`.
    #[must_use]
    pub fn for_call(&self, call_id: &str) -> Vec<StreamEvent> {
        let call_id = CallId::from(call_id);
        self.events()
            .into_iter()
            .filter(|e| e.call_id() == Some(&call_id))
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
    }

    fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, frame: SseFrame) -> StreamResult<()> {
        let mut frames = self.frames.lock().map_err(|_| StreamError::SinkClosed)?;
        if self.close_after.is_some_and(|limit| frames.len() >= limit) {
            return Err(StreamError::SinkClosed);
        }
        frames.push(frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.disconnect_after
            .is_none_or(|after| self.len() < after)
    }
}
