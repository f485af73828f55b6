//! SSE transport adapter for chat streams.
//!
//! The orchestrator writes frames through the `ChatSink` capability; this
//! adapter bridges it onto an axum SSE response via a bounded channel. The
//! client dropping the response body closes the receiver, which the sink
//! reports as cancellation.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

use crate::chat::{ChatFrame, ChatSink};

/// Frames buffered between the orchestrator and the HTTP writer.
const CHANNEL_CAPACITY: usize = 32;

/// Channel-backed sink handed to the orchestrator.
pub struct ChannelSink {
    tx: mpsc::Sender<ChatFrame>,
    cancelled: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Create the sink plus the SSE response draining it.
    pub fn new_response_pair() -> (ChannelSink, Response) {
        let (tx, rx) = mpsc::channel::<ChatFrame>(CHANNEL_CAPACITY);
        let sink = ChannelSink {
            tx,
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            let frame = rx.recv().await?;
            let event = Event::default().data(frame.to_json().to_string());
            Some((Ok::<Event, Infallible>(event), rx))
        });

        (sink, Sse::new(stream).into_response())
    }
}

#[async_trait]
impl ChatSink for ChannelSink {
    async fn write_frame(&self, frame: &ChatFrame) -> bool {
        if self.tx.send(frame.clone()).await.is_err() {
            // Receiver gone: the client disconnected
            self.cancelled.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    async fn close(&self) {
        // Dropping the sender ends the SSE stream; nothing to do eagerly.
    }
}
