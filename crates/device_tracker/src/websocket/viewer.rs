use crate::websocket::ViewerSink;
use anyhow::Context;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;

/// Write half of a browser WebSocket.
///
/// Broadcasts and the join-time catch-up may race; the mutex keeps frames whole.
pub struct WebSocketViewer {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

impl WebSocketViewer {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

#[async_trait]
impl ViewerSink for WebSocketViewer {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        let text = String::from_utf8(payload.to_vec()).context("snapshot is not valid UTF-8")?;
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .context("websocket write failed")
    }
}
