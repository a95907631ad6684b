//! Client channels.
//!
//! A `ClientChannel` is the server's handle on one streaming connection: a
//! bounded outbound queue drained into the WebSocket by the connection's
//! writer task, plus a close signal. Anything that decides the connection
//! is over (peer hang-up, failed delivery, resolution failure) calls
//! `close`; the handler and writer both watch `closed()`.

use axum::extract::ws::{CloseFrame, Message};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Unique client identifier.
pub type ClientId = Uuid;

/// Buffer size for client message queues.
/// Sized for ~1 second of high-frequency updates at 1000 msgs/sec.
pub const CLIENT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// Outbound side of one client connection.
pub struct ClientChannel {
    /// Unique client identifier.
    pub id: ClientId,
    /// Timestamp when the client connected (ms).
    pub connected_at: i64,
    tx: mpsc::Sender<Message>,
    closed: watch::Sender<bool>,
    close_frame: Mutex<Option<CloseFrame>>,
}

impl ClientChannel {
    /// Create a channel around an existing queue sender.
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now().timestamp_millis(),
            tx,
            closed,
            close_frame: Mutex::new(None),
        }
    }

    /// Create a channel with a fresh queue of the default size.
    pub fn bounded() -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_BUFFER_SIZE);
        (Arc::new(Self::new(tx)), rx)
    }

    /// Enqueue without waiting.
    /// Returns false if the channel is closed or its queue is full.
    pub fn try_deliver(&self, msg: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.try_send(msg).is_ok()
    }

    /// Mark the channel closed. Returns true for the first call only.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Close with a close frame for the writer to send to the peer.
    pub fn close_with(&self, code: u16, reason: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        if let Ok(mut frame) = self.close_frame.lock() {
            frame.get_or_insert(CloseFrame {
                code,
                reason: reason.to_string().into(),
            });
        }
        self.close()
    }

    /// Take the close frame recorded by `close_with`, if any.
    pub fn take_close_frame(&self) -> Option<CloseFrame> {
        self.close_frame.lock().ok().and_then(|mut frame| frame.take())
    }

    /// Time since the client connected.
    pub fn connected_for(&self) -> Duration {
        let elapsed = Utc::now().timestamp_millis() - self.connected_at;
        Duration::from_millis(elapsed.max(0) as u64)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
