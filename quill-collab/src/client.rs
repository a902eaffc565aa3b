//! WebSocket client for the collaboration gateway.
//!
//! Provides:
//! - Connection lifecycle (connect, handshake, disconnect)
//! - Presence: join/leave, throttled cursor updates, heartbeats
//! - Command submission with per-connection sequence numbers
//!
//! Cursor updates are throttled to ~30 Hz with latest-wins semantics:
//! a position arriving inside the throttle window replaces the pending
//! one instead of queueing behind it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::presence::{Cursor, PresenceEvent, PresenceUpdate};
use crate::protocol::{
    CollabMessage, CommandReply, CommandRequest, Hello, MessageKind, ProtocolError,
};

/// Minimum gap between cursor frames on the wire.
const CURSOR_THROTTLE: Duration = Duration::from_millis(33);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established and handshake sent
    Connected,
    /// Connection lost
    Disconnected,
    /// Presence update about another session
    Presence(PresenceUpdate),
    /// Reply to a command this client submitted
    Reply { seq: u64, reply: CommandReply },
}

/// The collaboration client.
///
/// Manages one WebSocket connection to the gateway, scoped to a single
/// document. Command replies are matched to requests by sequence number.
pub struct CollabClient {
    /// This connection's identity on the wire
    client_id: Uuid,
    user_id: Uuid,
    display_name: String,

    /// Document this connection is scoped to
    doc_id: Uuid,

    state: Arc<RwLock<ConnectionState>>,

    /// Per-connection command sequence counter
    next_seq: AtomicU64,

    /// Last cursor frame send time, for throttling
    last_cursor: Mutex<Option<Instant>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<ClientEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<ClientEvent>,

    server_url: String,
}

impl CollabClient {
    /// Create a new client for one document.
    pub fn new(
        user_id: Uuid,
        display_name: impl Into<String>,
        doc_id: Uuid,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            client_id: Uuid::new_v4(),
            user_id,
            display_name: display_name.into(),
            doc_id,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            next_seq: AtomicU64::new(1),
            last_cursor: Mutex::new(None),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to the gateway and perform the Hello handshake.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward the outgoing channel to the socket.
                let writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let w = writer.clone();
                tokio::spawn(async move {
                    while let Some(data) = out_rx.recv().await {
                        let mut sink = w.lock().await;
                        use futures_util::SinkExt;
                        if sink
                            .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });

                // Handshake must be the first frame on the wire.
                let hello = Hello {
                    user_id: self.user_id,
                    display_name: self.display_name.clone(),
                };
                let frame = CollabMessage::hello(self.client_id, self.doc_id, &hello);
                let encoded = frame.encode()?;
                if let Some(ref tx) = self.outgoing_tx {
                    tx.send(encoded)
                        .await
                        .map_err(|_| ProtocolError::ConnectionClosed)?;
                }

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(ClientEvent::Connected).await;

                // Reader task: decode frames into events.
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                let client_id = self.client_id;
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                let Ok(frame) = CollabMessage::decode(&bytes) else {
                                    continue;
                                };
                                let event = match frame.kind {
                                    MessageKind::PresenceUpdate => {
                                        // Skip echoes about this very session.
                                        if frame.client_id == client_id {
                                            continue;
                                        }
                                        match PresenceUpdate::decode(&frame.payload) {
                                            Ok(update) => Some(ClientEvent::Presence(update)),
                                            Err(_) => None,
                                        }
                                    }
                                    MessageKind::CommandReply => match frame.reply_payload() {
                                        Ok(reply) => Some(ClientEvent::Reply {
                                            seq: frame.seq,
                                            reply,
                                        }),
                                        Err(_) => None,
                                    },
                                    MessageKind::Pong => None,
                                    _ => None,
                                };
                                if let Some(evt) = event {
                                    let _ = event_tx.send(evt).await;
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(ClientEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Announce this session on a branch.
    pub async fn join(&self, branch_id: Uuid) -> Result<(), ProtocolError> {
        self.send_presence(PresenceEvent::Join { branch_id }).await
    }

    /// Send a cursor position, throttled to ~30 Hz.
    ///
    /// Returns `false` when the frame was dropped by the throttle.
    /// Presence is loss-tolerant, so a dropped position is simply
    /// superseded by the next one.
    pub async fn send_cursor(&self, branch_id: Uuid, cursor: Cursor) -> Result<bool, ProtocolError> {
        {
            let mut last = self.last_cursor.lock().await;
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < CURSOR_THROTTLE {
                    return Ok(false);
                }
            }
            *last = Some(now);
        }
        self.send_presence(PresenceEvent::Cursor { branch_id, cursor })
            .await?;
        Ok(true)
    }

    /// Send one heartbeat frame.
    pub async fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.send_presence(PresenceEvent::Heartbeat).await
    }

    /// Spawn a background task sending heartbeats at `interval`.
    ///
    /// The task stops when the outgoing channel closes.
    pub fn spawn_heartbeat(&self, interval: Duration) {
        let Some(tx) = self.outgoing_tx.clone() else {
            return;
        };
        let client_id = self.client_id;
        let doc_id = self.doc_id;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Ok(payload) = PresenceEvent::Heartbeat.encode() else {
                    break;
                };
                let frame = CollabMessage::presence(client_id, doc_id, 0, payload);
                let Ok(encoded) = frame.encode() else { break };
                if tx.send(encoded).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Withdraw this session's presence without closing the connection.
    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.send_presence(PresenceEvent::Leave).await
    }

    /// Submit a command; returns its sequence number for matching the
    /// eventual [`ClientEvent::Reply`].
    pub async fn send_command(&self, request: &CommandRequest) -> Result<u64, ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = CollabMessage::command(self.client_id, self.doc_id, seq, request)?;
        let encoded = frame.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(seq)
    }

    /// Send a ping frame.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let frame = CollabMessage::ping(self.client_id);
        let encoded = frame.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    async fn send_presence(&self, event: PresenceEvent) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            // Presence is loss-tolerant; drop silently when offline.
            return Ok(());
        }
        let payload = event
            .encode()
            .map_err(ProtocolError::Serialization)?;
        let frame = CollabMessage::presence(self.client_id, self.doc_id, 0, payload);
        let encoded = frame.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
