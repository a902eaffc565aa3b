//! WebSocket collaboration gateway with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (doc_id) ── DocumentState
//! Client B ──┘        │
//!                     ├── FanoutRegistry (doc_id → FanoutGroup)
//!                     ├── AccessGuard (role per user × document)
//!                     ├── PresenceRegistry (sessions, heartbeats)
//!                     └── CollabStore (RocksDB, optional)
//!                              │
//!                   ┌──────────┼───────────┐
//!                   ▼          ▼           ▼
//!                Client A   Client B    Client C
//! ```
//!
//! Every connection starts with a Hello handshake naming the user and
//! document. Presence frames are fire-and-forget and fan out to the
//! room; command frames are request/reply, executed against the room's
//! `DocumentState` under the room lock and answered on the same
//! connection with the request's sequence number echoed back.
//!
//! Presence liveness is server-driven: a background task sweeps out
//! sessions that miss three heartbeat intervals and broadcasts their
//! departure.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::access::{AccessGuard, Capability, Role};
use crate::branch::BranchError;
use crate::broadcast::{FanoutGroup, FanoutRegistry};
use crate::document::{DocError, DocumentState, MergeResult};
use crate::history::HistoryError;
use crate::presence::{PresenceEvent, PresenceRegistry, PresenceUpdate};
use crate::protocol::{
    CollabMessage, CommandReply, CommandRequest, CommitSummary, ErrorKind, MessageKind,
};
use crate::storage::{CollabStore, StoreConfig};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Fan-out channel capacity per room
    pub broadcast_capacity: usize,
    /// Expected client heartbeat cadence; sessions are evicted after
    /// three missed intervals
    pub heartbeat_interval: Duration,
    /// Persistence path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Role assumed for users with no explicit grant (None = first
    /// opener of an unknown document becomes its owner, everyone else
    /// is rejected)
    pub default_role: Option<Role>,
    /// Name given to each document's default branch
    pub default_branch_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            heartbeat_interval: Duration::from_secs(15),
            storage_path: None,
            default_role: None,
            default_branch_name: "main".to_string(),
        }
    }
}

/// Gateway statistics.
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub persisted_commits: u64,
}

/// Deferred storage write, applied after the room lock is released.
enum PersistOp {
    PutBranch(crate::branch::Branch),
    AppendCommit(crate::history::Commit, u64),
    DeleteBranch(Uuid),
}

/// The collaboration gateway.
pub struct CollabGateway {
    config: GatewayConfig,
    /// Authoritative per-document state, mutated under this lock only
    rooms: Arc<RwLock<HashMap<Uuid, DocumentState>>>,
    fanouts: Arc<FanoutRegistry>,
    presence: Arc<RwLock<PresenceRegistry>>,
    guard: Arc<RwLock<AccessGuard>>,
    stats: Arc<RwLock<GatewayStats>>,
    store: Option<Arc<CollabStore>>,
}

impl CollabGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let store = config.storage_path.as_ref().map(|path| {
            let store_config = StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            };
            Arc::new(CollabStore::open(store_config).expect("Failed to open collab store"))
        });

        let guard = match config.default_role {
            Some(role) => AccessGuard::with_default_role(role),
            None => AccessGuard::new(),
        };

        let fanouts = Arc::new(FanoutRegistry::new(config.broadcast_capacity));

        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            fanouts,
            presence: Arc::new(RwLock::new(PresenceRegistry::new())),
            guard: Arc::new(RwLock::new(guard)),
            stats: Arc::new(RwLock::new(GatewayStats::default())),
            store,
        }
    }

    /// In-memory gateway with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(GatewayConfig::default())
    }

    /// Gateway with persistence enabled at the given path.
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let config = GatewayConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..GatewayConfig::default()
        };
        Self::new(config)
    }

    /// Provision a role grant outside the protocol (operator path).
    pub async fn seed_role(&self, doc_id: Uuid, user_id: Uuid, role: Role) {
        self.guard.write().await.seed(doc_id, user_id, role);
    }

    /// Load all persisted documents into rooms on startup.
    pub async fn recover(&self) -> Result<usize, Box<dyn std::error::Error>> {
        let store = match &self.store {
            Some(s) => s,
            None => return Ok(0),
        };

        let doc_ids = store.list_documents()?;
        let mut recovered = 0;
        for doc_id in &doc_ids {
            match store.load_document(*doc_id) {
                Ok(state) => {
                    let mut rooms = self.rooms.write().await;
                    rooms.entry(*doc_id).or_insert(state);
                    recovered += 1;
                    log::info!("Recovered document {doc_id} from storage");
                }
                Err(e) => log::error!("Failed to recover document {doc_id}: {e}"),
            }
        }

        log::info!(
            "Recovery complete: {recovered}/{} documents restored",
            doc_ids.len()
        );
        Ok(recovered)
    }

    /// Run the gateway: recovery, the heartbeat sweeper and the accept
    /// loop. Call from an async runtime; never returns under normal
    /// operation.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let recovered = self.recover().await?;
        if recovered > 0 {
            log::info!("Recovered {recovered} documents from persistent storage");
        }

        self.spawn_sweeper();

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collab gateway listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let fanouts = self.fanouts.clone();
            let presence = self.presence.clone();
            let guard = self.guard.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            let store = self.store.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(
                    stream, addr, rooms, fanouts, presence, guard, stats, config, store,
                )
                .await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Background task evicting sessions that missed three heartbeats,
    /// broadcasting their departure to the affected rooms.
    fn spawn_sweeper(&self) {
        let presence = self.presence.clone();
        let fanouts = self.fanouts.clone();
        let interval = self.config.heartbeat_interval;
        let timeout = interval * 3;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = presence.write().await.sweep_all(timeout);
                if evicted.is_empty() {
                    continue;
                }
                for (doc_id, clients) in evicted {
                    let Some(fanout) = fanouts.get(&doc_id).await else {
                        continue;
                    };
                    for client_id in clients {
                        log::info!("Session {client_id} timed out in document {doc_id}");
                        Self::fan_out_update(
                            &fanout,
                            client_id,
                            doc_id,
                            &PresenceUpdate::Left { client_id },
                        );
                    }
                }
            }
        });
    }

    /// Handle one WebSocket connection, handshake to teardown.
    #[allow(clippy::too_many_arguments)]
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RwLock<HashMap<Uuid, DocumentState>>>,
        fanouts: Arc<FanoutRegistry>,
        presence: Arc<RwLock<PresenceRegistry>>,
        guard: Arc<RwLock<AccessGuard>>,
        stats: Arc<RwLock<GatewayStats>>,
        config: GatewayConfig,
        store: Option<Arc<CollabStore>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Handshake: the first binary frame must be a Hello.
        let (client_id, doc_id, user_id, display_name) = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    let msg = CollabMessage::decode(&bytes)?;
                    if msg.kind != MessageKind::Hello {
                        Self::drop_connection(&stats).await;
                        return Err(crate::protocol::ProtocolError::HandshakeExpected.into());
                    }
                    let hello = msg.hello_payload()?;
                    break (msg.client_id, msg.doc_id, hello.user_id, hello.display_name);
                }
                Some(Ok(Message::Close(_))) | None => {
                    Self::drop_connection(&stats).await;
                    return Ok(());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    Self::drop_connection(&stats).await;
                    return Err(e.into());
                }
            }
        };

        // First opener of an unknown document becomes its owner.
        {
            let known = rooms.read().await.contains_key(&doc_id)
                || store
                    .as_ref()
                    .map(|s| s.document_exists(doc_id).unwrap_or(false))
                    .unwrap_or(false);
            let mut guard_w = guard.write().await;
            if !known && guard_w.role(user_id, doc_id).is_none() {
                guard_w.bootstrap_owner(doc_id, user_id);
                log::info!("User {user_id} bootstrapped as owner of document {doc_id}");
            }
        }

        // The connection must at least be able to view the document.
        if let Err(e) = guard
            .read()
            .await
            .authorize(user_id, doc_id, Capability::ViewDocument)
        {
            let reply = CommandReply::Error {
                kind: ErrorKind::Authorization,
                message: e.to_string(),
            };
            let frame = CollabMessage::command_reply(doc_id, 0, &reply)?;
            ws_sender.send(Message::Binary(frame.encode()?.into())).await?;
            ws_sender.close().await.ok();
            Self::drop_connection(&stats).await;
            return Ok(());
        }

        // Get or create the room, then subscribe to its fan-out group.
        let branches_snapshot = {
            let mut rooms_w = rooms.write().await;
            let state = rooms_w.entry(doc_id).or_insert_with(|| {
                store
                    .as_ref()
                    .and_then(|s| s.load_document(doc_id).ok())
                    .unwrap_or_else(|| {
                        DocumentState::new(doc_id, &config.default_branch_name, user_id)
                    })
            });
            let snapshot = state.list_branches();
            let room_count = rooms_w.len();
            drop(rooms_w);
            stats.write().await.active_rooms = room_count;
            snapshot
        };
        let fanout = fanouts.get_or_create(doc_id).await;
        let mut broadcast_rx = fanout.subscribe();

        // Opening snapshot so the client can render the branch tree
        // before issuing any command.
        let snapshot_frame =
            CollabMessage::command_reply(doc_id, 0, &CommandReply::Branches(branches_snapshot))?;
        ws_sender
            .send(Message::Binary(snapshot_frame.encode()?.into()))
            .await?;

        log::info!("User {display_name} ({user_id}) opened document {doc_id}");

        let mut joined = false;
        let mut current_branch: Option<Uuid> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let frame = match CollabMessage::decode(&bytes) {
                                Ok(f) => f,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match frame.kind {
                                MessageKind::Presence => {
                                    let event = match PresenceEvent::decode(&frame.payload) {
                                        Ok(ev) => ev,
                                        Err(e) => {
                                            // Malformed presence is dropped, never fatal.
                                            log::warn!("Bad presence event from {client_id}: {e}");
                                            continue;
                                        }
                                    };
                                    match event {
                                        PresenceEvent::Join { branch_id } => {
                                            current_branch = Some(branch_id);
                                            let info = presence.write().await.join(
                                                doc_id,
                                                client_id,
                                                user_id,
                                                display_name.clone(),
                                                branch_id,
                                            );
                                            joined = true;

                                            // Replay existing sessions to the newcomer only.
                                            let peers =
                                                presence.read().await.peers(doc_id, client_id);
                                            for peer in peers {
                                                let update = PresenceUpdate::Joined(peer.clone());
                                                if let Ok(payload) = update.encode() {
                                                    let reply = CollabMessage::presence_update(
                                                        peer.client_id, doc_id, payload,
                                                    );
                                                    if let Ok(encoded) = reply.encode() {
                                                        ws_sender
                                                            .send(Message::Binary(encoded.into()))
                                                            .await?;
                                                    }
                                                }
                                            }

                                            Self::fan_out_update(
                                                &fanout,
                                                client_id,
                                                doc_id,
                                                &PresenceUpdate::Joined(info),
                                            );
                                        }
                                        PresenceEvent::Cursor { branch_id, cursor } => {
                                            current_branch = Some(branch_id);
                                            let tracked = presence.write().await.update_cursor(
                                                doc_id, client_id, branch_id, cursor,
                                            );
                                            if tracked {
                                                Self::fan_out_update(
                                                    &fanout,
                                                    client_id,
                                                    doc_id,
                                                    &PresenceUpdate::Cursor {
                                                        client_id,
                                                        branch_id,
                                                        cursor,
                                                    },
                                                );
                                            }
                                        }
                                        PresenceEvent::Heartbeat => {
                                            presence.write().await.heartbeat(doc_id, client_id);
                                        }
                                        PresenceEvent::Leave => {
                                            if joined {
                                                presence.write().await.leave(doc_id, client_id);
                                                Self::fan_out_update(
                                                    &fanout,
                                                    client_id,
                                                    doc_id,
                                                    &PresenceUpdate::Left { client_id },
                                                );
                                                joined = false;
                                            }
                                        }
                                    }
                                }

                                MessageKind::Command => {
                                    let request = match frame.command_payload() {
                                        Ok(req) => req,
                                        Err(e) => {
                                            let reply = CommandReply::Error {
                                                kind: ErrorKind::Protocol,
                                                message: e.to_string(),
                                            };
                                            let out = CollabMessage::command_reply(
                                                doc_id, frame.seq, &reply,
                                            )?;
                                            ws_sender
                                                .send(Message::Binary(out.encode()?.into()))
                                                .await?;
                                            continue;
                                        }
                                    };

                                    let reply = Self::execute_command(
                                        &rooms,
                                        &guard,
                                        &stats,
                                        store.as_deref(),
                                        doc_id,
                                        user_id,
                                        current_branch,
                                        request,
                                    )
                                    .await;
                                    let out =
                                        CollabMessage::command_reply(doc_id, frame.seq, &reply)?;
                                    ws_sender
                                        .send(Message::Binary(out.encode()?.into()))
                                        .await?;
                                }

                                MessageKind::Ping => {
                                    let pong = CollabMessage::pong(client_id);
                                    ws_sender
                                        .send(Message::Binary(pong.encode()?.into()))
                                        .await?;
                                }

                                other => {
                                    log::debug!("Unhandled frame kind {other:?} from {client_id}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                msg = broadcast_rx.recv() => {
                    match msg {
                        Ok(data) => {
                            // Skip frames about this very session.
                            if let Ok(frame) = CollabMessage::decode(&data) {
                                if frame.client_id == client_id {
                                    continue;
                                }
                            }
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            fanout.note_lag(n);
                            log::warn!("Session {client_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Teardown: announce departure, then close the room if this was
        // the last subscriber.
        if joined {
            presence.write().await.leave(doc_id, client_id);
            Self::fan_out_update(&fanout, client_id, doc_id, &PresenceUpdate::Left { client_id });
        }
        drop(broadcast_rx);

        {
            // The room lock is held across the idle check so a newcomer
            // cannot resurrect the room while its state is being saved.
            let mut rooms_w = rooms.write().await;
            if fanouts.remove_if_idle(&doc_id).await {
                if let Some(state) = rooms_w.remove(&doc_id) {
                    if let Some(ref s) = store {
                        if let Err(e) = s.save_document(&state) {
                            log::error!("Failed to persist document {doc_id}: {e}");
                        } else {
                            log::info!("Persisted document {doc_id} (room closing)");
                        }
                    }
                    log::info!("Room {doc_id} removed (empty)");
                }
            }
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = rooms_w.len();
        }

        Ok(())
    }

    /// Encode and publish one presence update to the room.
    fn fan_out_update(
        fanout: &FanoutGroup,
        client_id: Uuid,
        doc_id: Uuid,
        update: &PresenceUpdate,
    ) {
        let Ok(payload) = update.encode() else {
            return;
        };
        let frame = CollabMessage::presence_update(client_id, doc_id, payload);
        if let Ok(encoded) = frame.encode() {
            fanout.publish_raw(Arc::new(encoded));
        }
    }

    /// Execute one command against the room state.
    ///
    /// Authorization happens before the room lock is taken; storage
    /// writes happen after it is released.
    #[allow(clippy::too_many_arguments)]
    async fn execute_command(
        rooms: &RwLock<HashMap<Uuid, DocumentState>>,
        guard: &RwLock<AccessGuard>,
        stats: &RwLock<GatewayStats>,
        store: Option<&CollabStore>,
        doc_id: Uuid,
        user_id: Uuid,
        current_branch: Option<Uuid>,
        request: CommandRequest,
    ) -> CommandReply {
        let capability = Self::required_capability(&request);
        let role = match guard.read().await.authorize(user_id, doc_id, capability) {
            Ok(role) => role,
            Err(e) => {
                return CommandReply::Error {
                    kind: ErrorKind::Authorization,
                    message: e.to_string(),
                }
            }
        };

        let (reply, ops) = {
            let mut rooms_w = rooms.write().await;
            let Some(state) = rooms_w.get_mut(&doc_id) else {
                return CommandReply::Error {
                    kind: ErrorKind::NotFound,
                    message: format!("document {doc_id} has no open room"),
                };
            };
            Self::apply_request(state, request, user_id, role, current_branch)
        };

        if let Some(store) = store {
            let mut persisted_commits = 0u64;
            for op in ops {
                let result = match op {
                    PersistOp::PutBranch(ref branch) => store.put_branch(branch),
                    PersistOp::AppendCommit(ref commit, seq) => {
                        persisted_commits += 1;
                        store.append_commit(doc_id, commit, seq)
                    }
                    PersistOp::DeleteBranch(branch_id) => {
                        store.delete_branch(doc_id, branch_id).map(|_| ())
                    }
                };
                if let Err(e) = result {
                    log::error!("Storage write failed for document {doc_id}: {e}");
                }
            }
            if persisted_commits > 0 {
                stats.write().await.persisted_commits += persisted_commits;
            }
        }

        reply
    }

    /// Minimum capability for each request.
    fn required_capability(request: &CommandRequest) -> Capability {
        match request {
            CommandRequest::CreateBranch { .. } => Capability::CreateBranch,
            CommandRequest::UpdateBranch { .. } => Capability::EditBranch,
            CommandRequest::DeleteBranch { .. } => Capability::DeleteBranch,
            CommandRequest::ListBranches | CommandRequest::Hierarchy { .. } => {
                Capability::ViewBranch
            }
            CommandRequest::History { .. } => Capability::ViewBranch,
            CommandRequest::Commit { .. } | CommandRequest::Restore { .. } => Capability::Commit,
            CommandRequest::Merge { .. } => Capability::Merge,
        }
    }

    /// Apply one request to the document state, collecting the storage
    /// writes it implies.
    fn apply_request(
        state: &mut DocumentState,
        request: CommandRequest,
        user_id: Uuid,
        role: Role,
        current_branch: Option<Uuid>,
    ) -> (CommandReply, Vec<PersistOp>) {
        match request {
            CommandRequest::CreateBranch {
                name,
                parent,
                description,
            } => {
                let parent = parent.or(current_branch);
                match state.create_branch(name, parent, description, user_id, role) {
                    Ok((branch, fork)) => {
                        let mut ops = vec![PersistOp::PutBranch(branch.clone())];
                        if let Some(fork) = fork {
                            ops.push(PersistOp::AppendCommit(fork, 0));
                        }
                        (CommandReply::Branch(branch), ops)
                    }
                    Err(e) => (Self::error_reply(e), Vec::new()),
                }
            }

            CommandRequest::UpdateBranch {
                branch_id,
                name,
                description,
            } => match state.update_branch(branch_id, name, description, role) {
                Ok(branch) => {
                    let ops = vec![PersistOp::PutBranch(branch.clone())];
                    (CommandReply::Branch(branch), ops)
                }
                Err(e) => (Self::error_reply(e), Vec::new()),
            },

            CommandRequest::DeleteBranch { branch_id } => {
                match state.delete_branch(branch_id, role) {
                    Ok(removed) => (
                        CommandReply::Deleted {
                            branch_id: removed.id,
                        },
                        vec![PersistOp::DeleteBranch(removed.id)],
                    ),
                    Err(e) => (Self::error_reply(e), Vec::new()),
                }
            }

            CommandRequest::ListBranches => {
                (CommandReply::Branches(state.list_branches()), Vec::new())
            }

            CommandRequest::Hierarchy { branch_id } => match state.hierarchy(branch_id) {
                Ok(chain) => (CommandReply::Hierarchy(chain), Vec::new()),
                Err(e) => (Self::error_reply(e), Vec::new()),
            },

            CommandRequest::Commit {
                branch_id,
                content,
                expected_head,
                message,
            } => match state.commit(branch_id, content, user_id, message, expected_head, role) {
                Ok((commit, seq)) => {
                    let branch = state
                        .branches()
                        .get(branch_id)
                        .cloned()
                        .expect("commit target exists");
                    let ops = vec![
                        PersistOp::AppendCommit(commit.clone(), seq),
                        PersistOp::PutBranch(branch),
                    ];
                    (CommandReply::Committed(commit), ops)
                }
                Err(e) => (Self::error_reply(e), Vec::new()),
            },

            CommandRequest::History {
                branch_id,
                limit,
                cursor,
            } => {
                let limit = limit.clamp(1, 500);
                let history = match state.history(branch_id) {
                    Ok(h) => h,
                    Err(e) => return (Self::error_reply(e), Vec::new()),
                };
                match history.page(limit, cursor) {
                    Ok((commits, next)) => {
                        let commits = commits
                            .into_iter()
                            .map(|c| CommitSummary {
                                id: c.id,
                                parent: c.parent,
                                author: c.author,
                                created_at: c.created_at,
                                message: c.message.clone(),
                                lines: c.content.len(),
                            })
                            .collect();
                        (CommandReply::History { commits, next }, Vec::new())
                    }
                    Err(e) => (Self::error_reply(DocError::History(e)), Vec::new()),
                }
            }

            CommandRequest::Restore {
                branch_id,
                commit_id,
            } => match state.restore(branch_id, commit_id, user_id, role) {
                Ok((commit, seq)) => {
                    let branch = state
                        .branches()
                        .get(branch_id)
                        .cloned()
                        .expect("restore target exists");
                    let ops = vec![
                        PersistOp::AppendCommit(commit.clone(), seq),
                        PersistOp::PutBranch(branch),
                    ];
                    (CommandReply::Committed(commit), ops)
                }
                Err(e) => (Self::error_reply(e), Vec::new()),
            },

            CommandRequest::Merge { source, target } => {
                match state.merge(source, target, user_id, role) {
                    Ok((MergeResult::Merged(commit), seq)) => {
                        let branch = state
                            .branches()
                            .get(target)
                            .cloned()
                            .expect("merge target exists");
                        let ops = vec![
                            PersistOp::AppendCommit(
                                commit.clone(),
                                seq.expect("merged commit has a sequence"),
                            ),
                            PersistOp::PutBranch(branch),
                        ];
                        (CommandReply::Merged(commit), ops)
                    }
                    Ok((MergeResult::Conflicts(regions), _)) => {
                        (CommandReply::MergeConflicts(regions), Vec::new())
                    }
                    Err(e) => (Self::error_reply(e), Vec::new()),
                }
            }
        }
    }

    /// Map engine errors onto the wire taxonomy.
    fn error_reply(e: DocError) -> CommandReply {
        let kind = match &e {
            DocError::Branch(BranchError::Validation(_)) => ErrorKind::Validation,
            DocError::Branch(BranchError::Protected(_)) => ErrorKind::Protected,
            DocError::Branch(BranchError::Conflict(_)) => ErrorKind::Conflict,
            DocError::Branch(BranchError::NotFound(_)) => ErrorKind::NotFound,
            DocError::Branch(BranchError::Forbidden(_)) => ErrorKind::Authorization,
            DocError::History(HistoryError::StaleHead { .. }) => ErrorKind::StaleHead,
            DocError::History(HistoryError::NotFound(_)) => ErrorKind::NotFound,
        };
        CommandReply::Error {
            kind,
            message: e.to_string(),
        }
    }

    async fn drop_connection(stats: &RwLock<GatewayStats>) {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }

    /// Gateway statistics snapshot.
    pub async fn stats(&self) -> GatewayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn store(&self) -> Option<&Arc<CollabStore>> {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert!(config.storage_path.is_none());
        assert!(config.default_role.is_none());
        assert_eq!(config.default_branch_name, "main");
    }

    #[test]
    fn test_gateway_creation() {
        let gateway = CollabGateway::with_defaults();
        assert_eq!(gateway.bind_addr(), "127.0.0.1:9090");
        assert!(gateway.store().is_none());
    }

    #[tokio::test]
    async fn test_gateway_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = CollabGateway::with_storage("127.0.0.1:0", dir.path().join("db"));
        assert!(gateway.store().is_some());
    }

    #[tokio::test]
    async fn test_gateway_stats_initial() {
        let gateway = CollabGateway::with_defaults();
        let stats = gateway.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.persisted_commits, 0);
    }

    #[tokio::test]
    async fn test_recovery_without_storage() {
        let gateway = CollabGateway::with_defaults();
        assert_eq!(gateway.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recovery_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db");
        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();

        {
            let store = CollabStore::open(StoreConfig {
                path: db_path.clone(),
                ..StoreConfig::default()
            })
            .unwrap();
            let mut state = DocumentState::new(doc_id, "main", author);
            let main = state.branches().default_id();
            let (commit, seq) = state
                .commit(
                    main,
                    vec!["persisted line".to_string()],
                    author,
                    None,
                    None,
                    Role::Editor,
                )
                .unwrap();
            store.append_commit(doc_id, &commit, seq).unwrap();
            store.save_document(&state).unwrap();
        }

        let gateway = CollabGateway::with_storage("127.0.0.1:0", &db_path);
        assert_eq!(gateway.recover().await.unwrap(), 1);

        let rooms = gateway.rooms.read().await;
        let state = rooms.get(&doc_id).unwrap();
        let main = state.branches().default_id();
        assert_eq!(state.history(main).unwrap().len(), 1);
        drop(rooms);

        // Fan-out groups are created by connections, not by recovery.
        assert_eq!(gateway.fanouts.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_fanout_groups_follow_registry() {
        let gateway = CollabGateway::with_defaults();
        let doc_id = Uuid::new_v4();

        let group = gateway.fanouts.get_or_create(doc_id).await;
        let rx = group.subscribe();
        assert_eq!(gateway.fanouts.group_count().await, 1);

        // An occupied group survives the idle check, an empty one does not.
        assert!(!gateway.fanouts.remove_if_idle(&doc_id).await);
        drop(rx);
        assert!(gateway.fanouts.remove_if_idle(&doc_id).await);
        assert_eq!(gateway.fanouts.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_seed_role() {
        let gateway = CollabGateway::with_defaults();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();
        gateway.seed_role(doc, user, Role::Reviewer).await;
        let role = gateway.guard.read().await.role(user, doc);
        assert_eq!(role, Some(Role::Reviewer));
    }

    #[test]
    fn test_required_capabilities() {
        assert_eq!(
            CollabGateway::required_capability(&CommandRequest::ListBranches),
            Capability::ViewBranch
        );
        assert_eq!(
            CollabGateway::required_capability(&CommandRequest::Merge {
                source: Uuid::new_v4(),
                target: Uuid::new_v4(),
            }),
            Capability::Merge
        );
    }

    #[test]
    fn test_error_reply_mapping() {
        let reply = CollabGateway::error_reply(DocError::History(HistoryError::StaleHead {
            expected: None,
            actual: None,
        }));
        match reply {
            CommandReply::Error { kind, .. } => assert_eq!(kind, ErrorKind::StaleHead),
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_apply_create_and_commit() {
        let author = Uuid::new_v4();
        let mut state = DocumentState::new(Uuid::new_v4(), "main", author);
        let main = state.branches().default_id();

        let (reply, ops) = CollabGateway::apply_request(
            &mut state,
            CommandRequest::Commit {
                branch_id: main,
                content: vec!["first".to_string()],
                expected_head: None,
                message: None,
            },
            author,
            Role::Owner,
            None,
        );
        assert!(matches!(reply, CommandReply::Committed(_)));
        assert_eq!(ops.len(), 2);

        let (reply, ops) = CollabGateway::apply_request(
            &mut state,
            CommandRequest::CreateBranch {
                name: "alt".to_string(),
                parent: None,
                description: None,
            },
            author,
            Role::Owner,
            Some(main),
        );
        match reply {
            CommandReply::Branch(branch) => assert_eq!(branch.name, "alt"),
            other => panic!("expected branch reply, got {other:?}"),
        }
        // Branch record plus the fork commit.
        assert_eq!(ops.len(), 2);
    }
}
