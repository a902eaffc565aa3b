//! Presence protocol for real-time "who's editing what" awareness.
//!
//! Tracks active sessions per document: cursor positions, branch focus,
//! display colors, and heartbeat liveness.
//!
//! ## Architecture
//!
//! ```text
//! Client cursor move
//!       │
//!       ▼
//! PresenceEvent::Cursor { … }   (rate-limited client-side: 30fps)
//!       │
//!       ▼   (WebSocket)
//! PresenceRegistry::update_cursor()
//!       │
//!       ▼
//! PresenceUpdate::Cursor { … }
//!       │
//!       ▼   (fan-out to every other subscriber of the document)
//! Remote clients
//! ```
//!
//! Presence is ephemeral: nothing here touches storage, and a session
//! that stops heartbeating is swept out after three missed intervals.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// Caret position within a branch's content.
///
/// `offset` is a character offset into the joined document text;
/// `selection_end`, when present, marks the far end of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Cursor {
    pub offset: u64,
    pub selection_end: Option<u64>,
}

impl Cursor {
    pub fn at(offset: u64) -> Self {
        Self {
            offset,
            selection_end: None,
        }
    }

    pub fn selection(start: u64, end: u64) -> Self {
        Self {
            offset: start,
            selection_end: Some(end),
        }
    }

    pub fn has_selection(&self) -> bool {
        self.selection_end.is_some()
    }
}

/// RGBA display color attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl SessionColor {
    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Stable fallback color derived from a UUID, used once the fixed
    /// palette is exhausted. High saturation keeps cursors legible.
    pub fn from_uuid(id: Uuid) -> Self {
        let hash = id.as_u128();
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Fixed palette handed out to the first eight sessions in a document.
pub const PALETTE: [SessionColor; 8] = [
    SessionColor { r: 0.26, g: 0.52, b: 0.96, a: 1.0 }, // blue
    SessionColor { r: 0.92, g: 0.26, b: 0.21, a: 1.0 }, // red
    SessionColor { r: 0.20, g: 0.66, b: 0.33, a: 1.0 }, // green
    SessionColor { r: 0.98, g: 0.74, b: 0.02, a: 1.0 }, // amber
    SessionColor { r: 0.61, g: 0.15, b: 0.69, a: 1.0 }, // purple
    SessionColor { r: 0.00, g: 0.74, b: 0.83, a: 1.0 }, // cyan
    SessionColor { r: 0.96, g: 0.49, b: 0.00, a: 1.0 }, // orange
    SessionColor { r: 0.91, g: 0.12, b: 0.39, a: 1.0 }, // pink
];

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

// ───────────────────────────────────────────────────────────────────
// Wire protocol messages
// ───────────────────────────────────────────────────────────────────

/// Presence events sent client → server.
///
/// Serialized inside `CollabMessage` presence payloads. Cursor updates
/// are rate-limited client-side to 30fps (33ms); the rest are immediate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PresenceEvent {
    /// Announce focus on a branch after the handshake.
    Join { branch_id: Uuid },
    /// Cursor moved (high frequency, latest-wins).
    Cursor { branch_id: Uuid, cursor: Cursor },
    /// Keep-alive; carries no payload.
    Heartbeat,
    /// Clean departure.
    Leave,
}

impl PresenceEvent {
    #[inline(always)]
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| e.to_string())
    }

    #[inline(always)]
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| e.to_string())?;
        Ok(msg)
    }
}

/// Presence updates fanned out server → clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PresenceUpdate {
    /// A session joined (or refocused) the document.
    Joined(SessionInfo),
    /// A session's cursor moved.
    Cursor {
        client_id: Uuid,
        branch_id: Uuid,
        cursor: Cursor,
    },
    /// A session departed, cleanly or by heartbeat timeout.
    Left { client_id: Uuid },
}

impl PresenceUpdate {
    #[inline(always)]
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| e.to_string())
    }

    #[inline(always)]
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| e.to_string())?;
        Ok(msg)
    }
}

/// Public snapshot of a session, as shipped to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub branch_id: Uuid,
    pub cursor: Cursor,
    pub color: SessionColor,
    /// Epoch seconds at join time.
    pub joined_at: u64,
}

// ───────────────────────────────────────────────────────────────────
// Server-side session tracking
// ───────────────────────────────────────────────────────────────────

/// One live connection's presence state.
#[derive(Debug, Clone)]
struct Session {
    info: SessionInfo,
    last_heartbeat: Instant,
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sessions active in one document.
#[derive(Debug, Default)]
pub struct DocumentPresence {
    sessions: HashMap<Uuid, Session>,
}

impl DocumentPresence {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Register a session and return its public snapshot.
    ///
    /// Colors come from the fixed palette, first unused slot wins; a
    /// returning user keeps their earlier color, and the UUID-derived
    /// fallback covers documents with more than eight sessions. A rejoin
    /// under an existing client_id replaces the old session.
    pub fn join(
        &mut self,
        client_id: Uuid,
        user_id: Uuid,
        display_name: String,
        branch_id: Uuid,
    ) -> SessionInfo {
        let color = self.color_for(client_id, user_id);
        let info = SessionInfo {
            client_id,
            user_id,
            display_name,
            branch_id,
            cursor: Cursor::default(),
            color,
            joined_at: epoch_secs(),
        };
        self.sessions.insert(
            client_id,
            Session {
                info: info.clone(),
                last_heartbeat: Instant::now(),
            },
        );
        info
    }

    fn color_for(&self, client_id: Uuid, user_id: Uuid) -> SessionColor {
        // Same user, same color, even across tabs.
        if let Some(existing) = self
            .sessions
            .values()
            .find(|s| s.info.user_id == user_id && s.info.client_id != client_id)
        {
            return existing.info.color;
        }
        for candidate in PALETTE {
            let taken = self
                .sessions
                .values()
                .any(|s| s.info.client_id != client_id && s.info.color == candidate);
            if !taken {
                return candidate;
            }
        }
        SessionColor::from_uuid(client_id)
    }

    /// Move a session's cursor; refreshes the heartbeat as a side effect.
    pub fn update_cursor(&mut self, client_id: Uuid, branch_id: Uuid, cursor: Cursor) -> bool {
        match self.sessions.get_mut(&client_id) {
            Some(session) => {
                session.info.branch_id = branch_id;
                session.info.cursor = cursor;
                session.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Record a keep-alive for a session.
    pub fn heartbeat(&mut self, client_id: Uuid) -> bool {
        match self.sessions.get_mut(&client_id) {
            Some(session) => {
                session.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a session, returning its snapshot if it was present.
    pub fn leave(&mut self, client_id: Uuid) -> Option<SessionInfo> {
        self.sessions.remove(&client_id).map(|s| s.info)
    }

    /// Remove and return every session whose last heartbeat is older
    /// than `timeout`.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_heartbeat.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.sessions.remove(id);
        }
        stale
    }

    /// Snapshots of every session except `exclude`, for the join replay.
    pub fn peers(&self, exclude: Uuid) -> Vec<SessionInfo> {
        let mut peers: Vec<SessionInfo> = self
            .sessions
            .values()
            .filter(|s| s.info.client_id != exclude)
            .map(|s| s.info.clone())
            .collect();
        peers.sort_by_key(|p| (p.joined_at, p.client_id));
        peers
    }

    pub fn get(&self, client_id: Uuid) -> Option<&SessionInfo> {
        self.sessions.get(&client_id).map(|s| &s.info)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Presence across all open documents, keyed by doc_id.
///
/// Purely synchronous; the gateway wraps it in an async lock and owns
/// the sweep cadence.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    docs: HashMap<Uuid, DocumentPresence>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            docs: HashMap::new(),
        }
    }

    pub fn join(
        &mut self,
        doc_id: Uuid,
        client_id: Uuid,
        user_id: Uuid,
        display_name: String,
        branch_id: Uuid,
    ) -> SessionInfo {
        self.docs
            .entry(doc_id)
            .or_default()
            .join(client_id, user_id, display_name, branch_id)
    }

    pub fn update_cursor(
        &mut self,
        doc_id: Uuid,
        client_id: Uuid,
        branch_id: Uuid,
        cursor: Cursor,
    ) -> bool {
        self.docs
            .get_mut(&doc_id)
            .map(|doc| doc.update_cursor(client_id, branch_id, cursor))
            .unwrap_or(false)
    }

    pub fn heartbeat(&mut self, doc_id: Uuid, client_id: Uuid) -> bool {
        self.docs
            .get_mut(&doc_id)
            .map(|doc| doc.heartbeat(client_id))
            .unwrap_or(false)
    }

    /// Remove a session; drops the document entry once it empties.
    pub fn leave(&mut self, doc_id: Uuid, client_id: Uuid) -> Option<SessionInfo> {
        let doc = self.docs.get_mut(&doc_id)?;
        let info = doc.leave(client_id);
        if doc.is_empty() {
            self.docs.remove(&doc_id);
        }
        info
    }

    /// Sweep every document; returns (doc_id, evicted client_ids) pairs
    /// for documents that lost at least one session.
    pub fn sweep_all(&mut self, timeout: Duration) -> Vec<(Uuid, Vec<Uuid>)> {
        let mut evicted = Vec::new();
        let mut emptied = Vec::new();
        for (doc_id, doc) in self.docs.iter_mut() {
            let stale = doc.sweep(timeout);
            if !stale.is_empty() {
                evicted.push((*doc_id, stale));
            }
            if doc.is_empty() {
                emptied.push(*doc_id);
            }
        }
        for doc_id in emptied {
            self.docs.remove(&doc_id);
        }
        evicted
    }

    pub fn peers(&self, doc_id: Uuid, exclude: Uuid) -> Vec<SessionInfo> {
        self.docs
            .get(&doc_id)
            .map(|doc| doc.peers(exclude))
            .unwrap_or_default()
    }

    pub fn session_count(&self, doc_id: Uuid) -> usize {
        self.docs.get(&doc_id).map(|doc| doc.len()).unwrap_or(0)
    }

    pub fn document_count(&self) -> usize {
        self.docs.len()
    }
}

// ===================================================================
// Tests
// ===================================================================
