//! Binary protocol for the collaboration gateway.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ kind     │ client_id │ doc_id   │ seq      │ payload  │
//! │ 1 byte   │ 16 bytes  │ 16 bytes │ 8 bytes  │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Two traffic classes share the envelope: ephemeral presence frames
//! (fire-and-forget, loss-tolerant) and branch/commit command frames
//! (request/reply, typed errors). The payload schema is fixed per kind
//! so every consumer can match exhaustively.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frame kinds for the collaboration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// First frame on a connection: identity + document handshake
    Hello = 1,
    /// Client → server presence event (join/cursor/heartbeat/leave)
    Presence = 2,
    /// Server → clients presence fan-out (joined/cursor/left)
    PresenceUpdate = 3,
    /// Client → server branch/commit mutation or query
    Command = 4,
    /// Server → client command result
    CommandReply = 5,
    /// Connection liveness probe
    Ping = 6,
    /// Liveness response
    Pong = 7,
}

/// Identity handshake sent as the first frame of every connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hello {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Error taxonomy surfaced through [`CommandReply::Error`].
///
/// `StaleHead` is the one kind a client is expected to retry (once, after
/// refetching the head). `Authorization` is never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or duplicate input; caller corrects and resubmits
    Validation,
    /// Caller's role lacks the required capability
    Authorization,
    /// Default/protected branch blocks the mutation
    Protected,
    /// Optimistic concurrency conflict on the branch head
    StaleHead,
    /// Structural conflict (e.g. deleting a branch with children)
    Conflict,
    /// Unknown branch/commit/document id
    NotFound,
    /// Undecodable or out-of-sequence frame
    Protocol,
}

/// Branch/commit operations routed through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommandRequest {
    CreateBranch {
        name: String,
        /// Forking point; defaults to the caller's current branch
        parent: Option<Uuid>,
        description: Option<String>,
    },
    UpdateBranch {
        branch_id: Uuid,
        name: Option<String>,
        description: Option<String>,
    },
    DeleteBranch {
        branch_id: Uuid,
    },
    ListBranches,
    Hierarchy {
        branch_id: Uuid,
    },
    Commit {
        branch_id: Uuid,
        content: Vec<String>,
        /// Compare-and-swap guard: must match the branch's current head
        expected_head: Option<Uuid>,
        message: Option<String>,
    },
    History {
        branch_id: Uuid,
        limit: usize,
        cursor: Option<Uuid>,
    },
    Restore {
        branch_id: Uuid,
        commit_id: Uuid,
    },
    Merge {
        source: Uuid,
        target: Uuid,
    },
}

/// One page entry of a branch's history (content elided).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitSummary {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub author: Uuid,
    pub created_at: u64,
    pub message: Option<String>,
    /// Line count of the snapshot, for history UIs
    pub lines: usize,
}

/// Results for [`CommandRequest`] variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommandReply {
    Branch(crate::branch::Branch),
    Branches(Vec<crate::branch::Branch>),
    /// Ancestor chain, root first
    Hierarchy(Vec<crate::branch::Branch>),
    Committed(crate::history::Commit),
    Deleted {
        branch_id: Uuid,
    },
    History {
        commits: Vec<CommitSummary>,
        next: Option<Uuid>,
    },
    Merged(crate::history::Commit),
    /// Not a failure: a structured report the caller must resolve manually
    MergeConflicts(Vec<crate::merge::ConflictRegion>),
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Top-level protocol frame.
///
/// Serialized with bincode for minimal overhead. Presence frames stay
/// under ~70 bytes so cursor traffic at 30 Hz is cheap to fan out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabMessage {
    pub kind: MessageKind,
    /// Originating connection for presence frames; nil for server replies
    pub client_id: Uuid,
    pub doc_id: Uuid,
    /// Per-connection sequence number; replies echo the request's seq
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl CollabMessage {
    /// Create the identity handshake frame.
    pub fn hello(client_id: Uuid, doc_id: Uuid, hello: &Hello) -> Self {
        let payload = bincode::serde::encode_to_vec(hello, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: MessageKind::Hello,
            client_id,
            doc_id,
            seq: 0,
            payload,
        }
    }

    /// Wrap an encoded presence event.
    pub fn presence(client_id: Uuid, doc_id: Uuid, seq: u64, event: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Presence,
            client_id,
            doc_id,
            seq,
            payload: event,
        }
    }

    /// Wrap an encoded presence update for fan-out.
    ///
    /// `client_id` is the session the update is about, so receivers can
    /// filter their own echoes.
    pub fn presence_update(client_id: Uuid, doc_id: Uuid, update: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::PresenceUpdate,
            client_id,
            doc_id,
            seq: 0,
            payload: update,
        }
    }

    /// Create a command frame.
    pub fn command(
        client_id: Uuid,
        doc_id: Uuid,
        seq: u64,
        request: &CommandRequest,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(request, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Command,
            client_id,
            doc_id,
            seq,
            payload,
        })
    }

    /// Create a reply frame. Replies carry a nil client id (server identity).
    pub fn command_reply(
        doc_id: Uuid,
        seq: u64,
        reply: &CommandReply,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(reply, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::CommandReply,
            client_id: Uuid::nil(),
            doc_id,
            seq,
            payload,
        })
    }

    /// Create a ping frame.
    pub fn ping(client_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Ping,
            client_id,
            doc_id: Uuid::nil(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Create a pong frame.
    pub fn pong(client_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Pong,
            client_id,
            doc_id: Uuid::nil(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse a Hello payload.
    pub fn hello_payload(&self) -> Result<Hello, ProtocolError> {
        if self.kind != MessageKind::Hello {
            return Err(ProtocolError::UnexpectedKind);
        }
        let (hello, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(hello)
    }

    /// Parse a command payload.
    pub fn command_payload(&self) -> Result<CommandRequest, ProtocolError> {
        if self.kind != MessageKind::Command {
            return Err(ProtocolError::UnexpectedKind);
        }
        let (req, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(req)
    }

    /// Parse a reply payload.
    pub fn reply_payload(&self) -> Result<CommandReply, ProtocolError> {
        if self.kind != MessageKind::CommandReply {
            return Err(ProtocolError::UnexpectedKind);
        }
        let (reply, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(reply)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    /// Payload accessor called on the wrong frame kind
    UnexpectedKind,
    ConnectionClosed,
    /// First frame was not a Hello
    HandshakeExpected,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::UnexpectedKind => write!(f, "Unexpected frame kind"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::HandshakeExpected => write!(f, "Expected Hello handshake frame"),
        }
    }
}

impl std::error::Error for ProtocolError {}
