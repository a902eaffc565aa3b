//! # quill-collab — Collaborative branching and merging for documents
//!
//! A real-time collaboration core built around an explicit branch model:
//! documents hold a hierarchy of branches, each branch an append-only
//! log of full-text commits with optimistic concurrency on the head,
//! plus a three-way merge engine and role-based access control. Live
//! sessions share cursor presence over a WebSocket gateway.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌───────────────┐
//! │ CollabClient │ ◄────────────────► │ CollabGateway │
//! │ (per user)   │    Binary Proto    │ (central)     │
//! └──────┬───────┘                    └──────┬────────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌──────────────┐                    ┌───────────────┐
//! │ ClientEvent  │                    │ DocumentState │
//! │ stream       │                    │ (authority)   │
//! └──────────────┘                    └──────┬────────┘
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                       ┌────────────┐ ┌───────────┐ ┌────────────┐
//!                       │ FanoutGroup│ │ AccessGuard│ │ CollabStore│
//!                       │ (presence) │ │ (roles)    │ │ (RocksDB)  │
//!                       └────────────┘ └───────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded CollabMessage)
//! - [`branch`] — Branch records and the per-document hierarchy
//! - [`history`] — Append-only commit logs with head CAS
//! - [`merge`] — Line-based diff and three-way merge
//! - [`access`] — Role lattice and capability checks
//! - [`presence`] — Sessions, cursors, colors, heartbeat sweeping
//! - [`document`] — Branches + histories behind one mutation surface
//! - [`broadcast`] — Room-based fan-out of pre-encoded frames
//! - [`server`] — The WebSocket collaboration gateway
//! - [`client`] — WebSocket client with throttled cursor updates
//! - [`storage`] — RocksDB persistence for branches and commits

pub mod access;
pub mod branch;
pub mod broadcast;
pub mod client;
pub mod document;
pub mod history;
pub mod merge;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use access::{AccessError, AccessGuard, Capability, Role};
pub use branch::{Branch, BranchError, BranchSet};
pub use broadcast::{FanoutGroup, FanoutRegistry, FanoutStats};
pub use client::{ClientEvent, CollabClient, ConnectionState};
pub use document::{DocError, DocumentState, MergeResult};
pub use history::{BranchHistory, Commit, HistoryError};
pub use merge::{merge_three_way, diff, ConflictRegion, MergeOutcome, Region, RegionKind};
pub use presence::{
    Cursor, DocumentPresence, PresenceEvent, PresenceRegistry, PresenceUpdate, SessionColor,
    SessionInfo,
};
pub use protocol::{
    CollabMessage, CommandReply, CommandRequest, CommitSummary, ErrorKind, Hello, MessageKind,
    ProtocolError,
};
pub use server::{CollabGateway, GatewayConfig, GatewayStats};
pub use storage::{CollabStore, DocumentMeta, StoreConfig, StoreError};
