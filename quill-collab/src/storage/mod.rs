//! Persistent storage for branch records and commit logs.
//!
//! Architecture:
//! ```text
//! ┌───────────────┐   mutations     ┌──────────────┐
//! │ CollabGateway │ ──────────────► │ CollabStore  │
//! │ (in-memory)   │                 │ (RocksDB)    │
//! └──────┬────────┘                 └──────┬───────┘
//!        │                                 │
//!        │ on room open                    │ column families
//!        ▼                                 ▼
//! ┌───────────────┐   ┌────────────────────────────────────────┐
//! │ DocumentState │   │ CF "branches" — branch records          │
//! │ (rebuilt)     │   │ CF "commits"  — LZ4 snapshots, per seq  │
//! └───────────────┘   │ CF "metadata" — per-document counters   │
//!                     └────────────────────────────────────────┘
//! ```
//!
//! Writes are incremental: every branch mutation and commit append goes
//! straight to RocksDB, so a crash loses at most the write in flight
//! (RocksDB's own WAL covers atomicity). Rebuilding a document is a
//! prefix scan per branch, in sequence order.

pub mod rocks;

pub use rocks::{CollabStore, DocumentMeta, StoreConfig, StoreError};
