//! RocksDB-backed store for branches and commit logs.
//!
//! Column families:
//! - `branches` — branch records, keyed by `<doc_id:16><branch_id:16>`
//! - `commits`  — LZ4-compressed commit snapshots, keyed by
//!   `<branch_id:16><seq:8 big-endian>` so a branch's log is one
//!   forward prefix scan
//! - `metadata` — per-document counters, keyed by `<doc_id:16>`
//!
//! Commits are immutable once written; only branch records are ever
//! overwritten in place.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

use crate::branch::{Branch, BranchSet};
use crate::document::DocumentState;
use crate::history::{BranchHistory, Commit};

/// Column family names.
const CF_BRANCHES: &str = "branches";
const CF_COMMITS: &str = "commits";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_BRANCHES, CF_COMMITS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("quill_data"),
            block_cache_size: 256 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Per-document counters kept alongside the records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub doc_id: Uuid,
    pub branch_count: u64,
    pub commit_count: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl DocumentMeta {
    fn new(doc_id: Uuid) -> Self {
        let now = epoch_secs();
        Self {
            doc_id,
            branch_count: 0,
            commit_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    Database(String),
    NotFound(Uuid),
    Serialization(String),
    Deserialization(String),
    Compression(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Not found: {id}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Compression(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// RocksDB-backed store for the collaboration gateway.
pub struct CollabStore {
    /// Single-threaded mode — concurrency comes from tokio, not RocksDB
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl CollabStore {
    /// Open the store, creating the database and column families as
    /// needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_BRANCHES => {
                // Few records per document, prefix-scanned by doc_id
                opts.set_max_write_buffer_number(2);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_COMMITS => {
                // Append-heavy, prefix-scanned by branch_id
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_METADATA => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Branches ─────────────────────────────────────────────────────

    /// Write (or overwrite) a branch record.
    pub fn put_branch(&self, branch: &Branch) -> Result<(), StoreError> {
        let cf_branches = self.cf(CF_BRANCHES)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let encoded = bincode::serde::encode_to_vec(branch, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut meta = self
            .load_meta(branch.document_id)
            .unwrap_or_else(|_| DocumentMeta::new(branch.document_id));
        meta.updated_at = epoch_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_branches, Self::branch_key(branch.document_id, branch.id), &encoded);
        batch.put_cf(&cf_meta, branch.document_id.as_bytes(), &meta.encode()?);
        self.write(batch)
    }

    /// All branch records of a document, via prefix scan.
    pub fn list_branches(&self, doc_id: Uuid) -> Result<Vec<Branch>, StoreError> {
        let cf = self.cf(CF_BRANCHES)?;
        let prefix = doc_id.as_bytes().to_vec();

        let mut branches = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 32 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            let (branch, _): (Branch, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            branches.push(branch);
        }
        Ok(branches)
    }

    /// Delete a branch record and purge its commit log.
    pub fn delete_branch(&self, doc_id: Uuid, branch_id: Uuid) -> Result<u64, StoreError> {
        let cf_branches = self.cf(CF_BRANCHES)?;
        let cf_commits = self.cf(CF_COMMITS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_branches, Self::branch_key(doc_id, branch_id));

        // Purge every commit under the branch prefix.
        let mut purged = 0u64;
        let prefix = branch_id.as_bytes().to_vec();
        let iter = self.db.iterator_cf(
            &cf_commits,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != branch_id.as_bytes() {
                break;
            }
            batch.delete_cf(&cf_commits, &key);
            purged += 1;
        }

        if let Ok(mut meta) = self.load_meta(doc_id) {
            meta.commit_count = meta.commit_count.saturating_sub(purged);
            meta.updated_at = epoch_secs();
            batch.put_cf(&cf_meta, doc_id.as_bytes(), &meta.encode()?);
        }

        self.write(batch)?;
        Ok(purged)
    }

    // ─── Commits ──────────────────────────────────────────────────────

    /// Append one commit at its log position. The value is the
    /// LZ4-compressed bincode snapshot.
    pub fn append_commit(
        &self,
        doc_id: Uuid,
        commit: &Commit,
        seq: u64,
    ) -> Result<(), StoreError> {
        let cf_commits = self.cf(CF_COMMITS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let encoded = bincode::serde::encode_to_vec(commit, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        let mut meta = self
            .load_meta(doc_id)
            .unwrap_or_else(|_| DocumentMeta::new(doc_id));
        meta.commit_count += 1;
        meta.updated_at = epoch_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_commits, Self::commit_key(commit.branch_id, seq), &compressed);
        batch.put_cf(&cf_meta, doc_id.as_bytes(), &meta.encode()?);
        self.write(batch)
    }

    /// A branch's full commit log, in append order.
    pub fn load_commits(&self, branch_id: Uuid) -> Result<Vec<Commit>, StoreError> {
        let cf = self.cf(CF_COMMITS)?;
        let prefix = branch_id.as_bytes().to_vec();

        let mut commits = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != branch_id.as_bytes() {
                break;
            }
            let decompressed = lz4_flex::decompress_size_prepended(&value)
                .map_err(|e| StoreError::Compression(e.to_string()))?;
            let (commit, _): (Commit, _) =
                bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            commits.push(commit);
        }
        Ok(commits)
    }

    // ─── Documents ────────────────────────────────────────────────────

    /// Rebuild a full document from its persisted branches and logs.
    pub fn load_document(&self, doc_id: Uuid) -> Result<DocumentState, StoreError> {
        let records = self.list_branches(doc_id)?;
        if records.is_empty() {
            return Err(StoreError::NotFound(doc_id));
        }

        let mut histories = HashMap::new();
        for branch in &records {
            let commits = self.load_commits(branch.id)?;
            histories.insert(branch.id, BranchHistory::from_commits(branch.id, commits));
        }
        let branches = BranchSet::from_records(doc_id, records)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(DocumentState::from_parts(branches, histories))
    }

    /// Write every branch record of a document in one batch. Called at
    /// room teardown so cached commit counts land on disk; commits are
    /// already persisted individually.
    pub fn save_document(&self, state: &DocumentState) -> Result<(), StoreError> {
        let cf_branches = self.cf(CF_BRANCHES)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let doc_id = state.document_id();

        let mut meta = self
            .load_meta(doc_id)
            .unwrap_or_else(|_| DocumentMeta::new(doc_id));
        meta.branch_count = state.branches().len() as u64;
        meta.updated_at = epoch_secs();

        let mut batch = WriteBatch::default();
        for branch in state.branches().list() {
            let encoded = bincode::serde::encode_to_vec(branch, bincode::config::standard())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.put_cf(&cf_branches, Self::branch_key(doc_id, branch.id), &encoded);
        }
        batch.put_cf(&cf_meta, doc_id.as_bytes(), &meta.encode()?);
        self.write(batch)
    }

    pub fn document_exists(&self, doc_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(&cf, doc_id.as_bytes())?.is_some())
    }

    /// All document IDs in the store.
    pub fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut doc_ids = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() == 16 {
                let id = Uuid::from_bytes(key.as_ref().try_into().map_err(|_| {
                    StoreError::Deserialization("Invalid UUID key".into())
                })?);
                doc_ids.push(id);
            }
        }
        Ok(doc_ids)
    }

    /// Delete a document: metadata, every branch record and every
    /// commit log.
    pub fn delete_document(&self, doc_id: Uuid) -> Result<(), StoreError> {
        let branch_ids: Vec<Uuid> = self.list_branches(doc_id)?.iter().map(|b| b.id).collect();

        let cf_branches = self.cf(CF_BRANCHES)?;
        let cf_commits = self.cf(CF_COMMITS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_meta, doc_id.as_bytes());
        for branch_id in branch_ids {
            batch.delete_cf(&cf_branches, Self::branch_key(doc_id, branch_id));
            let prefix = branch_id.as_bytes().to_vec();
            let iter = self.db.iterator_cf(
                &cf_commits,
                IteratorMode::From(&prefix, rocksdb::Direction::Forward),
            );
            for item in iter {
                let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                if key.len() < 24 || &key[..16] != prefix.as_slice() {
                    break;
                }
                batch.delete_cf(&cf_commits, &key);
            }
        }
        self.write(batch)
    }

    /// Per-document counters.
    pub fn load_meta(&self, doc_id: Uuid) -> Result<DocumentMeta, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, doc_id.as_bytes())? {
            Some(bytes) => DocumentMeta::decode(&bytes),
            None => Err(StoreError::NotFound(doc_id)),
        }
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    /// `<doc_id:16><branch_id:16>`
    fn branch_key(doc_id: Uuid, branch_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(doc_id.as_bytes());
        key.extend_from_slice(branch_id.as_bytes());
        key
    }

    /// `<branch_id:16><seq:8 big-endian>`
    fn commit_key(branch_id: Uuid, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(branch_id.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use std::fs;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("quill_test_rocks_{name}_{}", Uuid::new_v4()))
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_dir_all(path);
    }

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_store_open_close() {
        let path = temp_db_path("open_close");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert!(store.path().exists());
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_branch_put_list() {
        let path = temp_db_path("branch_put");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let author = Uuid::new_v4();
        let mut state = DocumentState::new(Uuid::new_v4(), "main", author);
        state
            .create_branch("feature", None, None, author, Role::Editor)
            .unwrap();
        for branch in state.branches().list() {
            store.put_branch(branch).unwrap();
        }

        let listed = store.list_branches(state.document_id()).unwrap();
        assert_eq!(listed.len(), 2);
        let names: Vec<&str> = listed.iter().map(|b| b.name.as_str()).collect();
        assert!(names.contains(&"main"));
        assert!(names.contains(&"feature"));

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_commit_append_load_roundtrip() {
        let path = temp_db_path("commits");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut history = BranchHistory::new(Uuid::new_v4());
        let branch_id = history.branch_id();

        let mut head = None;
        for i in 0..5 {
            let commit = history
                .append(lines(&[&format!("version {i}")]), author, None, head)
                .unwrap()
                .clone();
            head = Some(commit.id);
            store.append_commit(doc_id, &commit, i as u64).unwrap();
        }

        let loaded = store.load_commits(branch_id).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded, history.commits());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_delete_branch_purges_commits() {
        let path = temp_db_path("delete_branch");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut state = DocumentState::new(doc_id, "main", author);
        let (branch, _) = state
            .create_branch("scratch", None, None, author, Role::Editor)
            .unwrap();
        store.put_branch(&branch).unwrap();
        let (commit, seq) = state
            .commit(branch.id, lines(&["scratch work"]), author, None, None, Role::Editor)
            .unwrap();
        store.append_commit(doc_id, &commit, seq).unwrap();

        let purged = store.delete_branch(doc_id, branch.id).unwrap();
        assert_eq!(purged, 1);
        assert!(store.load_commits(branch.id).unwrap().is_empty());
        assert!(store.list_branches(doc_id).unwrap().is_empty());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_document_roundtrip() {
        let path = temp_db_path("roundtrip");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut state = DocumentState::new(doc_id, "main", author);
        let main = state.branches().default_id();

        let (c1, seq1) = state
            .commit(main, lines(&["chapter one"]), author, None, None, Role::Editor)
            .unwrap();
        store.append_commit(doc_id, &c1, seq1).unwrap();
        let (branch, fork) = state
            .create_branch("alt", None, None, author, Role::Editor)
            .unwrap();
        store.append_commit(doc_id, &fork.unwrap(), 0).unwrap();
        store.put_branch(&branch).unwrap();
        store.save_document(&state).unwrap();

        let reloaded = store.load_document(doc_id).unwrap();
        assert_eq!(reloaded.list_branches().len(), 2);
        assert_eq!(reloaded.history(main).unwrap().head_id(), Some(c1.id));
        assert_eq!(
            reloaded.history(branch.id).unwrap().head().unwrap().content,
            lines(&["chapter one"])
        );

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_load_unknown_document() {
        let path = temp_db_path("unknown");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert!(matches!(
            store.load_document(Uuid::new_v4()).unwrap_err(),
            StoreError::NotFound(_)
        ));
        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_document_exists_and_list() {
        let path = temp_db_path("exists");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let author = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            let state = DocumentState::new(*id, "main", author);
            store.save_document(&state).unwrap();
            assert!(store.document_exists(*id).unwrap());
        }

        let listed = store.list_documents().unwrap();
        assert_eq!(listed.len(), 3);
        for id in &ids {
            assert!(listed.contains(id));
        }

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_delete_document() {
        let path = temp_db_path("delete_doc");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut state = DocumentState::new(doc_id, "main", author);
        let main = state.branches().default_id();
        let (c1, seq) = state
            .commit(main, lines(&["gone soon"]), author, None, None, Role::Editor)
            .unwrap();
        store.append_commit(doc_id, &c1, seq).unwrap();
        store.save_document(&state).unwrap();

        store.delete_document(doc_id).unwrap();
        assert!(!store.document_exists(doc_id).unwrap());
        assert!(store.list_branches(doc_id).unwrap().is_empty());
        assert!(store.load_commits(main).unwrap().is_empty());

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_metadata_counts() {
        let path = temp_db_path("meta");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut state = DocumentState::new(doc_id, "main", author);
        let main = state.branches().default_id();

        let (c1, s1) = state
            .commit(main, lines(&["a"]), author, None, None, Role::Editor)
            .unwrap();
        store.append_commit(doc_id, &c1, s1).unwrap();
        let (c2, s2) = state
            .commit(main, lines(&["a", "b"]), author, None, Some(c1.id), Role::Editor)
            .unwrap();
        store.append_commit(doc_id, &c2, s2).unwrap();
        store.save_document(&state).unwrap();

        let meta = store.load_meta(doc_id).unwrap();
        assert_eq!(meta.commit_count, 2);
        assert_eq!(meta.branch_count, 1);
        assert!(meta.updated_at >= meta.created_at);

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_branches_isolated_between_documents() {
        let path = temp_db_path("isolation");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let author = Uuid::new_v4();
        let doc_a = DocumentState::new(Uuid::new_v4(), "main", author);
        let doc_b = DocumentState::new(Uuid::new_v4(), "trunk", author);
        store.save_document(&doc_a).unwrap();
        store.save_document(&doc_b).unwrap();

        let a = store.list_branches(doc_a.document_id()).unwrap();
        let b = store.list_branches(doc_b.document_id()).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].name, "main");
        assert_eq!(b[0].name, "trunk");

        drop(store);
        cleanup(&path);
    }

    #[test]
    fn test_large_commit_compresses() {
        let path = temp_db_path("compress");
        let store = CollabStore::open(StoreConfig::for_testing(&path)).unwrap();

        let doc_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut history = BranchHistory::new(Uuid::new_v4());
        let content: Vec<String> = (0..2000)
            .map(|i| format!("the same kind of line, numbered {i}"))
            .collect();
        let commit = history.append(content.clone(), author, None, None).unwrap().clone();
        store.append_commit(doc_id, &commit, 0).unwrap();

        let loaded = store.load_commits(history.branch_id()).unwrap();
        assert_eq!(loaded[0].content, content);

        drop(store);
        cleanup(&path);
    }
}
