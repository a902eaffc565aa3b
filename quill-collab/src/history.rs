//! Append-only commit log, one per branch.
//!
//! Commits within a branch form a strict linear chain; forking is only
//! ever expressed through new branch records, never inside a history.
//! Appends are guarded by compare-and-swap on the expected head: of two
//! concurrent writers exactly one wins and the other sees `StaleHead`,
//! so no commit is lost silently. Restore is a forward commit — history
//! is never rewritten.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use uuid::Uuid;

/// One immutable snapshot in a branch's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    pub id: Uuid,
    pub branch_id: Uuid,
    /// Previous commit in this branch; None only for the first commit
    pub parent: Option<Uuid>,
    /// For a branch's first commit: the parent branch's head at fork time
    pub fork_of: Option<Uuid>,
    pub author: Uuid,
    /// Seconds since epoch
    pub created_at: u64,
    pub message: Option<String>,
    /// Full content snapshot, line-oriented
    pub content: Vec<String>,
}

/// Commit log failures.
#[derive(Debug, Clone)]
pub enum HistoryError {
    /// The caller's expected head no longer matches the branch head.
    /// Callers re-fetch the head and retry once.
    StaleHead {
        expected: Option<Uuid>,
        actual: Option<Uuid>,
    },
    NotFound(Uuid),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::StaleHead { expected, actual } => write!(
                f,
                "stale head: expected {expected:?}, branch is at {actual:?}"
            ),
            HistoryError::NotFound(id) => write!(f, "commit {id} not found"),
        }
    }
}

impl std::error::Error for HistoryError {}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The ordered history of a single branch.
#[derive(Debug)]
pub struct BranchHistory {
    branch_id: Uuid,
    commits: Vec<Commit>,
    index: HashMap<Uuid, usize>,
}

impl BranchHistory {
    pub fn new(branch_id: Uuid) -> Self {
        Self {
            branch_id,
            commits: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Rebuild a history from persisted commits (already in append order).
    pub fn from_commits(branch_id: Uuid, commits: Vec<Commit>) -> Self {
        let index = commits
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();
        Self {
            branch_id,
            commits,
            index,
        }
    }

    pub fn branch_id(&self) -> Uuid {
        self.branch_id
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// The most recent commit.
    pub fn head(&self) -> Option<&Commit> {
        self.commits.last()
    }

    pub fn head_id(&self) -> Option<Uuid> {
        self.commits.last().map(|c| c.id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Commit> {
        self.index.get(&id).map(|&i| &self.commits[i])
    }

    /// Position of a commit within the chain (0 = oldest).
    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Commits in append order.
    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    /// Seed a fresh branch with its fork commit: content copied from the
    /// parent branch's head so the branch starts logically identical to
    /// its parent at fork time.
    pub fn seed_fork(&mut self, fork_point: &Commit, author: Uuid) -> &Commit {
        debug_assert!(self.commits.is_empty(), "fork seeds an empty history");
        let commit = Commit {
            id: Uuid::new_v4(),
            branch_id: self.branch_id,
            parent: None,
            fork_of: Some(fork_point.id),
            author,
            created_at: epoch_secs(),
            message: None,
            content: fork_point.content.clone(),
        };
        self.push(commit)
    }

    /// Append a commit after the current head.
    ///
    /// `expected_head` is the compare-and-swap guard: the append is
    /// rejected with `StaleHead` when it does not match, and nothing is
    /// applied.
    pub fn append(
        &mut self,
        content: Vec<String>,
        author: Uuid,
        message: Option<String>,
        expected_head: Option<Uuid>,
    ) -> Result<&Commit, HistoryError> {
        let actual = self.head_id();
        if expected_head != actual {
            return Err(HistoryError::StaleHead {
                expected: expected_head,
                actual,
            });
        }
        let commit = Commit {
            id: Uuid::new_v4(),
            branch_id: self.branch_id,
            parent: actual,
            fork_of: None,
            author,
            created_at: epoch_secs(),
            message,
            content,
        };
        Ok(self.push(commit))
    }

    /// Restore a historical commit as a new forward commit.
    ///
    /// The target commit stays reachable and unchanged; the new head's
    /// content equals the target's.
    pub fn restore(&mut self, commit_id: Uuid, author: Uuid) -> Result<&Commit, HistoryError> {
        let target = self
            .get(commit_id)
            .ok_or(HistoryError::NotFound(commit_id))?;
        let content = target.content.clone();
        let message = Some(format!("restore {commit_id}"));
        let head = self.head_id();
        self.append(content, author, message, head)
    }

    /// Reverse-chronological page of commits, restartable via `cursor`
    /// (the id of the last commit of the previous page).
    pub fn page(
        &self,
        limit: usize,
        cursor: Option<Uuid>,
    ) -> Result<(Vec<&Commit>, Option<Uuid>), HistoryError> {
        let newest_first = self.commits.iter().rev();
        let start = match cursor {
            Some(id) => {
                let pos = self.position(id).ok_or(HistoryError::NotFound(id))?;
                // Skip everything at or after the cursor (in reverse order).
                self.commits.len() - pos
            }
            None => 0,
        };
        let page: Vec<&Commit> = newest_first.skip(start).take(limit).collect();
        let next = if start + page.len() < self.commits.len() {
            page.last().map(|c| c.id)
        } else {
            None
        };
        Ok((page, next))
    }

    fn push(&mut self, commit: Commit) -> &Commit {
        self.index.insert(commit.id, self.commits.len());
        self.commits.push(commit);
        self.commits.last().expect("just pushed")
    }
}
