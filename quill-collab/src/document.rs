//! Per-document engine: branch hierarchy, commit logs and merges under
//! one roof.
//!
//! `DocumentState` owns a [`BranchSet`] and one [`BranchHistory`] per
//! branch, and keeps them consistent: creating a branch seeds its fork
//! commit from the parent's head, deleting a branch drops its history,
//! and a successful commit bumps the branch's cached commit count. The
//! gateway serializes access by holding the room lock across each call,
//! so nothing in here locks.
//!
//! Merge ancestry is commit-level: each commit links to its predecessor
//! via `parent` and, for a branch's first commit, to the fork point via
//! `fork_of`. The merge base is the first commit reachable from the
//! source that is also reachable from the target.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::access::Role;
use crate::branch::{Branch, BranchError, BranchSet};
use crate::history::{BranchHistory, Commit, HistoryError};
use crate::merge::{merge_three_way, ConflictRegion, MergeOutcome};

/// Engine failures, unifying branch and history errors.
#[derive(Debug, Clone)]
pub enum DocError {
    Branch(BranchError),
    History(HistoryError),
}

impl From<BranchError> for DocError {
    fn from(e: BranchError) -> Self {
        DocError::Branch(e)
    }
}

impl From<HistoryError> for DocError {
    fn from(e: HistoryError) -> Self {
        DocError::History(e)
    }
}

impl std::fmt::Display for DocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocError::Branch(e) => write!(f, "{e}"),
            DocError::History(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DocError {}

/// Result of [`DocumentState::merge`].
#[derive(Debug, Clone, PartialEq)]
pub enum MergeResult {
    /// The merge commit appended to the target branch
    Merged(Commit),
    /// Conflict report; nothing was applied to the target
    Conflicts(Vec<ConflictRegion>),
}

/// All mutable state of one open document.
#[derive(Debug)]
pub struct DocumentState {
    branches: BranchSet,
    histories: HashMap<Uuid, BranchHistory>,
}

impl DocumentState {
    /// Fresh document with an empty default branch.
    pub fn new(document_id: Uuid, default_branch: impl Into<String>, created_by: Uuid) -> Self {
        let branches = BranchSet::new(document_id, default_branch, created_by);
        let mut histories = HashMap::new();
        let default_id = branches.default_id();
        histories.insert(default_id, BranchHistory::new(default_id));
        Self {
            branches,
            histories,
        }
    }

    /// Rebuild from persisted branches and commit logs. Branches missing
    /// a stored history get an empty one.
    pub fn from_parts(
        branches: BranchSet,
        mut histories: HashMap<Uuid, BranchHistory>,
    ) -> Self {
        for branch in branches.list() {
            histories
                .entry(branch.id)
                .or_insert_with(|| BranchHistory::new(branch.id));
        }
        Self {
            branches,
            histories,
        }
    }

    pub fn document_id(&self) -> Uuid {
        self.branches.document_id()
    }

    pub fn branches(&self) -> &BranchSet {
        &self.branches
    }

    /// The commit log of one branch.
    pub fn history(&self, branch_id: Uuid) -> Result<&BranchHistory, DocError> {
        if !self.branches.contains(branch_id) {
            return Err(BranchError::NotFound(branch_id).into());
        }
        Ok(self
            .histories
            .get(&branch_id)
            .expect("every branch has a history"))
    }

    /// All branches, stably ordered.
    pub fn list_branches(&self) -> Vec<Branch> {
        self.branches.list().into_iter().cloned().collect()
    }

    /// Ancestor chain from the root down to `branch_id`.
    pub fn hierarchy(&self, branch_id: Uuid) -> Result<Vec<Branch>, DocError> {
        Ok(self
            .branches
            .hierarchy(branch_id)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Create a branch forked from `parent` (default branch when None).
    ///
    /// Returns the branch and, when the parent had a head, the fork
    /// commit that seeds the new history — the caller persists both.
    pub fn create_branch(
        &mut self,
        name: impl Into<String>,
        parent: Option<Uuid>,
        description: Option<String>,
        created_by: Uuid,
        actor_role: Role,
    ) -> Result<(Branch, Option<Commit>), DocError> {
        let branch = self
            .branches
            .create(name, parent, description, created_by, actor_role)?
            .clone();

        let fork_point = branch
            .parent
            .and_then(|pid| self.histories.get(&pid))
            .and_then(|h| h.head())
            .cloned();

        let mut history = BranchHistory::new(branch.id);
        let fork_commit = fork_point.map(|head| history.seed_fork(&head, created_by).clone());
        if fork_commit.is_some() {
            self.branches.record_commit(branch.id);
        }
        self.histories.insert(branch.id, history);

        let branch = self
            .branches
            .get(branch.id)
            .expect("just created")
            .clone();
        Ok((branch, fork_commit))
    }

    /// Rename a branch and/or replace its description.
    pub fn update_branch(
        &mut self,
        branch_id: Uuid,
        name: Option<String>,
        description: Option<String>,
        actor_role: Role,
    ) -> Result<Branch, DocError> {
        Ok(self
            .branches
            .update(branch_id, name, description, actor_role)?
            .clone())
    }

    /// Delete a branch and its commit log.
    pub fn delete_branch(&mut self, branch_id: Uuid, actor_role: Role) -> Result<Branch, DocError> {
        let removed = self.branches.delete(branch_id, actor_role)?;
        self.histories.remove(&branch_id);
        Ok(removed)
    }

    /// Mark a branch protected/unprotected. Owner only.
    pub fn set_protected(
        &mut self,
        branch_id: Uuid,
        protected: bool,
        actor_role: Role,
    ) -> Result<Branch, DocError> {
        Ok(self
            .branches
            .set_protected(branch_id, protected, actor_role)?
            .clone())
    }

    /// Append a commit to a branch, guarded by compare-and-swap on
    /// `expected_head`. Returns the commit and its log sequence number
    /// (the storage key suffix).
    pub fn commit(
        &mut self,
        branch_id: Uuid,
        content: Vec<String>,
        author: Uuid,
        message: Option<String>,
        expected_head: Option<Uuid>,
        actor_role: Role,
    ) -> Result<(Commit, u64), DocError> {
        if actor_role < Role::Editor {
            return Err(BranchError::Forbidden(format!(
                "role {actor_role} cannot commit"
            ))
            .into());
        }
        if !self.branches.contains(branch_id) {
            return Err(BranchError::NotFound(branch_id).into());
        }
        let history = self
            .histories
            .get_mut(&branch_id)
            .expect("every branch has a history");
        let commit = history
            .append(content, author, message, expected_head)?
            .clone();
        let seq = (history.len() - 1) as u64;
        self.branches.record_commit(branch_id);
        Ok((commit, seq))
    }

    /// Re-publish a historical commit as the branch's new head.
    pub fn restore(
        &mut self,
        branch_id: Uuid,
        commit_id: Uuid,
        author: Uuid,
        actor_role: Role,
    ) -> Result<(Commit, u64), DocError> {
        if actor_role < Role::Editor {
            return Err(BranchError::Forbidden(format!(
                "role {actor_role} cannot restore"
            ))
            .into());
        }
        if !self.branches.contains(branch_id) {
            return Err(BranchError::NotFound(branch_id).into());
        }
        let history = self
            .histories
            .get_mut(&branch_id)
            .expect("every branch has a history");
        let commit = history.restore(commit_id, author)?.clone();
        let seq = (history.len() - 1) as u64;
        self.branches.record_commit(branch_id);
        Ok((commit, seq))
    }

    /// Three-way merge of `source` into `target`.
    ///
    /// A clean merge appends one commit to the target and returns it
    /// with its sequence number; a conflicting merge applies nothing and
    /// returns the conflict report.
    pub fn merge(
        &mut self,
        source: Uuid,
        target: Uuid,
        author: Uuid,
        actor_role: Role,
    ) -> Result<(MergeResult, Option<u64>), DocError> {
        if actor_role < Role::Editor {
            return Err(BranchError::Forbidden(format!(
                "role {actor_role} cannot merge"
            ))
            .into());
        }
        if source == target {
            return Err(
                BranchError::Validation("cannot merge a branch into itself".into()).into(),
            );
        }
        let source_name = self
            .branches
            .get(source)
            .ok_or(BranchError::NotFound(source))?
            .name
            .clone();
        if !self.branches.contains(target) {
            return Err(BranchError::NotFound(target).into());
        }

        let theirs = self.head_content(source);
        let ours = self.head_content(target);
        let base = self
            .merge_base(source, target)
            .and_then(|id| self.find_commit(id))
            .map(|c| c.content.clone())
            .unwrap_or_default();

        match merge_three_way(&base, &ours, &theirs) {
            MergeOutcome::Merged(content) => {
                let expected = self
                    .histories
                    .get(&target)
                    .and_then(|h| h.head_id());
                let (commit, seq) = self.commit(
                    target,
                    content,
                    author,
                    Some(format!("merge {source_name}")),
                    expected,
                    actor_role,
                )?;
                Ok((MergeResult::Merged(commit), Some(seq)))
            }
            MergeOutcome::Conflicts(regions) => Ok((MergeResult::Conflicts(regions), None)),
        }
    }

    fn head_content(&self, branch_id: Uuid) -> Vec<String> {
        self.histories
            .get(&branch_id)
            .and_then(|h| h.head())
            .map(|c| c.content.clone())
            .unwrap_or_default()
    }

    /// Nearest common ancestor commit of two branches, if any.
    fn merge_base(&self, source: Uuid, target: Uuid) -> Option<Uuid> {
        let target_set: HashSet<Uuid> = self.reachable(target).into_iter().collect();
        self.reachable(source)
            .into_iter()
            .find(|id| target_set.contains(id))
    }

    /// Commit ids reachable from a branch's head, newest first. Follows
    /// `parent` within a branch and `fork_of` across the fork boundary.
    fn reachable(&self, branch_id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.histories.get(&branch_id).and_then(|h| h.head_id());
        while let Some(id) = cursor {
            if !seen.insert(id) {
                break;
            }
            out.push(id);
            let Some(commit) = self.find_commit(id) else {
                break;
            };
            cursor = commit.parent.or(commit.fork_of);
        }
        out
    }

    fn find_commit(&self, id: Uuid) -> Option<&Commit> {
        self.histories.values().find_map(|h| h.get(id))
    }

    /// Decompose into persistable parts.
    pub fn into_parts(self) -> (BranchSet, HashMap<Uuid, BranchHistory>) {
        (self.branches, self.histories)
    }
}
