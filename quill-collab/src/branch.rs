//! Branch records and the per-document branch hierarchy.
//!
//! Branches form an arena of records addressed by opaque ids; parent
//! references are ids, never object pointers, so the acyclicity check is
//! a plain id-chain walk. Invariants enforced here:
//!
//! - exactly one default branch per document, and it is the root
//! - every parent chain is finite, acyclic and ends at the default branch
//! - the default branch can never be deleted, by anyone
//! - protected branches are renamed/deleted only by owners
//! - a branch with children cannot be deleted (reject, don't orphan)

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;
use uuid::Uuid;

use crate::access::Role;

/// Upper bound on parent-chain walks. Any chain longer than this is
/// treated as a structural corruption rather than walked forever.
const MAX_CHAIN_DEPTH: usize = 256;

/// One divergent line of a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Unique within the document
    pub name: String,
    pub description: Option<String>,
    /// None only for the default (root) branch
    pub parent: Option<Uuid>,
    pub is_default: bool,
    /// Blocks rename/delete by non-owners
    pub is_protected: bool,
    pub created_by: Uuid,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
    /// Cached count, maintained by the commit log
    pub commit_count: u64,
}

/// Branch store failures.
#[derive(Debug, Clone)]
pub enum BranchError {
    /// Empty or duplicate name, unknown parent, malformed input
    Validation(String),
    /// Default or protected branch blocks the mutation
    Protected(Uuid),
    /// Structural conflict: deleting a branch that has children
    Conflict(String),
    NotFound(Uuid),
    /// Actor role below the operation's minimum
    Forbidden(String),
}

impl std::fmt::Display for BranchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchError::Validation(msg) => write!(f, "validation failed: {msg}"),
            BranchError::Protected(id) => write!(f, "branch {id} is protected"),
            BranchError::Conflict(msg) => write!(f, "conflict: {msg}"),
            BranchError::NotFound(id) => write!(f, "branch {id} not found"),
            BranchError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
        }
    }
}

impl std::error::Error for BranchError {}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// All branches of one document, keyed by id.
///
/// Structural mutations are atomic with their invariant checks; callers
/// serialize access (the gateway holds the room lock across each call).
#[derive(Debug)]
pub struct BranchSet {
    document_id: Uuid,
    branches: HashMap<Uuid, Branch>,
    default_id: Uuid,
}

impl BranchSet {
    /// Create the branch set with its default (root) branch.
    pub fn new(document_id: Uuid, default_name: impl Into<String>, created_by: Uuid) -> Self {
        let now = epoch_secs();
        let default_id = Uuid::new_v4();
        let default_branch = Branch {
            id: default_id,
            document_id,
            name: default_name.into(),
            description: None,
            parent: None,
            is_default: true,
            is_protected: false,
            created_by,
            created_at: now,
            updated_at: now,
            commit_count: 0,
        };
        let mut branches = HashMap::new();
        branches.insert(default_id, default_branch);
        Self {
            document_id,
            branches,
            default_id,
        }
    }

    /// Rebuild a branch set from persisted records.
    ///
    /// Fails if the records do not contain exactly one default branch for
    /// this document.
    pub fn from_records(document_id: Uuid, records: Vec<Branch>) -> Result<Self, BranchError> {
        let mut branches = HashMap::new();
        let mut default_id = None;
        for branch in records {
            if branch.document_id != document_id {
                return Err(BranchError::Validation(format!(
                    "branch {} belongs to another document",
                    branch.id
                )));
            }
            if branch.is_default {
                if default_id.replace(branch.id).is_some() {
                    return Err(BranchError::Validation(
                        "multiple default branches".into(),
                    ));
                }
            }
            branches.insert(branch.id, branch);
        }
        let default_id =
            default_id.ok_or_else(|| BranchError::Validation("no default branch".into()))?;
        Ok(Self {
            document_id,
            branches,
            default_id,
        })
    }

    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn default_id(&self) -> Uuid {
        self.default_id
    }

    pub fn get(&self, id: Uuid) -> Option<&Branch> {
        self.branches.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.branches.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// All branches, default first, then by creation time and name.
    ///
    /// The default branch leads unconditionally; epoch-second timestamps
    /// tie for branches created in the same second, so name alone would
    /// not keep it at the front.
    pub fn list(&self) -> Vec<&Branch> {
        let mut all: Vec<&Branch> = self.branches.values().collect();
        all.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    /// Direct children of a branch.
    pub fn children(&self, id: Uuid) -> Vec<&Branch> {
        self.branches
            .values()
            .filter(|b| b.parent == Some(id))
            .collect()
    }

    /// Create a branch forked from `parent` (default branch when None).
    pub fn create(
        &mut self,
        name: impl Into<String>,
        parent: Option<Uuid>,
        description: Option<String>,
        created_by: Uuid,
        actor_role: Role,
    ) -> Result<&Branch, BranchError> {
        if actor_role < Role::Editor {
            return Err(BranchError::Forbidden(format!(
                "role {actor_role} cannot create branches"
            )));
        }

        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(BranchError::Validation("branch name is empty".into()));
        }
        if self.branches.values().any(|b| b.name == trimmed) {
            return Err(BranchError::Validation(format!(
                "branch name '{trimmed}' already exists"
            )));
        }

        let parent_id = parent.unwrap_or(self.default_id);
        if !self.branches.contains_key(&parent_id) {
            return Err(BranchError::NotFound(parent_id));
        }
        // A fresh id cannot appear in the parent chain, but the walk also
        // guards against a corrupted hierarchy before we extend it.
        self.ancestors(parent_id)?;

        let now = epoch_secs();
        let id = Uuid::new_v4();
        let branch = Branch {
            id,
            document_id: self.document_id,
            name: trimmed.to_string(),
            description,
            parent: Some(parent_id),
            is_default: false,
            is_protected: false,
            created_by,
            created_at: now,
            updated_at: now,
            commit_count: 0,
        };
        self.branches.insert(id, branch);
        log::debug!("branch {trimmed} ({id}) created under {parent_id}");
        Ok(self.branches.get(&id).expect("just inserted"))
    }

    /// Rename a branch and/or replace its description.
    pub fn update(
        &mut self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
        actor_role: Role,
    ) -> Result<&Branch, BranchError> {
        if actor_role < Role::Editor {
            return Err(BranchError::Forbidden(format!(
                "role {actor_role} cannot edit branches"
            )));
        }
        {
            let branch = self.branches.get(&id).ok_or(BranchError::NotFound(id))?;
            if branch.is_protected && actor_role < Role::Owner {
                return Err(BranchError::Protected(id));
            }
        }
        if let Some(ref new_name) = name {
            let trimmed = new_name.trim();
            if trimmed.is_empty() {
                return Err(BranchError::Validation("branch name is empty".into()));
            }
            if self
                .branches
                .values()
                .any(|b| b.id != id && b.name == trimmed)
            {
                return Err(BranchError::Validation(format!(
                    "branch name '{trimmed}' already exists"
                )));
            }
        }

        let branch = self.branches.get_mut(&id).expect("checked above");
        if let Some(new_name) = name {
            branch.name = new_name.trim().to_string();
        }
        if description.is_some() {
            branch.description = description;
        }
        branch.updated_at = epoch_secs();
        Ok(&*branch)
    }

    /// Delete a branch. Rejected for the default branch, for protected
    /// branches (non-owners) and for branches with children.
    pub fn delete(&mut self, id: Uuid, actor_role: Role) -> Result<Branch, BranchError> {
        if actor_role < Role::Editor {
            return Err(BranchError::Forbidden(format!(
                "role {actor_role} cannot delete branches"
            )));
        }
        let branch = self.branches.get(&id).ok_or(BranchError::NotFound(id))?;
        if branch.is_default {
            return Err(BranchError::Protected(id));
        }
        if branch.is_protected && actor_role < Role::Owner {
            return Err(BranchError::Protected(id));
        }
        let children = self.children(id);
        if !children.is_empty() {
            return Err(BranchError::Conflict(format!(
                "branch has {} child branch(es)",
                children.len()
            )));
        }
        let removed = self.branches.remove(&id).expect("checked above");
        log::debug!("branch {} ({id}) deleted", removed.name);
        Ok(removed)
    }

    /// Mark a branch protected/unprotected. Owner only.
    pub fn set_protected(
        &mut self,
        id: Uuid,
        protected: bool,
        actor_role: Role,
    ) -> Result<&Branch, BranchError> {
        if actor_role < Role::Owner {
            return Err(BranchError::Forbidden(
                "only owners change branch protection".into(),
            ));
        }
        let branch = self.branches.get_mut(&id).ok_or(BranchError::NotFound(id))?;
        branch.is_protected = protected;
        branch.updated_at = epoch_secs();
        Ok(&*branch)
    }

    /// Ancestor chain from the root down to `id` (inclusive).
    ///
    /// Detects cycles defensively: a revisited node or an over-long chain
    /// is reported as a conflict instead of looping.
    pub fn hierarchy(&self, id: Uuid) -> Result<Vec<&Branch>, BranchError> {
        let chain = self.ancestors(id)?;
        Ok(chain
            .into_iter()
            .rev()
            .map(|bid| self.branches.get(&bid).expect("walked over known ids"))
            .collect())
    }

    /// Ids from `id` up to the root (leaf first).
    fn ancestors(&self, id: Uuid) -> Result<Vec<Uuid>, BranchError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(BranchError::Conflict(format!(
                    "cycle detected at branch {current}"
                )));
            }
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(BranchError::Conflict("parent chain too deep".into()));
            }
            let branch = self
                .branches
                .get(&current)
                .ok_or(BranchError::NotFound(current))?;
            chain.push(current);
            cursor = branch.parent;
        }
        Ok(chain)
    }

    /// Bump the cached commit count after a successful append.
    pub(crate) fn record_commit(&mut self, id: Uuid) {
        if let Some(branch) = self.branches.get_mut(&id) {
            branch.commit_count += 1;
            branch.updated_at = epoch_secs();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> (BranchSet, Uuid) {
        let author = Uuid::new_v4();
        let set = BranchSet::new(Uuid::new_v4(), "main", author);
        (set, author)
    }

    #[test]
    fn test_default_branch_is_root() {
        let (set, _) = set();
        let main = set.get(set.default_id()).unwrap();
        assert!(main.is_default);
        assert!(main.parent.is_none());
        assert_eq!(main.name, "main");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_create_defaults_to_default_parent() {
        let (mut set, author) = set();
        let default_id = set.default_id();
        let feature = set
            .create("feature/x", None, None, author, Role::Editor)
            .unwrap();
        assert_eq!(feature.parent, Some(default_id));
        assert!(!feature.is_default);
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let (mut set, author) = set();
        let err = set.create("   ", None, None, author, Role::Editor).unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }

    #[test]
    fn test_create_rejects_duplicate_name() {
        let (mut set, author) = set();
        set.create("draft", None, None, author, Role::Editor).unwrap();
        let err = set
            .create("draft", None, None, author, Role::Editor)
            .unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }

    #[test]
    fn test_create_rejects_readers_and_reviewers() {
        let (mut set, author) = set();
        for role in [Role::Reader, Role::Reviewer] {
            let err = set.create("x", None, None, author, role).unwrap_err();
            assert!(matches!(err, BranchError::Forbidden(_)));
        }
    }

    #[test]
    fn test_create_rejects_unknown_parent() {
        let (mut set, author) = set();
        let err = set
            .create("x", Some(Uuid::new_v4()), None, author, Role::Editor)
            .unwrap_err();
        assert!(matches!(err, BranchError::NotFound(_)));
    }

    #[test]
    fn test_hierarchy_root_to_leaf() {
        let (mut set, author) = set();
        let a = set
            .create("feature/a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        let b = set
            .create("feature/a/b", Some(a), None, author, Role::Editor)
            .unwrap()
            .id;

        let chain = set.hierarchy(b).unwrap();
        let names: Vec<&str> = chain.iter().map(|br| br.name.as_str()).collect();
        assert_eq!(names, vec!["main", "feature/a", "feature/a/b"]);
    }

    #[test]
    fn test_acyclicity_walk_terminates_for_all() {
        let (mut set, author) = set();
        let mut parent = None;
        for i in 0..10 {
            parent = Some(
                set.create(format!("b{i}"), parent, None, author, Role::Editor)
                    .unwrap()
                    .id,
            );
        }
        // Every branch's chain terminates at the default branch.
        let ids: Vec<Uuid> = set.list().iter().map(|b| b.id).collect();
        for id in ids {
            let chain = set.hierarchy(id).unwrap();
            assert_eq!(chain.first().unwrap().id, set.default_id());
        }
    }

    #[test]
    fn test_delete_default_rejected_for_everyone() {
        let (mut set, _) = set();
        let id = set.default_id();
        for role in [Role::Editor, Role::Owner] {
            let err = set.delete(id, role).unwrap_err();
            assert!(matches!(err, BranchError::Protected(_)));
        }
    }

    #[test]
    fn test_delete_with_children_conflicts() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        set.create("a/child", Some(a), None, author, Role::Editor)
            .unwrap();

        let err = set.delete(a, Role::Owner).unwrap_err();
        assert!(matches!(err, BranchError::Conflict(_)));
        assert!(set.contains(a));
    }

    #[test]
    fn test_delete_leaf() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        let removed = set.delete(a, Role::Editor).unwrap();
        assert_eq!(removed.id, a);
        assert!(!set.contains(a));
    }

    #[test]
    fn test_protected_branch_rename_requires_owner() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        set.set_protected(a, true, Role::Owner).unwrap();

        let err = set
            .update(a, Some("renamed".into()), None, Role::Editor)
            .unwrap_err();
        assert!(matches!(err, BranchError::Protected(_)));

        let renamed = set
            .update(a, Some("renamed".into()), None, Role::Owner)
            .unwrap();
        assert_eq!(renamed.name, "renamed");
    }

    #[test]
    fn test_protected_branch_delete_requires_owner() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        set.set_protected(a, true, Role::Owner).unwrap();

        assert!(matches!(
            set.delete(a, Role::Editor).unwrap_err(),
            BranchError::Protected(_)
        ));
        assert!(set.delete(a, Role::Owner).is_ok());
    }

    #[test]
    fn test_set_protected_requires_owner() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        assert!(matches!(
            set.set_protected(a, true, Role::Editor).unwrap_err(),
            BranchError::Forbidden(_)
        ));
    }

    #[test]
    fn test_update_rejects_name_collision() {
        let (mut set, author) = set();
        set.create("a", None, None, author, Role::Editor).unwrap();
        let b = set
            .create("b", None, None, author, Role::Editor)
            .unwrap()
            .id;
        let err = set
            .update(b, Some("a".into()), None, Role::Editor)
            .unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }

    #[test]
    fn test_update_keeps_own_name() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        // Renaming to its own current name is not a collision.
        let updated = set
            .update(a, Some("a".into()), Some("now with notes".into()), Role::Editor)
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("now with notes"));
    }

    #[test]
    fn test_from_records_roundtrip() {
        let (mut set, author) = set();
        set.create("a", None, None, author, Role::Editor).unwrap();
        set.create("b", None, None, author, Role::Editor).unwrap();

        let doc = set.document_id();
        let records: Vec<Branch> = set.list().into_iter().cloned().collect();
        let rebuilt = BranchSet::from_records(doc, records).unwrap();
        assert_eq!(rebuilt.len(), 3);
        assert_eq!(rebuilt.default_id(), set.default_id());
    }

    #[test]
    fn test_from_records_rejects_missing_default() {
        let doc = Uuid::new_v4();
        let err = BranchSet::from_records(doc, Vec::new()).unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }

    #[test]
    fn test_record_commit_bumps_count() {
        let (mut set, _) = set();
        let id = set.default_id();
        set.record_commit(id);
        set.record_commit(id);
        assert_eq!(set.get(id).unwrap().commit_count, 2);
    }

    #[test]
    fn test_list_sorted_and_children() {
        let (mut set, author) = set();
        let a = set
            .create("a", None, None, author, Role::Editor)
            .unwrap()
            .id;
        set.create("a/x", Some(a), None, author, Role::Editor).unwrap();
        set.create("a/y", Some(a), None, author, Role::Editor).unwrap();

        assert_eq!(set.children(a).len(), 2);
        // All four branches share a creation second; the default still
        // leads even though "a" sorts before "main".
        let listed = set.list();
        assert!(listed[0].is_default);
        assert_eq!(listed[0].name, "main");
        let rest: Vec<&str> = listed[1..].iter().map(|b| b.name.as_str()).collect();
        assert_eq!(rest, vec!["a", "a/x", "a/y"]);
    }
}
