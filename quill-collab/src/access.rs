//! Role-based access control for documents and branches.
//!
//! Roles form a strict capability chain — reader ⊂ reviewer ⊂ editor ⊂
//! owner — so authorization reduces to an ordering check against the
//! minimum role that holds a capability. Only owners manage collaborators
//! or touch protected branches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Caller role attached to a (user, document) pair.
///
/// The derived `Ord` encodes the superset chain: every capability a role
/// holds is held by all greater roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Reader,
    Reviewer,
    Editor,
    Owner,
}

impl Role {
    /// Whether this role holds the given capability.
    pub fn allows(self, capability: Capability) -> bool {
        self >= capability.required_role()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Reader => "reader",
            Role::Reviewer => "reviewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        };
        f.write_str(name)
    }
}

/// Operations gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    ViewDocument,
    ViewBranch,
    CreateBranch,
    EditBranch,
    DeleteBranch,
    Commit,
    Merge,
    ManageCollaborators,
}

impl Capability {
    /// Minimum role that holds this capability. Static and total.
    pub fn required_role(self) -> Role {
        match self {
            Capability::ViewDocument | Capability::ViewBranch => Role::Reader,
            Capability::CreateBranch
            | Capability::EditBranch
            | Capability::DeleteBranch
            | Capability::Commit
            | Capability::Merge => Role::Editor,
            Capability::ManageCollaborators => Role::Owner,
        }
    }
}

/// Authorization failures. Surfaced as 403-class errors, never retried.
#[derive(Debug, Clone)]
pub enum AccessError {
    /// No role granted for this (user, document) pair
    Unknown { user_id: Uuid, doc_id: Uuid },
    /// Role granted, but below the capability's minimum
    Forbidden { role: Role, capability: Capability },
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::Unknown { user_id, doc_id } => {
                write!(f, "user {user_id} has no role on document {doc_id}")
            }
            AccessError::Forbidden { role, capability } => {
                write!(f, "role {role} lacks capability {capability:?}")
            }
        }
    }
}

impl std::error::Error for AccessError {}

/// In-memory grant table resolving callers to roles.
///
/// The gateway holds one guard per process; grant mutations go through
/// `grant`/`revoke`, which are themselves gated on ManageCollaborators.
pub struct AccessGuard {
    grants: HashMap<(Uuid, Uuid), Role>,
    /// Role assumed for users with no explicit grant (None = reject)
    default_role: Option<Role>,
}

impl AccessGuard {
    pub fn new() -> Self {
        Self {
            grants: HashMap::new(),
            default_role: None,
        }
    }

    /// Guard that maps unknown users to `role` instead of rejecting them.
    pub fn with_default_role(role: Role) -> Self {
        Self {
            grants: HashMap::new(),
            default_role: Some(role),
        }
    }

    /// Resolve the caller's role for a document.
    pub fn role(&self, user_id: Uuid, doc_id: Uuid) -> Option<Role> {
        self.grants
            .get(&(user_id, doc_id))
            .copied()
            .or(self.default_role)
    }

    /// Resolve the caller's role and check it holds `capability`.
    pub fn authorize(
        &self,
        user_id: Uuid,
        doc_id: Uuid,
        capability: Capability,
    ) -> Result<Role, AccessError> {
        let role = self
            .role(user_id, doc_id)
            .ok_or(AccessError::Unknown { user_id, doc_id })?;
        if role.allows(capability) {
            Ok(role)
        } else {
            Err(AccessError::Forbidden { role, capability })
        }
    }

    /// Grant `role` to a user, authorized by `actor`.
    pub fn grant(
        &mut self,
        actor: Uuid,
        doc_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), AccessError> {
        self.authorize(actor, doc_id, Capability::ManageCollaborators)?;
        self.grants.insert((user_id, doc_id), role);
        Ok(())
    }

    /// Remove a user's grant, authorized by `actor`.
    pub fn revoke(&mut self, actor: Uuid, doc_id: Uuid, user_id: Uuid) -> Result<(), AccessError> {
        self.authorize(actor, doc_id, Capability::ManageCollaborators)?;
        self.grants.remove(&(user_id, doc_id));
        Ok(())
    }

    /// Install the document creator as owner. Bypasses authorization;
    /// called once by the gateway when a document is first opened.
    pub fn bootstrap_owner(&mut self, doc_id: Uuid, user_id: Uuid) {
        self.grants.entry((user_id, doc_id)).or_insert(Role::Owner);
    }

    /// Operator path: install a grant without an authorizing actor.
    /// Used when provisioning documents outside the protocol.
    pub fn seed(&mut self, doc_id: Uuid, user_id: Uuid, role: Role) {
        self.grants.insert((user_id, doc_id), role);
    }

    /// Number of explicit grants held.
    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }
}

impl Default for AccessGuard {
    fn default() -> Self {
        Self::new()
    }
}
