//! Operation Plans
//!
//! A plan is an ordered list of platform operations. Ordering is a property
//! of the type: every operation belongs to a [`Phase`] and
//! [`OperationPlan::new`] sorts by phase, so namespaces exist before their
//! groups, groups before the users and grants that reference them, and all
//! deletions come after all creations. Within a phase operations are sorted
//! by namespace and subject, so equal inputs give byte-identical plans.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::manifest::{AssetRecord, Permission, Role, UserRecord};

/// What an operation does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "CREATE"),
            Action::Update => write!(f, "UPDATE"),
            Action::Delete => write!(f, "DELETE"),
        }
    }
}

/// Kind of platform entity an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Namespace,
    Group,
    User,
    Permission,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Namespace => write!(f, "Namespace"),
            Target::Group => write!(f, "Group"),
            Target::User => write!(f, "User"),
            Target::Permission => write!(f, "Permission"),
        }
    }
}

/// Execution phase; plans are sorted by this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    CreateNamespace,
    CreateGroup,
    UpsertUser,
    UpsertGrant,
    RevokeGrant,
    DeleteUser,
    DeleteGroup,
}

/// A single platform change and its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateNamespace {
        namespace: String,
    },
    CreateGroup {
        namespace: String,
        group: String,
    },
    CreateUser {
        user: UserRecord,
    },
    UpdateUser {
        /// Desired state of the user after the update
        user: UserRecord,
        add_groups: BTreeSet<String>,
        remove_groups: BTreeSet<String>,
        previous_role: Role,
        /// The new role has fewer capabilities than the current one
        role_downgrade: bool,
    },
    DeleteUser {
        namespace: String,
        username: String,
    },
    DeleteGroup {
        namespace: String,
        group: String,
    },
    CreateGrant {
        grant: AssetRecord,
    },
    UpdateGrant {
        grant: AssetRecord,
        previous_permission: Permission,
    },
    RevokeGrant {
        grant: AssetRecord,
    },
}

impl Operation {
    pub fn action(&self) -> Action {
        match self {
            Operation::CreateNamespace { .. }
            | Operation::CreateGroup { .. }
            | Operation::CreateUser { .. }
            | Operation::CreateGrant { .. } => Action::Create,
            Operation::UpdateUser { .. } | Operation::UpdateGrant { .. } => Action::Update,
            Operation::DeleteUser { .. }
            | Operation::DeleteGroup { .. }
            | Operation::RevokeGrant { .. } => Action::Delete,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Operation::CreateNamespace { .. } => Target::Namespace,
            Operation::CreateGroup { .. } | Operation::DeleteGroup { .. } => Target::Group,
            Operation::CreateUser { .. }
            | Operation::UpdateUser { .. }
            | Operation::DeleteUser { .. } => Target::User,
            Operation::CreateGrant { .. }
            | Operation::UpdateGrant { .. }
            | Operation::RevokeGrant { .. } => Target::Permission,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Operation::CreateNamespace { .. } => Phase::CreateNamespace,
            Operation::CreateGroup { .. } => Phase::CreateGroup,
            Operation::CreateUser { .. } | Operation::UpdateUser { .. } => Phase::UpsertUser,
            Operation::CreateGrant { .. } | Operation::UpdateGrant { .. } => Phase::UpsertGrant,
            Operation::RevokeGrant { .. } => Phase::RevokeGrant,
            Operation::DeleteUser { .. } => Phase::DeleteUser,
            Operation::DeleteGroup { .. } => Phase::DeleteGroup,
        }
    }

    /// Namespace the operation is confined to
    pub fn namespace(&self) -> &str {
        match self {
            Operation::CreateNamespace { namespace }
            | Operation::CreateGroup { namespace, .. }
            | Operation::DeleteUser { namespace, .. }
            | Operation::DeleteGroup { namespace, .. } => namespace,
            Operation::CreateUser { user } | Operation::UpdateUser { user, .. } => &user.namespace,
            Operation::CreateGrant { grant }
            | Operation::UpdateGrant { grant, .. }
            | Operation::RevokeGrant { grant } => &grant.namespace,
        }
    }

    /// Groups that must already exist for this operation to succeed
    pub fn required_groups(&self) -> Vec<&str> {
        match self {
            Operation::CreateUser { user } => user.groups.iter().map(String::as_str).collect(),
            Operation::UpdateUser { add_groups, .. } => {
                add_groups.iter().map(String::as_str).collect()
            }
            Operation::CreateGrant { grant } | Operation::UpdateGrant { grant, .. } => {
                vec![grant.group.as_str()]
            }
            _ => Vec::new(),
        }
    }

    /// Name of the entity the operation acts on, within its namespace
    pub fn subject(&self) -> String {
        match self {
            Operation::CreateNamespace { namespace } => namespace.clone(),
            Operation::CreateGroup { group, .. } | Operation::DeleteGroup { group, .. } => {
                group.clone()
            }
            Operation::CreateUser { user } | Operation::UpdateUser { user, .. } => {
                user.username.clone()
            }
            Operation::DeleteUser { username, .. } => username.clone(),
            Operation::CreateGrant { grant }
            | Operation::UpdateGrant { grant, .. }
            | Operation::RevokeGrant { grant } => {
                format!("{}:{}@{}", grant.category, grant.name, grant.group)
            }
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}/{}",
            self.action(),
            self.target(),
            self.namespace(),
            self.subject()
        )
    }
}

/// Ordered sequence of operations produced by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationPlan {
    operations: Vec<Operation>,
}

impl OperationPlan {
    /// Order operations by phase, then namespace, then subject
    pub fn new(mut operations: Vec<Operation>) -> Self {
        operations.sort_by_cached_key(|op| (op.phase(), op.namespace().to_string(), op.subject()));
        Self { operations }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    /// Operations grouped by namespace, each with its index in the plan.
    /// Within a namespace the plan order is preserved.
    pub fn by_namespace(&self) -> BTreeMap<&str, Vec<(usize, &Operation)>> {
        let mut batches: BTreeMap<&str, Vec<(usize, &Operation)>> = BTreeMap::new();
        for (index, op) in self.operations.iter().enumerate() {
            batches.entry(op.namespace()).or_default().push((index, op));
        }
        batches
    }

    pub fn count(&self, action: Action, target: Target) -> usize {
        self.operations
            .iter()
            .filter(|op| op.action() == action && op.target() == target)
            .count()
    }
}

impl<'a> IntoIterator for &'a OperationPlan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
