//! Manifest Reconciler
//!
//! Pure planning step: desired manifest + previous manifest + platform
//! snapshot in, [`Reconciliation`] out. Nothing here touches the platform,
//! so every decision is reproducible from its inputs.
//!
//! ## Scope
//!
//! Deletion and flagging only consider namespaces that appear in the desired
//! or the previous manifest. Entities in any other namespace are never
//! touched. Grant revocation is automatic; user and group deletion are gated
//! by [`ReconcilePolicy`].
//!
//! ## Rejected records
//!
//! A record that fails validation still names a platform entity. That entity
//! (and, for users, every group it belongs to) is held: never deleted,
//! revoked or flagged while its record stays invalid. The same applies to
//! the manifest's `held` users, profiles the builder already rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::diff::{diff, diff_by, Keyed};
use super::plan::{Operation, OperationPlan, Target};
use crate::error::ValidationError;
use crate::manifest::{
    AssetCategory, AssetManifest, AssetRecord, HeldUser, RejectedRecord, UserManifest,
    UserRecord,
};
use crate::platform::{GroupRef, PlatformState};

impl Keyed for UserRecord {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.namespace.clone(), self.username.clone())
    }
}

impl Keyed for AssetRecord {
    type Key = (String, AssetCategory, String, String);

    fn key(&self) -> Self::Key {
        (
            self.namespace.clone(),
            self.category,
            self.name.clone(),
            self.group.clone(),
        )
    }
}

impl Keyed for GroupRef {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.namespace.clone(), self.name.clone())
    }
}

/// Which destructive operations the reconciler may emit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    pub allow_user_deletion: bool,
    pub allow_group_deletion: bool,
}

/// Why an undesired entity was flagged instead of deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagReason {
    /// The previous manifest contained it
    RemovedFromManifest,
    /// Never managed by a manifest
    Unmanaged,
}

/// An entity left in place because deletion is disabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedEntity {
    pub target: Target,
    pub namespace: String,
    pub name: String,
    pub reason: FlagReason,
}

/// Result of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    pub plan: OperationPlan,
    pub flagged: Vec<FlaggedEntity>,
    pub rejected: Vec<RejectedRecord>,
}

/// Computes operation plans from manifests and platform state
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Plan namespaces, groups and users for a user manifest
    pub fn plan_users(
        &self,
        desired: &UserManifest,
        previous: Option<&UserManifest>,
        state: &PlatformState,
    ) -> Reconciliation {
        let mut rejected = Vec::new();
        let (users, refused) = accept(&desired.users, UserRecord::validate, UserRecord::display_key, &mut rejected);
        let held = HeldUsers::new(&refused, &desired.held, state);
        let previous_users: &[UserRecord] = previous.map(|m| m.users.as_slice()).unwrap_or_default();

        let scope: BTreeSet<&str> = users
            .iter()
            .map(|u| u.namespace.as_str())
            .chain(previous_users.iter().map(|u| u.namespace.as_str()))
            .collect();

        let mut operations = Vec::new();
        let mut flagged = Vec::new();

        // 1. Namespaces
        operations.extend(create_namespaces(users.iter().map(|u| u.namespace.as_str()), state));

        // 2. Groups
        let desired_groups: BTreeSet<GroupRef> = users.iter().flat_map(|u| user_groups(u)).collect();
        let previous_groups: BTreeSet<GroupRef> = previous_users.iter().flat_map(user_groups).collect();
        let current_groups = state
            .groups
            .iter()
            .filter(|g| scope.contains(g.namespace.as_str()));

        let groups = diff(&desired_groups, current_groups);
        operations.extend(groups.missing.into_iter().map(|g| Operation::CreateGroup {
            namespace: g.namespace.clone(),
            group: g.name.clone(),
        }));

        for group in groups.extra {
            if held.groups.contains(group) {
                debug!(namespace = %group.namespace, group = %group.name, "Keeping group of a rejected record");
                continue;
            }
            if state.group_has_grants(group) {
                debug!(namespace = %group.namespace, group = %group.name, "Keeping group referenced by grants");
                continue;
            }
            if self.policy.allow_group_deletion {
                operations.push(Operation::DeleteGroup {
                    namespace: group.namespace.clone(),
                    group: group.name.clone(),
                });
            } else {
                flagged.push(FlaggedEntity {
                    target: Target::Group,
                    namespace: group.namespace.clone(),
                    name: group.name.clone(),
                    reason: flag_reason(previous_groups.contains(group)),
                });
            }
        }

        // 3. Users
        let previous_keys: BTreeSet<(String, String)> = previous_users.iter().map(Keyed::key).collect();
        let current_users = state
            .users
            .iter()
            .filter(|u| scope.contains(u.namespace.as_str()));

        let diffed = diff(users.iter().copied(), current_users);
        operations.extend(diffed.missing.into_iter().map(|u| Operation::CreateUser { user: u.clone() }));

        for change in diffed.changed {
            let (desired, current) = (change.desired, change.current);
            let role_downgrade = desired.role.is_downgrade_from(current.role);
            if role_downgrade {
                warn!(
                    user = %desired.display_key(),
                    from = %current.role,
                    to = %desired.role,
                    "Role downgrade planned"
                );
            }
            operations.push(Operation::UpdateUser {
                user: desired.clone(),
                add_groups: desired.groups.difference(&current.groups).cloned().collect(),
                remove_groups: current.groups.difference(&desired.groups).cloned().collect(),
                previous_role: current.role,
                role_downgrade,
            });
        }

        for user in diffed.extra {
            if held.users.contains(&user.key()) {
                debug!(user = %user.display_key(), "Keeping user whose record was rejected");
                continue;
            }
            if self.policy.allow_user_deletion {
                operations.push(Operation::DeleteUser {
                    namespace: user.namespace.clone(),
                    username: user.username.clone(),
                });
            } else {
                flagged.push(FlaggedEntity {
                    target: Target::User,
                    namespace: user.namespace.clone(),
                    name: user.username.clone(),
                    reason: flag_reason(previous_keys.contains(&user.key())),
                });
            }
        }

        finish("users", operations, flagged, rejected)
    }

    /// Plan grants, plus any namespaces and groups they need, for an asset
    /// manifest. Groups are never deleted from this side.
    pub fn plan_assets(
        &self,
        desired: &AssetManifest,
        previous: Option<&AssetManifest>,
        state: &PlatformState,
    ) -> Reconciliation {
        let mut rejected = Vec::new();
        let check = |grant: &AssetRecord| -> Result<(), ValidationError> {
            grant.validate()?;
            match state.find_asset(&grant.name, grant.category) {
                Some(_) => Ok(()),
                None => Err(ValidationError::UnknownAsset {
                    name: grant.name.clone(),
                    category: grant.category.to_string(),
                }),
            }
        };
        let (grants, refused) = accept(&desired.assets, check, AssetRecord::display_key, &mut rejected);
        let held: BTreeSet<_> = refused.iter().map(|g| g.key()).collect();
        let previous_grants: &[AssetRecord] = previous.map(|m| m.assets.as_slice()).unwrap_or_default();

        let scope: BTreeSet<&str> = grants
            .iter()
            .map(|g| g.namespace.as_str())
            .chain(previous_grants.iter().map(|g| g.namespace.as_str()))
            .collect();

        let mut operations = Vec::new();

        // 1. Namespaces and groups the grants depend on
        operations.extend(create_namespaces(grants.iter().map(|g| g.namespace.as_str()), state));

        let desired_groups: BTreeSet<GroupRef> = grants
            .iter()
            .map(|g| GroupRef::new(g.namespace.as_str(), g.group.as_str()))
            .collect();
        operations.extend(
            desired_groups
                .iter()
                .filter(|g| !state.groups.contains(*g))
                .map(|g| Operation::CreateGroup {
                    namespace: g.namespace.clone(),
                    group: g.name.clone(),
                }),
        );

        // 2. Grants
        let current_grants = state
            .grants
            .iter()
            .filter(|g| scope.contains(g.namespace.as_str()));

        let diffed = diff_by(grants.iter().copied(), current_grants, |a, b| {
            a.permission == b.permission
        });

        operations.extend(diffed.missing.into_iter().map(|g| Operation::CreateGrant { grant: g.clone() }));
        operations.extend(diffed.changed.into_iter().map(|c| Operation::UpdateGrant {
            grant: c.desired.clone(),
            previous_permission: c.current.permission,
        }));
        for grant in diffed.extra {
            if held.contains(&grant.key()) {
                debug!(grant = %grant.display_key(), "Keeping grant whose record was rejected");
                continue;
            }
            operations.push(Operation::RevokeGrant { grant: grant.clone() });
        }

        finish("assets", operations, Vec::new(), rejected)
    }
}

/// Validate records and drop later duplicates. Returns the accepted records
/// and the refused ones; refusals are also reported into `rejected`.
fn accept<'a, T, V, L>(
    records: &'a [T],
    validate: V,
    label: L,
    rejected: &mut Vec<RejectedRecord>,
) -> (Vec<&'a T>, Vec<&'a T>)
where
    T: Keyed,
    V: Fn(&T) -> Result<(), ValidationError>,
    L: Fn(&T) -> String,
{
    let mut seen = BTreeSet::new();
    let mut accepted = Vec::with_capacity(records.len());
    let mut refused = Vec::new();

    for record in records {
        let outcome = validate(record).and_then(|()| {
            if seen.insert(record.key()) {
                Ok(())
            } else {
                Err(ValidationError::Duplicate { key: label(record) })
            }
        });

        match outcome {
            Ok(()) => accepted.push(record),
            Err(error) => {
                warn!(record = %label(record), error = %error, "Rejected manifest record");
                rejected.push(RejectedRecord {
                    record: label(record),
                    error,
                });
                refused.push(record);
            }
        }
    }

    (accepted, refused)
}

/// Users and groups a rejected user record may still describe
#[derive(Debug, Default)]
struct HeldUsers {
    users: BTreeSet<(String, String)>,
    groups: BTreeSet<GroupRef>,
}

impl HeldUsers {
    fn new(refused: &[&UserRecord], rejected_profiles: &[HeldUser], state: &PlatformState) -> Self {
        let mut held = HeldUsers::default();

        for user in refused {
            held.users.insert(user.key());
            held.groups.extend(user_groups(user));
        }
        for user in rejected_profiles {
            held.users.insert((user.namespace.clone(), user.username.clone()));
            held.groups.extend(
                user.groups
                    .iter()
                    .map(|g| GroupRef::new(user.namespace.as_str(), g.as_str())),
            );
        }
        // Memberships the platform still has for held users
        for user in &state.users {
            if held.users.contains(&user.key()) {
                held.groups.extend(user_groups(user));
            }
        }

        held
    }
}

fn create_namespaces<'a>(
    namespaces: impl Iterator<Item = &'a str>,
    state: &PlatformState,
) -> Vec<Operation> {
    namespaces
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|ns| !state.has_namespace(ns))
        .map(|ns| Operation::CreateNamespace {
            namespace: ns.to_string(),
        })
        .collect()
}

fn user_groups(user: &UserRecord) -> impl Iterator<Item = GroupRef> + '_ {
    user.groups
        .iter()
        .map(move |g| GroupRef::new(user.namespace.as_str(), g.as_str()))
}

fn flag_reason(previously_managed: bool) -> FlagReason {
    if previously_managed {
        FlagReason::RemovedFromManifest
    } else {
        FlagReason::Unmanaged
    }
}

fn finish(
    kind: &str,
    operations: Vec<Operation>,
    flagged: Vec<FlaggedEntity>,
    rejected: Vec<RejectedRecord>,
) -> Reconciliation {
    let plan = OperationPlan::new(operations);
    info!(
        kind,
        operations = plan.len(),
        flagged = flagged.len(),
        rejected = rejected.len(),
        "Reconciliation planned"
    );
    Reconciliation {
        plan,
        flagged,
        rejected,
    }
}
