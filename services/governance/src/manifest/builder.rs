//! User Manifest Builder
//!
//! Turns raw identity-provider profiles into a user manifest using a fixed
//! attribute mapping. Malformed profiles are excluded and reported; they
//! never abort the build.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::types::{split_groups, HeldUser, Role, UserManifest, UserRecord};
use crate::error::ValidationError;
use crate::identity::RawUserProfile;

/// Identity-provider statuses that no longer grant platform access
const INACTIVE_STATUSES: [&str; 4] = ["DEPROVISIONED", "SUSPENDED", "DEACTIVATED", "INACTIVE"];

/// Which raw attribute feeds which manifest field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    pub username: String,
    pub namespace: String,
    pub groups: String,
    pub role: String,
    pub email: String,
}

impl Default for AttributeMapping {
    fn default() -> Self {
        Self {
            username: "username".to_string(),
            namespace: "organization".to_string(),
            groups: "department".to_string(),
            role: "userType".to_string(),
            email: "email".to_string(),
        }
    }
}

/// A record excluded from a manifest or plan, with its cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Best available identifier for the record
    pub record: String,
    pub error: ValidationError,
}

/// Result of a manifest build
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub manifest: UserManifest,
    pub rejected: Vec<RejectedRecord>,
    /// Profiles skipped because the identity provider marks them inactive
    pub inactive: usize,
}

/// Builds user manifests from raw identity-provider profiles
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    mapping: AttributeMapping,
}

impl ManifestBuilder {
    pub fn new(mapping: AttributeMapping) -> Self {
        Self { mapping }
    }

    /// Build a best-effort manifest. Rejected profiles are listed in the
    /// outcome, and those still naming a user are kept as held users.
    pub fn build(&self, profiles: &[RawUserProfile]) -> BuildOutcome {
        let mut outcome = BuildOutcome::default();
        let mut seen = HashSet::new();

        for (index, profile) in profiles.iter().enumerate() {
            if let Some(status) = profile.status.as_deref() {
                if INACTIVE_STATUSES.contains(&status.to_ascii_uppercase().as_str()) {
                    debug!(profile = %self.identify(index, profile), status = %status, "Skipping inactive profile");
                    outcome.inactive += 1;
                    continue;
                }
            }

            let identifier = self.identify(index, profile);

            let user = match self.map_profile(profile) {
                Ok(user) => user,
                Err(error) => {
                    warn!(record = %identifier, error = %error, "Rejected identity record");
                    outcome.manifest.held.extend(self.held_user(profile));
                    outcome.rejected.push(RejectedRecord {
                        record: identifier,
                        error,
                    });
                    continue;
                }
            };

            if !seen.insert((user.namespace.clone(), user.username.clone())) {
                let error = ValidationError::Duplicate {
                    key: user.display_key(),
                };
                warn!(record = %identifier, error = %error, "Rejected identity record");
                outcome.rejected.push(RejectedRecord {
                    record: identifier,
                    error,
                });
                continue;
            }

            outcome.manifest.users.push(user);
        }

        info!(
            users = outcome.manifest.users.len(),
            rejected = outcome.rejected.len(),
            held = outcome.manifest.held.len(),
            inactive = outcome.inactive,
            "Built user manifest"
        );

        outcome
    }

    /// Apply the attribute mapping to one profile
    pub fn map_profile(&self, profile: &RawUserProfile) -> Result<UserRecord, ValidationError> {
        let m = &self.mapping;

        let username = required(profile, &m.username)?;
        let namespace = required(profile, &m.namespace)?;
        let department = required(profile, &m.groups)?;
        let role = required(profile, &m.role)?.parse::<Role>()?;
        let email = required(profile, &m.email)?;

        let user = UserRecord {
            username,
            namespace,
            groups: split_groups(&department),
            role,
            email,
        };
        user.validate()?;

        Ok(user)
    }

    /// Identity of a rejected profile, when it still has one
    fn held_user(&self, profile: &RawUserProfile) -> Option<HeldUser> {
        let m = &self.mapping;
        Some(HeldUser {
            username: required(profile, &m.username).ok()?,
            namespace: required(profile, &m.namespace).ok()?,
            groups: profile.attribute(&m.groups).map(split_groups).unwrap_or_default(),
        })
    }

    fn identify(&self, index: usize, profile: &RawUserProfile) -> String {
        profile
            .attribute(&self.mapping.username)
            .map(str::to_string)
            .or_else(|| profile.id.clone())
            .unwrap_or_else(|| format!("#{}", index))
    }
}

fn required(profile: &RawUserProfile, attribute: &str) -> Result<String, ValidationError> {
    profile
        .attribute(attribute)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationError::MissingAttribute {
            attribute: attribute.to_string(),
        })
}
