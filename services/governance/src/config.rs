//! Runtime Configuration
//!
//! Command-line flags with environment fallbacks. Library components take
//! plain structs ([`ReconcilePolicy`], [`ApplyConfig`], [`AttributeMapping`]);
//! this module only maps flags onto them.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::agents::governance::ApplyConfig;
use crate::manifest::AttributeMapping;
use crate::reconcile::ReconcilePolicy;

/// Storage, policy and execution settings shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GovernanceConfig {
    /// Directory holding manifest snapshots
    #[arg(long, env = "QS_GOVERNANCE_DIR", default_value = "./qs-governance", global = true)]
    pub state_dir: PathBuf,

    /// Platform state file (defaults to `<state-dir>/platform.json`)
    #[arg(long, env = "QS_PLATFORM_STATE", global = true)]
    pub platform_state: Option<PathBuf>,

    /// Delete platform users that are no longer in the manifest
    #[arg(long, env = "ALLOW_USER_DELETION", global = true)]
    pub allow_user_deletion: bool,

    /// Delete groups no user or grant references any more
    #[arg(long, env = "ALLOW_GROUP_DELETION", global = true)]
    pub allow_group_deletion: bool,

    #[arg(long, env = "MAX_PARALLEL_NAMESPACES", default_value_t = 4, global = true)]
    pub max_parallel_namespaces: usize,

    /// Attempts per operation for throttled or transport failures
    #[arg(long, env = "APPLY_MAX_ATTEMPTS", default_value_t = 3, global = true)]
    pub apply_max_attempts: u32,

    #[arg(long, env = "APPLY_RETRY_BACKOFF_MS", default_value_t = 500, global = true)]
    pub apply_retry_backoff_ms: u64,

    /// Wait after creating a namespace before creating its groups
    #[arg(long, env = "NAMESPACE_READY_DELAY_SECS", default_value_t = 0, global = true)]
    pub namespace_ready_delay_secs: u64,

    /// Manifest versions kept per kind
    #[arg(long, env = "MANIFEST_RETENTION", default_value_t = 10, global = true)]
    pub manifest_retention: usize,

    /// Profile attribute holding the platform username
    #[arg(long, env = "USERNAME_ATTRIBUTE", default_value = "username", global = true)]
    pub username_attribute: String,

    /// Profile attribute naming the user's namespace
    #[arg(long, env = "NAMESPACE_ATTRIBUTE", default_value = "organization", global = true)]
    pub namespace_attribute: String,

    /// Profile attribute listing the user's groups, comma-separated
    #[arg(long, env = "GROUPS_ATTRIBUTE", default_value = "department", global = true)]
    pub groups_attribute: String,

    #[arg(long, env = "ROLE_ATTRIBUTE", default_value = "userType", global = true)]
    pub role_attribute: String,

    #[arg(long, env = "EMAIL_ATTRIBUTE", default_value = "email", global = true)]
    pub email_attribute: String,
}

impl GovernanceConfig {
    pub fn manifest_dir(&self) -> PathBuf {
        self.state_dir.join("manifests")
    }

    pub fn platform_state_path(&self) -> PathBuf {
        self.platform_state
            .clone()
            .unwrap_or_else(|| self.state_dir.join("platform.json"))
    }

    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            allow_user_deletion: self.allow_user_deletion,
            allow_group_deletion: self.allow_group_deletion,
        }
    }

    pub fn attribute_mapping(&self) -> AttributeMapping {
        AttributeMapping {
            username: self.username_attribute.clone(),
            namespace: self.namespace_attribute.clone(),
            groups: self.groups_attribute.clone(),
            role: self.role_attribute.clone(),
            email: self.email_attribute.clone(),
        }
    }

    pub fn apply_config(&self) -> ApplyConfig {
        ApplyConfig {
            max_attempts: self.apply_max_attempts,
            retry_backoff: Duration::from_millis(self.apply_retry_backoff_ms),
            max_parallel_namespaces: self.max_parallel_namespaces,
            namespace_ready_delay: Duration::from_secs(self.namespace_ready_delay_secs),
        }
    }
}

/// Okta application whose assigned users are governed
#[derive(Args, Debug, Clone)]
pub struct OktaConfig {
    /// Okta org subdomain (`{account}.okta.com`)
    #[arg(long, env = "OKTA_ACCOUNT_ID")]
    pub okta_account_id: Option<String>,

    /// Full org URL, overrides the account id (custom domains)
    #[arg(long, env = "OKTA_BASE_URL")]
    pub okta_base_url: Option<String>,

    #[arg(long, env = "OKTA_APP_ID")]
    pub okta_app_id: Option<String>,

    #[arg(long, env = "OKTA_API_TOKEN", hide_env_values = true)]
    pub okta_api_token: Option<String>,
}
