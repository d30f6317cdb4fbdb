//! QuickSight Governance - Standalone Binary
//!
//! Builds and stores manifests, then reconciles them against the platform.
//! Each invocation performs one run; scheduling is left to cron or the
//! orchestrator that launches it.
//!
//! ## Usage
//!
//! ```bash
//! # Ingest users assigned to the Okta app, reconcile and apply
//! qs-governance sync-users
//!
//! # Same, from an exported profile file
//! qs-governance sync-users --source file --input okta-users.json
//!
//! # Publish an asset manifest and preview its plan
//! qs-governance publish-assets --manifest assets.json
//! qs-governance plan --kind assets
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qs_governance::identity::{IdentitySource, JsonFileSource, OktaClient};
use qs_governance::manifest::{AssetManifest, FileManifestStore, ManifestKind};
use qs_governance::platform::LocalPlatform;
use qs_governance::{GovernanceAgent, GovernanceConfig, OktaConfig, RunReport};

/// QuickSight Governance - sync identity-provider users and asset grants
#[derive(Parser, Debug)]
#[command(name = "qs-governance", version, about)]
struct Cli {
    #[command(flatten)]
    config: GovernanceConfig,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a user manifest from exported raw profiles and store it
    BuildUsers {
        #[arg(long)]
        input: PathBuf,
    },
    /// Fetch users, build and store the manifest, reconcile and apply
    SyncUsers {
        #[arg(long, value_enum, default_value = "okta")]
        source: SourceKind,

        /// Profile export, required with `--source file`
        #[arg(long, required_if_eq("source", "file"))]
        input: Option<PathBuf>,

        #[command(flatten)]
        okta: OktaConfig,

        #[arg(long)]
        dry_run: bool,
    },
    /// Store an administrator-authored asset manifest
    PublishAssets {
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Reconcile the stored current manifest against the platform
    Reconcile {
        #[arg(long, value_enum)]
        kind: KindArg,

        #[arg(long)]
        dry_run: bool,
    },
    /// Print the plan for the stored manifest without applying it
    Plan {
        #[arg(long, value_enum)]
        kind: KindArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    Okta,
    File,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Users,
    Assets,
}

impl From<KindArg> for ManifestKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Users => ManifestKind::Users,
            KindArg::Assets => ManifestKind::Assets,
        }
    }
}

/// Summary printed by the commands that only store a manifest
#[derive(Debug, Serialize)]
struct StoredManifest<'a> {
    kind: ManifestKind,
    version: u64,
    records: usize,
    rejected: &'a [qs_governance::manifest::RejectedRecord],
    inactive: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for the JSON result
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = &cli.config;
    info!(
        state_dir = ?config.state_dir,
        platform_state = ?config.platform_state_path(),
        "Starting QuickSight governance"
    );

    let store = Arc::new(
        FileManifestStore::new(config.manifest_dir()).with_retention(config.manifest_retention),
    );
    let platform = Arc::new(
        LocalPlatform::open(config.platform_state_path())
            .await
            .context("Failed to load platform state")?,
    );
    let agent = GovernanceAgent::new(store, platform.clone(), platform)
        .with_policy(config.policy())
        .with_apply_config(config.apply_config())
        .with_mapping(config.attribute_mapping());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight namespaces");
            on_signal.cancel();
        }
    });

    let report = match cli.command {
        Command::BuildUsers { input } => {
            let ingestion = agent
                .ingest_users(&JsonFileSource::new(input))
                .await
                .context("Failed to build user manifest")?;
            return print_json(&StoredManifest {
                kind: ManifestKind::Users,
                version: ingestion.snapshot.version,
                records: ingestion.snapshot.manifest.len(),
                rejected: &ingestion.rejected,
                inactive: ingestion.inactive,
            });
        }
        Command::PublishAssets { manifest } => {
            let bytes = tokio::fs::read(&manifest)
                .await
                .with_context(|| format!("Failed to read {}", manifest.display()))?;
            let assets: AssetManifest =
                serde_json::from_slice(&bytes).context("Invalid asset manifest")?;
            let snapshot = agent
                .publish_assets(assets)
                .await
                .context("Failed to publish asset manifest")?;
            return print_json(&StoredManifest {
                kind: ManifestKind::Assets,
                version: snapshot.version,
                records: snapshot.manifest.len(),
                rejected: &[],
                inactive: 0,
            });
        }
        Command::SyncUsers {
            source,
            input,
            okta,
            dry_run,
        } => {
            let source = identity_source(source, input, &okta)?;
            agent
                .sync_users(source.as_ref(), dry_run, &cancel)
                .await
                .context("User sync failed")?
        }
        Command::Reconcile { kind, dry_run } => agent
            .reconcile(kind.into(), dry_run, &cancel)
            .await
            .context("Reconciliation failed")?,
        Command::Plan { kind } => agent
            .reconcile(kind.into(), true, &cancel)
            .await
            .context("Planning failed")?,
    };

    finish(&report)
}

fn identity_source(
    kind: SourceKind,
    input: Option<PathBuf>,
    okta: &OktaConfig,
) -> Result<Box<dyn IdentitySource>> {
    match kind {
        SourceKind::File => {
            let path = input.context("--input is required with --source file")?;
            Ok(Box::new(JsonFileSource::new(path)))
        }
        SourceKind::Okta => {
            let app_id = okta.okta_app_id.as_deref().context("OKTA_APP_ID must be set")?;
            let token = okta
                .okta_api_token
                .clone()
                .context("OKTA_API_TOKEN must be set")?;
            let client = match (&okta.okta_base_url, &okta.okta_account_id) {
                (Some(base_url), _) => OktaClient::with_base_url(base_url, app_id, token)?,
                (None, Some(account_id)) => OktaClient::new(account_id, app_id, token)?,
                (None, None) => anyhow::bail!("OKTA_ACCOUNT_ID or OKTA_BASE_URL must be set"),
            };
            Ok(Box::new(client))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize result")?
    );
    Ok(ExitCode::SUCCESS)
}

fn finish(report: &RunReport) -> Result<ExitCode> {
    print_json(report)?;
    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
