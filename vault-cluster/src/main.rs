//! vault-cluster: manage one Vault cluster from a local JSON state file.
//!
//! The state file holds a single cluster record. `create` fills in the
//! computed attributes, `read` refreshes them (or removes the file when the
//! cluster is gone), `delete` tears the cluster down and removes the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vault_cluster::config::DEFAULT_API_ENDPOINT;
use vault_cluster::reconciler::{plan, Plan};
use vault_cluster::{
    CallOptions, ClientConfig, ClusterRecord, ClusterSpec, HttpControlPlane, ReconcilerConfig,
    VaultClusterReconciler,
};

/// Vault cluster lifecycle tool
#[derive(Parser, Debug)]
#[command(name = "vault-cluster", version, about)]
struct Args {
    /// JSON state file holding the cluster record
    #[arg(long, global = true, default_value = "vault-cluster.json")]
    state: PathBuf,

    /// Control plane API endpoint
    #[arg(long, env = "HCP_API_ENDPOINT", default_value = DEFAULT_API_ENDPOINT)]
    api_endpoint: String,

    /// Organization ID
    #[arg(long, env = "HCP_ORGANIZATION_ID")]
    organization_id: Option<String>,

    /// Default project ID, used when the record does not name one
    #[arg(long, env = "HCP_PROJECT_ID")]
    project_id: Option<String>,

    /// Bearer token for the API
    #[arg(long, env = "HCP_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Override the action's timeout (e.g. "10m", "1h 30m")
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Interval between operation status queries
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a cluster and write its record to the state file
    Create {
        #[arg(long)]
        cluster_id: String,
        #[arg(long)]
        network_id: String,
        #[arg(long)]
        public_endpoint: bool,
        #[arg(long)]
        min_version: Option<String>,
        /// Project to create in (defaults to the client's project)
        #[arg(long)]
        project: Option<String>,
    },
    /// Refresh the record in the state file
    Read,
    /// Delete the cluster recorded in the state file
    Delete,
    /// Show what applying the given attributes to the current record would do
    Plan {
        #[arg(long)]
        cluster_id: String,
        #[arg(long)]
        network_id: String,
        #[arg(long)]
        public_endpoint: bool,
        #[arg(long)]
        min_version: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
}

fn build_spec(
    cluster_id: String,
    network_id: String,
    public_endpoint: bool,
    min_version: Option<String>,
    project: Option<String>,
) -> ClusterSpec {
    let mut spec = ClusterSpec::new(cluster_id, network_id).with_public_endpoint(public_endpoint);
    spec.min_version = min_version;
    spec.project_id = project;
    spec
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_cluster=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // Plan is purely local
    if let Command::Plan {
        cluster_id,
        network_id,
        public_endpoint,
        min_version,
        project,
    } = args.command
    {
        let desired = build_spec(cluster_id, network_id, public_endpoint, min_version, project);
        desired.validate()?;
        let prior = load_record(&args.state).await?;
        match plan(prior.as_ref(), &desired) {
            Plan::Create => println!("create"),
            Plan::NoChange => println!("no change"),
            Plan::Replace { fields } => println!("replace ({})", fields.join(", ")),
        }
        return Ok(());
    }

    let organization_id = args
        .organization_id
        .context("organization ID is required (--organization-id or HCP_ORGANIZATION_ID)")?;
    let project_id = args
        .project_id
        .context("project ID is required (--project-id or HCP_PROJECT_ID)")?;

    let mut client_config =
        ClientConfig::new(organization_id, project_id).with_endpoint(args.api_endpoint);
    if let Some(token) = args.token {
        client_config = client_config.with_token(token);
    }
    let client = HttpControlPlane::new(client_config).context("failed to build API client")?;

    let mut config = ReconcilerConfig::default();
    if let Some(interval) = args.poll_interval {
        config.poll.interval = interval;
    }
    let reconciler = VaultClusterReconciler::new(Arc::new(client), config);

    // Ctrl-C cancels the in-flight call
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }
    let opts = CallOptions {
        timeout: args.timeout,
        cancel,
    };

    match args.command {
        Command::Create {
            cluster_id,
            network_id,
            public_endpoint,
            min_version,
            project,
        } => {
            if let Some(existing) = load_record(&args.state).await? {
                bail!(
                    "state file {} already holds cluster '{}'",
                    args.state.display(),
                    existing.spec.cluster_id
                );
            }
            let record = ClusterRecord::new(build_spec(
                cluster_id,
                network_id,
                public_endpoint,
                min_version,
                project,
            ));
            let created = reconciler.create(&record, opts).await?;
            save_record(&args.state, &created).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Command::Read => {
            let record = require_record(&args.state).await?;
            match reconciler.read(&record, opts).await? {
                Some(refreshed) => {
                    save_record(&args.state, &refreshed).await?;
                    println!("{}", serde_json::to_string_pretty(&refreshed)?);
                }
                None => {
                    remove_record(&args.state).await?;
                    info!("Cluster {} is gone, state file removed", record.spec.cluster_id);
                }
            }
        }
        Command::Delete => {
            let record = require_record(&args.state).await?;
            reconciler.delete(&record, opts).await?;
            remove_record(&args.state).await?;
        }
        Command::Plan { .. } => {}
    }

    Ok(())
}

async fn load_record(path: &Path) -> Result<Option<ClusterRecord>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let record = serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse state file {}", path.display()))?;
            Ok(Some(record))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read state file {}", path.display())),
    }
}

async fn require_record(path: &Path) -> Result<ClusterRecord> {
    load_record(path)
        .await?
        .with_context(|| format!("no cluster recorded in {}", path.display()))
}

async fn save_record(path: &Path, record: &ClusterRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write state file {}", path.display()))
}

async fn remove_record(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove state file {}", path.display())),
    }
}
