use clap::{Parser, Subcommand};
use podwright_core::PodId;
use podwright_reconciler::{
    ApiClient, Classification, PodReconciler, ReconciledPod, ReconcilerConfig, UpdateAction,
};
use podwright_schema::PodSpec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "podwright", about = "Declarative pod reconciler")]
struct Cli {
    /// Base URL of the cluster API server
    #[arg(long, global = true, env = "PODWRIGHT_API_URL", default_value = "http://127.0.0.1:6443")]
    api_url: String,
    /// Interval between readiness polls, in milliseconds
    #[arg(long, global = true, env = "PODWRIGHT_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,
    /// Bound on every create, update and delete wait, in seconds
    #[arg(long, global = true, env = "PODWRIGHT_TIMEOUT_SECS", default_value_t = 300)]
    timeout_secs: u64,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a pod spec without contacting the cluster
    Validate {
        /// Path to a YAML or JSON pod spec
        file: PathBuf,
    },
    /// Print the cluster object a pod spec expands to
    Expand { file: PathBuf },
    /// Show whether moving from one spec to another replaces the pod
    Diff { old: PathBuf, new: PathBuf },
    /// Create the pod or bring it in line with the spec
    Apply { file: PathBuf },
    /// Print the live state of a pod
    Read {
        /// Pod identity as <namespace>/<name>
        id: String,
        /// Spec the pod was applied from, to hide server defaults
        #[arg(long)]
        prior: Option<PathBuf>,
    },
    /// Print the state of an existing pod as a spec
    Import { id: String },
    /// Delete a pod and wait until it is gone
    Delete { id: String },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match &cli.command {
        Commands::Validate { file } => {
            let spec = load_spec(file)?;
            spec.validate()?;
            println!("{} is valid", spec.id());
            Ok(())
        }
        Commands::Expand { file } => {
            let spec = load_spec(file)?;
            spec.validate()?;
            print!("{}", podwright_core::to_yaml(&podwright_translate::expand(&spec))?);
            Ok(())
        }
        Commands::Diff { old, new } => {
            let old = load_spec(old)?;
            let new = load_spec(new)?;
            let plan = build_reconciler(&cli)?.plan(&old, &new)?;
            print!("{}", render_plan(&plan));
            Ok(())
        }
        Commands::Apply { file } => {
            let spec = load_spec(file)?;
            let reconciler = build_reconciler(&cli)?;
            let token = shutdown_token();
            let outcome = reconciler.apply(&spec, &token).await?;
            match outcome.action {
                UpdateAction::Created => info!("Pod {} created", outcome.pod.id),
                UpdateAction::NoChange => info!("Pod {} already up to date", outcome.pod.id),
                UpdateAction::Updated => info!("Pod {} updated in place", outcome.pod.id),
                UpdateAction::Replaced => info!(
                    "Pod {} replaced (uid {} -> {})",
                    outcome.pod.id,
                    outcome.previous_uid.as_deref().unwrap_or("none"),
                    outcome.pod.uid
                ),
            }
            print_pod(&outcome.pod)
        }
        Commands::Read { id, prior } => {
            let id = PodId::parse(id)?;
            let prior = prior.as_deref().map(load_spec).transpose()?;
            match build_reconciler(&cli)?.read(&id, prior.as_ref()).await? {
                Some(pod) => print_pod(&pod),
                None => {
                    warn!("Pod {} not found", id);
                    Err(miette::miette!("pod {} does not exist", id))
                }
            }
        }
        Commands::Import { id } => {
            let pod = build_reconciler(&cli)?.import(id).await?;
            print_pod(&pod)
        }
        Commands::Delete { id } => {
            let id = PodId::parse(id)?;
            let token = shutdown_token();
            build_reconciler(&cli)?.delete(&id, &token).await?;
            info!("Pod {} deleted", id);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel in-flight waits on Ctrl-C
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            signal_token.cancel();
        }
    });
    token
}

fn reconciler_config(cli: &Cli) -> miette::Result<ReconcilerConfig> {
    let config = ReconcilerConfig::default()
        .with_poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    config.validate()?;
    Ok(config)
}

fn build_reconciler(cli: &Cli) -> miette::Result<PodReconciler> {
    let config = reconciler_config(cli)?;
    let client = Arc::new(ApiClient::new(&cli.api_url));
    Ok(PodReconciler::new(client, config))
}

/// Load a pod spec from a YAML or JSON file
fn load_spec(path: &Path) -> miette::Result<PodSpec> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read '{}': {}", path.display(), e))?;
    Ok(PodSpec::from_yaml(&data)?)
}

fn print_pod(pod: &ReconciledPod) -> miette::Result<()> {
    println!("# {} uid={} resourceVersion={}", pod.id, pod.uid, pod.resource_version);
    print!("{}", podwright_core::to_yaml(&pod.spec)?);
    Ok(())
}

fn render_plan(plan: &Classification) -> String {
    let summary = match plan {
        Classification::NoChange => "no changes",
        Classification::InPlaceUpdate(_) => "update in place",
        Classification::Replace(_) => "replace (destroy and re-create)",
    };
    let mut out = format!("{}\n", summary);
    for change in plan.changes() {
        let marker = match change.policy {
            podwright_reconciler::UpdatePolicy::Replace => "forces replacement",
            podwright_reconciler::UpdatePolicy::InPlace => "in place",
        };
        out.push_str(&format!("  ~ {} ({})\n", change.path, marker));
    }
    out
}
