use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rekon_core::{ClusterMutator, Policy};
use rekon_kubehub::KubeReader;
use rekon_ops::KubeOps;
use rekon_reconcile::{ReconcileOutcome, Reconciler, RunMode, RunOptions};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rekonctl", version, about = "Reconcile deployment images against a keyword policy")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces for reconcile/plan, "default" for restart/scale)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Patch and restart deployments whose image differs from the policy
    Reconcile {
        /// Policy file (YAML)
        #[arg(long = "policy", env = "REKON_POLICY")]
        policy: PathBuf,
        /// Resolve and report only; issue no patches or restarts
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Show what `reconcile` would change (same as `reconcile --dry-run`)
    Plan {
        /// Policy file (YAML)
        #[arg(long = "policy", env = "REKON_POLICY")]
        policy: PathBuf,
    },
    /// Policy file helpers
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Rollout-restart a deployment
    Restart {
        /// Deployment name
        name: String,
    },
    /// Set replicas on a deployment
    Scale {
        /// Deployment name
        name: String,
        /// Desired replica count
        replicas: i32,
        /// Patch spec.replicas directly instead of the scale subresource
        #[arg(long = "no-subresource", action = ArgAction::SetTrue)]
        no_subresource: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    /// Parse and validate a policy file, then print its rules in precedence order
    Check {
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("REKON_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REKON_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid REKON_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_policy(path: &Path) -> Result<Policy> {
    Policy::from_path(path).with_context(|| format!("loading policy {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile { policy, dry_run } => {
            let mode = if dry_run { RunMode::DryRun } else { RunMode::Apply };
            run_reconcile(&policy, mode, cli.namespace, cli.output).await?;
        }
        Commands::Plan { policy } => {
            run_reconcile(&policy, RunMode::DryRun, cli.namespace, cli.output).await?;
        }
        Commands::Policy { command: PolicyCommands::Check { file } } => {
            let policy = load_policy(&file)?;
            info!(rules = policy.len(), file = %file.display(), "policy check ok");
            match cli.output {
                Output::Human => {
                    if policy.is_empty() {
                        println!("(empty policy: reconcile will report no matches)");
                    }
                    println!("#   KEYWORD              IMAGE");
                    for (i, r) in policy.rules().iter().enumerate() {
                        println!("{:<3} {:<20} {}", i + 1, r.keyword, r.image);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&policy)?),
            }
        }
        Commands::Restart { name } => {
            let ns = cli.namespace.as_deref().unwrap_or(rekon_kubehub::DEFAULT_NAMESPACE);
            info!(ns = %ns, name = %name, "restart invoked");
            let ops = KubeOps::new(rekon_kubehub::get_kube_client().await?);
            let raw = ops
                .restart_rollout(ns, &name)
                .await
                .with_context(|| format!("restarting deployment {}/{}", ns, name))?;
            print_raw(cli.output, &raw)?;
        }
        Commands::Scale { name, replicas, no_subresource } => {
            let ns = cli.namespace.as_deref().unwrap_or(rekon_kubehub::DEFAULT_NAMESPACE);
            info!(ns = %ns, name = %name, replicas, "scale invoked");
            let ops = KubeOps::new(rekon_kubehub::get_kube_client().await?);
            let raw = ops.scale(ns, &name, replicas, !no_subresource).await?;
            print_raw(cli.output, &raw)?;
        }
    }

    Ok(())
}

async fn run_reconcile(policy_path: &Path, mode: RunMode, namespace: Option<String>, output: Output) -> Result<()> {
    let policy = load_policy(policy_path)?;
    info!(rules = policy.len(), mode = ?mode, ns = ?namespace, "reconcile invoked");

    let reader = KubeReader::try_default().await.context("connecting to cluster")?;
    let ops = KubeOps::new(reader.client());
    let engine = Reconciler::new(Arc::new(reader), Arc::new(ops));

    // Ctrl-C stops the run before the next deployment; an in-flight patch/restart pair finishes.
    let cancel = CancellationToken::new();
    let ctrlc = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; finishing current deployment then stopping");
                cancel.cancel();
            }
        }
    });

    let opts = RunOptions { mode, namespace };
    let res = engine.reconcile_with(&policy, &opts, &cancel).await;
    ctrlc.abort();
    let outcome = match res {
        Ok(o) => o,
        Err(e) => {
            error!(error = %e, "reconcile failed");
            return Err(e).context("reading cluster snapshot");
        }
    };

    match output {
        Output::Human => {
            println!("{}", outcome.render());
            if let ReconcileOutcome::Reconciled(r) = &outcome {
                let s = r.summary();
                eprintln!(
                    "matched={} updated={} already_current={} planned={} failed={}",
                    s.matched, s.updated, s.already_current, s.planned, s.failed
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }

    if outcome.has_failures() {
        std::process::exit(2);
    }
    Ok(())
}

fn print_raw(output: Output, raw: &str) -> Result<()> {
    match output {
        Output::Human => println!("{}", raw),
        Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "response": raw }))?),
    }
    Ok(())
}
