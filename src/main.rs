//! # Reconcile Controller
//!
//! Watches `apps/v1` Deployments and reconciles every change through a
//! deduplicating, rate-limited work queue.
//!
//! ## Usage
//!
//! ```text
//! reconcile-controller [--namespace <NS> | --all-namespaces] [--selector <LABELS>]
//!                      [--field-selector <FIELDS>] [--workers <N>]
//! reconcile-controller version
//! ```
//!
//! Remaining settings come from environment variables, see
//! [`ControllerConfig::from_env`] and [`ServerConfig::from_env`].

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reconcile_controller::config::{ControllerConfig, ServerConfig};
use reconcile_controller::constants::DEFAULT_NAMESPACE;
use reconcile_controller::controller::source::WatchFilter;
use reconcile_controller::runtime::watch_loop::{run_watch_loop, WatchTarget};
use reconcile_controller::runtime::{client, initialization};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reconcile-controller", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print build information and exit
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Namespace to watch
    #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Watch every namespace
    #[arg(short = 'A', long, conflicts_with = "namespace")]
    all_namespaces: bool,

    /// Label selector applied to List and Watch
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Field selector applied to List and Watch
    #[arg(long)]
    field_selector: Option<String>,

    /// Number of reconcile workers (overrides WORKERS)
    #[arg(long)]
    workers: Option<usize>,
}

impl RunArgs {
    fn target(&self) -> WatchTarget {
        WatchTarget {
            namespace: (!self.all_namespaces).then(|| self.namespace.clone()),
            filter: WatchFilter {
                label_selector: self.selector.clone(),
                field_selector: self.field_selector.clone(),
            },
        }
    }
}

fn print_version() {
    println!("reconcile-controller {}", env!("CARGO_PKG_VERSION"));
    println!("  built:    {}", env!("BUILD_DATETIME"));
    println!("  git hash: {}", env!("BUILD_GIT_HASH"));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.command == Some(Command::Version) {
        print_version();
        return Ok(());
    }

    let mut controller_config = ControllerConfig::from_env();
    if let Some(workers) = cli.run.workers {
        controller_config.workers = workers;
    }
    controller_config
        .validate()
        .context("Invalid controller configuration")?;
    let server_config = ServerConfig::from_env();

    initialization::init_tracing(&controller_config).context("Failed to initialize tracing")?;
    info!("Starting reconcile-controller v{}", env!("CARGO_PKG_VERSION"));
    initialization::log_build_info();

    // Must happen before the client opens any TLS connection
    initialization::install_crypto_provider();

    let client = client::create_client()
        .await
        .context("Failed to create Kubernetes client")?;

    run_watch_loop(client, cli.run.target(), &controller_config, &server_config).await
}
