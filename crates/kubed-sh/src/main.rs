//! kubed-sh — a shell whose programs run in a Kubernetes cluster.
//!
//! Startup:
//! - locate kubectl and determine the active context
//! - detect the server version and rebuild the process table
//! - pre-pull runtime images on a fresh cluster
//! - read commands until `exit`
//!
//! # Usage
//!
//! ```text
//! kubed-sh --context minikube --no-prepull
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use kubed_core::{EnvTable, KubedConfig};
use kubed_gateway::KubectlGateway;
use kubed_lifecycle::prepull::PREPULL_DISABLE;
use kubed_lifecycle::{PrepullOutcome, Session, prepull};

mod commands;
mod repl;

/// Environment variable with the same effect as `--no-prepull`.
const NOPREPULL_ENV: &str = "KUBEDSH_NOPREPULL";

/// Environment variable with the same effect as `--debug`.
const DEBUG_ENV: &str = "DEBUG";

#[derive(Parser)]
#[command(
    name = "kubed-sh",
    about = "Run local binaries and scripts as Kubernetes workloads from an interactive shell",
    version
)]
struct Cli {
    /// Log at debug level (also enabled by DEBUG).
    #[arg(long)]
    debug: bool,

    /// Skip the one-time image pre-pull (also KUBEDSH_NOPREPULL).
    #[arg(long)]
    no_prepull: bool,

    /// Config file to read instead of ~/.kubed-sh.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start in this context instead of kubectl's current one.
    #[arg(long)]
    context: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug || env_flag(DEBUG_ENV) { "kubed=debug" } else { "kubed=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let config = KubedConfig::load(cli.config.as_deref()).context("cannot load config file")?;

    let env = EnvTable::with_defaults();
    config.apply_env(&env);
    if cli.no_prepull || env_flag(NOPREPULL_ENV) {
        env.set(PREPULL_DISABLE, "true");
    }

    let gateway = KubectlGateway::locate()?;
    info!(kubectl = %gateway.binary().display(), "using kubectl");

    let context = cli.context.as_deref().or(config.start_context());
    let session = Session::start(Arc::new(gateway), env, context)
        .context("cannot determine the cluster context")?;

    bootstrap(&session, Duration::from_secs(config.prepull_wait_secs()));

    let stdin = io::stdin();
    repl::run(&session, stdin.lock(), &mut io::stdout(), &mut io::stderr())
}

/// Run the image pre-pull, printing progress dots to stderr.
fn bootstrap(session: &Session, wait: Duration) {
    eprint!("checking runtime images ");
    let outcome = prepull(session, wait, || {
        eprint!(".");
        let _ = io::stderr().flush();
    });
    eprintln!();

    match outcome {
        Ok(PrepullOutcome::Started { created, failed }) => {
            info!(created = created.len(), failed = failed.len(), "image pre-pull started");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "image pre-pull skipped"),
    }
}

/// Whether a flag-like process environment variable is set and not `0`/`false`.
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| {
        let v = v.trim();
        !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
    })
}
