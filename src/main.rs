mod config;
mod error;
mod execution;
mod helpers;
mod lxd;
mod params;
mod provider;
mod simplestreams;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::LxdConfig;
use execution::{Command, Environment};
use provider::LxdProvider;

/// LXD external provider for the garm runner orchestrator.
///
/// The command is taken from `GARM_COMMAND` and its arguments from the other
/// `GARM_*` variables; results are printed on stdout as JSON.
#[derive(Parser, Debug)]
#[command(name = "garm-provider-lxd")]
#[command(version)]
struct Cli {}

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();
    init_logging();

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match run(&cancel).await {
        Ok(output) => {
            if !output.is_empty() {
                print!("{output}");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("failed to run command: {err:#}");
            let code = err
                .downcast_ref::<error::Error>()
                .map(execution::exit_code)
                .unwrap_or(execution::EXIT_FAILURE);
            std::process::exit(code);
        }
    }
}

async fn run(cancel: &CancellationToken) -> Result<String> {
    let env = Environment::from_process().context("reading execution environment")?;
    if env.command == Command::GetVersion {
        return Ok(execution::version().to_string());
    }

    let cfg = LxdConfig::from_file(&env.provider_config_file).map_err(error::Error::from)?;
    let provider = LxdProvider::new(&cfg, &env.controller_id)?;

    tracing::debug!(command = ?env.command, controller = %env.controller_id, "running command");
    Ok(execution::run(&provider, &env, cancel).await?)
}

/// Cancel in-flight work on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("signal received, cancelling");
    cancel.cancel();
}

/// Logs go to stderr; stdout carries the command result.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rust_lxd_provider=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
