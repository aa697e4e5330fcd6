//! cdp-relay server entry point.
//!
//! Parses the `serve` subcommand, layers configuration (file, then
//! environment, then explicit CLI flags, highest priority last),
//! initializes tracing, optionally probes for a prior instance under
//! `--replace`, binds the relay's `axum::Router`, and runs until a
//! SIGTERM/SIGINT (or Ctrl+C on Windows) triggers graceful shutdown.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cdp_relay::cli::{Cli, Command, ServeArgs};
use cdp_relay::config::Config;
use cdp_relay::router::Router;
use cdp_relay::server;

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &ServeArgs) -> cdp_relay::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.token.is_some() {
        config.token = args.token.clone();
    }
    if args.replace {
        config.replace = true;
    }

    Ok(config)
}

/// Probe a prior instance's `/version` endpoint. There is no remote
/// shutdown surface (see `DESIGN.md`), so finding one reachable means
/// the operator must stop it themselves before this instance can bind.
async fn check_for_prior_instance(config: &Config) -> bool {
    let url = format!("http://{}:{}/version", config.host, config.port);
    match reqwest::Client::new().get(&url).send().await {
        Ok(resp) if resp.status().is_success() => true,
        _ => false,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}

async fn run_serve(args: ServeArgs) -> cdp_relay::Result<()> {
    let config = load_config(&args)?;
    init_tracing(&config.log_level);
    info!("cdp-relay v{}", cdp_relay::VERSION);

    if config.replace && check_for_prior_instance(&config).await {
        error!(
            host = %config.host,
            port = config.port,
            "a prior instance is already answering /version; stop it before retrying --replace"
        );
        return Err(cdp_relay::Error::configuration(
            "a prior instance is still listening on this address",
        ));
    }

    if config.token.is_none() {
        warn!("no --token configured; /cdp/* and /extension accept any connection");
    }

    let addr = config.bind_addr()?;
    let router = Arc::new(Router::new(&config, cdp_relay::VERSION));

    server::run(addr, router, shutdown_signal()).await?;
    info!("server shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Command::Serve(args) = cli.command;

    if let Err(err) = run_serve(args).await {
        eprintln!("cdp-relay: {err}");
        std::process::exit(1);
    }
}
