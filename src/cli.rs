//! Command-line surface (`clap`-derived).

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cdp-relay",
    version,
    about = "Relay server exposing a browser extension's chrome.debugger session as a standard CDP endpoint"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the relay server.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host address to bind to.
    #[arg(long, env = "CDP_RELAY_HOST")]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "CDP_RELAY_PORT")]
    pub port: Option<u16>,

    /// Bearer token required on `/cdp/*` and `/extension` handshakes.
    #[arg(long, env = "CDP_RELAY_TOKEN")]
    pub token: Option<String>,

    /// Probe a prior instance's `/version` endpoint and ask it to exit before binding.
    #[arg(long)]
    pub replace: bool,

    /// Load additional settings from a TOML file, layered under these flags.
    #[arg(long)]
    pub config: Option<String>,
}
