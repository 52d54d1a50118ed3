//! Router binary: parses host/port/log-level, wires up a `rapace_router::RouterCore`
//! and its health-check sweep, and runs until interrupted.
//!
//! # Exit codes
//!
//! - 0: clean shutdown
//! - 2: configuration error (bad `--port`, bad `--log-level`)
//! - 130: interrupted (SIGINT)

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rapace_core::{Endpoint, Registry, Transport};
use rapace_router::RouterConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rapace-router", version, about = "Rapace presence/pub-sub router")]
struct Args {
    /// Address to bind. Only the in-memory transport is wired up today, so
    /// this is accepted and logged but not actually bound to a socket.
    #[arg(long, env = "RAPACE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind, same caveat as `--host`.
    #[arg(long, env = "RAPACE_PORT", default_value_t = 7890)]
    port: u16,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, env = "RAPACE_LOG", default_value = "info")]
    log_level: String,

    /// Suppress all logging below warn.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Raise logging to debug regardless of `--log-level`.
    #[arg(short, long)]
    verbose: bool,

    /// Seconds of silence before a registered node is considered a zombie.
    #[arg(long, default_value_t = 30)]
    zombie_timeout_secs: u64,

    /// How often the health-check sweep runs.
    #[arg(long, default_value_t = 10)]
    health_check_interval_secs: u64,
}

fn effective_log_level(args: &Args) -> &str {
    if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        &args.log_level
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match EnvFilter::try_new(effective_log_level(&args)) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("invalid --log-level {:?}: {e}", args.log_level);
            return ExitCode::from(2);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(host = %args.host, port = args.port, "starting rapace router");

    let config = RouterConfig {
        zombie_timeout: Duration::from_secs(args.zombie_timeout_secs),
        ..RouterConfig::default()
    };
    let core = rapace_router::RouterCore::new(config);

    let mut builder = Registry::builder();
    if let Err(e) = builder.register(&core.contract()) {
        eprintln!("failed to register router service: {e}");
        return ExitCode::from(2);
    }
    let registry = builder.build();

    // Only the in-memory transport is implemented in this workspace; a real
    // deployment would bind `args.host`/`args.port` to a network listener
    // and call `Endpoint::serve` per accepted connection instead.
    let (_loopback, server_transport) = Transport::mem_pair();
    let endpoint = Endpoint::serve(server_transport, registry);
    let health_check = core.spawn_health_check(Duration::from_secs(args.health_check_interval_secs));

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received interrupt, shutting down");
            health_check.abort();
            endpoint.close();
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for interrupt signal");
            ExitCode::from(2)
        }
    }
}
