//! RediKV - A Small In-Memory Key-Value Server
//!
//! This is the main entry point for the RediKV server.
//! It parses flags, sets up logging and runs the server until Ctrl+C.

use anyhow::Context;
use redikv::config::{CliAction, Config};
use redikv::connection::{bind, serve, ConnectionStats};
use redikv::server::Server;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_help() {
    println!(
        r#"
RediKV - A Small In-Memory Key-Value Server

USAGE:
    redikv [OPTIONS]

OPTIONS:
    -h, --host <HOST>                 Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>                 Port to listen on (default: 6389)
        --tcp-backlog <N>             Listen backlog (default: 511)
        --hz <N>                      Server ticks per second, 1-500 (default: 10)
        --maxmemory <BYTES>           Memory ceiling, e.g. 100mb (default: 0, unlimited)
        --maxmemory-policy <POLICY>   noeviction, allkeys-lru, volatile-lru,
                                      allkeys-random, volatile-random, volatile-ttl
        --maxmemory-samples <N>       Keys sampled per eviction (default: 5)
        --memory-accounting <MODE>    none or estimate (default: none)
        --client-query-buffer-limit <BYTES>
                                      Unparsed bytes per client before it is
                                      disconnected (default: 1mb)
    -v, --version                     Print version information
        --help                        Print this help message

EXAMPLES:
    redikv                                          # Start on 127.0.0.1:6389
    redikv --port 7000                              # Start on port 7000
    redikv --maxmemory 64mb --maxmemory-policy allkeys-lru \
           --memory-accounting estimate             # Bounded cache

CONNECTING:
    Commands are lowercase multibulk requests, so redis-cli works:
    $ redis-cli -p 6389
    127.0.0.1:6389> set name Ariz ex 60
    OK
    127.0.0.1:6389> get name
    "Ariz"
    127.0.0.1:6389> ttl name
    (integer) 60
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
RediKV v{} - Small In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Server started on {}
maxmemory {} ({}), accounting: {}, hz {}

Use Ctrl+C to shutdown.
"#,
        redikv::VERSION,
        config.bind_address(),
        config.maxmemory,
        config.maxmemory_policy,
        config.memory_accounting,
        config.hz,
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = match Config::parse_args(std::env::args().skip(1)) {
        Ok(CliAction::Serve(config)) => config,
        Ok(CliAction::PrintHelp) => {
            print_help();
            return Ok(());
        }
        Ok(CliAction::PrintVersion) => {
            println!("RediKV version {}", redikv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging (RUST_LOG overrides the default level)
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let listener = bind(&config)
        .await
        .with_context(|| format!("failed to listen on {}", config.bind_address()))?;

    print_banner(&config);
    info!("Listening on {}", config.bind_address());

    let stats = Arc::new(ConnectionStats::new());
    let server = Server::new(config);

    tokio::select! {
        _ = serve(listener, server, Arc::clone(&stats)) => {}
        res = signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    info!(
        accepted = stats.connections_accepted.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
