mod handlers;
mod monitor;
mod state;

use crate::state::CollectorState;
use anyhow::{Context, Result};
use clap::Parser;
use common::DEFAULT_COLLECTOR_PORT;
use std::{path::PathBuf, time::Duration};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Siempre loopback: el collector no se expone fuera del host.
const BIND_HOST: &str = "127.0.0.1";

#[derive(Parser)]
#[command(name = "collector")]
#[command(about = "Collector local de heartbeats: log append-only + stats en vivo")]
struct Args {
    /// Puerto TCP donde escuchar
    #[arg(long, env = "COLLECTOR_PORT", default_value_t = DEFAULT_COLLECTOR_PORT)]
    port: u16,

    /// Log JSONL con una entrada por conexión
    #[arg(long, env = "COLLECTOR_LOG_FILE", default_value = "collector_received.log")]
    log_file: PathBuf,

    /// Cada cuántos segundos imprimir las stats
    #[arg(long, default_value_t = monitor::DEFAULT_STATS_INTERVAL.as_secs())]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("collector=debug")),
        )
        .init();

    let state = CollectorState::new(&args.log_file);
    state.log().touch()?;

    // reporter de stats en segundo plano
    let monitor_state = state.clone();
    let interval = Duration::from_secs(args.stats_interval.max(1));
    tokio::spawn(async move {
        monitor::report_stats(monitor_state, interval).await;
    });

    let listener = TcpListener::bind((BIND_HOST, args.port))
        .await
        .with_context(|| format!("no se pudo escuchar en {}:{}", BIND_HOST, args.port))?;
    let local = listener.local_addr()?;
    println!(
        "collector escuchando en {} (sólo loopback), log en {}. Ctrl+C para parar.",
        local,
        state.log().path().display()
    );
    info!("collector escuchando en {}", local);

    tokio::select! {
        res = handlers::serve(listener, state) => res?,
        _ = tokio::signal::ctrl_c() => {
            println!("Apagando collector.");
        }
    }

    Ok(())
}
