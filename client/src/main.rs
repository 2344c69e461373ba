use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{telemetry, AggregateStats, HeartbeatMessage, Pattern, SendOutcome, WorkerKey};
use std::{fs::File, io::BufReader, path::PathBuf};

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para inspeccionar y probar el collector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruye las stats del collector leyendo su log
    Replay {
        #[arg(value_name = "LOG", default_value = "collector_received.log")]
        log: PathBuf,
    },
    /// Manda un heartbeat a mano y muestra la respuesta
    Ping {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = common::DEFAULT_COLLECTOR_PORT)]
        port: u16,

        /// Nombre del worker que figura en el heartbeat
        #[arg(long, default_value = "manual")]
        worker: String,

        #[arg(long, default_value_t = 0)]
        counter: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { log } => {
            let file = File::open(&log)
                .with_context(|| format!("no se pudo abrir {}", log.display()))?;
            let (stats, skipped) = AggregateStats::replay(BufReader::new(file))?;

            println!("{}", stats.summary_line());
            for (worker, last) in stats.last_seen() {
                let count = stats.by_worker().get(worker).copied().unwrap_or(0);
                println!("  worker {}: {} mensajes, último {}", worker, count, last);
            }
            if skipped > 0 {
                println!("  ({} líneas ilegibles ignoradas)", skipped);
            }
        }
        Commands::Ping {
            host,
            port,
            worker,
            counter,
        } => {
            let hb = HeartbeatMessage::new(
                WorkerKey::Name(worker),
                std::process::id(),
                counter,
                Pattern::Steady,
            );

            match telemetry::send(&hb, &host, port).await {
                SendOutcome::Acked(ack) => println!("ack: {}", ack),
                SendOutcome::NoAck => println!("enviado, sin ack"),
                SendOutcome::Failed(e) => println!("falló el envío: {}", e),
            }
        }
    }

    Ok(())
}
