use anyhow::{Context, Result};
use std::{
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    sync::watch,
    time::{sleep, timeout},
};
use tracing::{info, warn};

use crate::{config::WorkerConfig, scheduler::Scheduler};

/// Cuánto esperamos a cada hijo después de pedirle que pare.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cómo terminó un hijo al pararlo.
#[derive(Debug)]
pub enum ChildExit {
    Exited(ExitStatus),
    Killed,
    WaitFailed,
}

/// Supervisor: lanza un proceso por worker, espera `duration` (o Ctrl+C)
/// y los para cerrando su stdin.
pub async fn supervise(cfg: &WorkerConfig) -> Result<()> {
    let exe = std::env::current_exe().context("no se pudo ubicar el ejecutable actual")?;
    // mismos argumentos para los hijos, más su --worker-id
    let forwarded: Vec<_> = std::env::args_os().skip(1).collect();

    let mut children: Vec<(u32, Child)> = Vec::new();
    for id in 0..cfg.workers {
        let child = Command::new(&exe)
            .args(&forwarded)
            .arg("--worker-id")
            .arg(id.to_string())
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("no se pudo lanzar el worker {}", id))?;
        info!("worker {} lanzado (pid={:?})", id, child.id());
        children.push((id, child));
    }

    println!(
        "{} workers corriendo por {:?} ({}), heartbeats a {}:{}. Ctrl+C para parar.",
        cfg.workers,
        cfg.duration,
        cfg.shape.pattern(),
        cfg.collector_host,
        cfg.collector_port
    );

    tokio::select! {
        _ = sleep(cfg.duration) => info!("duración cumplida, parando workers"),
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C recibido, parando workers"),
    }

    let mut killed = 0;
    for (id, exit) in stop_children(children, JOIN_TIMEOUT).await {
        match exit {
            ChildExit::Exited(status) => info!("worker {} terminó ({})", id, status),
            ChildExit::Killed => killed += 1,
            ChildExit::WaitFailed => {}
        }
    }

    if killed > 0 {
        println!("Todos los workers detenidos ({} a la fuerza).", killed);
    } else {
        println!("Todos los workers detenidos.");
    }
    Ok(())
}

/// Cierra el stdin de todos los hijos y espera a cada uno hasta `join_timeout`;
/// al que no terminó se lo mata.
pub async fn stop_children(
    mut children: Vec<(u32, Child)>,
    join_timeout: Duration,
) -> Vec<(u32, ChildExit)> {
    // cerrar todos los stdin primero para que paren en paralelo
    for (_, child) in children.iter_mut() {
        drop(child.stdin.take());
    }

    let mut exits = Vec::with_capacity(children.len());
    for (id, mut child) in children {
        let exit = match timeout(join_timeout, child.wait()).await {
            Ok(Ok(status)) => ChildExit::Exited(status),
            Ok(Err(e)) => {
                warn!("error esperando al worker {}: {}", id, e);
                ChildExit::WaitFailed
            }
            Err(_) => {
                warn!("worker {} no paró en {:?}, matándolo", id, join_timeout);
                if let Err(e) = child.kill().await {
                    warn!("no se pudo matar al worker {}: {}", id, e);
                }
                ChildExit::Killed
            }
        };
        exits.push((id, exit));
    }
    exits
}

/// Modo hijo: un solo worker hasta que se cierre stdin o llegue Ctrl+C.
pub async fn run_single(cfg: Arc<WorkerConfig>, id: u32) -> Result<()> {
    let stop_rx = spawn_stop_watcher(tokio::io::stdin());

    let counter = Scheduler::new(id, cfg).run(stop_rx).await?;
    info!("worker {} salió, counter final={}", id, counter);
    Ok(())
}

/// Levanta el flag de parada cuando `reader` llega a EOF (el supervisor cerró
/// nuestro stdin) o cuando llega Ctrl+C.
pub fn spawn_stop_watcher<R>(reader: R) -> watch::Receiver<bool>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = wait_closed(reader) => {},
            Ok(()) = tokio::signal::ctrl_c() => {},
        }
        let _ = stop_tx.send(true);
    });

    stop_rx
}

/// Consume `reader` hasta EOF (o error).
async fn wait_closed<R: AsyncRead + Unpin>(mut reader: R) {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
