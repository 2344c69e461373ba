use anyhow::Result;
use common::{utc_timestamp, AckMessage, Inbound, LogEntry, MAX_MESSAGE_BYTES};
use std::net::{IpAddr, SocketAddr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, error, info, warn};

use crate::state::CollectorState;

/// Loop de accept: una tarea por conexión, el accept nunca espera a las que están en vuelo.
pub async fn serve(listener: TcpListener, state: CollectorState) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("error en accept: {}", e);
                continue;
            }
        };

        let conn_state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, conn_state).await;
        });
    }
}

/// Un mensaje por conexión: leer, registrar, contestar y cerrar.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, state: CollectorState) {
    let mut buf = vec![0u8; MAX_MESSAGE_BYTES];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            // sin lectura no hay mensaje: ni log ni stats
            warn!("error leyendo de {}: {}", peer, e);
            return;
        }
    };

    let ack = match ingest(&state, &buf[..n], peer.ip()) {
        Ok(ack) => ack,
        Err(e) => {
            error!("no se pudo registrar el mensaje de {}: {:?}", peer, e);
            return;
        }
    };

    // el ack es best-effort: si falla sólo cerramos
    match serde_json::to_vec(&ack) {
        Ok(body) => {
            if let Err(e) = stream.write_all(&body).await {
                debug!("no se pudo mandar ack a {}: {}", peer, e);
            }
        }
        Err(e) => debug!("no se pudo serializar ack: {}", e),
    }
}

/// Procesa un payload ya leído: decodifica (o cae a raw), hace append al log
/// y actualiza las stats. Devuelve el ack a mandar.
pub fn ingest(state: &CollectorState, payload: &[u8], addr: IpAddr) -> Result<AckMessage> {
    let now = utc_timestamp();
    let msg = Inbound::decode(payload);
    let worker = msg.worker_key();

    info!("[{}] from {} -> {}", now, addr, msg);
    if let Some(hb) = msg.as_heartbeat() {
        debug!(
            "heartbeat de worker {} (pid={}, counter={}, modo={})",
            hb.worker, hb.pid, hb.counter, hb.mode
        );
    }

    let entry = LogEntry {
        time: now.clone(),
        addr: addr.to_string(),
        msg,
    };
    state.log().append(&entry)?;
    state.record(worker.as_deref(), &now)?;

    Ok(AckMessage::ok(&now))
}
