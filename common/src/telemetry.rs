//! Envío best-effort de un mensaje al collector.
//!
//! Una conexión nueva por llamada, sin pool: la frecuencia la marca el
//! intervalo de heartbeat. Ningún error sale de aquí, todo termina en un
//! [`SendOutcome`].

use serde::Serialize;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);
const ACK_BUF_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no se pudo serializar el payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("conexión rechazada o fallida: {0}")]
    Connect(std::io::Error),
    #[error("timeout conectando al collector")]
    ConnectTimeout,
    #[error("error escribiendo el payload: {0}")]
    Write(std::io::Error),
}

/// Resultado de un envío.
/// `NoAck` = el payload salió pero no llegó respuesta a tiempo.
#[derive(Debug)]
pub enum SendOutcome {
    Acked(String),
    NoAck,
    Failed(SendError),
}

impl SendOutcome {
    /// Texto del ack, si lo hubo. Hoy `NoAck` y `Failed` se tratan igual.
    pub fn ack(&self) -> Option<&str> {
        match self {
            SendOutcome::Acked(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn into_ack(self) -> Option<String> {
        match self {
            SendOutcome::Acked(text) => Some(text),
            _ => None,
        }
    }
}

/// Manda `payload` como JSON a `host:port` e intenta leer un ack corto.
pub async fn send<T: Serialize>(payload: &T, host: &str, port: u16) -> SendOutcome {
    let body = match serde_json::to_vec(payload) {
        Ok(b) => b,
        Err(e) => return SendOutcome::Failed(e.into()),
    };

    let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return SendOutcome::Failed(SendError::Connect(e)),
        Err(_) => return SendOutcome::Failed(SendError::ConnectTimeout),
    };

    if let Err(e) = stream.write_all(&body).await {
        return SendOutcome::Failed(SendError::Write(e));
    }

    let mut buf = [0u8; ACK_BUF_BYTES];
    match timeout(ACK_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            SendOutcome::Acked(String::from_utf8_lossy(&buf[..n]).into_owned())
        }
        Ok(Ok(_)) => SendOutcome::NoAck,
        Ok(Err(e)) => {
            debug!("error leyendo ack: {}", e);
            SendOutcome::NoAck
        }
        Err(_) => SendOutcome::NoAck,
    }
}
