// collector/src/state.rs

use anyhow::{anyhow, Context, Result};
use common::{AggregateStats, LogEntry};
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Estado compartido entre las conexiones y el reporter.
/// Las stats sólo se tocan a través de `record` / `snapshot`.
#[derive(Clone)]
pub struct CollectorState {
    stats: Arc<Mutex<AggregateStats>>,
    log: Arc<LogSink>,
}

impl CollectorState {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            stats: Arc::new(Mutex::new(AggregateStats::new())),
            log: Arc::new(LogSink::new(log_path)),
        }
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Cuenta un mensaje recibido (una sección crítica por update).
    pub fn record(&self, worker: Option<&str>, seen_at: &str) -> Result<()> {
        let mut stats = self.stats.lock().map_err(|_| anyhow!("lock stats"))?;
        stats.record(worker, seen_at);
        Ok(())
    }

    /// Copia puntual de las stats; el lock se suelta antes de formatear.
    pub fn snapshot(&self) -> Result<AggregateStats> {
        let stats = self.stats.lock().map_err(|_| anyhow!("lock stats"))?;
        Ok(stats.clone())
    }
}

/// Log append-only del collector: una `LogEntry` JSON por línea.
/// El archivo se abre en cada escritura y se cierra enseguida.
pub struct LogSink {
    path: PathBuf,
    // serializa los appends para que dos líneas nunca se mezclen
    write_lock: Mutex<()>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Crea el archivo si no existe (sin truncar).
    pub fn touch(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("no se pudo abrir {}", self.path.display()))?;
        Ok(())
    }

    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().map_err(|_| anyhow!("lock log"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("no se pudo abrir {}", self.path.display()))?;
        file.write_all(&line)?;
        Ok(())
    }
}
