use anyhow::Result;
use serde::Serialize;
use std::{collections::BTreeMap, io::BufRead};

use crate::protocol::LogEntry;

/// Totales que mantiene el collector mientras corre.
///
/// Nunca se persiste: se puede reconstruir leyendo el log con [`AggregateStats::replay`].
/// Los mapas son `BTreeMap` para que dos snapshots iguales se impriman igual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    total_msgs: u64,
    by_worker: BTreeMap<String, u64>,
    last_seen: BTreeMap<String, String>,
}

impl AggregateStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuenta un mensaje. Sólo los que traen worker suman al mapa por worker.
    pub fn record(&mut self, worker: Option<&str>, seen_at: &str) {
        self.total_msgs += 1;

        if let Some(w) = worker {
            *self.by_worker.entry(w.to_string()).or_insert(0) += 1;
            self.last_seen.insert(w.to_string(), seen_at.to_string());
        }
    }

    pub fn total_msgs(&self) -> u64 {
        self.total_msgs
    }

    pub fn worker_count(&self) -> usize {
        self.by_worker.len()
    }

    pub fn by_worker(&self) -> &BTreeMap<String, u64> {
        &self.by_worker
    }

    pub fn last_seen(&self) -> &BTreeMap<String, String> {
        &self.last_seen
    }

    /// Línea de resumen, ej:
    /// `STATS: total_msgs=3 workers=2 per_worker={"0":2,"1":1}`
    pub fn summary_line(&self) -> String {
        let per_worker =
            serde_json::to_string(&self.by_worker).unwrap_or_else(|_| "{}".to_string());
        format!(
            "STATS: total_msgs={} workers={} per_worker={}",
            self.total_msgs,
            self.worker_count(),
            per_worker
        )
    }

    /// Reconstruye las stats a partir de un log del collector (una entrada JSON por línea).
    /// Devuelve también cuántas líneas no se pudieron leer como `LogEntry`.
    pub fn replay<R: BufRead>(reader: R) -> Result<(Self, usize)> {
        let mut stats = Self::new();
        let mut skipped = 0;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => {
                    let worker = entry.msg.worker_key();
                    stats.record(worker.as_deref(), &entry.time);
                }
                Err(_) => skipped += 1,
            }
        }

        Ok((stats, skipped))
    }
}
