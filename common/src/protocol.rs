use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

/// Tamaño máximo que el collector lee de cada conexión.
pub const MAX_MESSAGE_BYTES: usize = 8192;

/// Puerto por defecto del collector (sólo loopback).
pub const DEFAULT_COLLECTOR_PORT: u16 = 4444;

/// Timestamp UTC en ISO-8601 con microsegundos y 'Z' final,
/// ej: "2024-01-01T00:00:00.123456Z".
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/* --------- Identidad del worker y patrón de carga --------- */

/// Identificador del worker tal como viaja en el JSON.
/// Nuestros workers mandan su índice, pero el collector acepta nombres.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerKey {
    Index(u64),
    Name(String),
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKey::Index(i) => write!(f, "{}", i),
            WorkerKey::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    Steady,
    Bursty,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Steady => "steady",
            Pattern::Bursty => "bursty",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("patrón desconocido '{0}' (usar steady o bursty)")]
pub struct UnknownPattern(pub String);

impl FromStr for Pattern {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steady" => Ok(Pattern::Steady),
            "bursty" => Ok(Pattern::Bursty),
            other => Err(UnknownPattern(other.to_string())),
        }
    }
}

/* --------- Mensajes del wire --------- */

/// Métricas opcionales que el worker adjunta al heartbeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessMetrics {
    pub cpu_percent_proc: f32,
    pub mem_rss_mb: u64,
    pub system_cpu_percent: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub worker: WorkerKey,
    pub pid: u32,
    pub timestamp: String,
    pub counter: u64,
    pub mode: Pattern,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent_proc: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_rss_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_cpu_percent: Option<f32>,
}

impl HeartbeatMessage {
    pub const KIND: &'static str = "heartbeat";

    /// Heartbeat sin métricas, con el timestamp de ahora.
    pub fn new(worker: WorkerKey, pid: u32, counter: u64, mode: Pattern) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            worker,
            pid,
            timestamp: utc_timestamp(),
            counter,
            mode,
            cpu_percent_proc: None,
            mem_rss_mb: None,
            system_cpu_percent: None,
        }
    }

    pub fn with_metrics(mut self, m: ProcessMetrics) -> Self {
        self.cpu_percent_proc = Some(m.cpu_percent_proc);
        self.mem_rss_mb = Some(m.mem_rss_mb);
        self.system_cpu_percent = Some(m.system_cpu_percent);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub status: String,
    pub recv_time: String,
}

impl AckMessage {
    pub fn ok(recv_time: &str) -> Self {
        Self {
            status: "ok".to_string(),
            recv_time: recv_time.to_string(),
        }
    }
}

/* --------- Lo que recibe el collector --------- */

/// Payload recibido: JSON decodificado o el texto crudo si no parseó.
/// En el log se escribe el JSON tal cual o `{"raw": "<texto>"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Inbound {
    Raw { raw: String },
    Decoded(Value),
}

impl Inbound {
    /// Decodifica los bytes de una conexión. Nunca falla: lo que no sea
    /// UTF-8 + JSON válido queda como `Raw`. Se recortan espacios/saltos de línea.
    pub fn decode(bytes: &[u8]) -> Self {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
                return Inbound::Decoded(v);
            }
        }

        Inbound::Raw {
            raw: utf8_ignoring_invalid(bytes).trim().to_string(),
        }
    }

    /// Clave del worker si el mensaje es un objeto con campo `worker`.
    pub fn worker_key(&self) -> Option<String> {
        match self {
            Inbound::Decoded(v) => worker_key_of(v),
            Inbound::Raw { .. } => None,
        }
    }

    /// Interpreta el mensaje como heartbeat, si tiene esa forma.
    pub fn as_heartbeat(&self) -> Option<HeartbeatMessage> {
        match self {
            Inbound::Decoded(v) => serde_json::from_value(v.clone()).ok(),
            Inbound::Raw { .. } => None,
        }
    }

    fn from_value(v: Value) -> Self {
        if let Value::Object(map) = &v {
            if map.len() == 1 {
                if let Some(Value::String(raw)) = map.get("raw") {
                    return Inbound::Raw { raw: raw.clone() };
                }
            }
        }
        Inbound::Decoded(v)
    }
}

impl fmt::Display for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inbound::Decoded(v) => write!(f, "{}", v),
            Inbound::Raw { raw } => write!(f, "raw({:?})", raw),
        }
    }
}

impl<'de> Deserialize<'de> for Inbound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Inbound::from_value)
    }
}

/// Texto UTF-8 descartando las secuencias inválidas (sin caracteres de reemplazo).
fn utf8_ignoring_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Los strings se usan tal cual; números u otros valores por su texto JSON.
/// `null` cuenta como ausente.
pub fn worker_key_of(msg: &Value) -> Option<String> {
    match msg.get("worker")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Una línea del log del collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: String,
    pub addr: String,
    pub msg: Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn heartbeat_serializa_con_campos_del_wire() {
        let hb = HeartbeatMessage::new(WorkerKey::Index(3), 42, 17, Pattern::Bursty);
        let v = serde_json::to_value(&hb).unwrap();

        assert_eq!(v["type"], "heartbeat");
        assert_eq!(v["worker"], 3);
        assert_eq!(v["pid"], 42);
        assert_eq!(v["counter"], 17);
        assert_eq!(v["mode"], "bursty");
        assert!(v.get("cpu_percent_proc").is_none());
        assert!(v["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn heartbeat_con_metricas_incluye_los_tres_campos() {
        let hb = HeartbeatMessage::new(WorkerKey::Index(0), 1, 0, Pattern::Steady).with_metrics(
            ProcessMetrics {
                cpu_percent_proc: 12.5,
                mem_rss_mb: 30,
                system_cpu_percent: 50.0,
            },
        );
        let v = serde_json::to_value(&hb).unwrap();

        assert_eq!(v["cpu_percent_proc"], 12.5);
        assert_eq!(v["mem_rss_mb"], 30);
        assert_eq!(v["system_cpu_percent"], 50.0);
    }

    #[test]
    fn decode_json_valido() {
        let inbound = Inbound::decode(br#"{"type":"heartbeat","worker":"w1"}  "#);
        assert_eq!(inbound.worker_key().as_deref(), Some("w1"));
        assert!(matches!(inbound, Inbound::Decoded(_)));
    }

    #[test]
    fn decode_bytes_invalidos_cae_a_raw() {
        let inbound = Inbound::decode(b"  not json at all\n");
        assert_eq!(
            inbound,
            Inbound::Raw {
                raw: "not json at all".to_string()
            }
        );
        assert_eq!(inbound.worker_key(), None);

        let v = serde_json::to_value(&inbound).unwrap();
        assert_eq!(v, json!({"raw": "not json at all"}));
    }

    #[test]
    fn decode_descarta_bytes_utf8_invalidos() {
        let inbound = Inbound::decode(b"\xffhola\xc3 mundo\n");
        assert_eq!(
            inbound,
            Inbound::Raw {
                raw: "hola mundo".to_string()
            }
        );

        // JSON con un byte inválido no se decodifica: queda como raw sin ese byte
        let inbound = Inbound::decode(b"{\"worker\":\"w\xff1\"}");
        assert_eq!(
            inbound,
            Inbound::Raw {
                raw: r#"{"worker":"w1"}"#.to_string()
            }
        );
        assert_eq!(inbound.worker_key(), None);
    }

    #[test]
    fn worker_key_numerico_y_null() {
        assert_eq!(worker_key_of(&json!({"worker": 7})).as_deref(), Some("7"));
        assert_eq!(worker_key_of(&json!({"worker": null})), None);
        assert_eq!(worker_key_of(&json!([1, 2, 3])), None);
    }

    #[test]
    fn log_entry_se_relee_igual() {
        let entry = LogEntry {
            time: "2024-01-01T00:00:00.000000Z".to_string(),
            addr: "127.0.0.1".to_string(),
            msg: Inbound::Raw {
                raw: "hola".to_string(),
            },
        };
        let line = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn as_heartbeat_reconoce_el_escenario_basico() {
        let inbound = Inbound::decode(
            br#"{"type":"heartbeat","worker":"w1","pid":123,"timestamp":"2024-01-01T00:00:00Z","counter":5,"mode":"steady"}"#,
        );
        let hb = inbound.as_heartbeat().unwrap();
        assert_eq!(hb.worker, WorkerKey::Name("w1".to_string()));
        assert_eq!(hb.counter, 5);
        assert_eq!(hb.mode, Pattern::Steady);
    }

    #[test]
    fn worker_key_se_muestra_sin_comillas() {
        assert_eq!(WorkerKey::Index(3).to_string(), "3");
        assert_eq!(WorkerKey::Name("w1".to_string()).to_string(), "w1");
    }

    #[test]
    fn pattern_desde_texto() {
        assert_eq!("Bursty".parse::<Pattern>().unwrap(), Pattern::Bursty);
        assert!("random".parse::<Pattern>().is_err());
    }
}
