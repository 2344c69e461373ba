pub mod protocol;
pub mod stats;
pub mod telemetry;

pub use protocol::{
    utc_timestamp, AckMessage, HeartbeatMessage, Inbound, LogEntry, Pattern, ProcessMetrics,
    UnknownPattern, WorkerKey, DEFAULT_COLLECTOR_PORT, MAX_MESSAGE_BYTES,
};
pub use stats::AggregateStats;
pub use telemetry::{SendError, SendOutcome};
