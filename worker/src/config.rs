use clap::Parser;
use common::{Pattern, DEFAULT_COLLECTOR_PORT};
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(name = "worker")]
#[command(about = "Simulador de workers con carga de CPU configurable y heartbeats al collector")]
pub struct Args {
    /// Cantidad de procesos worker
    #[arg(long, env = "WORKERS", default_value_t = 2)]
    pub workers: u32,

    /// Segundos de corrida antes de parar a todos
    #[arg(long, default_value_t = 60)]
    pub duration: u64,

    #[arg(long, env = "COLLECTOR_HOST", default_value = "127.0.0.1")]
    pub collector_host: String,

    #[arg(long, env = "COLLECTOR_PORT", default_value_t = DEFAULT_COLLECTOR_PORT)]
    pub collector_port: u16,

    /// Segundos entre heartbeats
    #[arg(long, default_value_t = 5)]
    pub heartbeat: u64,

    /// steady | bursty
    #[arg(long, default_value = "steady")]
    pub mode: Pattern,

    /// Segundos activos por ciclo en modo bursty
    #[arg(long, default_value_t = 10)]
    pub burst_len: u64,

    /// Segundos ociosos por ciclo en modo bursty
    #[arg(long, default_value_t = 10)]
    pub idle_len: u64,

    /// Mínimo de hashes por iteración
    #[arg(long, default_value_t = 1)]
    pub min_units: u32,

    /// Máximo de hashes por iteración
    #[arg(long, default_value_t = 5)]
    pub max_units: u32,

    /// Jitter máximo (segundos) entre iteraciones
    #[arg(long, default_value_t = 0.02)]
    pub jitter: f64,

    /// Ceder el scheduler cada N hashes (0 = nunca)
    #[arg(long, default_value_t = 0)]
    pub yield_every: u64,

    /// Pausar la carga cuando la CPU del sistema está alta
    #[arg(long)]
    pub throttle: bool,

    /// Umbral de CPU del sistema (%) para el throttle
    #[arg(long, default_value_t = 70.0)]
    pub throttle_threshold: f32,

    /// Adjuntar métricas de proceso/sistema a cada heartbeat
    #[arg(long)]
    pub send_metrics: bool,

    /// Directorio donde cada worker escribe worker_<id>.log
    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    /// Uso interno: correr como un único worker hijo
    #[arg(long, hide = true)]
    pub worker_id: Option<u32>,
}

/// Forma de la carga en el tiempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadShape {
    Steady,
    Bursty { burst: Duration, idle: Duration },
}

impl LoadShape {
    pub fn pattern(&self) -> Pattern {
        match self {
            LoadShape::Steady => Pattern::Steady,
            LoadShape::Bursty { .. } => Pattern::Bursty,
        }
    }

    /// ¿Toca trabajar en este momento? En bursty el ciclo dura burst + idle
    /// y se está activo mientras `elapsed mod periodo < burst`.
    pub fn is_active(&self, elapsed: Duration) -> bool {
        match *self {
            LoadShape::Steady => true,
            LoadShape::Bursty { burst, idle } => {
                let period = (burst + idle).as_nanos();
                if period == 0 {
                    return true;
                }
                elapsed.as_nanos() % period < burst.as_nanos()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub threshold: f32,
}

/// Configuración inmutable de una corrida.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub workers: u32,
    pub duration: Duration,
    pub collector_host: String,
    pub collector_port: u16,
    pub heartbeat_interval: Duration,
    pub shape: LoadShape,
    pub min_units: u32,
    pub max_units: u32,
    pub jitter: Duration,
    pub yield_every: u64,
    pub throttle: ThrottleConfig,
    pub send_metrics: bool,
    pub log_dir: PathBuf,
}

impl WorkerConfig {
    /// Normaliza los argumentos: min_units >= 1, max_units >= min_units, jitter >= 0.
    pub fn from_args(args: &Args) -> Self {
        let shape = match args.mode {
            Pattern::Steady => LoadShape::Steady,
            Pattern::Bursty => LoadShape::Bursty {
                burst: Duration::from_secs(args.burst_len),
                idle: Duration::from_secs(args.idle_len),
            },
        };

        let min_units = args.min_units.max(1);
        let max_units = args.max_units.max(min_units);

        let jitter = if args.jitter.is_finite() && args.jitter > 0.0 {
            Duration::from_secs_f64(args.jitter)
        } else {
            Duration::ZERO
        };

        Self {
            workers: args.workers,
            duration: Duration::from_secs(args.duration),
            collector_host: args.collector_host.clone(),
            collector_port: args.collector_port,
            heartbeat_interval: Duration::from_secs(args.heartbeat),
            shape,
            min_units,
            max_units,
            jitter,
            yield_every: args.yield_every,
            throttle: ThrottleConfig {
                enabled: args.throttle,
                threshold: args.throttle_threshold,
            },
            send_metrics: args.send_metrics,
            log_dir: args.log_dir.clone(),
        }
    }

    pub fn worker_log_path(&self, worker_id: u32) -> PathBuf {
        self.log_dir.join(format!("worker_{}.log", worker_id))
    }
}
