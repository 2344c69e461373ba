use anyhow::{Context, Result};
use common::{telemetry, HeartbeatMessage, WorkerKey};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info};

use crate::{config::WorkerConfig, metrics::MetricsReader, throttle::ThrottleGovernor};

/// Pausa cuando el sistema está ocupado.
pub const THROTTLE_BACKOFF: Duration = Duration::from_millis(200);
/// Rango de la pausa aleatoria durante la fase idle.
const IDLE_SLEEP_MIN: Duration = Duration::from_millis(50);
const IDLE_SLEEP_MAX: Duration = Duration::from_millis(200);

/// Estado propio de un worker. No se comparte con nadie.
#[derive(Debug)]
pub struct WorkerState {
    pub counter: u64,
    pub last_heartbeat: Instant,
    pub started_at: Instant,
}

impl WorkerState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            counter: 0,
            last_heartbeat: now,
            started_at: now,
        }
    }
}

/// Qué pasó en una iteración del loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Throttled,
    Idle,
    Worked { units: u32, heartbeat: bool },
}

/// Registro que queda en worker_<id>.log por cada heartbeat.
#[derive(Debug, Serialize)]
struct HeartbeatRecord<'a> {
    time: String,
    hb: &'a HeartbeatMessage,
    ack: Option<String>,
}

pub struct Scheduler {
    id: u32,
    pid: u32,
    cfg: Arc<WorkerConfig>,
    state: WorkerState,
    rng: StdRng,
    governor: Option<ThrottleGovernor>,
    metrics: Option<MetricsReader>,
    log_path: PathBuf,
}

impl Scheduler {
    pub fn new(id: u32, cfg: Arc<WorkerConfig>) -> Self {
        let governor = cfg
            .throttle
            .enabled
            .then(|| ThrottleGovernor::system(cfg.throttle.threshold))
            .filter(ThrottleGovernor::is_enabled);
        let metrics = if cfg.send_metrics {
            MetricsReader::new()
        } else {
            None
        };

        Self::with_parts(id, cfg, governor, metrics)
    }

    pub fn with_parts(
        id: u32,
        cfg: Arc<WorkerConfig>,
        governor: Option<ThrottleGovernor>,
        metrics: Option<MetricsReader>,
    ) -> Self {
        let log_path = cfg.worker_log_path(id);
        Self {
            id,
            pid: std::process::id(),
            cfg,
            state: WorkerState::new(),
            rng: StdRng::from_os_rng(),
            governor,
            metrics,
            log_path,
        }
    }

    pub fn counter(&self) -> u64 {
        self.state.counter
    }

    /// Corre hasta ver el stop flag. Devuelve el contador final.
    pub async fn run(mut self, stop: watch::Receiver<bool>) -> Result<u64> {
        self.write_start_marker()?;
        info!(
            "worker {} arrancó (pid={}, modo={}, log={})",
            self.id,
            self.pid,
            self.cfg.shape.pattern(),
            self.log_path.display()
        );

        while !stop_requested(&stop) {
            self.iterate().await?;
        }

        info!("worker {} terminó con counter={}", self.id, self.counter());
        Ok(self.counter())
    }

    /// Una vuelta del loop: throttle, fase, carga, heartbeat y jitter.
    pub async fn iterate(&mut self) -> Result<Tick> {
        // 1) throttle
        if let Some(gov) = self.governor.as_mut() {
            if gov.should_throttle() {
                debug!(
                    "worker {}: sistema ocupado ({:?}%), pausando",
                    self.id,
                    gov.last_sample()
                );
                sleep(THROTTLE_BACKOFF).await;
                return Ok(Tick::Throttled);
            }
        }

        // 2) fase (sólo bursty tiene idle)
        if !self.cfg.shape.is_active(self.state.started_at.elapsed()) {
            let pause = self.rng.random_range(IDLE_SLEEP_MIN..=IDLE_SLEEP_MAX);
            sleep(pause).await;
            return Ok(Tick::Idle);
        }

        // 3) carga
        let units = self.draw_units();
        self.generate_load(units).await;

        // 4) heartbeat
        let heartbeat = self.state.last_heartbeat.elapsed() >= self.cfg.heartbeat_interval;
        if heartbeat {
            self.state.last_heartbeat = Instant::now();
            self.send_heartbeat().await?;
        }

        // 5) jitter; sin jitter igual cedemos para no acaparar el runtime
        if self.cfg.jitter.is_zero() {
            tokio::task::yield_now().await;
        } else {
            let pause = self.rng.random_range(Duration::ZERO..=self.cfg.jitter);
            sleep(pause).await;
        }

        Ok(Tick::Worked { units, heartbeat })
    }

    fn draw_units(&mut self) -> u32 {
        draw_units(&mut self.rng, self.cfg.min_units, self.cfg.max_units)
    }

    async fn generate_load(&mut self, units: u32) {
        for _ in 0..units {
            let salt: f64 = self.rng.random();
            std::hint::black_box(hash_unit(self.id, self.state.counter, salt));
            self.state.counter += 1;

            if self.cfg.yield_every > 0 && self.state.counter % self.cfg.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    fn build_heartbeat(&mut self) -> HeartbeatMessage {
        let hb = HeartbeatMessage::new(
            WorkerKey::Index(self.id as u64),
            self.pid,
            self.state.counter,
            self.cfg.shape.pattern(),
        );

        match self.metrics.as_mut().and_then(|p| p.sample()) {
            Some(m) => hb.with_metrics(m),
            None => hb,
        }
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let hb = self.build_heartbeat();
        let outcome = telemetry::send(&hb, &self.cfg.collector_host, self.cfg.collector_port).await;
        match outcome.ack() {
            Some(ack) => debug!("worker {} heartbeat counter={} -> {}", self.id, hb.counter, ack),
            None => debug!(
                "worker {} heartbeat counter={} sin ack: {:?}",
                self.id, hb.counter, outcome
            ),
        }

        // se registra siempre, haya o no ack
        self.append_log(&HeartbeatRecord {
            time: common::utc_timestamp(),
            hb: &hb,
            ack: outcome.into_ack(),
        })
    }

    fn write_start_marker(&self) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let line = format!("# worker {} start pid={}\n", self.id, self.pid);
        self.append_bytes(line.as_bytes())
    }

    fn append_log(&self, record: &HeartbeatRecord<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.append_bytes(&line)
    }

    fn append_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("no se pudo abrir {}", self.log_path.display()))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Cantidad de hashes para una iteración, uniforme en [min, max] (min >= 1).
pub fn draw_units<R: Rng>(rng: &mut R, min: u32, max: u32) -> u32 {
    let lo = min.max(1);
    let hi = max.max(lo);
    rng.random_range(lo..=hi)
}

/// Una unidad de trabajo: SHA-256 de un input único por worker/contador.
pub fn hash_unit(worker_id: u32, counter: u64, salt: f64) -> [u8; 32] {
    let input = format!("{}-{}-{}", worker_id, counter, salt);
    Sha256::digest(input.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadShape, ThrottleConfig};
    use crate::throttle::CpuSampler;
    use serde_json::Value;
    use std::{env, fs};
    use tokio::net::TcpListener;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("worker_scheduler_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn test_config(log_dir: PathBuf, port: u16) -> WorkerConfig {
        WorkerConfig {
            workers: 1,
            duration: Duration::from_secs(1),
            collector_host: "127.0.0.1".to_string(),
            collector_port: port,
            heartbeat_interval: Duration::from_secs(3600),
            shape: LoadShape::Steady,
            min_units: 3,
            max_units: 3,
            jitter: Duration::ZERO,
            yield_every: 0,
            throttle: ThrottleConfig {
                enabled: false,
                threshold: 70.0,
            },
            send_metrics: false,
            log_dir,
        }
    }

    /// Puerto donde no escucha nadie.
    async fn dead_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    }

    struct AlwaysBusy;

    impl CpuSampler for AlwaysBusy {
        fn sample(&mut self) -> Option<f32> {
            Some(100.0)
        }
    }

    #[test]
    fn draw_units_con_min_igual_max_es_fijo() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(draw_units(&mut rng, 4, 4), 4);
        }
    }

    #[test]
    fn draw_units_respeta_el_rango_y_clampa_min() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let u = draw_units(&mut rng, 0, 3);
            assert!((1..=3).contains(&u));
        }
    }

    #[test]
    fn hash_unit_depende_del_input() {
        assert_eq!(hash_unit(1, 2, 0.5), hash_unit(1, 2, 0.5));
        assert_ne!(hash_unit(1, 2, 0.5), hash_unit(1, 3, 0.5));
    }

    #[tokio::test]
    async fn iteracion_steady_hace_trabajo_fijo() {
        let port = dead_port().await;
        let cfg = Arc::new(test_config(temp_dir("steady"), port));
        let mut sched = Scheduler::with_parts(0, cfg, None, None);

        let tick = sched.iterate().await.unwrap();
        assert_eq!(tick, Tick::Worked { units: 3, heartbeat: false });
        sched.iterate().await.unwrap();
        assert_eq!(sched.counter(), 6);
    }

    #[tokio::test]
    async fn throttle_no_avanza_el_contador() {
        let port = dead_port().await;
        let mut cfg = test_config(temp_dir("throttle"), port);
        cfg.throttle.enabled = true;
        let gov = ThrottleGovernor::with_sampler(cfg.throttle.threshold, AlwaysBusy);
        let mut sched = Scheduler::with_parts(0, Arc::new(cfg), Some(gov), None);

        assert_eq!(sched.iterate().await.unwrap(), Tick::Throttled);
        assert_eq!(sched.counter(), 0);
    }

    #[tokio::test]
    async fn fase_idle_no_hace_trabajo() {
        let port = dead_port().await;
        let mut cfg = test_config(temp_dir("idle"), port);
        // burst de 0s: siempre idle
        cfg.shape = LoadShape::Bursty {
            burst: Duration::ZERO,
            idle: Duration::from_secs(10),
        };
        let mut sched = Scheduler::with_parts(0, Arc::new(cfg), None, None);

        assert_eq!(sched.iterate().await.unwrap(), Tick::Idle);
        assert_eq!(sched.counter(), 0);
    }

    #[tokio::test]
    async fn yield_every_no_saltea_trabajo() {
        let port = dead_port().await;
        let mut cfg = test_config(temp_dir("yield"), port);
        cfg.min_units = 10;
        cfg.max_units = 10;
        cfg.yield_every = 3;
        let mut sched = Scheduler::with_parts(0, Arc::new(cfg), None, None);

        sched.iterate().await.unwrap();
        assert_eq!(sched.counter(), 10);
    }

    /// Sin collector el heartbeat igual queda en el log, con ack null.
    #[tokio::test]
    async fn heartbeat_sin_collector_se_loguea_con_ack_null() {
        let dir = temp_dir("hb_sin_collector");
        let port = dead_port().await;
        let mut cfg = test_config(dir.clone(), port);
        cfg.heartbeat_interval = Duration::ZERO;
        let cfg = Arc::new(cfg);

        let mut sched = Scheduler::with_parts(4, cfg.clone(), None, None);
        sched.write_start_marker().unwrap();
        let tick = sched.iterate().await.unwrap();
        assert_eq!(tick, Tick::Worked { units: 3, heartbeat: true });

        let content = fs::read_to_string(cfg.worker_log_path(4)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("# worker 4 start pid="));

        let rec: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(rec["ack"], Value::Null);
        assert_eq!(rec["hb"]["type"], "heartbeat");
        assert_eq!(rec["hb"]["worker"], 4);
        assert_eq!(rec["hb"]["counter"], 3);
        assert_eq!(rec["hb"]["mode"], "steady");
    }

    #[tokio::test]
    async fn heartbeat_con_collector_guarda_el_ack() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(br#"{"status":"ok","recv_time":"t"}"#).await.unwrap();
            serde_json::from_slice::<Value>(&buf[..n]).unwrap()
        });

        let dir = temp_dir("hb_con_collector");
        let mut cfg = test_config(dir, port);
        cfg.heartbeat_interval = Duration::ZERO;
        let cfg = Arc::new(cfg);
        let mut sched = Scheduler::with_parts(1, cfg.clone(), None, None);

        sched.iterate().await.unwrap();
        let received = server.await.unwrap();
        assert_eq!(received["worker"], 1);
        assert_eq!(received["pid"], std::process::id());

        let content = fs::read_to_string(cfg.worker_log_path(1)).unwrap();
        let rec: Value = serde_json::from_str(content.lines().last().unwrap()).unwrap();
        assert_eq!(rec["ack"], r#"{"status":"ok","recv_time":"t"}"#);
    }

    #[tokio::test]
    async fn run_termina_al_ver_el_stop() {
        let port = dead_port().await;
        let cfg = Arc::new(test_config(temp_dir("stop"), port));
        let sched = Scheduler::with_parts(2, cfg.clone(), None, None);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sched.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let counter = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(counter > 0);
        assert_eq!(counter % 3, 0);
        assert!(cfg.worker_log_path(2).exists());
    }
}
