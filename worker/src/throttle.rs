use std::time::Instant;
use sysinfo::{CpuExt, System, SystemExt};
use tracing::warn;

/// Fuente de muestras de CPU del sistema, en porcentaje (0-100).
/// `None` = no se pudo medir.
pub trait CpuSampler: Send {
    fn sample(&mut self) -> Option<f32>;
}

/// Muestra la CPU global con sysinfo. Cada lectura cubre la ventana desde
/// la lectura anterior, así que no bloquea. Antes de que pase
/// `MINIMUM_CPU_UPDATE_INTERVAL` desde la base no hay muestra.
pub struct SysinfoSampler {
    sys: System,
    ready_at: Instant,
}

impl SysinfoSampler {
    /// `None` si la plataforma no la soporta sysinfo.
    pub fn new() -> Option<Self> {
        if !System::IS_SUPPORTED {
            return None;
        }
        let mut sys = System::new();
        // primera lectura para tener una base contra la cual medir
        sys.refresh_cpu();
        Some(Self {
            sys,
            ready_at: Instant::now() + System::MINIMUM_CPU_UPDATE_INTERVAL,
        })
    }
}

impl CpuSampler for SysinfoSampler {
    fn sample(&mut self) -> Option<f32> {
        // la ventana todavía es muy corta: sysinfo devolvería el promedio desde el boot
        if Instant::now() < self.ready_at {
            return None;
        }
        self.sys.refresh_cpu();
        let usage = self.sys.global_cpu_info().cpu_usage();
        usage.is_finite().then_some(usage)
    }
}

/// Decide si pausar la carga porque el sistema ya está ocupado.
/// Sin sampler (o si falla la muestra) nunca frena.
pub struct ThrottleGovernor {
    threshold: f32,
    sampler: Option<Box<dyn CpuSampler>>,
    last_sample: Option<f32>,
}

impl ThrottleGovernor {
    /// Governor sobre la CPU real del host.
    pub fn system(threshold: f32) -> Self {
        match SysinfoSampler::new() {
            Some(s) => Self::with_sampler(threshold, s),
            None => {
                warn!("sysinfo no soportado en esta plataforma, throttle deshabilitado");
                Self::disabled(threshold)
            }
        }
    }

    pub fn with_sampler(threshold: f32, sampler: impl CpuSampler + 'static) -> Self {
        Self {
            threshold,
            sampler: Some(Box::new(sampler)),
            last_sample: None,
        }
    }

    pub fn disabled(threshold: f32) -> Self {
        Self {
            threshold,
            sampler: None,
            last_sample: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sampler.is_some()
    }

    pub fn last_sample(&self) -> Option<f32> {
        self.last_sample
    }

    /// true sii la muestra actual supera el umbral. Sin suavizado entre llamadas.
    pub fn should_throttle(&mut self) -> bool {
        let sample = self.sampler.as_mut().and_then(|s| s.sample());
        self.last_sample = sample;
        exceeds(sample, self.threshold)
    }
}

fn exceeds(sample: Option<f32>, threshold: f32) -> bool {
    matches!(sample, Some(load) if load > threshold)
}
