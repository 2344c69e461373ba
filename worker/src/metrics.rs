use common::ProcessMetrics;
use sysinfo::{CpuExt, Pid, ProcessExt, System, SystemExt};

/// Lee CPU y memoria del proceso actual más la CPU del sistema.
/// Se guarda el `System` entre lecturas: el % de CPU sale de la diferencia
/// con la lectura anterior (la primera da 0).
pub struct MetricsReader {
    sys: System,
    pid: Pid,
}

impl MetricsReader {
    /// `None` si no hay soporte en la plataforma o no conocemos nuestro pid.
    pub fn new() -> Option<Self> {
        if !System::IS_SUPPORTED {
            return None;
        }
        let pid = sysinfo::get_current_pid().ok()?;
        let mut sys = System::new();
        sys.refresh_process(pid);
        sys.refresh_cpu();
        Some(Self { sys, pid })
    }

    pub fn sample(&mut self) -> Option<ProcessMetrics> {
        if !self.sys.refresh_process(self.pid) {
            return None;
        }
        self.sys.refresh_cpu();

        let proc_ = self.sys.process(self.pid)?;
        Some(ProcessMetrics {
            cpu_percent_proc: proc_.cpu_usage(),
            // memory() viene en bytes
            mem_rss_mb: proc_.memory() / (1024 * 1024),
            system_cpu_percent: self.sys.global_cpu_info().cpu_usage(),
        })
    }
}
