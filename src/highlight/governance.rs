//! Resource governance: CPU/memory self-throttling
//!
//! The monitor polls process RSS and machine CPU; when either limit is
//! breached the pipeline blocks before its next step until both return
//! below limit. Scheduling priority is lowered at startup, best effort.

use super::config::GovernanceConfig;
use crate::metrics::Metrics;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{info, warn};

pub struct GovernanceMonitor {
    max_cpu_percent: f32,
    max_memory_mb: u64,
    poll_interval: Duration,
    nice_priority: i32,
    system: Mutex<System>,
    metrics: Arc<Metrics>,
}

impl GovernanceMonitor {
    pub fn new(config: &GovernanceConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            max_cpu_percent: config.max_cpu_percent,
            max_memory_mb: config.max_memory_mb,
            poll_interval: Duration::from_secs(config.poll_interval),
            nice_priority: config.nice_priority,
            system: Mutex::new(System::new()),
            metrics,
        }
    }

    /// Lower our own scheduling priority. Best effort; failure is logged
    /// and ignored.
    pub async fn apply_nice(&self) {
        let pid = std::process::id().to_string();
        let priority = self.nice_priority.to_string();
        match tokio::process::Command::new("renice")
            .args(["-n", &priority, "-p", &pid])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                info!("applied nice priority {}", self.nice_priority);
            }
            Ok(output) => {
                warn!(
                    "could not set nice priority: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => warn!("could not set nice priority: {}", e),
        }
    }

    /// Sample CPU and RSS once, exporting both as gauges.
    /// Returns true when throttling is needed.
    pub async fn check_once(&self) -> bool {
        // CPU usage needs two samples separated by the minimum interval.
        {
            let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
            system.refresh_cpu_usage();
        }
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let (cpu, memory_mb) = {
            let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
            system.refresh_cpu_usage();
            let cpu = system.global_cpu_usage();

            let pid = Pid::from_u32(std::process::id());
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            let memory_mb = system
                .process(pid)
                .map(|p| p.memory() / (1024 * 1024))
                .unwrap_or(0);
            (cpu, memory_mb)
        };

        self.metrics.cpu_percent.set(cpu as f64);
        self.metrics.memory_mb.set(memory_mb as f64);

        if cpu > self.max_cpu_percent || memory_mb > self.max_memory_mb {
            warn!(
                "resource limit breached - CPU: {:.1}% (max {}%), memory: {}MB (max {}MB)",
                cpu, self.max_cpu_percent, memory_mb, self.max_memory_mb
            );
            self.metrics.throttle_total.inc();
            return true;
        }
        false
    }

    /// Block until both CPU and memory are back under their limits.
    pub async fn wait_until_safe(&self) {
        while self.check_once().await {
            info!(
                "throttling - waiting {:?} for resources to free up",
                self.poll_interval
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
