//! Fleet resource monitor.
//!
//! Samples memory and CPU of every alive child at a fixed interval and
//! warns when one crosses the configured thresholds.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A vanished process simply yields no metrics

use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fdl_core::{AppName, ChildProcess, LivenessState};

use crate::config::MonitorThresholds;
use crate::supervisor::SupervisorHandle;

/// One child's resource usage.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildMetrics {
    pub name: AppName,
    pub pid: u32,
    pub memory_mb: u64,
    /// Percentage of one core; may exceed 100.
    pub cpu_percent: f32,
    pub memory_high: bool,
    pub cpu_high: bool,
}

impl ChildMetrics {
    pub fn is_any_high(&self) -> bool {
        self.memory_high || self.cpu_high
    }
}

pub struct FleetMonitor {
    system: System,
    memory_threshold_mb: u64,
    cpu_threshold_percent: f32,
}

impl FleetMonitor {
    pub fn new(thresholds: &MonitorThresholds) -> Self {
        Self {
            system: System::new(),
            memory_threshold_mb: thresholds.memory_mb,
            cpu_threshold_percent: thresholds.cpu_percent,
        }
    }

    /// Refreshes process data and returns metrics for every alive child.
    ///
    /// CPU usage is relative to the previous refresh, so the first call
    /// reports zero.
    pub fn sample(&mut self, children: &[ChildProcess]) -> Vec<ChildMetrics> {
        // refresh_all is needed for the CPU delta to be computed
        self.system.refresh_all();

        children
            .iter()
            .filter(|c| !c.disabled && c.liveness_state() == LivenessState::Alive)
            .filter_map(|c| {
                let pid = c.process_id?;
                let process = self.system.process(Pid::from_u32(pid))?;
                let memory_mb = process.memory() / 1024 / 1024;
                let cpu_percent = process.cpu_usage();
                Some(ChildMetrics {
                    name: c.assigned_name,
                    pid,
                    memory_mb,
                    cpu_percent,
                    memory_high: memory_mb > self.memory_threshold_mb,
                    cpu_high: cpu_percent > self.cpu_threshold_percent,
                })
            })
            .collect()
    }
}

/// Spawns the monitor task.
pub fn spawn_monitor_task(
    handle: SupervisorHandle,
    thresholds: MonitorThresholds,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = FleetMonitor::new(&thresholds);
        let mut tick = interval(Duration::from_secs(thresholds.interval_secs.max(1)));

        info!(
            memory_threshold_mb = thresholds.memory_mb,
            cpu_threshold_percent = thresholds.cpu_percent,
            interval_secs = thresholds.interval_secs,
            "Fleet monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Fleet monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let children = match handle.snapshot().await {
                        Ok(children) => children,
                        Err(e) => {
                            debug!(error = %e, "Supervisor gone, monitor stopping");
                            break;
                        }
                    };
                    for metrics in monitor.sample(&children) {
                        log_metrics(&metrics);
                    }
                }
            }
        }
    })
}

fn log_metrics(metrics: &ChildMetrics) {
    if metrics.memory_high {
        warn!(
            name = %metrics.name,
            pid = metrics.pid,
            memory_mb = metrics.memory_mb,
            "HIGH MEMORY: child above threshold"
        );
    } else if metrics.cpu_high {
        warn!(
            name = %metrics.name,
            pid = metrics.pid,
            cpu_percent = format!("{:.1}", metrics.cpu_percent),
            "HIGH CPU: child above threshold"
        );
    } else {
        debug!(
            name = %metrics.name,
            pid = metrics.pid,
            memory_mb = metrics.memory_mb,
            cpu_percent = format!("{:.1}", metrics.cpu_percent),
            "Child resource usage"
        );
    }
}
