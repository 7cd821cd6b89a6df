//! System resource snapshot measure

use async_trait::async_trait;
use sysinfo::System;

use crate::Measurement;
use crate::catalog::{DirectMeasure, PropertyBag};

/// Direct measure reading CPU and memory figures of the local machine.
pub struct SystemResourcesMeasure;

#[async_trait]
impl DirectMeasure for SystemResourcesMeasure {
    async fn read(&mut self, _properties: &mut PropertyBag) -> anyhow::Result<Vec<Measurement>> {
        // sysinfo refreshes block; keep them off the runtime threads.
        let measurement = tokio::task::spawn_blocking(snapshot).await?;
        Ok(vec![measurement])
    }
}

fn snapshot() -> Measurement {
    let mut sys = System::new_all();
    sys.refresh_all();
    // CPU usage needs two refreshes a minimum interval apart.
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_all();

    let cpus = sys.cpus();
    let average_usage = if cpus.is_empty() {
        0.0
    } else {
        cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
    };

    Measurement::new()
        .with_value("host_name", System::host_name())
        .with_value("cpu_arch", System::cpu_arch())
        .with_value("cpu_total", cpus.len() as u64)
        .with_value("cpu_average_usage", average_usage)
        .with_value("memory_total", sys.total_memory())
        .with_value("memory_used", sys.used_memory())
        .with_value("swap_total", sys.total_swap())
        .with_value("swap_used", sys.used_swap())
}
