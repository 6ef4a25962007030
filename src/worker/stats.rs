use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    pub disk_usage: f32,
    pub task_count: u64,
}

/// Sample the node's resource counters. Memory figures are megabytes,
/// usage figures are percentages.
pub fn get_stats(sys: &System, task_count: u64) -> SystemStats {
    SystemStats {
        cpu_usage: (sys.global_cpu_usage() * 100.0).round() / 100.0,
        total_memory: sys.total_memory() / 1024 / 1024,
        used_memory: sys.used_memory() / 1024 / 1024,
        total_swap: sys.total_swap() / 1024 / 1024,
        used_swap: sys.used_swap() / 1024 / 1024,
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        total_cpus: sys.cpus().len() as u64,
        disk_usage: disk_usage_percent(),
        task_count,
    }
}

fn disk_usage_percent() -> f32 {
    let disks = Disks::new_with_refreshed_list();
    let used: f32 = disks
        .iter()
        .map(|disk| disk.total_space() as f32 - disk.available_space() as f32)
        .sum();
    let total: f32 = disks.iter().map(|disk| disk.total_space() as f32).sum();
    if total > 0.0 {
        (used / total) * 100.0
    } else {
        0.0
    }
}
