//! Host metrics used by health checks

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Host metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMetrics {
    /// Memory usage in bytes
    pub memory_used: u64,

    /// Total memory in bytes
    pub memory_total: u64,

    /// Memory usage percentage
    pub memory_percent: f32,

    /// Used bytes on the disk holding the projects root
    pub disk_used: u64,

    /// Total bytes on that disk
    pub disk_total: u64,

    /// Disk usage percentage
    pub disk_percent: f32,

    /// Number of CPU cores
    pub cpu_count: usize,

    /// System uptime in seconds
    pub uptime_secs: u64,

    /// Hostname
    pub hostname: String,
}

fn percent(used: u64, total: u64) -> f32 {
    if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}

/// Used and total bytes of the disk whose mount point is the longest prefix
/// of `path`; all disks summed when none matches
pub fn disk_usage(path: &Path) -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();

    let mounted = disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    match mounted {
        Some(disk) => (
            disk.total_space().saturating_sub(disk.available_space()),
            disk.total_space(),
        ),
        None => disks.iter().fold((0u64, 0u64), |(used, total), disk| {
            (
                used + disk.total_space().saturating_sub(disk.available_space()),
                total + disk.total_space(),
            )
        }),
    }
}

/// Collect host metrics for the disk holding `projects_root`
pub fn collect_metrics(projects_root: &Path) -> HostMetrics {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let (disk_used, disk_total) = disk_usage(projects_root);
    let memory_used = sys.used_memory();
    let memory_total = sys.total_memory();

    HostMetrics {
        memory_used,
        memory_total,
        memory_percent: percent(memory_used, memory_total),
        disk_used,
        disk_total,
        disk_percent: percent(disk_used, disk_total),
        cpu_count: sys.cpus().len(),
        uptime_secs: System::uptime(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    }
}
