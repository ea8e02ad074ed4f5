// Storage disk usage
// reason: sysinfo for cross-platform disk listing (ADR-001)
use std::path::Path;
use sysinfo::Disks;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    /// Used share of the disk, 0.0 to 100.0
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Usage of the disk holding `path` (longest matching mount point).
/// None when no mounted disk contains the path.
pub fn disk_usage(path: &Path) -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;

    let usage = DiskUsage {
        total_bytes: disk.total_space(),
        available_bytes: disk.available_space(),
    };
    debug!(
        path = %path.display(),
        mount = %disk.mount_point().display(),
        total_bytes = usage.total_bytes,
        available_bytes = usage.available_bytes,
        "Disk usage collected"
    );
    Some(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_percent() {
        let usage = DiskUsage {
            total_bytes: 200,
            available_bytes: 50,
        };
        assert_eq!(usage.used_bytes(), 150);
        assert!((usage.used_percent() - 75.0).abs() < f64::EPSILON);

        let empty = DiskUsage {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_percent(), 0.0);
    }

    #[test]
    fn test_relative_path_has_no_disk() {
        // Mount points are absolute
        assert!(disk_usage(Path::new("relative/vods")).is_none());
    }
}
