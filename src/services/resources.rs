//! Host memory and disk readings used for admission checks and benchmarks.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};

/// Source of host resource readings. All values are bytes.
pub trait ResourceProbe: Send + Sync {
    fn total_memory(&self) -> u64;

    fn available_memory(&self) -> u64;

    fn used_memory(&self) -> u64;

    /// Free space on the filesystem holding `path`; `None` when unknown.
    fn available_disk(&self, path: &Path) -> Option<u64>;

    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Live readings from the operating system.
pub struct SystemProbe {
    system: Mutex<System>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        let refresh = RefreshKind::new().with_memory(MemoryRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh)),
        }
    }

    fn with_memory<T>(&self, f: impl FnOnce(&System) -> T) -> T {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        f(&system)
    }
}

impl ResourceProbe for SystemProbe {
    fn total_memory(&self) -> u64 {
        self.with_memory(System::total_memory)
    }

    fn available_memory(&self) -> u64 {
        self.with_memory(System::available_memory)
    }

    fn used_memory(&self) -> u64 {
        self.with_memory(System::used_memory)
    }

    fn available_disk(&self, path: &Path) -> Option<u64> {
        let target = existing_ancestor(path)?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

/// The closest existing directory at or above `path`, canonicalized.
fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
}

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn format_gb(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / BYTES_PER_GB)
}
