//! cgroups-v2 limit application
//!
//! Each instance owns `/sys/fs/cgroup/nnc-{id}/`. When the host lacks the
//! memory and cpu controllers (non-Linux, minimal kernels, containers
//! without delegation) the manager runs degraded: every mutating operation
//! succeeds without touching the filesystem. Callers may keep provisioning;
//! they just get no enforcement.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain_types::{InstanceId, MemoryMb};
use crate::errors::{CoreError, CoreResult, codes};
use crate::fs::SharedFilesystem;

/// Default cgroups-v2 mount point
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

const CGROUP_PREFIX: &str = "nnc-";

/// Translates a 1..=100 priority into a cgroups-v2 `cpu.weight` in
/// 1..=10000. Out-of-range priorities are clamped.
pub fn cpu_weight_for(priority: u32) -> u32 {
    let priority = priority.clamp(1, 100);
    1 + priority * 9999 / 100
}

/// Writes memory and CPU limits for instance cgroups.
#[derive(Debug)]
pub struct CgroupManager {
    fs: SharedFilesystem,
    root: PathBuf,
    available: bool,
}

impl CgroupManager {
    /// Probes the default cgroup root
    pub fn new(fs: SharedFilesystem) -> Self {
        Self::with_root(fs, CGROUP_ROOT)
    }

    /// Probes a custom root; degraded when the `memory` and `cpu`
    /// controllers are not both enabled there.
    pub fn with_root(fs: SharedFilesystem, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let available = match fs.read_to_string(&root.join("cgroup.controllers")) {
            Ok(controllers) => {
                let enabled: Vec<&str> = controllers.split_whitespace().collect();
                enabled.contains(&"memory") && enabled.contains(&"cpu")
            }
            Err(_) => false,
        };

        if available {
            info!(root = %root.display(), "cgroups-v2 resource limiting active");
        } else {
            warn!(
                root = %root.display(),
                "cgroups-v2 memory/cpu controllers unavailable; resource limits are no-ops"
            );
        }

        Self {
            fs,
            root,
            available,
        }
    }

    /// Whether limits actually reach the kernel
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// The instance's cgroup directory
    pub fn instance_dir(&self, instance_id: InstanceId) -> PathBuf {
        self.root.join(format!("{CGROUP_PREFIX}{instance_id}"))
    }

    /// Creates the instance's cgroup directory.
    pub fn setup_instance(&self, instance_id: InstanceId) -> CoreResult<()> {
        if !self.available {
            return Ok(());
        }
        let dir = self.instance_dir(instance_id);
        self.fs
            .create_dir_all(&dir)
            .map_err(|e| write_error("create cgroup", &dir, e))?;
        debug!(cgroup = %dir.display(), "instance cgroup created");
        Ok(())
    }

    /// Applies `memory.high` (soft throttling point) and `memory.max`
    /// (OOM-kill point). A soft limit of 80% of hard is the recommended
    /// convention; it is not enforced here.
    pub fn apply_memory_limits(
        &self,
        instance_id: InstanceId,
        soft_limit: MemoryMb,
        hard_limit: MemoryMb,
    ) -> CoreResult<()> {
        if !self.available {
            return Ok(());
        }
        let dir = self.instance_dir(instance_id);

        let high = dir.join("memory.high");
        self.fs
            .write(&high, &soft_limit.as_bytes().to_string())
            .map_err(|e| write_error("write memory.high", &high, e))?;

        let max = dir.join("memory.max");
        self.fs
            .write(&max, &hard_limit.as_bytes().to_string())
            .map_err(|e| write_error("write memory.max", &max, e))?;

        debug!(
            cgroup = %dir.display(),
            soft_mb = soft_limit.as_u64(),
            hard_mb = hard_limit.as_u64(),
            "memory limits applied"
        );
        Ok(())
    }

    /// Applies `cpu.weight` derived from a 1..=100 priority.
    pub fn apply_cpu_priority(&self, instance_id: InstanceId, priority: u32) -> CoreResult<()> {
        if !self.available {
            return Ok(());
        }
        let path = self.instance_dir(instance_id).join("cpu.weight");
        let weight = cpu_weight_for(priority);
        self.fs
            .write(&path, &weight.to_string())
            .map_err(|e| write_error("write cpu.weight", &path, e))?;
        debug!(weight, "cpu weight applied");
        Ok(())
    }

    /// Moves a process into the instance's cgroup.
    pub fn attach_process(&self, instance_id: InstanceId, pid: u32) -> CoreResult<()> {
        if !self.available {
            return Ok(());
        }
        let path = self.instance_dir(instance_id).join("cgroup.procs");
        self.fs
            .write(&path, &pid.to_string())
            .map_err(|e| write_error("attach process", &path, e))?;
        debug!(pid, "process attached to cgroup");
        Ok(())
    }

    /// Removes the instance's cgroup directory.
    pub fn remove_instance(&self, instance_id: InstanceId) -> CoreResult<()> {
        if !self.available {
            return Ok(());
        }
        let dir = self.instance_dir(instance_id);
        if !self.fs.exists(&dir) {
            return Ok(());
        }
        self.fs
            .remove_dir(&dir)
            .map_err(|e| write_error("remove cgroup", &dir, e))?;
        debug!(cgroup = %dir.display(), "instance cgroup removed");
        Ok(())
    }
}

fn write_error(operation: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::platform(
        codes::CGROUP_WRITE_FAILED,
        format!("{operation} failed: {}", path.display()),
    )
    .with_context("path", path.display().to_string())
    .with_source(err)
}
