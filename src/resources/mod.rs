//! Local resource governance
//!
//! Applies cgroups-v2 limits to service instance processes, reads their
//! memory usage from `/proc`, and polls usage on an interval with
//! hysteresis-gated warning events.

pub mod cgroup;
pub mod poller;
pub mod usage;

pub use cgroup::{CgroupManager, cpu_weight_for};
pub use poller::{ResourcePoller, ResourcePollerConfig};
pub use usage::{ProcUsageReader, ResourceUsage, ScriptedUsageReader, UsageReader};
