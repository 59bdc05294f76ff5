//! Per-process memory usage reading
//!
//! The poller reads resident set sizes through the [`UsageReader`] port.
//! The production implementation parses `/proc/{pid}/status` and depends
//! only on the `VmRSS:` line; a missing entry is an error the poller uses
//! to detect dead processes.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::errors::{CoreError, CoreResult, codes};
use crate::fs::SharedFilesystem;
use crate::time_provider::SharedTimeProvider;

/// One usage sample for a process
#[derive(Debug, Clone, Copy)]
pub struct ResourceUsage {
    pub pid: u32,
    pub memory_mb: f64,
    pub sampled_at: SystemTime,
}

/// Reads current usage for a PID.
pub trait UsageReader: Send + Sync + std::fmt::Debug {
    /// Reads the process's resident memory; errors when the process is
    /// gone or its status cannot be parsed.
    fn read_usage(&self, pid: u32) -> CoreResult<ResourceUsage>;
}

/// Reader backed by the proc filesystem.
#[derive(Debug)]
pub struct ProcUsageReader {
    fs: SharedFilesystem,
    time: SharedTimeProvider,
}

impl ProcUsageReader {
    /// Creates a reader over the given filesystem port
    pub fn new(fs: SharedFilesystem, time: SharedTimeProvider) -> Self {
        Self { fs, time }
    }
}

impl UsageReader for ProcUsageReader {
    fn read_usage(&self, pid: u32) -> CoreResult<ResourceUsage> {
        let path = PathBuf::from(format!("/proc/{pid}/status"));
        let status = self.fs.read_to_string(&path).map_err(|e| {
            CoreError::resource(
                codes::RESOURCE_READ_FAILED,
                format!("process {pid} status unavailable"),
            )
            .with_context("pid", pid)
            .with_source(e)
        })?;

        let rss_kb = parse_vm_rss(&status).ok_or_else(|| {
            CoreError::resource(
                codes::RESOURCE_READ_FAILED,
                format!("process {pid} status has no VmRSS line"),
            )
            .with_context("pid", pid)
        })?;

        Ok(ResourceUsage {
            pid,
            memory_mb: rss_kb as f64 / 1024.0,
            sampled_at: self.time.now(),
        })
    }
}

/// Extracts the `VmRSS:` value in kB from a `/proc/{pid}/status` body.
pub(crate) fn parse_vm_rss(status: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        line.strip_prefix("VmRSS:")?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    })
}

/// Test reader replaying scripted samples per PID.
///
/// Each read pops the next sample; once a script runs dry the last value
/// repeats. A PID marked dead errors like a vanished `/proc` entry.
#[derive(Debug, Default)]
pub struct ScriptedUsageReader {
    samples: Mutex<HashMap<u32, VecDeque<f64>>>,
    last: Mutex<HashMap<u32, f64>>,
    time: Option<SharedTimeProvider>,
}

impl ScriptedUsageReader {
    /// Creates a reader with no scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reader stamping samples from the given clock
    pub fn with_clock(time: SharedTimeProvider) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
            time: Some(time),
        }
    }

    /// Appends samples (in MB) to a PID's script
    pub fn push_samples(&self, pid: u32, samples_mb: &[f64]) {
        self.samples
            .lock()
            .expect("script lock poisoned")
            .entry(pid)
            .or_default()
            .extend(samples_mb.iter().copied());
    }

    /// Makes subsequent reads for the PID fail as if the process exited
    pub fn kill_pid(&self, pid: u32) {
        self.samples.lock().expect("script lock poisoned").remove(&pid);
        self.last.lock().expect("script lock poisoned").remove(&pid);
    }
}

impl UsageReader for ScriptedUsageReader {
    fn read_usage(&self, pid: u32) -> CoreResult<ResourceUsage> {
        let mut samples = self.samples.lock().expect("script lock poisoned");
        let mut last = self.last.lock().expect("script lock poisoned");

        let value = match samples.get_mut(&pid).and_then(VecDeque::pop_front) {
            Some(value) => {
                last.insert(pid, value);
                value
            }
            None => match last.get(&pid) {
                Some(value) => *value,
                None => {
                    return Err(CoreError::resource(
                        codes::RESOURCE_READ_FAILED,
                        format!("process {pid} status unavailable"),
                    )
                    .with_context("pid", pid));
                }
            },
        };

        Ok(ResourceUsage {
            pid,
            memory_mb: value,
            sampled_at: self
                .time
                .as_ref()
                .map_or_else(SystemTime::now, |t| t.now()),
        })
    }
}
