//! Per-instance log capture
//!
//! Appends instance stdio to `{service}-{instance}.log` with size-based
//! rotation, parses each complete line (JSON or plain text), and fans the
//! parsed entries out to bounded subscriber channels. Fan-out never blocks:
//! a subscriber whose channel is full loses that entry and nobody else
//! notices. File writes and rotation are serialized under one lock, and a
//! failed rotation never fails the write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::domain_types::InstanceId;
use crate::errors::{CoreError, CoreResult, codes};
use crate::time_provider::SharedTimeProvider;

/// Default rotation threshold
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Default subscriber channel capacity
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;
/// Upper bound on `tail` results
pub const MAX_TAIL_LINES: usize = 1000;

/// Severity of a captured log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Lowercase level name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    fn from_field(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "error" | "fatal" | "panic" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "debug" | "trace" => Self::Debug,
            _ => Self::Info,
        }
    }

    fn infer(line: &str) -> Self {
        let lowered = line.to_ascii_lowercase();
        if ["error", "fatal", "panic"].iter().any(|k| lowered.contains(k)) {
            Self::Error
        } else if ["warn", "warning"].iter().any(|k| lowered.contains(k)) {
            Self::Warn
        } else if lowered.contains("info") {
            Self::Info
        } else if ["debug", "trace"].iter().any(|k| lowered.contains(k)) {
            Self::Debug
        } else {
            Self::Info
        }
    }
}

/// One parsed log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub raw_line: String,
    pub metadata: HashMap<String, String>,
}

/// Predicate deciding whether a subscriber receives an entry
pub type LogFilter = Box<dyn Fn(&LogEntry) -> bool + Send + Sync>;

/// Receiving half of a subscription
#[derive(Debug)]
pub struct LogSubscriber {
    id: String,
    receiver: mpsc::Receiver<LogEntry>,
}

impl LogSubscriber {
    /// The subscriber's id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next entry; `None` once the capture is closed or the
    /// subscription removed.
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.receiver.recv().await
    }

    /// Non-blocking read of the next buffered entry
    pub fn try_recv(&mut self) -> Option<LogEntry> {
        self.receiver.try_recv().ok()
    }
}

struct SubscriberHandle {
    sender: mpsc::Sender<LogEntry>,
    filter: Option<LogFilter>,
    dropped: u64,
}

struct CaptureState {
    file: Option<File>,
    size: u64,
    pending: String,
    subscribers: HashMap<String, SubscriberHandle>,
    closed: bool,
}

/// Capture pipeline for one service instance's output.
pub struct LogCapture {
    path: PathBuf,
    rotated_path: PathBuf,
    source: String,
    max_file_size: u64,
    time: SharedTimeProvider,
    state: Mutex<CaptureState>,
}

impl LogCapture {
    /// Opens (appending) `{dir}/{service_name}-{instance_id}.log`.
    pub fn new(
        dir: impl AsRef<Path>,
        service_name: &str,
        instance_id: InstanceId,
        time: SharedTimeProvider,
    ) -> CoreResult<Self> {
        Self::with_max_file_size(dir, service_name, instance_id, time, DEFAULT_MAX_FILE_SIZE)
    }

    /// Opens the capture with a custom rotation threshold.
    pub fn with_max_file_size(
        dir: impl AsRef<Path>,
        service_name: &str,
        instance_id: InstanceId,
        time: SharedTimeProvider,
        max_file_size: u64,
    ) -> CoreResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| open_error(dir, e))?;

        let path = dir.join(format!("{service_name}-{instance_id}.log"));
        let rotated_path = dir.join(format!("{service_name}-{instance_id}.log.1"));
        let file = open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        info!(path = %path.display(), "log capture opened");
        Ok(Self {
            path,
            rotated_path,
            source: service_name.to_string(),
            max_file_size,
            time,
            state: Mutex::new(CaptureState {
                file: Some(file),
                size,
                pending: String::new(),
                subscribers: HashMap::new(),
                closed: false,
            }),
        })
    }

    /// The active log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends raw bytes, rotating first when the write would cross the
    /// size limit. Complete lines are parsed and broadcast.
    pub fn write(&self, bytes: &[u8]) -> CoreResult<usize> {
        let mut state = self.state.lock().expect("capture lock poisoned");
        if state.closed {
            return Err(closed_error(&self.path));
        }

        if state.size + bytes.len() as u64 > self.max_file_size {
            self.rotate(&mut state);
        }

        let file = state.file.as_mut().ok_or_else(|| closed_error(&self.path))?;
        file.write_all(bytes).map_err(|e| {
            CoreError::resource(codes::RESOURCE_READ_FAILED, "log write failed")
                .with_context("path", self.path.display().to_string())
                .with_source(e)
        })?;
        state.size += bytes.len() as u64;

        let entries = self.collect_entries(&mut state, bytes);
        for entry in entries {
            broadcast(&mut state, entry);
        }
        Ok(bytes.len())
    }

    /// Appends one line (newline added).
    pub fn write_line(&self, line: &str) -> CoreResult<()> {
        let mut owned = String::with_capacity(line.len() + 1);
        owned.push_str(line);
        owned.push('\n');
        self.write(owned.as_bytes()).map(|_| ())
    }

    /// Splits buffered input into complete lines and parses them. A
    /// trailing partial line stays pending until its newline arrives.
    fn collect_entries(&self, state: &mut CaptureState, bytes: &[u8]) -> Vec<LogEntry> {
        state.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut entries = Vec::new();
        while let Some(newline) = state.pending.find('\n') {
            let line: String = state.pending.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                entries.push(parse_line(line, &self.source, self.time.now().into()));
            }
        }
        entries
    }

    /// Registers a subscriber. `buffer_size` zero selects the default.
    pub fn subscribe(
        &self,
        id: impl Into<String>,
        buffer_size: usize,
        filter: Option<LogFilter>,
    ) -> CoreResult<LogSubscriber> {
        let id = id.into();
        let mut state = self.state.lock().expect("capture lock poisoned");
        if state.closed {
            return Err(closed_error(&self.path));
        }

        let capacity = if buffer_size == 0 {
            DEFAULT_SUBSCRIBER_BUFFER
        } else {
            buffer_size
        };
        let (sender, receiver) = mpsc::channel(capacity);
        state.subscribers.insert(
            id.clone(),
            SubscriberHandle {
                sender,
                filter,
                dropped: 0,
            },
        );
        debug!(subscriber = %id, capacity, "log subscriber added");
        Ok(LogSubscriber { id, receiver })
    }

    /// Removes a subscriber, closing its channel.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut state = self.state.lock().expect("capture lock poisoned");
        state.subscribers.remove(id).is_some()
    }

    /// Reads the last `max_lines` entries (capped at 1000) from the active
    /// file.
    pub fn tail(&self, max_lines: usize) -> CoreResult<Vec<LogEntry>> {
        let max_lines = max_lines.min(MAX_TAIL_LINES);
        {
            // Flush buffered writes so the read sees them.
            let mut state = self.state.lock().expect("capture lock poisoned");
            if let Some(file) = state.file.as_mut() {
                let _ = file.flush();
            }
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            CoreError::resource(codes::RESOURCE_READ_FAILED, "log read failed")
                .with_context("path", self.path.display().to_string())
                .with_source(e)
        })?;

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(max_lines);
        let now = self.time.now().into();
        Ok(lines[start..]
            .iter()
            .map(|line| parse_line(line, &self.source, now))
            .collect())
    }

    /// Closes the capture: every subscriber channel closes and further
    /// writes fail.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("capture lock poisoned");
        if state.closed {
            return;
        }
        if let Some(mut file) = state.file.take() {
            let _ = file.flush();
        }
        // Dropping the senders closes every subscriber channel.
        state.subscribers.clear();
        state.closed = true;
        info!(path = %self.path.display(), "log capture closed");
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("capture lock poisoned").closed
    }

    /// Rotates `file -> file.1`, dropping any previous `.1`. On failure the
    /// current file keeps receiving writes; rotation is retried on the next
    /// threshold crossing.
    fn rotate(&self, state: &mut CaptureState) {
        if let Some(mut file) = state.file.take() {
            let _ = file.flush();
        }

        if self.rotated_path.exists() {
            if let Err(err) = std::fs::remove_file(&self.rotated_path) {
                warn!(error = %err, "failed to drop previous rotated log");
            }
        }
        if let Err(err) = std::fs::rename(&self.path, &self.rotated_path) {
            warn!(error = %err, path = %self.path.display(), "log rotation failed; continuing on current file");
        }

        match open_append(&self.path) {
            Ok(file) => {
                state.size = file.metadata().map(|m| m.len()).unwrap_or(0);
                state.file = Some(file);
                debug!(path = %self.path.display(), "log rotated");
            }
            Err(err) => {
                // Reopen whatever is still at the active path so writes
                // can continue.
                warn!(error = %err, "failed to open fresh log after rotation");
                state.file = open_append(&self.path).ok();
            }
        }
    }
}

fn broadcast(state: &mut CaptureState, entry: LogEntry) {
    for (id, handle) in state.subscribers.iter_mut() {
        if let Some(filter) = &handle.filter {
            if !filter(&entry) {
                continue;
            }
        }
        // Non-blocking by contract: a full channel drops the entry for
        // this subscriber only.
        if handle.sender.try_send(entry.clone()).is_err() {
            handle.dropped += 1;
            trace!(subscriber = %id, dropped = handle.dropped, "subscriber buffer full; entry dropped");
        }
    }
}

/// Parses one line: JSON objects yield structured fields, everything else
/// gets keyword level inference.
fn parse_line(line: &str, source: &str, received_at: DateTime<Utc>) -> LogEntry {
    if line.trim_start().starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(line) {
            return parse_json_line(line, map, source, received_at);
        }
    }

    LogEntry {
        timestamp: received_at,
        level: LogLevel::infer(line),
        message: line.to_string(),
        source: source.to_string(),
        raw_line: line.to_string(),
        metadata: HashMap::new(),
    }
}

fn parse_json_line(
    line: &str,
    map: serde_json::Map<String, serde_json::Value>,
    source: &str,
    received_at: DateTime<Utc>,
) -> LogEntry {
    let mut timestamp = received_at;
    let mut level = LogLevel::Info;
    let mut message = String::new();
    let mut metadata = HashMap::new();

    for (key, value) in map {
        match key.as_str() {
            "time" | "timestamp" => {
                if let Some(raw) = value.as_str() {
                    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                        timestamp = parsed.with_timezone(&Utc);
                    } else {
                        metadata.insert(key, raw.to_string());
                    }
                }
            }
            "level" => {
                if let Some(raw) = value.as_str() {
                    level = LogLevel::from_field(raw);
                }
            }
            "msg" | "message" => {
                if let Some(raw) = value.as_str() {
                    message = raw.to_string();
                }
            }
            _ => {
                if let Some(raw) = value.as_str() {
                    metadata.insert(key, raw.to_string());
                }
            }
        }
    }

    if message.is_empty() {
        message = line.to_string();
    }

    LogEntry {
        timestamp,
        level,
        message,
        source: source.to_string(),
        raw_line: line.to_string(),
        metadata,
    }
}

fn open_append(path: &Path) -> CoreResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| open_error(path, e))
}

fn open_error(path: &Path, err: std::io::Error) -> CoreError {
    CoreError::resource(codes::RESOURCE_READ_FAILED, "failed to open log file")
        .with_context("path", path.display().to_string())
        .with_source(err)
}

fn closed_error(path: &Path) -> CoreError {
    CoreError::resource(codes::RESOURCE_CLOSED, "log capture closed")
        .with_context("path", path.display().to_string())
}
