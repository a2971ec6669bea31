//! Audit event pipeline.
//!
//! Sandbox decisions and render lifecycle milestones are reported as
//! [`AuditEvent`]s through an [`AuditManager`] to a pluggable
//! [`AuditSink`].  The crate ships a file sink (newline-delimited JSON with
//! size based rotation), a console sink and a bounded in-memory sink; the
//! [`MultiSink`] fans one event out to several sinks and aggregates their
//! errors.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{Error, ErrorKind};
use crate::sandbox::Violation;

/// The level of an audit event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Logging disabled.
    Off,
    /// Development noise.
    Debug,
    /// Normal lifecycle events.
    Info,
    /// Violations and anomalies.
    Warning,
    /// Failures.
    Error,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditLevel::Off => "off",
            AuditLevel::Debug => "debug",
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
        })
    }
}

/// The type of an audit event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A sandbox policy was violated.
    SecurityViolation,
    /// A template was loaded or denied.
    TemplateAccess,
    /// A filter was dispatched or denied.
    FilterAccess,
    /// A function was called or denied.
    FunctionAccess,
    /// A test was dispatched or denied.
    TestAccess,
    /// An attribute was looked up or denied.
    AttributeAccess,
    /// A method was called or denied.
    MethodAccess,
    /// A render started.
    ExecutionStart,
    /// A render finished.
    ExecutionEnd,
    /// A render hit its execution deadline.
    ExecutionTimeout,
    /// A render exhausted its memory budget.
    MemoryLimitExceeded,
    /// A render exhausted its output budget.
    OutputLimitExceeded,
    /// A render nested too deep.
    RecursionLimitExceeded,
    /// Input content was validated or rejected.
    InputValidation,
    /// A generic policy violation.
    PolicyViolation,
    /// Anything else worth recording.
    SystemEvent,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Monotonic event id, assigned by the manager.
    pub id: u64,
    /// When the event was created.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The level of the event.
    pub level: AuditLevel,
    /// The type of the event.
    #[serde(rename = "type")]
    pub kind: AuditEventKind,
    /// Human readable message.
    pub message: String,
    /// The template the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    /// Free-form context description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// The resource the event concerns (filter name, attribute path, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// The user on whose behalf the render ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The session the render belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The active policy name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    /// The violation that triggered the event, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    /// Arbitrary extra fields.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Elapsed time in milliseconds, for lifecycle events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// The failure message for unsuccessful operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEvent {
    /// Creates a new event.  The id is assigned when the event is recorded.
    pub fn new(level: AuditLevel, kind: AuditEventKind, message: impl Into<String>) -> AuditEvent {
        AuditEvent {
            id: 0,
            timestamp: OffsetDateTime::now_utc(),
            level,
            kind,
            message: message.into(),
            template_name: None,
            context: None,
            resource: None,
            user_id: None,
            session_id: None,
            policy_name: None,
            violation: None,
            metadata: BTreeMap::new(),
            duration_ms: None,
            success: true,
            error_message: None,
        }
    }

    /// Sets the template name.
    pub fn with_template(mut self, name: &str) -> Self {
        self.template_name = Some(name.to_string());
        self
    }

    /// Sets the context description.
    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    /// Sets the resource.
    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    /// Sets the policy name.
    pub fn with_policy(mut self, name: &str) -> Self {
        self.policy_name = Some(name.to_string());
        self
    }

    /// Attaches a violation.
    pub fn with_violation(mut self, violation: Violation) -> Self {
        self.violation = Some(violation);
        self
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Sets the success flag.
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Sets the error message and marks the event unsuccessful.
    pub fn with_error(mut self, message: &str) -> Self {
        self.success = false;
        self.error_message = Some(message.to_string());
        self
    }
}

/// A destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Writes one event.
    fn log(&self, event: &AuditEvent) -> Result<(), Error>;

    /// Flushes and releases resources held by the sink.
    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Appends events as newline-delimited JSON with size based rotation.
///
/// When the file would grow past `max_size` it is rotated to `<path>.1`,
/// shifting existing backups up to `backups`; the oldest backup is deleted.
pub struct FileSink {
    path: PathBuf,
    max_size: u64,
    backups: usize,
    state: Mutex<FileSinkState>,
}

struct FileSinkState {
    file: Option<File>,
    written: u64,
}

impl FileSink {
    /// Opens (or creates) the audit log file in append mode.
    pub fn new(path: impl AsRef<Path>, max_size: u64, backups: usize) -> Result<FileSink, Error> {
        let path = path.as_ref().to_path_buf();
        let file = ok!(open_append(&path));
        let written = ok!(file
            .metadata()
            .map_err(|err| io_error("could not stat audit log", err)))
        .len();
        Ok(FileSink {
            path,
            max_size,
            backups,
            state: Mutex::new(FileSinkState {
                file: Some(file),
                written,
            }),
        })
    }

    fn rotate(&self, state: &mut FileSinkState) -> Result<(), Error> {
        state.file = None;
        let oldest = self.backup_path(self.backups);
        if oldest.exists() {
            ok!(std::fs::remove_file(&oldest)
                .map_err(|err| io_error("could not delete audit backup", err)));
        }
        for idx in (1..self.backups).rev() {
            let from = self.backup_path(idx);
            if from.exists() {
                ok!(std::fs::rename(&from, self.backup_path(idx + 1))
                    .map_err(|err| io_error("could not rotate audit backup", err)));
            }
        }
        if self.backups > 0 {
            ok!(std::fs::rename(&self.path, self.backup_path(1))
                .map_err(|err| io_error("could not rotate audit log", err)));
        } else {
            ok!(std::fs::remove_file(&self.path)
                .map_err(|err| io_error("could not truncate audit log", err)));
        }
        state.file = Some(ok!(open_append(&self.path)));
        state.written = 0;
        Ok(())
    }

    fn backup_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{idx}"));
        PathBuf::from(name)
    }
}

fn open_append(path: &Path) -> Result<File, Error> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| io_error("could not open audit log", err))
}

fn io_error(msg: &'static str, err: std::io::Error) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg).with_source(err)
}

impl AuditSink for FileSink {
    fn log(&self, event: &AuditEvent) -> Result<(), Error> {
        let mut line = ok!(serde_json::to_string(event).map_err(|err| {
            Error::new(ErrorKind::BadSerialization, "could not serialize audit event")
                .with_source(err)
        }));
        line.push('\n');

        let mut state = self.state.lock().unwrap();
        if state.written + line.len() as u64 > self.max_size && state.written > 0 {
            ok!(self.rotate(&mut state));
        }
        let file = match state.file {
            Some(ref mut file) => file,
            None => {
                state.file = Some(ok!(open_append(&self.path)));
                state.file.as_mut().unwrap()
            }
        };
        ok!(file
            .write_all(line.as_bytes())
            .map_err(|err| io_error("could not write audit event", err)));
        state.written += line.len() as u64;
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(file) = state.file.take() {
            ok!(file
                .sync_all()
                .map_err(|err| io_error("could not flush audit log", err)));
        }
        Ok(())
    }
}

/// Writes level-filtered plain text lines to stderr.
pub struct ConsoleSink {
    min_level: AuditLevel,
}

impl ConsoleSink {
    /// Creates a console sink that drops events below `min_level`.
    pub fn new(min_level: AuditLevel) -> ConsoleSink {
        ConsoleSink { min_level }
    }
}

impl AuditSink for ConsoleSink {
    fn log(&self, event: &AuditEvent) -> Result<(), Error> {
        if event.level < self.min_level {
            return Ok(());
        }
        eprintln!(
            "[{}] {} {:?}: {}",
            event.level,
            event
                .template_name
                .as_deref()
                .unwrap_or("<unknown template>"),
            event.kind,
            event.message
        );
        Ok(())
    }
}

/// Keeps the last `capacity` events in memory.
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemorySink {
    /// Creates a bounded ring of audit events.
    pub fn new(capacity: usize) -> MemorySink {
        MemorySink {
            capacity,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of the retained events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// True when no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn log(&self, event: &AuditEvent) -> Result<(), Error> {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// Fans one event out to several sinks.
///
/// Every sink is attempted even when earlier ones fail; the errors are
/// aggregated into a single error chained onto the last failure.
pub struct MultiSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl MultiSink {
    /// Creates a fan-out sink.
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> MultiSink {
        MultiSink { sinks }
    }
}

impl AuditSink for MultiSink {
    fn log(&self, event: &AuditEvent) -> Result<(), Error> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.log(event) {
                failures.push(err.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("{} audit sink(s) failed: {}", failures.len(), failures.join("; ")),
            ))
        }
    }

    fn close(&self) -> Result<(), Error> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.close() {
                failures.push(err.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("{} audit sink(s) failed to close: {}", failures.len(), failures.join("; ")),
            ))
        }
    }
}

/// Owns the active sink and assigns event ids.
pub struct AuditManager {
    sink: Mutex<Arc<dyn AuditSink>>,
    min_level: Mutex<AuditLevel>,
    enabled: AtomicBool,
    next_id: AtomicU64,
}

impl AuditManager {
    /// Creates a manager over a sink.
    pub fn new(sink: Arc<dyn AuditSink>) -> AuditManager {
        AuditManager {
            sink: Mutex::new(sink),
            min_level: Mutex::new(AuditLevel::Info),
            enabled: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replaces the active sink.
    pub fn set_sink(&self, sink: Arc<dyn AuditSink>) {
        *self.sink.lock().unwrap() = sink;
    }

    /// Sets the minimum level below which events are dropped.
    pub fn set_min_level(&self, level: AuditLevel) {
        *self.min_level.lock().unwrap() = level;
    }

    /// Enables or disables the pipeline.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Assigns an id to the event and forwards it to the sink.
    ///
    /// Sink failures are swallowed here; audit logging must never abort a
    /// render.
    pub fn record(&self, mut event: AuditEvent) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if event.level < *self.min_level.lock().unwrap() || event.level == AuditLevel::Off {
            return;
        }
        event.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sink = self.sink.lock().unwrap().clone();
        let _ = sink.log(&event);
    }

    /// Closes the active sink.
    pub fn close(&self) -> Result<(), Error> {
        self.sink.lock().unwrap().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_memory_sink_ring() {
        let sink = MemorySink::new(2);
        for idx in 0..3 {
            sink.log(&AuditEvent::new(
                AuditLevel::Info,
                AuditEventKind::SystemEvent,
                format!("event {idx}"),
            ))
            .unwrap();
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "event 1");
        assert_eq!(events[1].message, "event 2");
    }

    #[test]
    fn test_manager_filters_levels() {
        let sink = Arc::new(MemorySink::new(16));
        let manager = AuditManager::new(sink.clone());
        manager.set_min_level(AuditLevel::Warning);
        manager.record(AuditEvent::new(
            AuditLevel::Info,
            AuditEventKind::SystemEvent,
            "dropped",
        ));
        manager.record(AuditEvent::new(
            AuditLevel::Error,
            AuditEventKind::SystemEvent,
            "kept",
        ));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "kept");
        assert_eq!(events[0].id, 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            AuditLevel::Warning,
            AuditEventKind::SecurityViolation,
            "filter denied",
        )
        .with_template("page.html")
        .with_resource("dangerous");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"security_violation\""));
        assert!(json.contains("\"template_name\":\"page.html\""));
        assert!(json.contains("\"level\":\"warning\""));
    }
}
