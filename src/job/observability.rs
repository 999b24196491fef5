use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::error::PatternError;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobSeverity {
    /// Informational event.
    Info,
    /// The job finished but the data had problems (import warnings).
    Warning,
    /// The job failed (bad pattern, rejected rows, unreadable file).
    Error,
    /// Infrastructure failure (I/O, persistence layer).
    Critical,
}

/// What a job was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Export,
    Template,
    Import,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Export => f.write_str("export"),
            Self::Template => f.write_str("template"),
            Self::Import => f.write_str("import"),
        }
    }
}

/// Context about a job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub pattern_id: String,
    pub kind: JobKind,
    /// Format id of the file produced or read.
    pub format: String,
}

/// Minimal stats reported on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStats {
    /// Rows written (export) or records loaded (import).
    pub rows: usize,
}

/// Observer interface for job outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait JobObserver: Send + Sync {
    /// Called when a job succeeds.
    fn on_success(&self, _ctx: &JobContext, _stats: JobStats) {}

    /// Called when a job fails, including imports rejected by their diagnostics.
    fn on_failure(&self, _ctx: &JobContext, _severity: JobSeverity, _error: &PatternError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn JobObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn JobObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl JobObserver for CompositeObserver {
    fn on_success(&self, ctx: &JobContext, stats: JobStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits job events as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl JobObserver for TracingObserver {
    fn on_success(&self, ctx: &JobContext, stats: JobStats) {
        info!(
            kind = %ctx.kind,
            pattern = ctx.pattern_id.as_str(),
            format = ctx.format.as_str(),
            rows = stats.rows,
            "pattern job finished"
        );
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        warn!(
            kind = %ctx.kind,
            pattern = ctx.pattern_id.as_str(),
            format = ctx.format.as_str(),
            ?severity,
            %error,
            "pattern job failed"
        );
    }

    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        error!(
            kind = %ctx.kind,
            pattern = ctx.pattern_id.as_str(),
            format = ctx.format.as_str(),
            ?severity,
            %error,
            "pattern job alert"
        );
    }
}

/// Appends job events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            // Multi-line import reports stay on one log line.
            let _ = writeln!(f, "{}", line.replace('\n', " | "));
        }
    }
}

impl JobObserver for FileObserver {
    fn on_success(&self, ctx: &JobContext, stats: JobStats) {
        self.append_line(&format!(
            "{} ok kind={} pattern={} format={} rows={}",
            unix_ts(),
            ctx.kind,
            ctx.pattern_id,
            ctx.format,
            stats.rows
        ));
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        self.append_line(&format!(
            "{} fail severity={:?} kind={} pattern={} format={} err={}",
            unix_ts(),
            severity,
            ctx.kind,
            ctx.pattern_id,
            ctx.format,
            error
        ));
    }

    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, error: &PatternError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} kind={} pattern={} format={} err={}",
            unix_ts(),
            severity,
            ctx.kind,
            ctx.pattern_id,
            ctx.format,
            error
        ));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
