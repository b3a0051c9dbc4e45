//! Logging setup and structured lifecycle events shared by WinRegi processes.
//!
//! Every process writes daily-rolling JSONL files named
//! `winregi.<process>.YYYY-MM-DD.jsonl` plus a compact console stream on
//! stderr. Lifecycle events go to the `winregi.obs` target with a fixed set
//! of fields so they can be filtered out of the file logs.
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EVENT_TARGET: &str = "winregi.obs";
const LOG_SUFFIX: &str = "jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// The long-running host that supervises the worker.
    Host,
    /// One-shot CLI invocations (exec, open, elevation status).
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Host => "host",
            ProcessKind::Cli => "cli",
        }
    }

    fn file_prefix(self) -> String {
        format!("winregi.{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    /// Expired log files deleted during startup.
    pub pruned_files: usize,
    pub initialized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub request_id: Option<&'a str>,
    pub provider: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replaces secrets and command output with their length and a short hash so
/// log lines can still be correlated.
pub fn redact_text(input: &str) -> String {
    match input.trim() {
        "" => String::new(),
        text => format!("[redacted len={} hash={}]", text.len(), short_hash(text)),
    }
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

macro_rules! lifecycle_event {
    ($level:ident, $process:expr, $ev:expr) => {
        tracing::event!(
            target: EVENT_TARGET,
            Level::$level,
            process = $process.as_str(),
            component = $ev.component,
            event = $ev.event,
            request_id = $ev.request_id.unwrap_or(""),
            provider = $ev.provider.unwrap_or(""),
            status = $ev.status.unwrap_or(""),
            error_code = $ev.error_code.unwrap_or(""),
            detail = $ev.detail.unwrap_or(""),
            "observability_event"
        )
    };
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => lifecycle_event!(ERROR, process, event),
        Level::WARN => lifecycle_event!(WARN, process, event),
        Level::INFO => lifecycle_event!(INFO, process, event),
        Level::DEBUG => lifecycle_event!(DEBUG, process, event),
        _ => lifecycle_event!(TRACE, process, event),
    }
}

/// Installs the global subscriber: `RUST_LOG` (default `info`), a compact
/// stderr layer and a JSON file layer. The returned guard must be held for
/// the life of the process or buffered file output is lost.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    let pruned_files = prune_expired_logs(
        logs_dir,
        process,
        retention_days,
        Utc::now().date_naive(),
    )?;

    let prefix = process.file_prefix();
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&prefix)
        .filename_suffix(LOG_SUFFIX)
        .build(logs_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);
    let file = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_ansi(false)
        .with_writer(file_writer);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();

    Ok((
        guard,
        LoggingInitInfo {
            process: process.as_str().to_string(),
            logs_dir: logs_dir.display().to_string(),
            prefix,
            retention_days,
            pruned_files,
            initialized_at: Utc::now(),
        },
    ))
}

/// Date stamp of a `<prefix>.YYYY-MM-DD.jsonl` file name, if it is one.
fn log_file_date(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let stamp = file_name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(LOG_SUFFIX)?
        .strip_suffix('.')?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

/// Deletes this process's log files dated more than `retention_days` before
/// `today`. Other processes' files and unrelated files are left alone.
fn prune_expired_logs(
    logs_dir: &Path,
    process: ProcessKind,
    retention_days: u64,
    today: NaiveDate,
) -> std::io::Result<usize> {
    let prefix = process.file_prefix();
    let cutoff = today - chrono::Duration::days(retention_days as i64);
    let mut removed = 0;

    for entry in fs::read_dir(logs_dir)?.flatten() {
        let path = entry.path();
        let expired = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| log_file_date(n, &prefix))
            .is_some_and(|date| date < cutoff);
        if expired && path.is_file() && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}
