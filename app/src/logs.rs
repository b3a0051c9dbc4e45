// Worker output capture and host log file listing.
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "STDOUT",
            OutputStream::Stderr => "STDERR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerLine {
    pub seq: u64,
    pub stream: OutputStream,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

impl std::fmt::Display for WorkerLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.stream.as_str(), self.text)
    }
}

#[derive(Debug, Default)]
struct Ring {
    next_seq: u64,
    dropped: u64,
    lines: VecDeque<WorkerLine>,
}

/// The most recent `capacity` lines the worker wrote. Older lines are
/// discarded and counted.
#[derive(Debug)]
pub struct WorkerOutputBuffer {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl WorkerOutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring::default()),
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.ring.lock().unwrap().dropped
    }

    pub fn push(&self, stream: OutputStream, text: String) -> u64 {
        let mut ring = self.ring.lock().unwrap();
        ring.next_seq += 1;
        let seq = ring.next_seq;
        if ring.lines.len() == self.capacity {
            ring.lines.pop_front();
            ring.dropped += 1;
        }
        ring.lines.push_back(WorkerLine {
            seq,
            stream,
            text,
            captured_at: Utc::now(),
        });
        seq
    }

    pub fn snapshot(&self, last_n: usize) -> Vec<WorkerLine> {
        let ring = self.ring.lock().unwrap();
        let skip = ring.lines.len().saturating_sub(last_n);
        ring.lines.iter().skip(skip).cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    pub size: u64,
    pub modified_ms: u64,
}

/// Host log files, newest first.
pub fn list_log_files(logs_dir: &Path) -> Result<Vec<LogFileInfo>> {
    let mut out = Vec::new();
    if !logs_dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(logs_dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with("winregi.") {
            continue;
        }

        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        out.push(LogFileInfo {
            name: file_name.to_string(),
            size: meta.len(),
            modified_ms,
        });
    }

    out.sort_by_key(|f| std::cmp::Reverse(f.modified_ms));
    Ok(out)
}
