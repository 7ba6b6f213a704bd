// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page and access log writers.
//
// Diagnostics go through `tracing`; the page log and access log are stable,
// line-oriented files with their own format contract, so they get dedicated
// appenders. Configuration lives behind a readers-writer lock and callers
// take an `Arc` snapshot of the writer, so no lock is held during file I/O.
// Appenders rotate on size, keeping a single `.O` backup.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::Job;

/// Rotation threshold when none is configured (1 MiB, the historical
/// `MaxLogSize` default).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 1 << 20;

/// Default page log format when `PageLogFormat` is unset.
pub const DEFAULT_PAGE_LOG_FORMAT: &str = "%p %u %j %T %P %C %{job-billing} \
%{job-originating-host-name} %{job-name} %{media} %{sides}";

/// A size-rotating line appender. Writes are serialized by an internal
/// mutex; rotation renames the live file to `<name>.O` and starts fresh.
pub struct LogWriter {
    path: PathBuf,
    max_size: u64,
    file: Mutex<Option<File>>,
}

impl LogWriter {
    pub fn new(path: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            path: path.into(),
            max_size: max_size.max(1),
            file: Mutex::new(None),
        }
    }

    /// Append one line, rotating first if the file has grown past the
    /// limit. Failures are logged and swallowed: losing a log line must
    /// never fail a job.
    pub fn append(&self, line: &str) {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return,
        };

        if let Err(e) = self.append_locked(&mut guard, line) {
            warn!(path = %self.path.display(), error = %e, "log append failed");
            *guard = None;
        }
    }

    fn append_locked(&self, slot: &mut Option<File>, line: &str) -> std::io::Result<()> {
        if self.needs_rotation() {
            *slot = None;
            let backup = self.backup_path();
            let _ = std::fs::remove_file(&backup);
            let _ = std::fs::rename(&self.path, &backup);
        }

        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *slot = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }

        let file = slot.as_mut().expect("appender just opened");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")
    }

    fn needs_rotation(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.len() >= self.max_size)
            .unwrap_or(false)
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".O");
        PathBuf::from(name)
    }
}

/// Logging configuration snapshot.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub page_log: PathBuf,
    pub access_log: PathBuf,
    pub page_log_format: String,
    pub max_size: u64,
}

impl LogConfig {
    pub fn new(log_dir: &Path, page_log_format: &str) -> Self {
        Self {
            page_log: log_dir.join("page_log"),
            access_log: log_dir.join("access_log"),
            page_log_format: if page_log_format.is_empty() {
                DEFAULT_PAGE_LOG_FORMAT.to_owned()
            } else {
                page_log_format.to_owned()
            },
            max_size: DEFAULT_MAX_LOG_SIZE,
        }
    }
}

/// Owns the page/access appenders. Reconfiguration is writer-exclusive;
/// emitting a line takes the read lock only long enough to clone an `Arc`.
pub struct LogManager {
    inner: RwLock<ManagerState>,
}

struct ManagerState {
    config: LogConfig,
    page: Arc<LogWriter>,
    access: Arc<LogWriter>,
}

impl LogManager {
    pub fn new(config: LogConfig) -> Self {
        let page = Arc::new(LogWriter::new(&config.page_log, config.max_size));
        let access = Arc::new(LogWriter::new(&config.access_log, config.max_size));
        Self {
            inner: RwLock::new(ManagerState {
                config,
                page,
                access,
            }),
        }
    }

    /// Replace the configuration and reopen the appenders.
    pub fn reconfigure(&self, config: LogConfig) {
        if let Ok(mut state) = self.inner.write() {
            state.page = Arc::new(LogWriter::new(&config.page_log, config.max_size));
            state.access = Arc::new(LogWriter::new(&config.access_log, config.max_size));
            state.config = config;
        }
    }

    /// Emit one page-log line for a delivery attempt.
    pub fn log_page(&self, printer_name: &str, job: &Job, page: i64, copies: i64) {
        let (writer, format) = match self.inner.read() {
            Ok(state) => (state.page.clone(), state.config.page_log_format.clone()),
            Err(_) => return,
        };
        let line = format_page_line(&format, printer_name, job, page, copies, Utc::now());
        writer.append(&line);
    }

    /// Emit one raw access-log line.
    pub fn log_access(&self, line: &str) {
        let writer = match self.inner.read() {
            Ok(state) => state.access.clone(),
            Err(_) => return,
        };
        writer.append(line);
    }
}

/// Expand a `PageLogFormat` template.
///
/// `%p` printer, `%u` user, `%j` job id, `%T` timestamp, `%P` page number,
/// `%C` copies, `%%` literal percent, `%{name}` job attribute lookup.
pub fn format_page_line(
    format: &str,
    printer_name: &str,
    job: &Job,
    page: i64,
    copies: i64,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::with_capacity(format.len() + 32);
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('p') => out.push_str(printer_name),
            Some('u') => out.push_str(&job.user_name),
            Some('j') => out.push_str(&job.id.to_string()),
            Some('T') => out.push_str(&now.format("[%d/%b/%Y:%H:%M:%S %z]").to_string()),
            Some('P') => out.push_str(&page.to_string()),
            Some('C') => out.push_str(&copies.to_string()),
            Some('%') => out.push('%'),
            Some('{') => {
                let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
                out.push_str(&lookup_attribute(job, &name));
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn lookup_attribute(job: &Job, name: &str) -> String {
    match name {
        "job-name" => job.name.clone(),
        "job-originating-host-name" => job.origin_host.clone(),
        "job-originating-user-name" => job.user_name.clone(),
        "job-impressions" => job.impressions.to_string(),
        _ => job.options.get(name).unwrap_or("-").to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::JobOptions;
    use crate::types::JobState;

    fn test_job() -> Job {
        let mut options = JobOptions::new();
        options.set("media", "A4");
        Job {
            id: 42,
            printer_id: 1,
            name: "quarterly.pdf".into(),
            user_name: "ada".into(),
            origin_host: "localhost".into(),
            options,
            state: JobState::Processing,
            state_reason: String::new(),
            impressions: 3,
            submitted_at: Utc::now(),
            processing_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn format_expands_escapes() {
        let job = test_job();
        let line = format_page_line("%p %u %j %P %C %{media} %{job-billing}", "laser", &job, 2, 1, Utc::now());
        assert_eq!(line, "laser ada 42 2 1 A4 -");
    }

    #[test]
    fn format_passes_literals_through() {
        let job = test_job();
        let line = format_page_line("100%% done: %q", "p", &job, 1, 1, Utc::now());
        assert_eq!(line, "100% done: %q");
    }

    #[test]
    fn writer_rotates_with_single_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page_log");
        let writer = LogWriter::new(&path, 32);

        for _ in 0..8 {
            writer.append("a line that is long enough to rotate");
        }

        assert!(path.exists());
        assert!(dir.path().join("page_log.O").exists());
        // Only one backup, no page_log.O.O.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn manager_snapshot_survives_reconfigure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LogManager::new(LogConfig::new(dir.path(), ""));
        manager.log_page("laser", &test_job(), 1, 1);

        let other = tempfile::tempdir().expect("tempdir");
        manager.reconfigure(LogConfig::new(other.path(), "%j"));
        manager.log_page("laser", &test_job(), 1, 1);

        assert!(dir.path().join("page_log").exists());
        let body = std::fs::read_to_string(other.path().join("page_log")).expect("read");
        assert_eq!(body.trim(), "42");
    }
}
