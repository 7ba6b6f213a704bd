// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite persistence for printers, jobs, documents, settings, and job
// events.
//
// `rusqlite` is synchronous, so the connection lives behind a mutex and
// callers in async contexts wrap store access in
// `tokio::task::spawn_blocking`. Writers are serialized by the mutex plus
// an IMMEDIATE transaction; read-only transactions use DEFERRED behavior.
// The one concurrency-critical operation is `claim_pending_job`: a single
// conditional UPDATE that moves a job from pending to processing exactly
// once no matter how many schedulers race for it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::options::JobOptions;
use druckwerk_core::types::{Document, Job, JobState, Printer, PrinterState};

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS printers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        uri TEXT NOT NULL,
        ppd_name TEXT,
        info TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        state INTEGER NOT NULL DEFAULT 3,
        accepting INTEGER NOT NULL DEFAULT 1,
        shared INTEGER NOT NULL DEFAULT 0,
        is_temporary INTEGER NOT NULL DEFAULT 0,
        is_default INTEGER NOT NULL DEFAULT 0,
        job_sheets_default TEXT NOT NULL DEFAULT 'none,none',
        default_options TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        printer_id INTEGER NOT NULL REFERENCES printers(id),
        name TEXT NOT NULL DEFAULT '',
        user_name TEXT NOT NULL DEFAULT '',
        origin_host TEXT NOT NULL DEFAULT '',
        options TEXT NOT NULL DEFAULT '{}',
        state INTEGER NOT NULL DEFAULT 3,
        state_reason TEXT NOT NULL DEFAULT '',
        impressions INTEGER NOT NULL DEFAULT 0,
        submitted_at TEXT NOT NULL,
        processing_at TEXT,
        completed_at TEXT
    );
    CREATE INDEX IF NOT EXISTS jobs_state_idx ON jobs(state);

    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES jobs(id),
        file_name TEXT NOT NULL,
        mime_type TEXT NOT NULL DEFAULT '',
        size_bytes INTEGER NOT NULL DEFAULT 0,
        sha256 TEXT NOT NULL DEFAULT '',
        path TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS documents_job_idx ON documents(job_id);

    CREATE TABLE IF NOT EXISTS settings (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS job_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    );
"#;

/// Fields for creating a printer row.
#[derive(Debug, Clone, Default)]
pub struct NewPrinter {
    pub name: String,
    pub uri: String,
    pub ppd_name: Option<String>,
    pub info: String,
    pub location: String,
    pub shared: bool,
    pub is_temporary: bool,
    pub is_default: bool,
    pub job_sheets_default: String,
    pub default_options: JobOptions,
}

/// Fields for creating a job row.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub printer_id: i64,
    pub name: String,
    pub user_name: String,
    pub origin_host: String,
    pub options: JobOptions,
}

/// The persistence layer.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path, applying WAL mode
    /// and the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| DruckwerkError::Database(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| DruckwerkError::Database(format!("WAL pragma: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| DruckwerkError::Database(format!("schema: {e}")))?;
        info!(path = %path.as_ref().display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DruckwerkError::Database(format!("open in-memory: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| DruckwerkError::Database(format!("schema: {e}")))?;
        debug!("in-memory store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a transaction. Write transactions take the connection
    /// lock for their whole extent, serializing concurrent writers;
    /// read-only transactions use DEFERRED behavior.
    pub fn with_tx<T>(
        &self,
        read_only: bool,
        f: impl FnOnce(&StoreView<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| DruckwerkError::Database("connection lock poisoned".into()))?;
        let behavior = if read_only {
            TransactionBehavior::Deferred
        } else {
            TransactionBehavior::Immediate
        };
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(|e| DruckwerkError::Database(format!("begin: {e}")))?;
        let view = StoreView { conn: &tx };
        let out = f(&view)?;
        tx.commit()
            .map_err(|e| DruckwerkError::Database(format!("commit: {e}")))?;
        Ok(out)
    }

    // -- single-operation conveniences -------------------------------------

    pub fn create_printer(&self, new: &NewPrinter) -> Result<i64> {
        self.with_tx(false, |v| v.create_printer(new))
    }

    pub fn get_printer_by_id(&self, id: i64) -> Result<Option<Printer>> {
        self.with_tx(true, |v| v.get_printer_by_id(id))
    }

    pub fn list_temporary_printers(&self) -> Result<Vec<Printer>> {
        self.with_tx(true, |v| v.list_temporary_printers())
    }

    pub fn update_printer_state(&self, id: i64, state: PrinterState) -> Result<()> {
        self.with_tx(false, |v| v.update_printer_state(id, state))
    }

    pub fn delete_printer(&self, id: i64) -> Result<()> {
        self.with_tx(false, |v| v.delete_printer(id))
    }

    pub fn create_job(&self, new: &NewJob) -> Result<i64> {
        self.with_tx(false, |v| v.create_job(new))
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        self.with_tx(true, |v| v.get_job(id))
    }

    pub fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.with_tx(true, |v| v.list_jobs_in_state(JobState::Pending, limit))
    }

    pub fn list_held_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.with_tx(true, |v| v.list_jobs_in_state(JobState::Held, limit))
    }

    pub fn list_terminal_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.with_tx(true, |v| v.list_terminal_jobs(limit))
    }

    pub fn claim_pending_job(&self, id: i64) -> Result<bool> {
        self.with_tx(false, |v| v.claim_pending_job(id))
    }

    pub fn update_job_state(
        &self,
        id: i64,
        state: JobState,
        reason: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_tx(false, |v| v.update_job_state(id, state, reason, completed_at))
    }

    pub fn update_job_options(&self, id: i64, options: &JobOptions) -> Result<()> {
        self.with_tx(false, |v| v.update_job_options(id, options))
    }

    pub fn add_document(&self, doc: &Document) -> Result<i64> {
        self.with_tx(false, |v| v.add_document(doc))
    }

    pub fn list_documents_by_job(&self, job_id: i64) -> Result<Vec<Document>> {
        self.with_tx(true, |v| v.list_documents_by_job(job_id))
    }

    pub fn delete_documents_by_job(&self, job_id: i64) -> Result<()> {
        self.with_tx(false, |v| v.delete_documents_by_job(job_id))
    }

    pub fn list_job_ids_by_printer(&self, printer_id: i64) -> Result<Vec<i64>> {
        self.with_tx(true, |v| v.list_job_ids_by_printer(printer_id))
    }

    pub fn delete_job(&self, job_id: i64) -> Result<()> {
        self.with_tx(false, |v| v.delete_job(job_id))
    }

    pub fn list_settings(&self) -> Result<HashMap<String, String>> {
        self.with_tx(true, |v| v.list_settings())
    }

    pub fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        self.with_tx(false, |v| v.set_setting(name, value))
    }

    pub fn add_job_event(&self, job_id: i64, kind: &str, details: serde_json::Value) -> Result<()> {
        self.with_tx(false, |v| v.add_job_event(job_id, kind, details))
    }
}

/// Operations available inside a transaction.
pub struct StoreView<'a> {
    conn: &'a Connection,
}

impl StoreView<'_> {
    // -- printers ----------------------------------------------------------

    pub fn create_printer(&self, new: &NewPrinter) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let options = new.default_options.to_json()?;
        self.conn
            .execute(
                "INSERT INTO printers (name, uri, ppd_name, info, location, shared,
                 is_temporary, is_default, job_sheets_default, default_options,
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    new.name,
                    new.uri,
                    new.ppd_name,
                    new.info,
                    new.location,
                    new.shared,
                    new.is_temporary,
                    new.is_default,
                    if new.job_sheets_default.is_empty() {
                        "none,none"
                    } else {
                        &new.job_sheets_default
                    },
                    options,
                    now,
                ],
            )
            .map_err(|e| DruckwerkError::Database(format!("insert printer: {e}")))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_printer_by_id(&self, id: i64) -> Result<Option<Printer>> {
        self.conn
            .query_row(
                &format!("SELECT {PRINTER_COLUMNS} FROM printers WHERE id = ?1"),
                params![id],
                row_to_printer,
            )
            .optional()
            .map_err(|e| DruckwerkError::Database(format!("get printer: {e}")))
    }

    pub fn list_temporary_printers(&self) -> Result<Vec<Printer>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PRINTER_COLUMNS} FROM printers WHERE is_temporary = 1"
            ))
            .map_err(|e| DruckwerkError::Database(format!("prepare temp printers: {e}")))?;
        let printers = stmt
            .query_map([], row_to_printer)
            .map_err(|e| DruckwerkError::Database(format!("query temp printers: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DruckwerkError::Database(format!("collect temp printers: {e}")))?;
        Ok(printers)
    }

    pub fn update_printer_state(&self, id: i64, state: PrinterState) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE printers SET state = ?1, updated_at = ?2 WHERE id = ?3",
                params![state as i64, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| DruckwerkError::Database(format!("update printer state: {e}")))?;
        if rows == 0 {
            return Err(DruckwerkError::Database(format!("printer {id} not found")));
        }
        Ok(())
    }

    pub fn delete_printer(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM printers WHERE id = ?1", params![id])
            .map_err(|e| DruckwerkError::Database(format!("delete printer: {e}")))?;
        Ok(())
    }

    // -- jobs --------------------------------------------------------------

    pub fn create_job(&self, new: &NewJob) -> Result<i64> {
        let options = new.options.to_json()?;
        self.conn
            .execute(
                "INSERT INTO jobs (printer_id, name, user_name, origin_host, options,
                 state, state_reason, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 3, 'job-queued', ?6)",
                params![
                    new.printer_id,
                    new.name,
                    new.user_name,
                    new.origin_host,
                    options,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| DruckwerkError::Database(format!("insert job: {e}")))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        self.conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()
            .map_err(|e| DruckwerkError::Database(format!("get job: {e}")))
    }

    pub fn list_jobs_in_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1
                 ORDER BY submitted_at ASC, id ASC LIMIT ?2"
            ))
            .map_err(|e| DruckwerkError::Database(format!("prepare list jobs: {e}")))?;
        let jobs = stmt
            .query_map(params![state as i64, limit as i64], row_to_job)
            .map_err(|e| DruckwerkError::Database(format!("query list jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DruckwerkError::Database(format!("collect jobs: {e}")))?;
        Ok(jobs)
    }

    pub fn list_terminal_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE state IN (7, 8, 9)
                 ORDER BY completed_at ASC, id ASC LIMIT ?1"
            ))
            .map_err(|e| DruckwerkError::Database(format!("prepare terminal jobs: {e}")))?;
        let jobs = stmt
            .query_map(params![limit as i64], row_to_job)
            .map_err(|e| DruckwerkError::Database(format!("query terminal jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DruckwerkError::Database(format!("collect terminal jobs: {e}")))?;
        Ok(jobs)
    }

    /// Atomically move a pending job to processing. Returns `false` when
    /// the job was already claimed (or is no longer pending).
    pub fn claim_pending_job(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = 5, state_reason = 'job-printing',
                 processing_at = ?2 WHERE id = ?1 AND state = 3",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| DruckwerkError::Database(format!("claim job: {e}")))?;
        Ok(rows == 1)
    }

    pub fn update_job_state(
        &self,
        id: i64,
        state: JobState,
        reason: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, state_reason = ?2, completed_at = ?3
                 WHERE id = ?4",
                params![
                    state as i64,
                    reason,
                    completed_at.map(|t| t.to_rfc3339()),
                    id
                ],
            )
            .map_err(|e| DruckwerkError::Database(format!("update job state: {e}")))?;
        if rows == 0 {
            return Err(DruckwerkError::Database(format!("job {id} not found")));
        }
        debug!(job_id = id, state = ?state, reason, "job state updated");
        Ok(())
    }

    pub fn update_job_options(&self, id: i64, options: &JobOptions) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET options = ?1 WHERE id = ?2",
                params![options.to_json()?, id],
            )
            .map_err(|e| DruckwerkError::Database(format!("update job options: {e}")))?;
        if rows == 0 {
            return Err(DruckwerkError::Database(format!("job {id} not found")));
        }
        Ok(())
    }

    pub fn update_job_impressions(&self, id: i64, impressions: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET impressions = ?1 WHERE id = ?2",
                params![impressions, id],
            )
            .map_err(|e| DruckwerkError::Database(format!("update impressions: {e}")))?;
        Ok(())
    }

    // -- documents ---------------------------------------------------------

    pub fn add_document(&self, doc: &Document) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO documents (job_id, file_name, mime_type, size_bytes, sha256, path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    doc.job_id,
                    doc.file_name,
                    doc.mime_type,
                    doc.size_bytes,
                    doc.sha256,
                    doc.path
                ],
            )
            .map_err(|e| DruckwerkError::Database(format!("insert document: {e}")))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_documents_by_job(&self, job_id: i64) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, job_id, file_name, mime_type, size_bytes, sha256, path
                 FROM documents WHERE job_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| DruckwerkError::Database(format!("prepare documents: {e}")))?;
        let docs = stmt
            .query_map(params![job_id], row_to_document)
            .map_err(|e| DruckwerkError::Database(format!("query documents: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DruckwerkError::Database(format!("collect documents: {e}")))?;
        Ok(docs)
    }

    pub fn delete_documents_by_job(&self, job_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM documents WHERE job_id = ?1", params![job_id])
            .map_err(|e| DruckwerkError::Database(format!("delete documents: {e}")))?;
        Ok(())
    }

    pub fn list_job_ids_by_printer(&self, printer_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM jobs WHERE printer_id = ?1 ORDER BY id ASC")
            .map_err(|e| DruckwerkError::Database(format!("prepare printer jobs: {e}")))?;
        let ids = stmt
            .query_map(params![printer_id], |row| row.get(0))
            .map_err(|e| DruckwerkError::Database(format!("query printer jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DruckwerkError::Database(format!("collect printer jobs: {e}")))?;
        Ok(ids)
    }

    /// Delete a job together with its documents and events.
    pub fn delete_job(&self, job_id: i64) -> Result<()> {
        self.delete_documents_by_job(job_id)?;
        self.conn
            .execute("DELETE FROM job_events WHERE job_id = ?1", params![job_id])
            .map_err(|e| DruckwerkError::Database(format!("delete job events: {e}")))?;
        self.conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id])
            .map_err(|e| DruckwerkError::Database(format!("delete job: {e}")))?;
        Ok(())
    }

    // -- settings and events -----------------------------------------------

    pub fn list_settings(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM settings")
            .map_err(|e| DruckwerkError::Database(format!("prepare settings: {e}")))?;
        let settings = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| DruckwerkError::Database(format!("query settings: {e}")))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()
            .map_err(|e| DruckwerkError::Database(format!("collect settings: {e}")))?;
        Ok(settings)
    }

    pub fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![name, value],
            )
            .map_err(|e| DruckwerkError::Database(format!("set setting: {e}")))?;
        Ok(())
    }

    pub fn add_job_event(&self, job_id: i64, kind: &str, details: serde_json::Value) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO job_events (job_id, kind, details, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, kind, details.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| DruckwerkError::Database(format!("insert job event: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const PRINTER_COLUMNS: &str = "id, name, uri, ppd_name, info, location, state, accepting, \
shared, is_temporary, is_default, job_sheets_default, default_options, created_at, updated_at";

const JOB_COLUMNS: &str = "id, printer_id, name, user_name, origin_host, options, state, \
state_reason, impressions, submitted_at, processing_at, completed_at";

fn bad_column<E: std::error::Error + Send + Sync + 'static>(
    index: usize,
    e: E,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_time(index: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| bad_column(index, e))
}

fn row_to_printer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Printer> {
    let state: i64 = row.get(6)?;
    let options_json: String = row.get(12)?;
    Ok(Printer {
        id: row.get(0)?,
        name: row.get(1)?,
        uri: row.get(2)?,
        ppd_name: row.get(3)?,
        info: row.get(4)?,
        location: row.get(5)?,
        state: PrinterState::from_i64(state).unwrap_or(PrinterState::Stopped),
        accepting: row.get(7)?,
        shared: row.get(8)?,
        is_temporary: row.get(9)?,
        is_default: row.get(10)?,
        job_sheets_default: row.get(11)?,
        default_options: JobOptions::from_json(&options_json)
            .map_err(|e| bad_column(12, e))?,
        created_at: parse_time(13, row.get(13)?)?,
        updated_at: parse_time(14, row.get(14)?)?,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let options_json: String = row.get(5)?;
    let state: i64 = row.get(6)?;
    let processing_at: Option<String> = row.get(10)?;
    let completed_at: Option<String> = row.get(11)?;
    Ok(Job {
        id: row.get(0)?,
        printer_id: row.get(1)?,
        name: row.get(2)?,
        user_name: row.get(3)?,
        origin_host: row.get(4)?,
        options: JobOptions::from_json(&options_json).map_err(|e| bad_column(5, e))?,
        state: JobState::from_i64(state).unwrap_or(JobState::Aborted),
        state_reason: row.get(7)?,
        impressions: row.get(8)?,
        submitted_at: parse_time(9, row.get(9)?)?,
        processing_at: processing_at.map(|s| parse_time(10, s)).transpose()?,
        completed_at: completed_at.map(|s| parse_time(11, s)).transpose()?,
    })
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        job_id: row.get(1)?,
        file_name: row.get(2)?,
        mime_type: row.get(3)?,
        size_bytes: row.get(4)?,
        sha256: row.get(5)?,
        path: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_printer() -> (Store, i64) {
        let store = Store::open_in_memory().expect("open");
        let printer_id = store
            .create_printer(&NewPrinter {
                name: "laser".into(),
                uri: "socket://192.0.2.1:9100".into(),
                ..Default::default()
            })
            .expect("create printer");
        (store, printer_id)
    }

    fn queue_job(store: &Store, printer_id: i64) -> i64 {
        store
            .create_job(&NewJob {
                printer_id,
                name: "report.pdf".into(),
                user_name: "ada".into(),
                origin_host: "localhost".into(),
                options: JobOptions::new(),
            })
            .expect("create job")
    }

    #[test]
    fn job_round_trip() {
        let (store, printer_id) = store_with_printer();
        let id = queue_job(&store, printer_id);
        let job = store.get_job(id).expect("get").expect("found");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.state_reason, "job-queued");
        assert_eq!(job.user_name, "ada");
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn claim_is_exactly_once() {
        let (store, printer_id) = store_with_printer();
        let id = queue_job(&store, printer_id);

        assert!(store.claim_pending_job(id).expect("first claim"));
        assert!(!store.claim_pending_job(id).expect("second claim"));

        let job = store.get_job(id).expect("get").expect("found");
        assert_eq!(job.state, JobState::Processing);
        assert!(job.processing_at.is_some());
    }

    #[test]
    fn claim_skips_non_pending_jobs() {
        let (store, printer_id) = store_with_printer();
        let id = queue_job(&store, printer_id);
        store
            .update_job_state(id, JobState::Held, "job-hold-until-specified", None)
            .expect("hold");
        assert!(!store.claim_pending_job(id).expect("claim"));
    }

    #[test]
    fn listings_filter_by_state() {
        let (store, printer_id) = store_with_printer();
        let a = queue_job(&store, printer_id);
        let b = queue_job(&store, printer_id);
        let c = queue_job(&store, printer_id);
        store
            .update_job_state(b, JobState::Held, "job-retry", None)
            .expect("hold");
        store
            .update_job_state(c, JobState::Completed, "job-completed-successfully", Some(Utc::now()))
            .expect("complete");

        let pending = store.list_pending_jobs(50).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a);

        let held = store.list_held_jobs(50).expect("held");
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, b);

        let terminal = store.list_terminal_jobs(50).expect("terminal");
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].id, c);
        assert!(terminal[0].completed_at.is_some());
    }

    #[test]
    fn options_blob_round_trips() {
        let (store, printer_id) = store_with_printer();
        let id = queue_job(&store, printer_id);

        let mut options = JobOptions::new();
        options.set("job-priority", "75");
        options.set("cups-retry-count", "2");
        store.update_job_options(id, &options).expect("update");

        let job = store.get_job(id).expect("get").expect("found");
        assert_eq!(job.options, options);
        assert_eq!(job.options.priority(), 75);
    }

    #[test]
    fn delete_job_removes_documents_and_events() {
        let (store, printer_id) = store_with_printer();
        let id = queue_job(&store, printer_id);
        store
            .add_document(&Document {
                id: 0,
                job_id: id,
                file_name: "report.pdf".into(),
                mime_type: "application/pdf".into(),
                size_bytes: 8,
                sha256: "ff".into(),
                path: "/spool/job-1".into(),
            })
            .expect("add doc");
        store
            .add_job_event(id, "job-created", serde_json::json!({}))
            .expect("event");

        store.delete_job(id).expect("delete");
        assert!(store.get_job(id).expect("get").is_none());
        assert!(store.list_documents_by_job(id).expect("docs").is_empty());
    }

    #[test]
    fn settings_upsert() {
        let (store, _) = store_with_printer();
        store.set_setting("PreserveJobHistory", "Yes").expect("set");
        store.set_setting("PreserveJobHistory", "1d").expect("set");
        let settings = store.list_settings().expect("list");
        assert_eq!(settings.get("PreserveJobHistory").map(String::as_str), Some("1d"));
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let (store, printer_id) = store_with_printer();
        let result: Result<()> = store.with_tx(false, |v| {
            v.create_job(&NewJob {
                printer_id,
                name: "doomed".into(),
                ..Default::default()
            })?;
            Err(DruckwerkError::Database("forced rollback".into()))
        });
        assert!(result.is_err());
        assert!(store.list_pending_jobs(50).expect("pending").is_empty());
    }

    #[test]
    fn temporary_printer_listing() {
        let (store, _) = store_with_printer();
        store
            .create_printer(&NewPrinter {
                name: "ephemeral".into(),
                uri: "ipp://192.0.2.9:631/ipp/print".into(),
                is_temporary: true,
                ..Default::default()
            })
            .expect("create temp");

        let temps = store.list_temporary_printers().expect("list");
        assert_eq!(temps.len(), 1);
        assert_eq!(temps[0].name, "ephemeral");
        assert!(temps[0].is_temporary);
    }
}
