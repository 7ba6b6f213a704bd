// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The scheduler tick loop.
//
// One logical loop owns all scheduling state. Each tick releases expired
// holds, orders the pending queue by priority, claims one job at a time
// through the store's atomic claim, runs the filter pipeline and delivery
// for each document, finalizes in a single transaction, and then sweeps
// expired history and idle temporary printers. Job failures never abort
// the tick; they are classified and recorded on the job row.

use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use druckwerk_backend::{BackendError, BackendRegistry};
use druckwerk_core::config::{Preserve, ServerConfig};
use druckwerk_core::error::Result;
use druckwerk_core::logging::LogManager;
use druckwerk_core::types::{
    Document, ErrorKind, Job, JobState, Printer, PrinterState, reason,
};
use druckwerk_mime::{CUPS_RAW, MimeDatabase, OCTET_STREAM, plan_pipeline};
use druckwerk_ppd::Ppd;
use druckwerk_store::{Spool, Store};

use crate::banner::{BannerEnd, banner_names, make_banner_document};
use crate::hold::{hold_reason, timestamp_expired};
use crate::pipeline::{FilterContext, copy_verbatim, run_pipeline};
use crate::{policy, retry};

/// Default tick interval.
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Pending jobs examined per tick.
const PENDING_BATCH: usize = 50;

/// Held and terminal jobs examined per tick.
const SWEEP_BATCH: usize = 1000;

/// Temporary-printer sweep rate limit.
const TEMP_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Idle window after which an unused temporary printer is removed.
const TEMP_PRINTER_IDLE: Duration = Duration::from_secs(5 * 60);

/// Shared collaborators handed to the scheduler at startup.
#[derive(Clone)]
pub struct SchedulerHandles {
    pub store: Arc<Store>,
    pub spool: Arc<Spool>,
    pub mime: Arc<MimeDatabase>,
    pub registry: Arc<BackendRegistry>,
    pub config: Arc<ServerConfig>,
    pub logs: Arc<LogManager>,
}

/// A document-level processing failure, classified for finalization.
#[derive(Debug)]
enum Failure {
    Backend(BackendError),
    Filter(String),
    Spool(String),
}

impl Failure {
    /// The `job-state-reasons` keyword this failure maps to.
    fn reason(&self) -> &'static str {
        match self {
            Self::Backend(e) => match e.kind {
                ErrorKind::Temporary => reason::JOB_STOPPED,
                ErrorKind::Unsupported | ErrorKind::Permanent => reason::DOCUMENT_UNPRINTABLE,
            },
            Self::Filter(_) => reason::DOCUMENT_UNPRINTABLE,
            Self::Spool(message) => classify_text(message),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Backend(e) => e.to_string(),
            Self::Filter(m) | Self::Spool(m) => m.clone(),
        }
    }
}

/// Last-resort classification of untyped failure text.
fn classify_text(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unsupported") || lower.contains("unprintable") || lower.contains("format") {
        reason::DOCUMENT_UNPRINTABLE
    } else {
        reason::JOB_STOPPED
    }
}

/// The tick-driven coordinator.
pub struct Scheduler {
    handles: SchedulerHandles,
    /// Written only by the tick loop.
    last_temp_cleanup: Option<Instant>,
}

impl Scheduler {
    pub fn new(handles: SchedulerHandles) -> Self {
        Self {
            handles,
            last_temp_cleanup: None,
        }
    }

    /// Run until the shutdown signal flips. The first tick fires
    /// immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        info!(interval_secs = TICK_INTERVAL.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One scheduling pass.
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();

        self.release_held_jobs(now)?;

        let (preserve_history, preserve_files) = self.preserve_windows()?;

        let pending = self.handles.store.list_pending_jobs(PENDING_BATCH)?;
        for job in order_candidates(pending) {
            let id = job.id;
            if let Err(e) = self.process_candidate(job, now).await {
                error!(job_id = id, error = %e, "job processing failed internally");
            }
        }

        self.cleanup_history(now, preserve_history, preserve_files)?;
        self.cleanup_temporary_printers_if_due(now, TEMP_PRINTER_IDLE)?;
        Ok(())
    }

    // -- held queue --------------------------------------------------------

    fn release_held_jobs(&self, now: DateTime<Utc>) -> Result<()> {
        for job in self.handles.store.list_held_jobs(SWEEP_BATCH)? {
            if self.cancel_due(&job, now) {
                self.cancel_job(&job, now)?;
                continue;
            }
            if hold_reason(&job, now).is_some() {
                continue;
            }

            // Strip expired internal stamps before requeueing.
            let mut options = job.options.clone();
            let mut dirty = false;
            for key in ["cups-retry-at", "cups-hold-until"] {
                if timestamp_expired(&job, key, now) {
                    options.remove(key);
                    dirty = true;
                }
            }
            self.handles.store.with_tx(false, |v| {
                if dirty {
                    v.update_job_options(job.id, &options)?;
                }
                v.update_job_state(job.id, JobState::Pending, reason::JOB_QUEUED, None)
            })?;
            debug!(job_id = job.id, "held job released");
        }
        Ok(())
    }

    // -- candidate processing ----------------------------------------------

    /// Whether the cancel-after deadline has passed for this job.
    fn cancel_due(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let after = job
            .options
            .get_int("job-cancel-after")
            .unwrap_or(self.handles.config.max_job_time.as_secs() as i64);
        let Some(processing_at) = job.processing_at else {
            return false;
        };
        after > 0 && (now - processing_at).num_seconds() > after
    }

    fn cancel_job(&self, job: &Job, now: DateTime<Utc>) -> Result<()> {
        info!(job_id = job.id, "job canceled by cancel-after deadline");
        self.handles.store.update_job_state(
            job.id,
            JobState::Canceled,
            reason::JOB_CANCELED_AT_DEVICE,
            Some(now),
        )?;
        self.handles.store.add_job_event(
            job.id,
            "job-canceled",
            serde_json::json!({ "reason": reason::JOB_CANCELED_AT_DEVICE }),
        )
    }

    async fn process_candidate(&self, mut job: Job, now: DateTime<Utc>) -> Result<()> {
        if self.cancel_due(&job, now) {
            return self.cancel_job(&job, now);
        }
        if let Some(hold) = hold_reason(&job, now) {
            debug!(job_id = job.id, reason = hold, "job held");
            return self
                .handles
                .store
                .update_job_state(job.id, JobState::Held, hold, None);
        }

        let Some(printer) = self.handles.store.get_printer_by_id(job.printer_id)? else {
            warn!(job_id = job.id, printer_id = job.printer_id, "printer is gone");
            self.handles.store.update_job_state(
                job.id,
                JobState::Aborted,
                reason::ABORTED_BY_SYSTEM,
                Some(Utc::now()),
            )?;
            return Ok(());
        };
        if printer.state == PrinterState::Stopped {
            debug!(job_id = job.id, printer = %printer.name, "printer stopped, job stays queued");
            return Ok(());
        }

        if !self.handles.store.claim_pending_job(job.id)? {
            debug!(job_id = job.id, "job claimed elsewhere");
            return Ok(());
        }
        job.state = JobState::Processing;
        job.processing_at = Some(now);

        let documents = self.resolve_documents(&job, &printer)?;
        let mut outcome: std::result::Result<(), Failure> = Ok(());
        for (document, is_banner) in &documents {
            if let Err(failure) = self
                .process_document(&printer, &job, document, *is_banner)
                .await
            {
                warn!(
                    job_id = job.id,
                    document = %document.file_name,
                    reason = failure.reason(),
                    error = %failure.message(),
                    "document processing failed"
                );
                outcome = Err(failure);
                break;
            }
        }

        self.finalize(&job, &printer, &documents, outcome)
    }

    /// Job documents with banner sheets strictly first and last.
    fn resolve_documents(&self, job: &Job, printer: &Printer) -> Result<Vec<(Document, bool)>> {
        let stored = self.handles.store.list_documents_by_job(job.id)?;

        let sheets = job
            .options
            .get("job-sheets")
            .unwrap_or(printer.job_sheets_default.as_str());
        let (start, end) = banner_names(sheets);
        let banner_dir = self.handles.config.banner_dir();

        let mut documents = Vec::with_capacity(stored.len() + 2);
        if let Some(name) = start {
            match make_banner_document(
                &self.handles.spool,
                &banner_dir,
                job,
                printer,
                &name,
                BannerEnd::Start,
            ) {
                Ok(doc) => documents.push((doc, true)),
                Err(e) => warn!(job_id = job.id, error = %e, "start banner failed"),
            }
        }
        documents.extend(stored.into_iter().map(|d| (d, false)));
        if let Some(name) = end {
            match make_banner_document(
                &self.handles.spool,
                &banner_dir,
                job,
                printer,
                &name,
                BannerEnd::End,
            ) {
                Ok(doc) => documents.push((doc, true)),
                Err(e) => warn!(job_id = job.id, error = %e, "end banner failed"),
            }
        }
        Ok(documents)
    }

    /// Convert one document and hand it to the delivery backend.
    async fn process_document(
        &self,
        printer: &Printer,
        job: &Job,
        doc: &Document,
        is_banner: bool,
    ) -> std::result::Result<(), Failure> {
        let source_mime = self.resolve_mime(doc);
        let out_path = self.handles.spool.output_path(job.id, &doc.file_name);
        let input = PathBuf::from(&doc.path);

        let raw = source_mime == CUPS_RAW || job.options.truthy("raw");
        if raw {
            copy_verbatim(&input, &out_path).map_err(Failure::Spool)?;
        } else {
            let ppd = self.load_ppd(printer);
            let dest_set = ppd.as_ref().map(|p| p.dest_set()).unwrap_or_default();
            let ppd_filters = ppd
                .as_ref()
                .map(|p| p.planner_filters())
                .unwrap_or_default();
            let force_raster = job.options.truthy("print-as-raster");

            let plan = plan_pipeline(
                self.handles.mime.conversions(),
                &ppd_filters,
                &dest_set,
                &source_mime,
                force_raster,
            );

            match plan {
                None => {
                    debug!(job_id = job.id, mime = %source_mime, "no pipeline, copying verbatim");
                    copy_verbatim(&input, &out_path).map_err(Failure::Spool)?;
                }
                Some(planned) => {
                    let stages = planned.stages.clone();
                    let context_job = job.clone();
                    let context_printer = printer.clone();
                    let context_doc = doc.clone();
                    let config = Arc::clone(&self.handles.config);
                    let ppd_path = printer
                        .ppd_name
                        .as_ref()
                        .map(|n| self.handles.config.ppd_dir().join(n));
                    let final_mime = planned.final_mime.clone();
                    let source = source_mime.clone();
                    let out = out_path.clone();

                    tokio::task::spawn_blocking(move || {
                        let ctx = FilterContext {
                            job: &context_job,
                            printer: &context_printer,
                            doc: &context_doc,
                            config: &config,
                            input: &input,
                            output: &out,
                            source_mime: source,
                            final_mime,
                            ppd_path,
                            is_banner,
                        };
                        run_pipeline(&stages, &ctx)
                    })
                    .await
                    .map_err(|e| Failure::Filter(format!("pipeline task: {e}")))?
                    .map_err(Failure::Filter)?;
                }
            }
        }

        let backend = self
            .handles
            .registry
            .for_uri(&printer.uri)
            .ok_or_else(|| {
                Failure::Backend(BackendError::unsupported(
                    "submit",
                    &printer.uri,
                    "no backend for scheme",
                ))
            })?;
        backend
            .submit_job(printer, job, doc, &out_path)
            .await
            .map_err(Failure::Backend)
    }

    fn resolve_mime(&self, doc: &Document) -> String {
        if !doc.mime_type.is_empty() {
            return doc.mime_type.to_ascii_lowercase();
        }
        doc.file_name
            .rsplit_once('.')
            .and_then(|(_, ext)| self.handles.mime.type_for_extension(ext))
            .unwrap_or(OCTET_STREAM)
            .to_owned()
    }

    fn load_ppd(&self, printer: &Printer) -> Option<Ppd> {
        let name = printer.ppd_name.as_ref()?;
        let path = self.handles.config.ppd_dir().join(name);
        match Ppd::load(&path) {
            Ok(ppd) => Some(ppd),
            Err(e) => {
                warn!(printer = %printer.name, path = %path.display(), error = %e, "PPD load failed");
                None
            }
        }
    }

    // -- finalization ------------------------------------------------------

    /// Record the attempt's outcome in a single transaction, then emit the
    /// page-log line and the job-processed event.
    fn finalize(
        &self,
        job: &Job,
        printer: &Printer,
        documents: &[(Document, bool)],
        outcome: std::result::Result<(), Failure>,
    ) -> Result<()> {
        let now = Utc::now();
        let config = &self.handles.config;
        let pages = documents.len() as i64;
        let copies = job.copies();

        let (result, status) = match &outcome {
            Ok(()) => {
                self.handles.store.with_tx(false, |v| {
                    v.update_job_state(
                        job.id,
                        JobState::Completed,
                        reason::JOB_COMPLETED_SUCCESSFULLY,
                        Some(now),
                    )?;
                    v.update_job_impressions(job.id, pages * copies)
                })?;
                info!(job_id = job.id, printer = %printer.name, "job completed");
                ("completed", reason::JOB_COMPLETED_SUCCESSFULLY.to_owned())
            }
            Err(failure) => {
                let failure_reason = failure.reason();
                let result = self.handles.store.with_tx(false, |v| {
                    if failure_reason == reason::JOB_STOPPED {
                        if policy::apply(v, job, printer, config, now)? {
                            return Ok("error-policy");
                        }
                        if retry::schedule_retry(v, job, now)? {
                            return Ok("retried");
                        }
                        v.update_job_state(job.id, JobState::Stopped, failure_reason, None)?;
                        Ok("stopped")
                    } else {
                        if retry::schedule_retry(v, job, now)? {
                            return Ok("retried");
                        }
                        v.update_job_state(job.id, JobState::Aborted, failure_reason, Some(now))?;
                        Ok("aborted")
                    }
                })?;
                (result, failure_reason.to_owned())
            }
        };

        self.handles.logs.log_page(&printer.name, job, 1, copies);
        self.handles.store.add_job_event(
            job.id,
            "job-processed",
            serde_json::json!({
                "printer": printer.name,
                "result": result,
                "status": status,
            }),
        )
    }

    // -- cleanup -----------------------------------------------------------

    /// Current preserve windows: stored settings override the config.
    fn preserve_windows(&self) -> Result<(Preserve, Preserve)> {
        let settings = self.handles.store.list_settings()?;
        let history = settings
            .get("PreserveJobHistory")
            .and_then(|v| Preserve::parse(v))
            .unwrap_or(self.handles.config.preserve_job_history);
        let files = settings
            .get("PreserveJobFiles")
            .and_then(|v| Preserve::parse(v))
            .unwrap_or(self.handles.config.preserve_job_files);
        Ok((history, files))
    }

    fn cleanup_history(
        &self,
        now: DateTime<Utc>,
        preserve_history: Preserve,
        preserve_files: Preserve,
    ) -> Result<()> {
        for job in self.handles.store.list_terminal_jobs(SWEEP_BATCH)? {
            let Some(completed_at) = job.completed_at else {
                continue;
            };
            let elapsed = (now - completed_at).to_std().unwrap_or(Duration::ZERO);

            if preserve_history.expired(elapsed) {
                debug!(job_id = job.id, "job history expired");
                self.handles.spool.remove_job_files(job.id);
                self.handles.store.delete_job(job.id)?;
            } else if preserve_files.expired(elapsed) {
                debug!(job_id = job.id, "job files expired");
                self.handles.spool.remove_job_files(job.id);
                self.handles.store.delete_documents_by_job(job.id)?;
            }
        }
        Ok(())
    }

    fn cleanup_temporary_printers_if_due(
        &mut self,
        now: DateTime<Utc>,
        idle: Duration,
    ) -> Result<()> {
        // Rate-limited except for the forced pass on the first tick.
        if let Some(last) = self.last_temp_cleanup
            && last.elapsed() < TEMP_CLEANUP_INTERVAL
        {
            return Ok(());
        }
        self.last_temp_cleanup = Some(Instant::now());
        self.cleanup_temporary_printers(now, idle)
    }

    /// Remove temporary printers idle past the window, together with their
    /// jobs' files and their dedicated PPD.
    fn cleanup_temporary_printers(&self, now: DateTime<Utc>, idle: Duration) -> Result<()> {
        for printer in self.handles.store.list_temporary_printers()? {
            if printer.state == PrinterState::Processing {
                continue;
            }
            let quiet = (now - printer.updated_at).to_std().unwrap_or(Duration::ZERO);
            if quiet < idle {
                continue;
            }

            info!(printer = %printer.name, "removing idle temporary printer");
            for job_id in self.handles.store.list_job_ids_by_printer(printer.id)? {
                self.handles.spool.remove_job_files(job_id);
                self.handles.store.delete_job(job_id)?;
            }
            if let Some(ppd_name) = &printer.ppd_name
                && *ppd_name == format!("{}.ppd", printer.name)
            {
                let path = self.handles.config.ppd_dir().join(ppd_name);
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!(path = %path.display(), error = %e, "temporary PPD removal failed");
                }
            }
            self.handles.store.delete_printer(printer.id)?;
        }
        Ok(())
    }
}

/// Candidate ordering: priority descending, submission time ascending; the
/// sort is stable, so equal keys keep queue order.
pub fn order_candidates(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by_key(|job| (Reverse(job.options.priority()), job.submitted_at));
    jobs
}
