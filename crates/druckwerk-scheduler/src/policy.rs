// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error-policy state machine for temporary delivery failures.
//
// Policy resolution order: the job's `cups-error-policy`, then the queue's
// `printer-error-policy` default, then the server-wide `ErrorPolicy`
// directive. An unrecognized value deliberately handles nothing, so the
// scheduler can fall through to the retry budget instead of hard-failing
// the job.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use druckwerk_core::config::ServerConfig;
use druckwerk_core::error::Result;
use druckwerk_core::types::{Job, JobState, Printer, PrinterState, reason};
use druckwerk_store::db::StoreView;

/// The recognized error policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    RetryCurrentJob,
    RetryJob,
    AbortJob,
    StopPrinter,
}

impl ErrorPolicy {
    /// Case-insensitive normalization; anything else is unrecognized.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retry-current-job" => Some(Self::RetryCurrentJob),
            "retry-job" => Some(Self::RetryJob),
            "abort-job" => Some(Self::AbortJob),
            "stop-printer" => Some(Self::StopPrinter),
            _ => None,
        }
    }
}

/// Default retry-job limit when neither the job nor the config sets one.
const DEFAULT_RETRY_LIMIT: i64 = 5;

/// Default retry-job interval seconds.
const DEFAULT_RETRY_INTERVAL: i64 = 300;

/// First configured policy value in resolution order, unparsed.
fn effective_policy_value<'a>(
    job: &'a Job,
    printer: &'a Printer,
    config: &'a ServerConfig,
) -> Option<&'a str> {
    job.options
        .get("cups-error-policy")
        .or_else(|| printer.default_options.get("printer-error-policy"))
        .or_else(|| {
            let v = config.error_policy.as_str();
            if v.is_empty() { None } else { Some(v) }
        })
}

/// Apply the error policy to a temporary failure.
///
/// Returns `true` when the policy consumed the failure (the job and/or
/// printer were transitioned); `false` sends the caller on to the retry
/// budget and default finalization.
pub fn apply(
    view: &StoreView<'_>,
    job: &Job,
    printer: &Printer,
    config: &ServerConfig,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(value) = effective_policy_value(job, printer, config) else {
        return apply_policy(view, job, printer, config, ErrorPolicy::StopPrinter, now).map(|_| true);
    };
    let Some(policy) = ErrorPolicy::parse(value) else {
        warn!(job_id = job.id, value, "unrecognized error policy, falling through");
        return Ok(false);
    };
    apply_policy(view, job, printer, config, policy, now)?;
    Ok(true)
}

fn apply_policy(
    view: &StoreView<'_>,
    job: &Job,
    printer: &Printer,
    config: &ServerConfig,
    policy: ErrorPolicy,
    now: DateTime<Utc>,
) -> Result<()> {
    info!(job_id = job.id, policy = ?policy, "applying error policy");
    match policy {
        ErrorPolicy::RetryCurrentJob => {
            view.update_job_state(job.id, JobState::Pending, reason::JOB_RETRY, None)
        }
        ErrorPolicy::RetryJob => {
            let count = job.options.get_int("cups-retry-count").unwrap_or(0) + 1;
            let limit = job
                .options
                .get_int("cups-retry-limit")
                .filter(|n| *n > 0)
                .or(Some(config.job_retry_limit).filter(|n| *n > 0))
                .unwrap_or(DEFAULT_RETRY_LIMIT);

            if count > limit {
                warn!(job_id = job.id, count, limit, "retry limit exceeded, aborting");
                return view.update_job_state(
                    job.id,
                    JobState::Aborted,
                    reason::ABORTED_BY_SYSTEM,
                    Some(now),
                );
            }

            let interval = job
                .options
                .get_int("cups-retry-interval")
                .filter(|n| *n > 0)
                .or(Some(config.job_retry_interval.as_secs() as i64).filter(|n| *n > 0))
                .unwrap_or(DEFAULT_RETRY_INTERVAL);

            let mut options = job.options.clone();
            options.set("cups-retry-count", count.to_string());
            options.set("cups-retry-at", (now.timestamp() + interval).to_string());
            view.update_job_options(job.id, &options)?;
            view.update_job_state(job.id, JobState::Held, reason::JOB_RETRY, None)
        }
        ErrorPolicy::AbortJob => view.update_job_state(
            job.id,
            JobState::Aborted,
            reason::ABORTED_BY_SYSTEM,
            Some(now),
        ),
        ErrorPolicy::StopPrinter => {
            view.update_printer_state(printer.id, PrinterState::Stopped)?;
            view.update_job_state(job.id, JobState::Pending, reason::PRINTER_STOPPED, None)
        }
    }
}
