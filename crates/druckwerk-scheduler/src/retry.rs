// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User-directed retry (`number-of-retries` and friends).
//
// This is the fallback when the error policy declines a failure: the job's
// own options may grant it a bounded number of new attempts.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use druckwerk_core::error::Result;
use druckwerk_core::types::{Job, JobState, reason};
use druckwerk_store::db::StoreView;

/// Consume one retry from the job's budget, if it has one.
///
/// Returns `true` when the job was rescheduled (held for the retry
/// interval, or re-queued immediately when no interval is set).
pub fn schedule_retry(view: &StoreView<'_>, job: &Job, now: DateTime<Utc>) -> Result<bool> {
    let remaining = job.options.get_int("number-of-retries").unwrap_or(0);
    if remaining <= 0 {
        return Ok(false);
    }

    let timeout = job.options.get_int("retry-time-out").unwrap_or(0);
    if timeout > 0 && (now - job.submitted_at).num_seconds() > timeout {
        debug!(job_id = job.id, timeout, "retry budget expired");
        return Ok(false);
    }

    let mut options = job.options.clone();
    if remaining <= 1 {
        options.remove("number-of-retries");
    } else {
        options.set("number-of-retries", (remaining - 1).to_string());
    }

    let interval = job.options.get_int("retry-interval").unwrap_or(0);
    let state = if interval > 0 {
        options.set("cups-retry-at", (now.timestamp() + interval).to_string());
        JobState::Held
    } else {
        JobState::Pending
    };

    view.update_job_options(job.id, &options)?;
    view.update_job_state(job.id, state, reason::JOB_RETRY, None)?;
    info!(
        job_id = job.id,
        remaining = remaining - 1,
        interval,
        "job rescheduled by retry budget"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::options::JobOptions;
    use druckwerk_store::db::{NewJob, NewPrinter, Store};

    fn setup(options: JobOptions) -> (Store, i64) {
        let store = Store::open_in_memory().expect("open");
        let printer_id = store
            .create_printer(&NewPrinter {
                name: "p".into(),
                uri: "file:///dev/null".into(),
                ..Default::default()
            })
            .expect("printer");
        let job_id = store
            .create_job(&NewJob {
                printer_id,
                name: "j".into(),
                user_name: "u".into(),
                origin_host: "h".into(),
                options,
            })
            .expect("job");
        (store, job_id)
    }

    fn opts(pairs: &[(&str, &str)]) -> JobOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn no_budget_means_no_retry() {
        let (store, id) = setup(JobOptions::new());
        let job = store.get_job(id).expect("get").expect("found");
        let retried = store
            .with_tx(false, |v| schedule_retry(v, &job, Utc::now()))
            .expect("tx");
        assert!(!retried);
    }

    #[test]
    fn retry_with_interval_holds_and_stamps() {
        let (store, id) = setup(opts(&[("number-of-retries", "2"), ("retry-interval", "30")]));
        let job = store.get_job(id).expect("get").expect("found");
        let now = Utc::now();

        let retried = store
            .with_tx(false, |v| schedule_retry(v, &job, now))
            .expect("tx");
        assert!(retried);

        let job = store.get_job(id).expect("get").expect("found");
        assert_eq!(job.state, JobState::Held);
        assert_eq!(job.state_reason, reason::JOB_RETRY);
        assert_eq!(job.options.get("number-of-retries"), Some("1"));
        assert_eq!(
            job.options.get_int("cups-retry-at"),
            Some(now.timestamp() + 30)
        );
    }

    #[test]
    fn last_retry_removes_the_key_and_requeues_without_interval() {
        let (store, id) = setup(opts(&[("number-of-retries", "1")]));
        let job = store.get_job(id).expect("get").expect("found");

        let retried = store
            .with_tx(false, |v| schedule_retry(v, &job, Utc::now()))
            .expect("tx");
        assert!(retried);

        let job = store.get_job(id).expect("get").expect("found");
        assert_eq!(job.state, JobState::Pending);
        assert!(!job.options.contains("number-of-retries"));
        assert!(!job.options.contains("cups-retry-at"));
    }

    #[test]
    fn timeout_exhausts_the_budget() {
        let (store, id) = setup(opts(&[("number-of-retries", "5"), ("retry-time-out", "10")]));
        let job = store.get_job(id).expect("get").expect("found");

        let later = job.submitted_at + chrono::Duration::seconds(11);
        let retried = store
            .with_tx(false, |v| schedule_retry(v, &job, later))
            .expect("tx");
        assert!(!retried);
    }
}
