// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hold criteria and release-window arithmetic.
//
// A job is held by an internal retry/hold timestamp, by an indefinite
// `job-hold-until` keyword, by a named shift window evaluated in local
// time, or by an `hh:mm[:ss]` release time evaluated in UTC relative to
// submission.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveTime, Timelike, Utc,
             Weekday};

use druckwerk_core::types::{Job, reason};

/// Keywords that hold a job until an explicit release.
const INDEFINITE: &[&str] = &["indefinite", "hold", "forever", "auth-info-required"];

/// Named shift windows.
const WINDOWS: &[&str] = &["day-time", "night", "second-shift", "third-shift", "weekend"];

/// Why (and whether) a job must be held right now. Returns the
/// `job-state-reasons` keyword to record, or `None` when the job may run.
pub fn hold_reason(job: &Job, now: DateTime<Utc>) -> Option<&'static str> {
    let unix = now.timestamp();

    if job.options.get_int("cups-retry-at").is_some_and(|t| t > unix) {
        return Some(reason::JOB_RETRY);
    }
    if job.options.get_int("cups-hold-until").is_some_and(|t| t > unix) {
        return Some(reason::JOB_INCOMING);
    }

    let Some(value) = job.options.get("job-hold-until") else {
        return None;
    };
    let value = value.trim();
    if value.is_empty() || value == "no-hold" {
        return None;
    }

    if INDEFINITE.contains(&value) {
        return Some(reason::JOB_HOLD_UNTIL_SPECIFIED);
    }
    if WINDOWS.contains(&value) {
        let local = now.with_timezone(&Local);
        if window_holds(value, local.hour(), local.weekday()) {
            return Some(reason::JOB_HOLD_UNTIL_SPECIFIED);
        }
        return None;
    }
    if let Some(release) = clock_release(value, job.submitted_at) {
        if now < release {
            return Some(reason::JOB_HOLD_UNTIL_SPECIFIED);
        }
        return None;
    }

    // Unrecognized value: do not hold the job hostage.
    None
}

/// Whether an internal timestamp key has expired (exists and is in the
/// past), meaning it should be stripped on release.
pub fn timestamp_expired(job: &Job, key: &str, now: DateTime<Utc>) -> bool {
    job.options.get_int(key).is_some_and(|t| t <= now.timestamp())
}

/// Shift-window membership: `true` means the job stays held at this local
/// hour/weekday.
pub fn window_holds(window: &str, hour: u32, weekday: Weekday) -> bool {
    match window {
        // Held outside 06:00–18:00.
        "day-time" => !(6..18).contains(&hour),
        // Held during the day shift.
        "night" => (6..18).contains(&hour),
        // Held outside 16:00–24:00.
        "second-shift" => !(16..24).contains(&hour),
        // Held outside 00:00–08:00.
        "third-shift" => !(0..8).contains(&hour),
        // Held Monday through Friday.
        "weekend" => !matches!(weekday, Weekday::Sat | Weekday::Sun),
        _ => false,
    }
}

/// Release instant for an `hh:mm[:ss]` UTC hold, relative to submission.
/// A time of day at or before the submission clock reads as the next day.
pub fn clock_release(value: &str, submitted_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = parts[1].parse().ok()?;
    let second: u32 = if parts.len() == 3 {
        parts[2].parse().ok()?
    } else {
        0
    };
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;

    let date = submitted_at.date_naive();
    let candidate = date.and_time(time).and_utc();
    if candidate <= submitted_at {
        Some(candidate + ChronoDuration::days(1))
    } else {
        Some(candidate)
    }
}
