// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckwerk print spooler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::options::JobOptions;

/// Lifecycle states of a print job.
///
/// The numeric values are the IPP `job-state` enum (RFC 8011 §5.3.7) and are
/// stored verbatim in the jobs table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum JobState {
    /// Queued, waiting to be scheduled.
    Pending = 3,
    /// Awaiting a release time or an external trigger.
    Held = 4,
    /// Claimed by the scheduler, filters or delivery in flight.
    Processing = 5,
    /// Stopped after a failure the error policy declined to handle.
    Stopped = 6,
    /// Cancelled by the user or by a cancel-after deadline.
    Canceled = 7,
    /// Aborted by the system (unprintable document, retry limit).
    Aborted = 8,
    /// Delivered successfully.
    Completed = 9,
}

impl JobState {
    /// Whether this state is terminal (canceled, aborted, completed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            3 => Some(Self::Pending),
            4 => Some(Self::Held),
            5 => Some(Self::Processing),
            6 => Some(Self::Stopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Printer states, IPP `printer-state` enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum PrinterState {
    Idle = 3,
    Processing = 4,
    Stopped = 5,
}

impl PrinterState {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            3 => Some(Self::Idle),
            4 => Some(Self::Processing),
            5 => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Well-known `job-state-reasons` keywords recorded on the job row.
pub mod reason {
    pub const JOB_QUEUED: &str = "job-queued";
    pub const JOB_INCOMING: &str = "job-incoming";
    pub const JOB_RETRY: &str = "job-retry";
    pub const JOB_HOLD_UNTIL_SPECIFIED: &str = "job-hold-until-specified";
    pub const JOB_CANCELED_AT_DEVICE: &str = "job-canceled-at-device";
    pub const JOB_COMPLETED_SUCCESSFULLY: &str = "job-completed-successfully";
    pub const JOB_STOPPED: &str = "job-stopped";
    pub const DOCUMENT_UNPRINTABLE: &str = "document-unprintable-error";
    pub const ABORTED_BY_SYSTEM: &str = "aborted-by-system";
    pub const PRINTER_STOPPED: &str = "printer-stopped";
}

/// Classification of delivery and processing failures.
///
/// Drives the finalization path: `Unsupported` and `Permanent` abort the job,
/// `Temporary` enters the error-policy state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The backend cannot handle this request at all (unknown scheme,
    /// invalid URI, format not supported).
    Unsupported,
    /// Transient failure — network dial, busy printer, 5xx.
    Temporary,
    /// Hard failure that will not succeed on retry.
    Permanent,
}

/// A configured printer queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printer {
    pub id: i64,
    pub name: String,
    /// Device URI the delivery backend is selected by (`socket://…`,
    /// `ipp://…`, `lpd://…`, `file://…`, `dnssd://…`).
    pub uri: String,
    /// PPD file name under the server's ppd directory, if any.
    pub ppd_name: Option<String>,
    pub info: String,
    pub location: String,
    pub state: PrinterState,
    pub accepting: bool,
    pub shared: bool,
    /// Discovery-created queues; removed automatically when idle too long.
    pub is_temporary: bool,
    pub is_default: bool,
    /// Default `job-sheets` value, e.g. "none,none".
    pub job_sheets_default: String,
    /// Queue-level default options (`printer-error-policy` and friends).
    pub default_options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A spooled print job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub printer_id: i64,
    pub name: String,
    pub user_name: String,
    pub origin_host: String,
    /// Standard IPP attributes plus internal `cups-*` scheduling hints.
    pub options: JobOptions,
    pub state: JobState,
    pub state_reason: String,
    pub impressions: i64,
    pub submitted_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Effective number of copies, defaulting to 1.
    pub fn copies(&self) -> i64 {
        self.options.get_int("copies").filter(|c| *c > 0).unwrap_or(1)
    }
}

/// One document belonging to a job. Documents share the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub job_id: i64,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// SHA-256 of the spooled bytes, computed on ingestion.
    pub sha256: String,
    /// Absolute path in the spool directory. Read-only for the scheduler.
    pub path: String,
}

/// Hardware class of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Direct,
    Network,
    Serial,
}

/// A device reported by a backend's discovery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub uri: String,
    pub info: String,
    pub make_and_model: String,
    pub class: DeviceClass,
    /// IEEE 1284 device ID string, when the backend can learn it.
    pub device_id: Option<String>,
    pub location: Option<String>,
}

/// Marker supply snapshot returned by `query_supplies`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplyStatus {
    /// Free-form printer state summary ("idle", "low-toner", …).
    pub state: String,
    /// Per-supply details keyed by supply description.
    pub details: HashMap<String, String>,
}
