// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk PPD — Adobe PPD 4.3 parsing into a printer-capability model,
// plus the categorized conformance rule engine behind `cupstestppd`.

pub mod check;
pub mod model;

pub use check::{Category, CheckOptions, CheckReport, Finding, Severity, check_ppd};
pub use model::{Ppd, PpdError};
