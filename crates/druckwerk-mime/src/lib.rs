// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk MIME — the type/conversion database loaded from `*.types` and
// `*.convs` files, and the planner that searches it for a filter pipeline.

pub mod db;
pub mod planner;

pub use db::{Conversion, MimeDatabase};
pub use planner::{PlannedPipeline, plan_pipeline};

/// Pass-through type accepted by every printer.
pub const OCTET_STREAM: &str = "application/octet-stream";
/// Pre-formatted data; the scheduler copies it verbatim.
pub const CUPS_RAW: &str = "application/vnd.cups-raw";
/// Generated banner sheets.
pub const CUPS_BANNER: &str = "application/vnd.cups-banner";
/// CUPS raster, the preferred forced-raster target.
pub const CUPS_RASTER: &str = "application/vnd.cups-raster";
/// PWG raster, the standard forced-raster fallback.
pub const PWG_RASTER: &str = "image/pwg-raster";
