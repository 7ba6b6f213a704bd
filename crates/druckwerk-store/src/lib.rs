// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk store — transactional SQLite persistence for printers, jobs,
// documents, settings, and job events, plus the filesystem spool.

pub mod db;
pub mod spool;

pub use db::{NewJob, NewPrinter, Store, StoreView};
pub use spool::Spool;
