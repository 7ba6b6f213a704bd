// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckwerk.

use thiserror::Error;

/// Top-level error type for all Druckwerk operations.
#[derive(Debug, Error)]
pub enum DruckwerkError {
    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    // -- Persistence / spool --
    #[error("database error: {0}")]
    Database(String),

    #[error("spool error: {0}")]
    Spool(String),

    // -- Document handling --
    #[error("MIME database error: {0}")]
    Mime(String),

    #[error("PPD error: {0}")]
    Ppd(String),

    #[error("filter pipeline failed: {0}")]
    FilterPipeline(String),

    // -- Delivery --
    #[error("backend error: {0}")]
    Backend(String),

    // -- Generic --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckwerkError>;
