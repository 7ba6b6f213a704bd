// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// file:// delivery — write the prepared output to a local path. Used for
// virtual queues and in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use druckwerk_core::types::{Device, Document, Job, Printer};

use crate::{Backend, BackendError, BackendResult, uri_scheme};

pub struct FileBackend;

impl FileBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the filesystem path from a `file://` URI.
fn target_path(uri: &str) -> Option<PathBuf> {
    if uri_scheme(uri)? != "file" {
        return None;
    }
    let rest = uri.strip_prefix("file://")?;
    if rest.is_empty() {
        return None;
    }
    Some(PathBuf::from(rest))
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["file"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        // file queues are configured explicitly, never discovered.
        Ok(Vec::new())
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        job: &Job,
        _doc: &Document,
        file_path: &Path,
    ) -> BackendResult<()> {
        let uri = printer.uri.as_str();
        let target = target_path(uri)
            .ok_or_else(|| BackendError::unsupported("submit", uri, "invalid file URI"))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::permanent("submit", uri, format!("mkdir: {e}")))?;
        }
        let bytes = tokio::fs::copy(file_path, &target)
            .await
            .map_err(|e| BackendError::permanent("submit", uri, format!("copy: {e}")))?;

        info!(job_id = job.id, target = %target.display(), bytes, "file delivery complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::options::JobOptions;
    use druckwerk_core::types::{ErrorKind, JobState, PrinterState};

    fn printer(uri: &str) -> Printer {
        Printer {
            id: 1,
            name: "virtual".into(),
            uri: uri.into(),
            ppd_name: None,
            info: String::new(),
            location: String::new(),
            state: PrinterState::Idle,
            accepting: true,
            shared: false,
            is_temporary: false,
            is_default: false,
            job_sheets_default: "none,none".into(),
            default_options: JobOptions::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn job() -> Job {
        Job {
            id: 5,
            printer_id: 1,
            name: "t".into(),
            user_name: "u".into(),
            origin_host: "h".into(),
            options: JobOptions::new(),
            state: JobState::Processing,
            state_reason: String::new(),
            impressions: 0,
            submitted_at: chrono::Utc::now(),
            processing_at: None,
            completed_at: None,
        }
    }

    fn doc() -> Document {
        Document {
            id: 1,
            job_id: 5,
            file_name: "t".into(),
            mime_type: String::new(),
            size_bytes: 0,
            sha256: String::new(),
            path: String::new(),
        }
    }

    #[tokio::test]
    async fn writes_output_creating_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").expect("write");
        let target = dir.path().join("nested/deep/out.bin");

        FileBackend::new()
            .submit_job(
                &printer(&format!("file://{}", target.display())),
                &job(),
                &doc(),
                &source,
            )
            .await
            .expect("submit");

        assert_eq!(std::fs::read(&target).expect("read"), b"payload");
    }

    #[tokio::test]
    async fn empty_path_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"x").expect("write");

        let err = FileBackend::new()
            .submit_job(&printer("file://"), &job(), &doc(), &source)
            .await
            .expect_err("fail");
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }
}
