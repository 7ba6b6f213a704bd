// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem spool.
//
// Inbound document bytes land in the spool directory as
// `job-<id>-<ts>-<name>`; converted output is staged in the output
// directory as `job-<id>-<name>`. File names are sanitized so a hostile
// job title cannot escape the spool. Removal is best-effort: cleanup must
// not fail because a file is already gone.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::Document;

/// Characters stripped from spooled file names.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replace forbidden characters and keep the name non-empty.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    if cleaned.is_empty() {
        "untitled".to_owned()
    } else {
        cleaned
    }
}

/// Spool and output directory accessor.
pub struct Spool {
    spool_dir: PathBuf,
    output_dir: PathBuf,
}

impl Spool {
    /// Create the accessor, making both directories if needed.
    pub fn new(spool_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let spool_dir = spool_dir.into();
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&spool_dir)
            .map_err(|e| DruckwerkError::Spool(format!("{}: {e}", spool_dir.display())))?;
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| DruckwerkError::Spool(format!("{}: {e}", output_dir.display())))?;
        Ok(Self {
            spool_dir,
            output_dir,
        })
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write inbound document bytes and return the document record to
    /// persist (with `id` zero, to be filled by the store).
    pub fn store_document(
        &self,
        job_id: i64,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        let ts = chrono::Utc::now().timestamp();
        let sanitized = sanitize_file_name(file_name);
        let path = self.spool_dir.join(format!("job-{job_id}-{ts}-{sanitized}"));

        std::fs::write(&path, bytes)
            .map_err(|e| DruckwerkError::Spool(format!("{}: {e}", path.display())))?;

        let digest = hex::encode(Sha256::digest(bytes));
        debug!(job_id, path = %path.display(), size = bytes.len(), "document spooled");

        Ok(Document {
            id: 0,
            job_id,
            file_name: sanitized,
            mime_type: mime_type.to_owned(),
            size_bytes: bytes.len() as i64,
            sha256: digest,
            path: path.to_string_lossy().into_owned(),
        })
    }

    /// Deterministic output path for a document's converted bytes.
    pub fn output_path(&self, job_id: i64, file_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("job-{job_id}-{}", sanitize_file_name(file_name)))
    }

    /// Best-effort removal of every spool and output file belonging to a
    /// job.
    pub fn remove_job_files(&self, job_id: i64) {
        let prefix = format!("job-{job_id}-");
        for dir in [&self.spool_dir, &self.output_dir] {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(&prefix)
                    && let Err(e) = std::fs::remove_file(entry.path())
                {
                    warn!(path = %entry.path().display(), error = %e, "spool cleanup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spool() -> (tempfile::TempDir, Spool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = Spool::new(dir.path().join("spool"), dir.path().join("out")).expect("new");
        (dir, spool)
    }

    #[test]
    fn sanitizer_strips_forbidden_characters() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("///"), "untitled");
    }

    #[test]
    fn stores_document_with_digest() {
        let (_guard, spool) = spool();
        let doc = spool
            .store_document(7, "my: report.pdf", "application/pdf", b"%PDF-1.4")
            .expect("store");
        assert_eq!(doc.job_id, 7);
        assert_eq!(doc.file_name, "my report.pdf");
        assert_eq!(doc.size_bytes, 8);
        assert_eq!(doc.sha256.len(), 64);
        assert_eq!(std::fs::read(&doc.path).expect("read back"), b"%PDF-1.4");
    }

    #[test]
    fn output_path_is_deterministic() {
        let (_guard, spool) = spool();
        let a = spool.output_path(3, "out?.ps");
        let b = spool.output_path(3, "out?.ps");
        assert_eq!(a, b);
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with("job-3-"));
        assert!(!a.to_string_lossy().contains('?'));
    }

    #[test]
    fn remove_job_files_only_touches_that_job() {
        let (_guard, spool) = spool();
        let kept = spool
            .store_document(1, "keep.txt", "text/plain", b"keep")
            .expect("store");
        let gone = spool
            .store_document(2, "gone.txt", "text/plain", b"gone")
            .expect("store");
        std::fs::write(spool.output_path(2, "gone.out"), b"x").expect("write output");

        spool.remove_job_files(2);

        assert!(Path::new(&kept.path).exists());
        assert!(!Path::new(&gone.path).exists());
        assert!(!spool.output_path(2, "gone.out").exists());
    }
}
