// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Banner sheets.
//
// `job-sheets` is `start[,end]`; a part other than `none` prepends or
// appends a synthetic document rendered from a template under
// `DataDir/banners/[lang/]<name>` with `{?attribute}` placeholders, or
// from a built-in textual banner when no template exists.

use std::path::Path;

use tracing::debug;

use druckwerk_core::error::Result;
use druckwerk_core::types::{Document, Job, Printer};
use druckwerk_mime::CUPS_BANNER;
use druckwerk_store::Spool;
use druckwerk_store::spool::sanitize_file_name;

/// Which end of the job a banner belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerEnd {
    Start,
    End,
}

impl BannerEnd {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

/// Split a `job-sheets` value into its start and end parts; `none` and
/// empty parts yield `None`.
pub fn banner_names(job_sheets: &str) -> (Option<String>, Option<String>) {
    let mut parts = job_sheets.split(',').map(str::trim);
    let start = parts.next().filter(|p| !p.is_empty() && *p != "none");
    let end = parts.next().filter(|p| !p.is_empty() && *p != "none");
    (start.map(str::to_owned), end.map(str::to_owned))
}

/// Render a banner and spool it as a synthetic document.
pub fn make_banner_document(
    spool: &Spool,
    banner_dir: &Path,
    job: &Job,
    printer: &Printer,
    name: &str,
    end: BannerEnd,
) -> Result<Document> {
    let body = render_banner(banner_dir, name, job, printer);
    let file_name = format!("banner-{}-{}.txt", end.as_str(), sanitize_file_name(name));
    let doc = spool.store_document(job.id, &file_name, CUPS_BANNER, body.as_bytes())?;
    debug!(job_id = job.id, banner = name, end = end.as_str(), "banner spooled");
    Ok(doc)
}

/// Load and fill a banner template, trying `banners/<lang>/<name>` first
/// when a language is set, then `banners/<name>`, then the built-in text.
fn render_banner(banner_dir: &Path, name: &str, job: &Job, printer: &Printer) -> String {
    let mut candidates = Vec::new();
    if let Some(lang) = job.options.get("attributes-natural-language") {
        candidates.push(banner_dir.join(lang).join(name));
    }
    candidates.push(banner_dir.join(name));

    for path in candidates {
        if let Ok(template) = std::fs::read_to_string(&path) {
            return fill_placeholders(&template, job, printer);
        }
    }
    fallback_banner(job, printer)
}

/// Replace `{?attribute-name}` placeholders; unknown attributes become
/// empty.
fn fill_placeholders(template: &str, job: &Job, printer: &Printer) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{?") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(close) => {
                out.push_str(&placeholder_value(&after[..close], job, printer));
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder_value(name: &str, job: &Job, printer: &Printer) -> String {
    match name {
        "printer-name" => printer.name.clone(),
        "job-id" => job.id.to_string(),
        "job-originating-user-name" => job.user_name.clone(),
        "job-name" => job.name.clone(),
        "job-impressions" => job.impressions.to_string(),
        other => job.options.get(other).unwrap_or("").to_owned(),
    }
}

fn fallback_banner(job: &Job, printer: &Printer) -> String {
    format!(
        "===============================================================\n\
         Job     : {id}\n\
         Title   : {title}\n\
         User    : {user}\n\
         Printer : {printer}\n\
         ===============================================================\n",
        id = job.id,
        title = job.name,
        user = job.user_name,
        printer = printer.name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::options::JobOptions;
    use druckwerk_core::types::{JobState, PrinterState};

    fn job() -> Job {
        Job {
            id: 77,
            printer_id: 1,
            name: "monthly.pdf".into(),
            user_name: "grace".into(),
            origin_host: "h".into(),
            options: JobOptions::new(),
            state: JobState::Processing,
            state_reason: String::new(),
            impressions: 4,
            submitted_at: chrono::Utc::now(),
            processing_at: None,
            completed_at: None,
        }
    }

    fn printer() -> Printer {
        Printer {
            id: 1,
            name: "lobby".into(),
            uri: "file:///dev/null".into(),
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

    #[test]
    fn job_sheets_splitting() {
        assert_eq!(banner_names("none,none"), (None, None));
        assert_eq!(
            banner_names("standard"),
            (Some("standard".to_owned()), None)
        );
        assert_eq!(
            banner_names("standard,confidential"),
            (
                Some("standard".to_owned()),
                Some("confidential".to_owned())
            )
        );
        assert_eq!(
            banner_names("none,classified"),
            (None, Some("classified".to_owned()))
        );
        assert_eq!(banner_names(""), (None, None));
    }

    #[test]
    fn template_placeholders_are_filled() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("standard"),
            "Job {?job-id} ({?job-name}) for {?job-originating-user-name} on {?printer-name}: {?job-impressions} pages {?unknown}",
        )
        .expect("write template");

        let body = render_banner(dir.path(), "standard", &job(), &printer());
        assert_eq!(body, "Job 77 (monthly.pdf) for grace on lobby: 4 pages ");
    }

    #[test]
    fn missing_template_uses_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = render_banner(dir.path(), "nonexistent", &job(), &printer());
        assert!(body.contains("Job     : 77"));
        assert!(body.contains("Printer : lobby"));
    }

    #[test]
    fn banner_document_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = Spool::new(dir.path().join("spool"), dir.path().join("out")).expect("spool");

        let doc = make_banner_document(
            &spool,
            &dir.path().join("banners"),
            &job(),
            &printer(),
            "standard",
            BannerEnd::Start,
        )
        .expect("banner");

        assert_eq!(doc.mime_type, CUPS_BANNER);
        assert_eq!(doc.file_name, "banner-start-standard.txt");
        assert!(std::path::Path::new(&doc.path).exists());
    }
}
