// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External converter execution.
//
// A planned pipeline becomes a chain of child processes: the document file
// feeds the first stage's stdin, each stage's stdout feeds the next one's
// stdin, and the last stage writes the output file. Handing a child's
// stdout directly to the next child as stdin means the parent never holds
// an intermediate pipe end, so an early failure cannot leave a later stage
// blocked on a pipe nobody drains. Processes are started in order and then
// waited on in order; any start failure or non-zero exit fails the whole
// pipeline.
//
// Everything here is blocking; the scheduler runs it on the blocking pool.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use druckwerk_core::config::ServerConfig;
use druckwerk_core::types::{Document, Job, Printer};
use druckwerk_mime::db::Conversion;

/// Everything a filter needs to know about the work it is doing.
pub struct FilterContext<'a> {
    pub job: &'a Job,
    pub printer: &'a Printer,
    pub doc: &'a Document,
    pub config: &'a ServerConfig,
    pub input: &'a Path,
    pub output: &'a Path,
    pub source_mime: String,
    pub final_mime: String,
    pub ppd_path: Option<PathBuf>,
    pub is_banner: bool,
}

/// Run the conversion stages. Returns a human-readable failure description
/// naming the stage that broke.
pub fn run_pipeline(stages: &[Conversion], ctx: &FilterContext<'_>) -> Result<(), String> {
    if stages.is_empty() {
        return copy_verbatim(ctx.input, ctx.output);
    }

    let input = File::open(ctx.input)
        .map_err(|e| format!("open input {}: {e}", ctx.input.display()))?;
    if let Some(parent) = ctx.output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("create output dir {}: {e}", parent.display()))?;
    }
    let output = File::create(ctx.output)
        .map_err(|e| format!("create output {}: {e}", ctx.output.display()))?;

    let mut children: Vec<(String, Child)> = Vec::new();
    let mut upstream: Option<Stdio> = Some(Stdio::from(input));

    for (index, stage) in stages.iter().enumerate() {
        let last = index == stages.len() - 1;
        let mut tokens = stage.program.split_whitespace();
        let Some(program) = tokens.next() else {
            return Err(format!("stage {index} has no program"));
        };

        let mut command = Command::new(program);
        command.args(tokens);
        command
            .arg(ctx.job.id.to_string())
            .arg(&ctx.job.user_name)
            .arg(&ctx.job.name)
            .arg(ctx.job.copies().to_string())
            .arg(ctx.job.options.options_string());
        if index == 0 {
            command.arg(ctx.input.as_os_str());
        }

        apply_environment(&mut command, ctx);

        command.stdin(upstream.take().unwrap_or_else(Stdio::null));
        if last {
            command.stdout(Stdio::from(
                output.try_clone().map_err(|e| format!("clone output: {e}"))?,
            ));
        } else {
            command.stdout(Stdio::piped());
        }
        // Filter diagnostics belong in the scheduler's error log.
        command.stderr(Stdio::inherit());

        debug!(job_id = ctx.job.id, stage = index, program, "starting filter");
        let mut child = command
            .spawn()
            .map_err(|e| format!("start {program}: {e}"))?;

        if !last {
            match child.stdout.take() {
                Some(stdout) => upstream = Some(Stdio::from(stdout)),
                None => return Err(format!("{program}: no stdout pipe")),
            }
        }
        children.push((program.to_owned(), child));
    }

    // Wait in start order; the first failure names its stage.
    let mut failure = None;
    for (program, mut child) in children {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!(program = %program, status = %status, "filter failed");
                failure.get_or_insert(format!("{program} exited with {status}"));
            }
            Err(e) => {
                failure.get_or_insert(format!("wait for {program}: {e}"));
            }
        }
    }
    match failure {
        Some(message) => Err(message),
        None => Ok(()),
    }
}

/// Plain copy for raw documents and unplannable conversions.
pub fn copy_verbatim(input: &Path, output: &Path) -> Result<(), String> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("create output dir {}: {e}", parent.display()))?;
    }
    std::fs::copy(input, output)
        .map(|_| ())
        .map_err(|e| format!("copy {} to {}: {e}", input.display(), output.display()))
}

/// The environment contract filters rely on.
fn apply_environment(command: &mut Command, ctx: &FilterContext<'_>) {
    let config = ctx.config;
    let ppd = ctx
        .ppd_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    command
        .env("CUPS_COPIES", ctx.job.copies().to_string())
        .env(
            "CUPS_FILETYPE",
            if ctx.is_banner { "job-sheet" } else { "document" },
        )
        .env("CUPS_JOB_ID", ctx.job.id.to_string())
        .env("CUPS_JOB_NAME", &ctx.doc.file_name)
        .env("CUPS_USER", &ctx.job.user_name)
        .env("CONTENT_TYPE", &ctx.source_mime)
        .env("FINAL_CONTENT_TYPE", &ctx.final_mime)
        .env("CUPS_FINAL_CONTENT_TYPE", &ctx.final_mime)
        .env("CUPS_OPTIONS", ctx.job.options.options_string())
        .env("CUPS_PRINTER", &ctx.printer.name)
        .env("PRINTER", &ctx.printer.name)
        .env("CUPS_PRINTER_URI", &ctx.printer.uri)
        .env("DEVICE_URI", &ctx.printer.uri)
        .env("PRINTER_INFO", &ctx.printer.info)
        .env("PRINTER_LOCATION", &ctx.printer.location)
        .env("PPD", &ppd)
        .env("CUPS_PPD", &ppd)
        .env("TMPDIR", &config.temp_dir)
        .env("CUPS_SERVERROOT", &config.server_root)
        .env("CUPS_DATADIR", &config.data_dir)
        .env("CUPS_STATEDIR", &config.request_root)
        .env("LANG", "en_US.UTF-8")
        .env("LC_ALL", "en_US.UTF-8");
}
