// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PPD conformance rule engine.
//
// Each rule inspects the parsed model and yields categorized findings. The
// driver then splits findings into errors and warnings using the caller's
// warn/ignore category masks; the CLI turns the result into exit codes and
// PASS/FAIL output.

use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::model::Ppd;

bitflags! {
    /// Conformance rule categories.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Category: u32 {
        const CONSTRAINTS  = 1 << 0;
        const DEFAULTS     = 1 << 1;
        const FILTERS      = 1 << 2;
        const PROFILES     = 1 << 3;
        const TRANSLATIONS = 1 << 4;
        const DUPLEX       = 1 << 5;
        const SIZES        = 1 << 6;
        const FILENAME     = 1 << 7;
    }
}

impl Category {
    /// Parse a single category name as used by `-W`.
    pub fn from_cli_name(name: &str) -> Option<Self> {
        match name {
            "constraints" => Some(Self::CONSTRAINTS),
            "defaults" => Some(Self::DEFAULTS),
            "filters" => Some(Self::FILTERS),
            "profiles" => Some(Self::PROFILES),
            "translations" => Some(Self::TRANSLATIONS),
            "duplex" => Some(Self::DUPLEX),
            "sizes" => Some(Self::SIZES),
            "filename" => Some(Self::FILENAME),
            _ => None,
        }
    }
}

/// Whether a finding counts against conformance or is advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One conformance finding.
#[derive(Debug, Clone)]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
}

/// Rule-engine options.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Categories downgraded from errors to warnings.
    pub warn: Category,
    /// Categories suppressed entirely.
    pub ignore: Category,
    /// Skip the PCFileName check.
    pub relaxed: bool,
    /// Alternate root prefixed to absolute filter/profile paths.
    pub root: Option<PathBuf>,
}

impl Default for Category {
    fn default() -> Self {
        Category::empty()
    }
}

/// Result of checking one PPD.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub findings: Vec<Finding>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }
}

/// Run every rule over a parsed PPD.
///
/// `file_name` is the on-disk basename, used by the filename rule; pass
/// `None` when reading from stdin.
pub fn check_ppd(ppd: &Ppd, file_name: Option<&str>, options: &CheckOptions) -> CheckReport {
    let mut raw: Vec<(Category, String)> = Vec::new();

    check_defaults(ppd, &mut raw);
    check_constraints(ppd, &mut raw);
    check_sizes(ppd, &mut raw);
    check_duplex(ppd, &mut raw);
    check_translations(ppd, &mut raw);
    check_filters(ppd, options.root.as_deref(), &mut raw);
    check_profiles(ppd, options.root.as_deref(), &mut raw);
    if !options.relaxed {
        check_filename(ppd, file_name, &mut raw);
    }

    let mut report = CheckReport::default();
    for (category, message) in raw {
        if options.ignore.contains(category) {
            continue;
        }
        let severity = if options.warn.contains(category) {
            Severity::Warning
        } else {
            Severity::Error
        };
        report.findings.push(Finding {
            category,
            severity,
            message,
        });
    }
    report
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Every option with choices needs a default, and the default must be one
/// of the choices.
fn check_defaults(ppd: &Ppd, out: &mut Vec<(Category, String)>) {
    for option in &ppd.options {
        if option.choices.is_empty() {
            continue;
        }
        match ppd.default_choice(&option.keyword) {
            None => out.push((
                Category::DEFAULTS,
                format!("REQUIRED Default{}", option.keyword),
            )),
            Some(default) => {
                let known = option.has_choice(default)
                    || default == "Custom"
                    || default.starts_with("Custom.");
                if !known {
                    out.push((
                        Category::DEFAULTS,
                        format!("Bad Default{} {default}", option.keyword),
                    ));
                }
            }
        }
    }
}

/// UIConstraints must reference declared options, and named choices must
/// exist on those options.
fn check_constraints(ppd: &Ppd, out: &mut Vec<(Category, String)>) {
    for c in &ppd.constraints {
        for (option, choice) in [(&c.option1, &c.choice1), (&c.option2, &c.choice2)] {
            match ppd.option(option) {
                None => out.push((
                    Category::CONSTRAINTS,
                    format!("Bad UIConstraints: missing option *{option}"),
                )),
                Some(declared) => {
                    if let Some(choice) = choice
                        && !declared.has_choice(choice)
                    {
                        out.push((
                            Category::CONSTRAINTS,
                            format!("Bad UIConstraints: *{option} has no choice {choice}"),
                        ));
                    }
                }
            }
        }
    }
}

/// PageSize choices and dimension entries must agree in both directions.
fn check_sizes(ppd: &Ppd, out: &mut Vec<(Category, String)>) {
    let Some(page_size) = ppd.option("PageSize") else {
        return;
    };
    for choice in &page_size.choices {
        if choice.keyword == "Custom" || choice.keyword.starts_with("Custom.") {
            continue;
        }
        if !ppd
            .paper_dimensions
            .iter()
            .any(|(name, _, _)| *name == choice.keyword)
        {
            out.push((
                Category::SIZES,
                format!("Size \"{}\" has no PaperDimension", choice.keyword),
            ));
        }
    }
    for (name, _, _) in &ppd.paper_dimensions {
        if name == "Custom" || name.starts_with("Custom.") {
            continue;
        }
        if !page_size.has_choice(name) {
            out.push((
                Category::SIZES,
                format!("Size \"{name}\" is not a PageSize choice"),
            ));
        }
    }
}

/// A Duplex option needs an off choice, the tumble/no-tumble pair, and a
/// known default.
fn check_duplex(ppd: &Ppd, out: &mut Vec<(Category, String)>) {
    let Some(duplex) = ppd.option("Duplex") else {
        return;
    };
    if !duplex.has_choice("None") && !duplex.has_choice("Off") {
        out.push((
            Category::DUPLEX,
            "REQUIRED Duplex choice None (or Off)".to_owned(),
        ));
    }
    for required in ["DuplexNoTumble", "DuplexTumble"] {
        if !duplex.has_choice(required) {
            out.push((
                Category::DUPLEX,
                format!("REQUIRED Duplex choice {required}"),
            ));
        }
    }
    if let Some(default) = ppd.default_choice("Duplex")
        && !duplex.has_choice(default)
    {
        out.push((
            Category::DUPLEX,
            format!("Bad DefaultDuplex {default}"),
        ));
    }
}

/// All textual content must be valid UTF-8.
fn check_translations(ppd: &Ppd, out: &mut Vec<(Category, String)>) {
    for line in &ppd.utf8_violations {
        out.push((
            Category::TRANSLATIONS,
            format!("Non-UTF-8 text on line {line}"),
        ));
    }
}

/// cupsFilter programs must be absolute paths to existing non-directories.
fn check_filters(ppd: &Ppd, root: Option<&Path>, out: &mut Vec<(Category, String)>) {
    for filter in &ppd.filters {
        let program = filter.program.split_whitespace().next().unwrap_or("");
        if program.is_empty() || program == "-" {
            continue;
        }
        check_program_path(program, root, "cupsFilter", Category::FILTERS, out);
    }
}

/// cupsICCProfile paths follow the same rule as filters.
fn check_profiles(ppd: &Ppd, root: Option<&Path>, out: &mut Vec<(Category, String)>) {
    for profile in &ppd.icc_profiles {
        check_program_path(
            &profile.path,
            root,
            "cupsICCProfile",
            Category::PROFILES,
            out,
        );
    }
}

fn check_program_path(
    program: &str,
    root: Option<&Path>,
    what: &str,
    category: Category,
    out: &mut Vec<(Category, String)>,
) {
    let path = Path::new(program);
    if !path.is_absolute() {
        out.push((
            category,
            format!("{what} file \"{program}\" is not an absolute path"),
        ));
        return;
    }
    let resolved = match root {
        Some(root) => root.join(program.trim_start_matches('/')),
        None => path.to_path_buf(),
    };
    match std::fs::metadata(&resolved) {
        Err(_) => out.push((
            category,
            format!("{what} file \"{program}\" does not exist"),
        )),
        Ok(meta) if meta.is_dir() => out.push((
            category,
            format!("{what} file \"{program}\" is a directory"),
        )),
        Ok(_) => {}
    }
}

/// PCFileName must match the file's basename (case-insensitive).
fn check_filename(ppd: &Ppd, file_name: Option<&str>, out: &mut Vec<(Category, String)>) {
    let Some(file_name) = file_name else {
        return; // stdin
    };
    if ppd.pc_file_name.is_empty() {
        return;
    }
    if !ppd.pc_file_name.eq_ignore_ascii_case(file_name) {
        out.push((
            Category::FILENAME,
            format!(
                "PCFileName \"{}\" does not match file name \"{file_name}\"",
                ppd.pc_file_name
            ),
        ));
    }
}
