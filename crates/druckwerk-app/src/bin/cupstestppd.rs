// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// cupstestppd — check PPD files for conformance.
//
//   cupstestppd [options] file1 [file2 …]
//   program | cupstestppd [options] -
//
// Exit codes: 0 all files conform, 1 usage error, 2 a file could not be
// opened, 3 a file is not a PPD at all, 4 conformance errors were found.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use druckwerk_ppd::{Category, CheckOptions, CheckReport, Ppd, PpdError, Severity, check_ppd};

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 1;
const EXIT_OPEN: u8 = 2;
const EXIT_FORMAT: u8 = 3;
const EXIT_CONFORMANCE: u8 = 4;

#[derive(Debug, Parser)]
#[command(
    name = "cupstestppd",
    version,
    about = "Check PPD files for conformance",
    disable_help_flag = false
)]
struct Cli {
    /// Ignore categories: filename, filters, profiles, none, all
    /// (all = filters + profiles).
    #[arg(short = 'I', value_name = "CATEGORY")]
    ignore: Vec<String>,

    /// Report categories as warnings instead of errors: all, none,
    /// constraints, defaults, duplex, filters, profiles, sizes,
    /// translations.
    #[arg(short = 'W', value_name = "CATEGORY")]
    warn: Vec<String>,

    /// Alternate root for absolute filter and profile paths.
    #[arg(short = 'R', value_name = "ROOT")]
    root: Option<PathBuf>,

    /// No per-file output.
    #[arg(short = 'q', conflicts_with = "verbose")]
    quiet: bool,

    /// Detailed conformance output; twice adds a file summary.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Relaxed mode: skip the PCFileName check.
    #[arg(short = 'r')]
    relaxed: bool,

    /// PPD files to check; `-` reads from standard input.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help/version requests are not usage errors.
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = e.print();
                return ExitCode::from(EXIT_OK);
            }
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let options = match build_options(&cli) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("cupstestppd: {message}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut worst = EXIT_OK;
    for file in &cli.files {
        let code = check_one(file, &cli, &options);
        worst = worst.max(code);
    }
    ExitCode::from(worst)
}

/// Translate `-I`/`-W` lists into category masks.
fn build_options(cli: &Cli) -> Result<CheckOptions, String> {
    let mut ignore = Category::empty();
    for name in &cli.ignore {
        match name.as_str() {
            "none" => ignore = Category::empty(),
            "all" => ignore |= Category::FILTERS | Category::PROFILES,
            "filename" => ignore |= Category::FILENAME,
            "filters" => ignore |= Category::FILTERS,
            "profiles" => ignore |= Category::PROFILES,
            other => return Err(format!("unknown -I category \"{other}\"")),
        }
    }

    let mut warn = Category::empty();
    for name in &cli.warn {
        match name.as_str() {
            "none" => warn = Category::empty(),
            "all" => {
                warn = Category::CONSTRAINTS
                    | Category::DEFAULTS
                    | Category::DUPLEX
                    | Category::FILTERS
                    | Category::PROFILES
                    | Category::SIZES
                    | Category::TRANSLATIONS;
            }
            other => match Category::from_cli_name(other) {
                Some(c) if c != Category::FILENAME => warn |= c,
                _ => return Err(format!("unknown -W category \"{other}\"")),
            },
        }
    }

    Ok(CheckOptions {
        warn,
        ignore,
        relaxed: cli.relaxed,
        root: cli.root.clone(),
    })
}

/// Check one file (or stdin) and print its report. Returns the exit code
/// contribution.
fn check_one(file: &str, cli: &Cli, options: &CheckOptions) -> u8 {
    let (bytes, display, base_name) = if file == "-" {
        let mut buf = Vec::new();
        if let Err(e) = std::io::stdin().read_to_end(&mut buf) {
            eprintln!("cupstestppd: (stdin): {e}");
            return EXIT_OPEN;
        }
        (buf, "(stdin)".to_owned(), None)
    } else {
        match std::fs::read(file) {
            Ok(bytes) => {
                let base = Path::new(file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                (bytes, file.to_owned(), base)
            }
            Err(e) => {
                eprintln!("cupstestppd: {file}: {e}");
                return EXIT_OPEN;
            }
        }
    };

    let ppd = match Ppd::parse_bytes(&bytes) {
        Ok(ppd) => ppd,
        Err(PpdError::BadFormat) => {
            if !cli.quiet {
                println!("{display}: FAIL");
                println!("  **FAIL**  Missing *PPD-Adobe header");
            }
            return EXIT_FORMAT;
        }
        Err(e) => {
            eprintln!("cupstestppd: {display}: {e}");
            return EXIT_OPEN;
        }
    };

    let report = check_ppd(&ppd, base_name.as_deref(), options);
    if !cli.quiet {
        print_report(&display, &ppd, &report, cli.verbose);
    }
    if report.passed() {
        EXIT_OK
    } else {
        EXIT_CONFORMANCE
    }
}

fn print_report(display: &str, ppd: &Ppd, report: &CheckReport, verbose: u8) {
    println!(
        "{display}: {}",
        if report.passed() { "PASS" } else { "FAIL" }
    );
    for finding in &report.findings {
        match finding.severity {
            Severity::Error => println!("  **FAIL**  {}", finding.message),
            Severity::Warning => println!("        WARN    {}", finding.message),
        }
    }

    if verbose >= 2 {
        println!();
        println!("    NickName:        {}", ppd.nickname);
        println!("    ModelName:       {}", ppd.model_name);
        println!("    Manufacturer:    {}", ppd.manufacturer);
        println!("    LanguageVersion: {}", ppd.language_version);
        println!(
            "    ColorDevice:     {}",
            if ppd.color_device { "True" } else { "False" }
        );
        for option in &ppd.options {
            let choices: Vec<&str> = option.choices.iter().map(|c| c.keyword.as_str()).collect();
            println!("    {} ({}): {}", option.keyword, option.ui, choices.join(" "));
        }
    }
}
