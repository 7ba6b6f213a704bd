// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Adobe PPD 4.3 parser.
//
// The model captures what the scheduler and the conformance checker need:
// options with their choices and defaults, page-size geometry, declared
// filters, UI constraints, custom-size bounds, and textual metadata.
// Dimensions arrive in PostScript points and are stored in PWG units
// (hundredths of a millimetre). Gzip-compressed files (magic 1f 8b) are
// decompressed transparently.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use druckwerk_mime::db::Conversion;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading a PPD file.
#[derive(Debug, Error)]
pub enum PpdError {
    #[error("cannot open PPD: {0}")]
    Open(String),

    #[error("not a PPD file (missing *PPD-Adobe header)")]
    BadFormat,

    #[error("decompression failed: {0}")]
    Gzip(String),
}

/// One choice of a UI option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpdChoice {
    pub keyword: String,
    /// Human-readable translation; falls back to the keyword.
    pub text: String,
    pub value: String,
}

/// A UI option (`*OpenUI` block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpdOption {
    pub keyword: String,
    pub text: String,
    /// `PickOne`, `PickMany`, or `Boolean`.
    pub ui: String,
    pub choices: Vec<PpdChoice>,
}

impl PpdOption {
    pub fn has_choice(&self, keyword: &str) -> bool {
        self.choices.iter().any(|c| c.keyword == keyword)
    }
}

/// Geometry of one page size, in PWG hundredths of a millimetre. Margins
/// are distances from the respective sheet edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize {
    pub width: i64,
    pub length: i64,
    pub left: i64,
    pub bottom: i64,
    pub right: i64,
    pub top: i64,
}

/// A `*UIConstraints` record. Choice fields are `None` when the constraint
/// names only the option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub option1: String,
    pub choice1: Option<String>,
    pub option2: String,
    pub choice2: Option<String>,
}

/// A declared filter: `*cupsFilter` (no destination, converts to the
/// device format) or `*cupsFilter2` (explicit source and destination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpdFilter {
    pub source: String,
    pub dest: Option<String>,
    pub cost: i64,
    pub program: String,
}

/// Bounds for custom page sizes, PWG units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomBounds {
    pub min_width: i64,
    pub max_width: i64,
    pub min_length: i64,
    pub max_length: i64,
}

/// An ICC profile declaration (`*cupsICCProfile selector: "path"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IccProfile {
    pub selector: String,
    pub path: String,
}

/// Parsed PPD model.
#[derive(Debug, Clone, Default)]
pub struct Ppd {
    /// Value of the `*PPD-Adobe` header, e.g. "4.3".
    pub format_version: String,
    pub nickname: String,
    pub model_name: String,
    pub manufacturer: String,
    pub language_version: String,
    pub pc_file_name: String,
    pub color_device: bool,
    pub options: Vec<PpdOption>,
    /// `Default<Option> → choice keyword`.
    pub defaults: HashMap<String, String>,
    /// `*PaperDimension` entries in declaration order.
    pub paper_dimensions: Vec<(String, i64, i64)>,
    /// `*ImageableArea` entries: name → (left, bottom, right, top) margins.
    pub imageable_areas: HashMap<String, (i64, i64, i64, i64)>,
    pub filters: Vec<PpdFilter>,
    pub icc_profiles: Vec<IccProfile>,
    pub constraints: Vec<Constraint>,
    pub has_custom_page_size: bool,
    pub custom_bounds: CustomBounds,
    /// `*OrderDependency` records: (order, section, option keyword).
    pub order_dependencies: Vec<(f64, String, String)>,
    /// `*APPrinterPreset` name/text pairs.
    pub presets: Vec<(String, String)>,
    /// Lines whose bytes were not valid UTF-8 (1-based line numbers).
    pub utf8_violations: Vec<usize>,
}

/// Convert PostScript points to PWG hundredths of a millimetre.
pub fn points_to_pwg(points: f64) -> i64 {
    (points * 2540.0 / 72.0).round() as i64
}

impl Ppd {
    /// Load a PPD from a file path, decompressing gzip transparently.
    pub fn load(path: &Path) -> Result<Self, PpdError> {
        let raw = std::fs::read(path).map_err(|e| PpdError::Open(e.to_string()))?;
        Self::parse_bytes(&raw)
    }

    /// Parse PPD bytes, decompressing gzip transparently.
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, PpdError> {
        let body;
        let bytes: &[u8] = if raw.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = flate2::read::GzDecoder::new(raw);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PpdError::Gzip(e.to_string()))?;
            body = out;
            &body
        } else {
            raw
        };

        // The header may be preceded by comments, but must be present.
        if !contains_subslice(bytes, b"*PPD-Adobe:") {
            return Err(PpdError::BadFormat);
        }

        let mut ppd = Self::default();
        let mut open_option: Option<PpdOption> = None;

        for statement in scan_statements(bytes, &mut ppd.utf8_violations) {
            ppd.apply(statement, &mut open_option);
        }
        // An unterminated *OpenUI block still contributes its option.
        if let Some(option) = open_option.take() {
            ppd.options.push(option);
        }

        debug!(
            options = ppd.options.len(),
            sizes = ppd.paper_dimensions.len(),
            filters = ppd.filters.len(),
            "PPD parsed"
        );
        Ok(ppd)
    }

    fn apply(&mut self, s: Statement, open_option: &mut Option<PpdOption>) {
        match s.keyword.as_str() {
            "PPD-Adobe" => self.format_version = s.value,
            "NickName" => self.nickname = s.value,
            "ModelName" => self.model_name = s.value,
            "Manufacturer" => self.manufacturer = s.value,
            "LanguageVersion" => self.language_version = s.value,
            "PCFileName" => self.pc_file_name = s.value,
            "ColorDevice" => self.color_device = s.value.trim() == "True",
            "OpenUI" => {
                if let Some(done) = open_option.take() {
                    self.options.push(done);
                }
                let name = s.option.unwrap_or_default();
                let keyword = name.trim_start_matches('*').to_owned();
                *open_option = Some(PpdOption {
                    keyword,
                    text: s.translation.unwrap_or_default(),
                    ui: s.value,
                    choices: Vec::new(),
                });
            }
            "CloseUI" => {
                if let Some(done) = open_option.take() {
                    self.options.push(done);
                }
            }
            "PaperDimension" => {
                if let (Some(name), Some((w, l))) = (s.option, parse_pair(&s.value)) {
                    self.paper_dimensions
                        .push((name, points_to_pwg(w), points_to_pwg(l)));
                }
            }
            "ImageableArea" => {
                if let (Some(name), Some((llx, lly, urx, ury))) =
                    (s.option.clone(), parse_quad(&s.value))
                {
                    // Margins relative to the sheet edges need the matching
                    // dimension; right/top margins are resolved lazily in
                    // `page_size` when both entries exist. Stored here as
                    // raw coordinates.
                    self.imageable_areas.insert(
                        name,
                        (
                            points_to_pwg(llx),
                            points_to_pwg(lly),
                            points_to_pwg(urx),
                            points_to_pwg(ury),
                        ),
                    );
                }
            }
            "cupsFilter" => {
                if let Some(f) = parse_cups_filter(&s.value, false) {
                    self.filters.push(f);
                }
            }
            "cupsFilter2" => {
                if let Some(f) = parse_cups_filter(&s.value, true) {
                    self.filters.push(f);
                }
            }
            "cupsICCProfile" => {
                self.icc_profiles.push(IccProfile {
                    selector: s.option.unwrap_or_default(),
                    path: s.value.trim().to_owned(),
                });
            }
            "UIConstraints" | "NonUIConstraints" => {
                if let Some(c) = parse_constraint(&s.value) {
                    self.constraints.push(c);
                }
            }
            "CustomPageSize" => self.has_custom_page_size = true,
            "MaxMediaWidth" => {
                if let Ok(points) = s.value.trim().parse::<f64>() {
                    self.custom_bounds.max_width = points_to_pwg(points);
                }
            }
            "MaxMediaHeight" => {
                if let Ok(points) = s.value.trim().parse::<f64>() {
                    self.custom_bounds.max_length = points_to_pwg(points);
                }
            }
            "ParamCustomPageSize" => {
                // "*ParamCustomPageSize Width: 1 points <min> <max>"
                let tokens: Vec<&str> = s.value.split_whitespace().collect();
                if tokens.len() >= 4 {
                    let min = tokens[2].parse::<f64>().unwrap_or(0.0);
                    let max = tokens[3].parse::<f64>().unwrap_or(0.0);
                    match s.option.as_deref() {
                        Some("Width") => {
                            self.custom_bounds.min_width = points_to_pwg(min);
                            self.custom_bounds.max_width = points_to_pwg(max);
                        }
                        Some("Height") => {
                            self.custom_bounds.min_length = points_to_pwg(min);
                            self.custom_bounds.max_length = points_to_pwg(max);
                        }
                        _ => {}
                    }
                }
            }
            "OrderDependency" => {
                let tokens: Vec<&str> = s.value.split_whitespace().collect();
                if tokens.len() >= 3
                    && let Ok(order) = tokens[0].parse::<f64>()
                {
                    self.order_dependencies.push((
                        order,
                        tokens[1].to_owned(),
                        tokens[2].trim_start_matches('*').to_owned(),
                    ));
                }
            }
            "APPrinterPreset" => {
                self.presets.push((
                    s.option.unwrap_or_default(),
                    s.translation.unwrap_or_default(),
                ));
            }
            keyword if keyword.starts_with("Default") => {
                let option = keyword.trim_start_matches("Default").to_owned();
                if !option.is_empty() {
                    self.defaults.insert(option, s.value.trim().to_owned());
                }
            }
            _ => {
                // Any other statement with an option keyword inside an open
                // UI block is a choice of that option.
                if let (Some(open), Some(option)) = (open_option.as_mut(), s.option)
                    && s.keyword == open.keyword
                {
                    open.choices.push(PpdChoice {
                        keyword: option,
                        text: s.translation.unwrap_or_default(),
                        value: s.value,
                    });
                }
            }
        }
    }

    pub fn option(&self, keyword: &str) -> Option<&PpdOption> {
        self.options.iter().find(|o| o.keyword == keyword)
    }

    pub fn default_choice(&self, keyword: &str) -> Option<&str> {
        self.defaults.get(keyword).map(String::as_str)
    }

    /// Full geometry of a named size, when both a dimension and an
    /// imageable area were declared.
    pub fn page_size(&self, name: &str) -> Option<PageSize> {
        let &(_, width, length) = self.paper_dimensions.iter().find(|(n, _, _)| n == name)?;
        let &(llx, lly, urx, ury) = self.imageable_areas.get(name)?;
        Some(PageSize {
            width,
            length,
            left: llx,
            bottom: lly,
            right: width - urx,
            top: length - ury,
        })
    }

    /// Target MIME types this printer accepts: `cupsFilter` sources and
    /// `cupsFilter2` destinations, in declaration order.
    pub fn dest_set(&self) -> Vec<String> {
        let mut out = Vec::new();
        for f in &self.filters {
            let target = f.dest.clone().unwrap_or_else(|| f.source.clone());
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }

    /// Declared filters as planner conversion records. `cupsFilter` entries
    /// leave the destination empty for the planner to resolve against the
    /// selected target.
    pub fn planner_filters(&self) -> Vec<Conversion> {
        self.filters
            .iter()
            .map(|f| Conversion {
                source: f.source.clone(),
                dest: f.dest.clone().unwrap_or_default(),
                cost: f.cost,
                program: f.program.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Statement scanner
// ---------------------------------------------------------------------------

/// One `*Keyword Option/Translation: value` statement.
#[derive(Debug, Clone)]
struct Statement {
    keyword: String,
    option: Option<String>,
    translation: Option<String>,
    value: String,
}

/// Scan raw PPD bytes into statements. Quoted values may span lines; lines
/// with invalid UTF-8 are recorded and decoded lossily so parsing can
/// continue.
fn scan_statements(bytes: &[u8], utf8_violations: &mut Vec<usize>) -> Vec<Statement> {
    let mut lines: Vec<String> = Vec::new();
    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = strip_cr(line);
        match std::str::from_utf8(line) {
            Ok(s) => lines.push(s.to_owned()),
            Err(_) => {
                utf8_violations.push(idx + 1);
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
        }
    }

    let mut statements = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim_end();
        i += 1;
        if !line.starts_with('*') || line.starts_with("*%") {
            continue;
        }
        let Some((name_part, value_part)) = line[1..].split_once(':') else {
            continue;
        };

        let mut value = value_part.trim_start().to_owned();
        if value.starts_with('"') {
            // Consume lines until the closing quote.
            let mut body = value[1..].to_owned();
            while !body.contains('"') && i < lines.len() {
                body.push('\n');
                body.push_str(lines[i].trim_end());
                i += 1;
            }
            value = match body.split_once('"') {
                Some((inner, _)) => inner.to_owned(),
                None => body,
            };
        }

        let mut names = name_part.trim().splitn(2, char::is_whitespace);
        let keyword = names.next().unwrap_or("").to_owned();
        let rest = names.next().map(str::trim);

        let (option, translation) = match rest {
            None => (None, None),
            Some(rest) => match rest.split_once('/') {
                Some((opt, tr)) => (Some(opt.to_owned()), Some(tr.to_owned())),
                None => (Some(rest.to_owned()), None),
            },
        };

        statements.push(Statement {
            keyword,
            option,
            translation,
            value,
        });
    }
    statements
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn parse_pair(value: &str) -> Option<(f64, f64)> {
    let mut it = value.split_whitespace();
    let a = it.next()?.parse().ok()?;
    let b = it.next()?.parse().ok()?;
    Some((a, b))
}

fn parse_quad(value: &str) -> Option<(f64, f64, f64, f64)> {
    let mut it = value.split_whitespace();
    let a = it.next()?.parse().ok()?;
    let b = it.next()?.parse().ok()?;
    let c = it.next()?.parse().ok()?;
    let d = it.next()?.parse().ok()?;
    Some((a, b, c, d))
}

/// Parse a `cupsFilter`/`cupsFilter2` value. With `two` set the format is
/// `source dest cost program…`, otherwise `source cost program…`.
fn parse_cups_filter(value: &str, two: bool) -> Option<PpdFilter> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if two {
        if tokens.len() < 4 {
            return None;
        }
        Some(PpdFilter {
            source: tokens[0].to_ascii_lowercase(),
            dest: Some(tokens[1].to_ascii_lowercase()),
            cost: tokens[2].parse().ok()?,
            program: tokens[3..].join(" "),
        })
    } else {
        if tokens.len() < 3 {
            return None;
        }
        Some(PpdFilter {
            source: tokens[0].to_ascii_lowercase(),
            dest: None,
            cost: tokens[1].parse().ok()?,
            program: tokens[2..].join(" "),
        })
    }
}

/// Parse `*Opt1 Choice1 *Opt2 Choice2` (choices optional).
fn parse_constraint(value: &str) -> Option<Constraint> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let mut options: Vec<(String, Option<String>)> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if let Some(option) = token.strip_prefix('*') {
            let choice = tokens
                .get(i + 1)
                .filter(|t| !t.starts_with('*'))
                .map(|t| t.to_string());
            let step = if choice.is_some() { 2 } else { 1 };
            options.push((option.to_owned(), choice));
            i += step;
        } else {
            i += 1;
        }
    }
    if options.len() != 2 {
        return None;
    }
    let (option2, choice2) = options.pop()?;
    let (option1, choice1) = options.pop()?;
    Some(Constraint {
        option1,
        choice1,
        option2,
        choice2,
    })
}
