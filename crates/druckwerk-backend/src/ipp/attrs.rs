// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed IPP job-template encoding from the opaque option map.
//
// Every option value arrives as a string; the wire format wants typed
// values. The mapping is fixed: known integer and enum attributes get
// numeric tags, ranges and resolutions get their structured tags, and the
// remaining template keys travel as keywords from a restricted allowlist.
// Values that fail to parse for their declared type are dropped rather
// than sent mistyped.

use ::ipp::attribute::IppAttribute;
use ::ipp::value::IppValue;
use std::collections::BTreeMap;
use tracing::warn;

use druckwerk_core::options::{JobOptions, is_excluded_key};

const INTEGER_KEYS: &[&str] = &[
    "copies",
    "job-priority",
    "number-up",
    "number-of-retries",
    "retry-interval",
    "retry-time-out",
    "job-cancel-after",
];

const ENUM_KEYS: &[&str] = &["print-quality", "orientation-requested"];

/// Template keys passed through as keywords.
const KEYWORD_KEYS: &[&str] = &[
    "media",
    "media-source",
    "media-type",
    "sides",
    "output-bin",
    "output-order",
    "print-color-mode",
    "print-content-optimize",
    "print-rendering-intent",
    "print-scaling",
    "multiple-document-handling",
    "job-hold-until",
];

/// Encode job options as IPP job-template attributes.
pub fn job_template_attributes(options: &JobOptions) -> Vec<IppAttribute> {
    let template = options
        .get("finishing-template")
        .filter(|t| !t.is_empty() && *t != "none");

    let mut out = Vec::new();
    for (key, value) in options.iter() {
        if is_excluded_key(key) || value.is_empty() {
            continue;
        }

        // Legacy option spelled the modern way when possible.
        let key = if key == "output-mode"
            && options.get("print-color-mode").is_none()
            && matches!(value, "color" | "monochrome")
        {
            "print-color-mode"
        } else {
            key
        };

        if INTEGER_KEYS.contains(&key) {
            match value.parse::<i32>() {
                Ok(n) => out.push(IppAttribute::new(key, IppValue::Integer(n))),
                Err(_) => warn!(key, value, "dropping non-integer attribute value"),
            }
        } else if ENUM_KEYS.contains(&key) {
            match value.parse::<i32>() {
                Ok(n) => out.push(IppAttribute::new(key, IppValue::Enum(n))),
                Err(_) => warn!(key, value, "dropping non-enum attribute value"),
            }
        } else if key == "finishings" {
            if template.is_some() {
                continue; // superseded by finishings-col below
            }
            if let Some(v) = multi_value(value, |t| t.parse::<i32>().ok().map(IppValue::Enum)) {
                out.push(IppAttribute::new(key, v));
            }
        } else if key == "page-ranges" {
            if let Some(v) = multi_value(value, parse_range) {
                out.push(IppAttribute::new(key, v));
            }
        } else if key == "printer-resolution" {
            match parse_resolution(value) {
                Some(v) => out.push(IppAttribute::new(key, v)),
                None => warn!(key, value, "dropping malformed resolution"),
            }
        } else if key == "job-sheets" {
            let mut names: Vec<IppValue> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .take(2)
                .map(|s| IppValue::NameWithoutLanguage(s.to_owned()))
                .collect();
            match names.len() {
                0 => {}
                1 => out.push(IppAttribute::new(key, names.remove(0))),
                _ => out.push(IppAttribute::new(key, IppValue::Array(names))),
            }
        } else if key == "finishing-template" {
            // Handled once below so it lands after the loop regardless of
            // key ordering.
        } else if KEYWORD_KEYS.contains(&key) {
            out.push(IppAttribute::new(key, IppValue::Keyword(value.to_owned())));
        }
        // Anything else is not a job-template attribute we forward.
    }

    if let Some(template) = template {
        let mut member = BTreeMap::new();
        member.insert("finishing-template".to_owned(), keyword_or_name(template));
        out.push(IppAttribute::new(
            "finishings-col",
            IppValue::Collection(member),
        ));
    }

    out
}

/// Keyword unless the value needs name semantics (uppercase or spaces).
fn keyword_or_name(value: &str) -> IppValue {
    if value.chars().any(|c| c.is_ascii_uppercase() || c == ' ') {
        IppValue::NameWithoutLanguage(value.to_owned())
    } else {
        IppValue::Keyword(value.to_owned())
    }
}

/// Parse a comma-separated list; a single element stays scalar.
fn multi_value(value: &str, parse: impl Fn(&str) -> Option<IppValue>) -> Option<IppValue> {
    let parsed: Vec<IppValue> = value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|t| parse(t))
        .collect();
    match parsed.len() {
        0 => None,
        1 => parsed.into_iter().next(),
        _ => Some(IppValue::Array(parsed)),
    }
}

/// `N` or `N-M` page range.
fn parse_range(token: &str) -> Option<IppValue> {
    let (lo, hi) = match token.split_once('-') {
        Some((lo, hi)) => (lo.trim().parse().ok()?, hi.trim().parse().ok()?),
        None => {
            let n: i32 = token.trim().parse().ok()?;
            (n, n)
        }
    };
    if lo <= 0 || hi < lo {
        return None;
    }
    Some(IppValue::RangeOfInteger { min: lo, max: hi })
}

/// `N`, `NxM`, with an optional `dpi` suffix.
fn parse_resolution(value: &str) -> Option<IppValue> {
    let trimmed = value
        .trim()
        .trim_end_matches("dpi")
        .trim_end_matches("DPI")
        .trim();
    let (x, y) = match trimmed.split_once(['x', 'X']) {
        Some((x, y)) => (x.trim().parse().ok()?, y.trim().parse().ok()?),
        None => {
            let n: i32 = trimmed.parse().ok()?;
            (n, n)
        }
    };
    if x <= 0 || y <= 0 {
        return None;
    }
    Some(IppValue::Resolution {
        cross_feed: x,
        feed: y,
        units: 3, // dots per inch
    })
}
