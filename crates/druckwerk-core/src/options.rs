// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job option maps.
//
// Options are an opaque string→string mapping carrying both standard IPP
// job-template attributes ("copies", "media", …) and internal scheduling
// hints ("cups-retry-at", "cups-hold-until", …). They are persisted as a
// JSON blob and must round-trip byte-for-byte through the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Keys with this prefix are scheduler-internal and never leave the process.
pub const INTERNAL_PREFIX: &str = "cups-";

/// An ordered option map. `BTreeMap` keeps key iteration sorted, which makes
/// the filter options string deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOptions(pub BTreeMap<String, String>);

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the persisted JSON blob. An empty or missing blob yields an
    /// empty map.
    pub fn from_json(blob: &str) -> Result<Self> {
        if blob.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_json::from_str(blob)?)
    }

    /// Serialize back to the persisted JSON blob.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Integer accessor; returns `None` when the key is absent or not a
    /// number.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Boolean accessor accepting the usual spellings.
    pub fn truthy(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("true") | Some("yes") | Some("on") | Some("1")
        )
    }

    /// `job-priority`, clamped to [1, 100] with fallback 50.
    pub fn priority(&self) -> i64 {
        self.get_int("job-priority").unwrap_or(50).clamp(1, 100)
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build the options string passed as argv\[5\] to every filter.
    ///
    /// Space-joined, key-sorted `key=value` pairs, skipping internal and
    /// empty entries. When `finishing-template` is set (and not "none"),
    /// `finishings` is suppressed and the template travels as
    /// `cupsFinishingTemplate`.
    pub fn options_string(&self) -> String {
        let template = self
            .get("finishing-template")
            .filter(|t| !t.is_empty() && *t != "none");

        let mut parts = Vec::new();
        for (key, value) in self.iter() {
            if is_excluded_key(key) || value.is_empty() {
                continue;
            }
            match key {
                "finishings" if template.is_some() => continue,
                "finishing-template" => {
                    if let Some(t) = template {
                        parts.push(format!("cupsFinishingTemplate={t}"));
                    }
                }
                _ => parts.push(format!("{key}={value}")),
            }
        }
        parts.join(" ")
    }
}

impl FromIterator<(String, String)> for JobOptions {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether a key is withheld from filters and from IPP job-template
/// encoding: internal `cups-*` hints, `custom.*` parameters, `*-supplied`
/// echoes, and the fidelity flag.
pub fn is_excluded_key(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
        || key.starts_with("custom.")
        || key.ends_with("-supplied")
        || key == "job-attribute-fidelity"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> JobOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn json_round_trip() {
        let o = opts(&[("copies", "2"), ("media", "A4")]);
        let blob = o.to_json().expect("serialize");
        let back = JobOptions::from_json(&blob).expect("parse");
        assert_eq!(o, back);
    }

    #[test]
    fn empty_blob_is_empty_map() {
        assert!(JobOptions::from_json("").expect("parse").is_empty());
        assert!(JobOptions::from_json("  ").expect("parse").is_empty());
    }

    #[test]
    fn priority_clamps_and_defaults() {
        assert_eq!(opts(&[]).priority(), 50);
        assert_eq!(opts(&[("job-priority", "7")]).priority(), 7);
        assert_eq!(opts(&[("job-priority", "300")]).priority(), 100);
        assert_eq!(opts(&[("job-priority", "-3")]).priority(), 1);
        assert_eq!(opts(&[("job-priority", "junk")]).priority(), 50);
    }

    #[test]
    fn options_string_sorts_and_excludes() {
        let o = opts(&[
            ("media", "A4"),
            ("copies", "2"),
            ("cups-retry-at", "12345"),
            ("custom.PageSize", "1x1"),
            ("media-supplied", "A4"),
            ("job-attribute-fidelity", "true"),
            ("empty", ""),
        ]);
        assert_eq!(o.options_string(), "copies=2 media=A4");
    }

    #[test]
    fn finishing_template_renames_and_suppresses_finishings() {
        let o = opts(&[
            ("finishings", "4"),
            ("finishing-template", "punch-dual-left"),
            ("copies", "1"),
        ]);
        assert_eq!(
            o.options_string(),
            "copies=1 cupsFinishingTemplate=punch-dual-left"
        );

        // "none" keeps finishings as-is.
        let o = opts(&[("finishings", "4"), ("finishing-template", "none")]);
        assert_eq!(o.options_string(), "finishings=4");
    }

    #[test]
    fn truthy_spellings() {
        for v in ["true", "yes", "on", "1", "TRUE", "Yes"] {
            assert!(opts(&[("raw", v)]).truthy("raw"), "{v} should be truthy");
        }
        for v in ["false", "no", "off", "0", ""] {
            assert!(!opts(&[("raw", v)]).truthy("raw"), "{v} should be falsy");
        }
        assert!(!opts(&[]).truthy("raw"));
    }
}
