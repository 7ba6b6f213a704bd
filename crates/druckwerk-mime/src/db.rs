// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The MIME database: `type → extensions` mappings from `*.types` files and
// `(source, dest, cost, program)` conversion records from `*.convs` files.

use std::collections::HashMap;
use std::path::Path;

use druckwerk_core::error::{DruckwerkError, Result};
use tracing::{debug, warn};

/// One conversion record: `program` turns bytes of `source` into `dest` at
/// the given cost. The program spec is whitespace-separated; the first
/// token names the external converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub source: String,
    /// Empty for PPD-declared filters that accept any selected target.
    pub dest: String,
    pub cost: i64,
    pub program: String,
}

impl Conversion {
    /// Effective edge weight; zero or negative costs count as 1 so the
    /// search terminates.
    pub fn weight(&self) -> i64 {
        if self.cost > 0 { self.cost } else { 1 }
    }

    /// First token of the program spec, the converter executable.
    pub fn program_name(&self) -> &str {
        self.program.split_whitespace().next().unwrap_or("")
    }

    /// Pass-through stages carry no program (or the literal `-`).
    pub fn is_passthrough(&self) -> bool {
        let name = self.program_name();
        name.is_empty() || name == "-"
    }
}

/// In-memory MIME database.
#[derive(Debug, Clone, Default)]
pub struct MimeDatabase {
    /// `type → extensions` (lower-cased, without dots).
    types: HashMap<String, Vec<String>>,
    /// All known conversions, in load order.
    conversions: Vec<Conversion>,
}

impl MimeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.types` and `*.convs` file in the given directories.
    /// Missing directories are skipped; unreadable files fail the load.
    pub fn load_dirs(dirs: &[impl AsRef<Path>]) -> Result<Self> {
        let mut db = Self::new();
        for dir in dirs {
            let dir = dir.as_ref();
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(DruckwerkError::Mime(format!("{}: {e}", dir.display())));
                }
            };
            let mut paths: Vec<_> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect();
            paths.sort();

            for path in paths {
                match path.extension().and_then(|e| e.to_str()) {
                    Some("types") => db.load_types_file(&path)?,
                    Some("convs") => db.load_convs_file(&path)?,
                    _ => {}
                }
            }
        }
        debug!(
            types = db.types.len(),
            conversions = db.conversions.len(),
            "MIME database loaded"
        );
        Ok(db)
    }

    fn load_types_file(&mut self, path: &Path) -> Result<()> {
        let body = std::fs::read_to_string(path)
            .map_err(|e| DruckwerkError::Mime(format!("{}: {e}", path.display())))?;
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(mime) = tokens.next() else { continue };
            if !mime.contains('/') {
                warn!(file = %path.display(), line, "skipping malformed type line");
                continue;
            }
            // Remaining bare tokens are extensions; match rules like
            // `string(0,%PDF)` are recognition hints we do not evaluate.
            let exts: Vec<String> = tokens
                .filter(|t| !t.contains('(') && !t.contains(')'))
                .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
                .collect();
            self.add_type(mime, exts);
        }
        Ok(())
    }

    fn load_convs_file(&mut self, path: &Path) -> Result<()> {
        let body = std::fs::read_to_string(path)
            .map_err(|e| DruckwerkError::Mime(format!("{}: {e}", path.display())))?;
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.splitn(4, char::is_whitespace);
            let (Some(source), Some(dest), Some(cost)) =
                (tokens.next(), tokens.next(), tokens.next())
            else {
                warn!(file = %path.display(), line, "skipping malformed conversion line");
                continue;
            };
            let Ok(cost) = cost.parse::<i64>() else {
                warn!(file = %path.display(), line, "skipping conversion with bad cost");
                continue;
            };
            let program = tokens.next().unwrap_or("").trim().to_owned();
            self.add_conversion(Conversion {
                source: source.to_ascii_lowercase(),
                dest: dest.to_ascii_lowercase(),
                cost,
                program,
            });
        }
        Ok(())
    }

    pub fn add_type(&mut self, mime: &str, extensions: Vec<String>) {
        self.types
            .entry(mime.to_ascii_lowercase())
            .or_default()
            .extend(extensions);
    }

    pub fn add_conversion(&mut self, conversion: Conversion) {
        self.conversions.push(conversion);
    }

    /// Resolve a file extension (case-insensitive, with or without the dot)
    /// to a MIME type.
    pub fn type_for_extension(&self, ext: &str) -> Option<&str> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.types
            .iter()
            .find(|(_, exts)| exts.iter().any(|e| *e == ext))
            .map(|(mime, _)| mime.as_str())
    }

    pub fn conversions(&self) -> &[Conversion] {
        &self.conversions
    }

    pub fn is_known_type(&self, mime: &str) -> bool {
        self.types.contains_key(&mime.to_ascii_lowercase())
    }
}
