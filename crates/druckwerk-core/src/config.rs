// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.
//
// Druckwerk reads the classic pair of config files: `cups-files.conf` for
// filesystem locations and `cupsd.conf` for scheduler behavior. Both share
// one syntax: a case-sensitive directive per line, `#` comments, and
// `<Block …>…</Block>` nesting for policies and locations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DruckwerkError, Result};

/// One parsed configuration directive. Block directives keep their nested
/// children; plain directives have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: String,
    pub children: Vec<Directive>,
}

/// Parse a configuration file body into a directive tree.
pub fn parse_directives(text: &str) -> Result<Vec<Directive>> {
    let mut stack: Vec<Directive> = Vec::new();
    let mut top: Vec<Directive> = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("</") {
            let name = rest.trim_end_matches('>').trim();
            let block = stack.pop().ok_or_else(|| {
                DruckwerkError::Config(format!("line {}: unmatched </{name}>", lineno + 1))
            })?;
            if block.key != name {
                return Err(DruckwerkError::Config(format!(
                    "line {}: </{name}> closes <{}>",
                    lineno + 1,
                    block.key
                )));
            }
            match stack.last_mut() {
                Some(parent) => parent.children.push(block),
                None => top.push(block),
            }
        } else if let Some(rest) = line.strip_prefix('<') {
            let inner = rest.trim_end_matches('>').trim();
            let (key, value) = split_directive(inner);
            stack.push(Directive {
                key,
                value,
                children: Vec::new(),
            });
        } else {
            let (key, value) = split_directive(line);
            let directive = Directive {
                key,
                value,
                children: Vec::new(),
            };
            match stack.last_mut() {
                Some(parent) => parent.children.push(directive),
                None => top.push(directive),
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(DruckwerkError::Config(format!("unclosed <{}> block", open.key)));
    }
    Ok(top)
}

fn split_directive(line: &str) -> (String, String) {
    match line.split_once(char::is_whitespace) {
        Some((k, v)) => (k.to_owned(), v.trim().to_owned()),
        None => (line.to_owned(), String::new()),
    }
}

/// Parse a time interval: a bare number of seconds or `<number>[s|m|h|d|w]`.
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, suffix) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, ""),
    };
    let n: u64 = digits.parse().ok()?;
    let mult = match suffix.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => return None,
    };
    Some(Duration::from_secs(n * mult))
}

/// Parse a size with an optional `k|m|g` suffix.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, suffix) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, ""),
    };
    let n: u64 = digits.parse().ok()?;
    let mult = match suffix.trim().to_ascii_lowercase().as_str() {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        _ => return None,
    };
    Some(n * mult)
}

/// Parse the usual boolean spellings.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// How long to keep finished jobs (or their files) around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preserve {
    /// Keep forever.
    Forever,
    /// Remove at the next cleanup pass.
    Never,
    /// Keep for this long after completion.
    Window(Duration),
}

impl Preserve {
    /// Parse a `PreserveJobHistory`/`PreserveJobFiles` value: a boolean or an
    /// interval.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(b) = parse_bool(s) {
            return Some(if b { Self::Forever } else { Self::Never });
        }
        parse_interval(s).map(Self::Window)
    }

    /// Whether `completed_at` is old enough (relative to `elapsed`) for the
    /// preserved data to expire.
    pub fn expired(&self, elapsed: Duration) -> bool {
        match self {
            Self::Forever => false,
            Self::Never => true,
            Self::Window(w) => elapsed >= *w,
        }
    }
}

/// Scheduler configuration assembled from `cups-files.conf` and
/// `cupsd.conf`, with the historical defaults where a directive is absent.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_root: PathBuf,
    pub data_dir: PathBuf,
    /// Spool directory: inbound document files live here.
    pub request_root: PathBuf,
    /// Converted output files are staged here before delivery.
    pub output_root: PathBuf,
    pub temp_dir: PathBuf,
    pub server_name: String,
    pub listen: Vec<String>,
    pub port: u16,
    pub browsing: bool,
    pub default_encryption: String,
    pub job_retry_limit: i64,
    pub job_retry_interval: Duration,
    pub multiple_operation_timeout: Duration,
    /// Force-cancel jobs that have been processing longer than this.
    /// Zero disables the limit.
    pub max_job_time: Duration,
    pub preserve_job_history: Preserve,
    pub preserve_job_files: Preserve,
    pub access_log_level: String,
    pub page_log_format: String,
    pub error_policy: String,
    /// `<Policy name>` blocks, kept verbatim for the front end.
    pub policies: Vec<Directive>,
    /// `<Location path>` blocks, kept verbatim for the front end.
    pub locations: Vec<Directive>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_root: PathBuf::from("/etc/cups"),
            data_dir: PathBuf::from("/usr/share/cups"),
            request_root: PathBuf::from("/var/spool/cups"),
            output_root: PathBuf::from("/var/spool/cups/out"),
            temp_dir: std::env::temp_dir(),
            server_name: String::from("localhost"),
            listen: Vec::new(),
            port: 631,
            browsing: true,
            default_encryption: String::from("IfRequested"),
            job_retry_limit: 5,
            job_retry_interval: Duration::from_secs(300),
            multiple_operation_timeout: Duration::from_secs(900),
            max_job_time: Duration::from_secs(3 * 3600),
            preserve_job_history: Preserve::Forever,
            preserve_job_files: Preserve::Window(Duration::from_secs(86400)),
            access_log_level: String::from("actions"),
            page_log_format: String::new(),
            error_policy: String::from("stop-printer"),
            policies: Vec::new(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from the two configuration files. Missing files are treated as
    /// empty, keeping the defaults.
    pub fn load(cups_files: &Path, cupsd: &Path) -> Result<Self> {
        let mut config = Self::default();
        for path in [cups_files, cupsd] {
            match std::fs::read_to_string(path) {
                Ok(text) => config.apply(&parse_directives(&text)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(DruckwerkError::Config(format!(
                        "{}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(config)
    }

    /// Apply a parsed directive tree. Keys are case-sensitive; unknown keys
    /// are ignored so front-end-only directives pass through harmlessly.
    pub fn apply(&mut self, directives: &[Directive]) {
        for d in directives {
            let v = d.value.as_str();
            match d.key.as_str() {
                "ServerRoot" => self.server_root = PathBuf::from(v),
                "DataDir" => self.data_dir = PathBuf::from(v),
                "RequestRoot" => {
                    self.request_root = PathBuf::from(v);
                    self.output_root = self.request_root.join("out");
                }
                "OutputRoot" => self.output_root = PathBuf::from(v),
                "TempDir" => self.temp_dir = PathBuf::from(v),
                "ServerName" => self.server_name = v.to_owned(),
                "Listen" => self.listen.push(v.to_owned()),
                "Port" => {
                    if let Ok(p) = v.parse() {
                        self.port = p;
                    }
                }
                "Browsing" => {
                    if let Some(b) = parse_bool(v) {
                        self.browsing = b;
                    }
                }
                "DefaultEncryption" => self.default_encryption = v.to_owned(),
                "JobRetryLimit" => {
                    if let Ok(n) = v.parse() {
                        self.job_retry_limit = n;
                    }
                }
                "JobRetryInterval" => {
                    if let Some(i) = parse_interval(v) {
                        self.job_retry_interval = i;
                    }
                }
                "MultipleOperationTimeout" => {
                    if let Some(i) = parse_interval(v) {
                        self.multiple_operation_timeout = i;
                    }
                }
                "MaxJobTime" => {
                    if let Some(i) = parse_interval(v) {
                        self.max_job_time = i;
                    }
                }
                "PreserveJobHistory" => {
                    if let Some(p) = Preserve::parse(v) {
                        self.preserve_job_history = p;
                    }
                }
                "PreserveJobFiles" => {
                    if let Some(p) = Preserve::parse(v) {
                        self.preserve_job_files = p;
                    }
                }
                "AccessLogLevel" => self.access_log_level = v.to_owned(),
                "PageLogFormat" => self.page_log_format = v.to_owned(),
                "ErrorPolicy" => self.error_policy = v.to_owned(),
                "Policy" => self.policies.push(d.clone()),
                "Location" => self.locations.push(d.clone()),
                _ => {}
            }
        }
    }

    /// Directory holding banner templates.
    pub fn banner_dir(&self) -> PathBuf {
        self.data_dir.join("banners")
    }

    /// Directory holding installed PPD files.
    pub fn ppd_dir(&self) -> PathBuf {
        self.server_root.join("ppd")
    }

    /// Directories scanned for `*.types` / `*.convs` MIME data, in load
    /// order.
    pub fn mime_dirs(&self) -> Vec<PathBuf> {
        vec![self.data_dir.join("mime"), self.server_root.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_directives() {
        let text = "# comment\nServerRoot /srv/cups\nPort 8631\n\nBrowsing No\n";
        let mut config = ServerConfig::default();
        config.apply(&parse_directives(text).expect("parse"));
        assert_eq!(config.server_root, PathBuf::from("/srv/cups"));
        assert_eq!(config.port, 8631);
        assert!(!config.browsing);
    }

    #[test]
    fn parses_nested_blocks() {
        let text = "<Policy default>\n  JobPrivateAccess all\n  <Limit Send-Document>\n    Order deny,allow\n  </Limit>\n</Policy>\n";
        let directives = parse_directives(text).expect("parse");
        assert_eq!(directives.len(), 1);
        let policy = &directives[0];
        assert_eq!(policy.key, "Policy");
        assert_eq!(policy.value, "default");
        assert_eq!(policy.children.len(), 2);
        assert_eq!(policy.children[1].key, "Limit");
        assert_eq!(policy.children[1].children[0].key, "Order");
    }

    #[test]
    fn mismatched_block_is_an_error() {
        assert!(parse_directives("<Policy a>\n</Location>\n").is_err());
        assert!(parse_directives("<Policy a>\n").is_err());
    }

    #[test]
    fn interval_suffixes() {
        assert_eq!(parse_interval("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_interval("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_interval("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_interval("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_interval("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_interval("1w"), Some(Duration::from_secs(604800)));
        assert_eq!(parse_interval("bad"), None);
        assert_eq!(parse_interval("10x"), None);
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("4k"), Some(4096));
        assert_eq!(parse_size("2m"), Some(2 << 20));
        assert_eq!(parse_size("1g"), Some(1 << 30));
    }

    #[test]
    fn preserve_values() {
        assert_eq!(Preserve::parse("Yes"), Some(Preserve::Forever));
        assert_eq!(Preserve::parse("No"), Some(Preserve::Never));
        assert_eq!(
            Preserve::parse("1d"),
            Some(Preserve::Window(Duration::from_secs(86400)))
        );
        assert!(!Preserve::Forever.expired(Duration::from_secs(u64::MAX / 2)));
        assert!(Preserve::Never.expired(Duration::ZERO));
        assert!(Preserve::Window(Duration::from_secs(60)).expired(Duration::from_secs(61)));
        assert!(!Preserve::Window(Duration::from_secs(60)).expired(Duration::from_secs(59)));
    }

    #[test]
    fn retry_directives_override_defaults() {
        let text = "JobRetryLimit 2\nJobRetryInterval 30\nMaxJobTime 1h\nPreserveJobFiles 2d\n";
        let mut config = ServerConfig::default();
        config.apply(&parse_directives(text).expect("parse"));
        assert_eq!(config.job_retry_limit, 2);
        assert_eq!(config.job_retry_interval, Duration::from_secs(30));
        assert_eq!(config.max_job_time, Duration::from_secs(3600));
        assert_eq!(
            config.preserve_job_files,
            Preserve::Window(Duration::from_secs(2 * 86400))
        );
    }
}
