// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk backends — the uniform delivery contract and the scheme-indexed
// registry, plus the shipped backends: socket (JetDirect), LPD (RFC 1179),
// IPP/IPPS, file, USB, DNS-SD, and SNMP.
//
// The scheduler only ever sees the `Backend` trait and the classified
// `BackendError`; everything protocol-specific stays inside the individual
// modules.

pub mod dnssd;
pub mod file;
pub mod ipp;
pub mod lpd;
pub mod snmp;
pub mod socket;
pub mod usb;

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use druckwerk_core::types::{Device, DeviceClass, Document, ErrorKind, Job, Printer, SupplyStatus};

/// A classified delivery failure.
#[derive(Debug, Error)]
#[error("{op} {uri}: {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub op: &'static str,
    pub uri: String,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, op: &'static str, uri: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            uri: uri.to_owned(),
            message: message.into(),
        }
    }

    pub fn unsupported(op: &'static str, uri: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, op, uri, message)
    }

    pub fn temporary(op: &'static str, uri: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Temporary, op, uri, message)
    }

    pub fn permanent(op: &'static str, uri: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, op, uri, message)
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// The uniform delivery contract.
///
/// Cancellation is cooperative: every network operation carries its own
/// timeout, and dropping the returned future abandons the I/O.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// URI schemes this backend claims.
    fn schemes(&self) -> &'static [&'static str];

    /// Discover devices reachable through this backend.
    async fn list_devices(&self) -> BackendResult<Vec<Device>>;

    /// Deliver the prepared file for one document of a job.
    async fn submit_job(
        &self,
        printer: &Printer,
        job: &Job,
        doc: &Document,
        file_path: &Path,
    ) -> BackendResult<()>;

    /// Query marker supplies. Backends without a supply channel return an
    /// empty status.
    async fn query_supplies(&self, printer: &Printer) -> BackendResult<SupplyStatus> {
        let _ = printer;
        Ok(SupplyStatus::default())
    }
}

/// Scheme-indexed backend registry.
///
/// Registration is writer-exclusive and happens once at startup; lookups
/// take a reader snapshot so delivery never blocks behind registration.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<dyn Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, backend: Arc<dyn Backend>) {
        debug!(backend = backend.name(), "backend registered");
        self.backends
            .write()
            .expect("backend registry poisoned")
            .push(backend);
    }

    fn snapshot(&self) -> Vec<Arc<dyn Backend>> {
        self.backends
            .read()
            .expect("backend registry poisoned")
            .clone()
    }

    /// First registered backend claiming the URI's scheme
    /// (case-insensitive).
    pub fn for_uri(&self, uri: &str) -> Option<Arc<dyn Backend>> {
        let scheme = uri_scheme(uri)?;
        self.snapshot()
            .into_iter()
            .find(|b| b.schemes().iter().any(|s| *s == scheme))
    }

    /// Aggregate discovery across all backends, ignoring per-backend
    /// failures.
    pub async fn list_devices(&self) -> Vec<Device> {
        let mut devices = Vec::new();
        for backend in self.snapshot() {
            match backend.list_devices().await {
                Ok(found) => devices.extend(found),
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "device discovery failed");
                }
            }
        }
        devices
    }
}

/// Lower-cased scheme of a URI, if it has one.
pub fn uri_scheme(uri: &str) -> Option<String> {
    let (scheme, _) = uri.split_once(':')?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}

/// Minimal device-URI decomposition shared by the network backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Path without the leading slash; empty when absent.
    pub path: String,
}

/// Parse `scheme://host[:port][/path]`. The host may be empty (file URIs).
pub fn parse_device_uri(uri: &str) -> Option<ParsedUri> {
    let scheme = uri_scheme(uri)?;
    let rest = uri.split_once("://")?.1;
    let (authority, path) = match rest.split_once('/') {
        Some((a, p)) => (a, p.to_owned()),
        None => (rest, String::new()),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_owned(), p.parse::<u16>().ok()),
        None => (authority.to_owned(), None),
    };
    Some(ParsedUri {
        scheme,
        host,
        port,
        path,
    })
}

/// Parse seeded device entries from a `CUPS_*_DEVICES` environment value.
///
/// Entries are `uri|info|make|device_id|location`, separated by commas,
/// semicolons, or whitespace; only the URI is mandatory.
pub fn seeded_devices(env_key: &str, class: DeviceClass) -> Vec<Device> {
    let Ok(value) = std::env::var(env_key) else {
        return Vec::new();
    };
    value
        .split([',', ';', ' ', '\t', '\n'])
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let mut fields = entry.split('|');
            let uri = fields.next()?.trim();
            if uri.is_empty() {
                return None;
            }
            Some(Device {
                uri: uri.to_owned(),
                info: fields.next().unwrap_or("").to_owned(),
                make_and_model: fields.next().unwrap_or("").to_owned(),
                class,
                device_id: fields.next().filter(|s| !s.is_empty()).map(str::to_owned),
                location: fields.next().filter(|s| !s.is_empty()).map(str::to_owned),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend {
        scheme: &'static str,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn schemes(&self) -> &'static [&'static str] {
            match self.scheme {
                "socket" => &["socket"],
                _ => &["ipp", "ipps"],
            }
        }

        async fn list_devices(&self) -> BackendResult<Vec<Device>> {
            Ok(vec![Device {
                uri: format!("{}://seed", self.scheme),
                info: String::new(),
                make_and_model: String::new(),
                class: DeviceClass::Network,
                device_id: None,
                location: None,
            }])
        }

        async fn submit_job(
            &self,
            _printer: &Printer,
            _job: &Job,
            _doc: &Document,
            _file_path: &Path,
        ) -> BackendResult<()> {
            Ok(())
        }
    }

    #[test]
    fn scheme_extraction() {
        assert_eq!(uri_scheme("SOCKET://x:9100"), Some("socket".into()));
        assert_eq!(uri_scheme("ipp://p/ipp/print"), Some("ipp".into()));
        assert_eq!(uri_scheme("no scheme here"), None);
        assert_eq!(uri_scheme(""), None);
    }

    #[test]
    fn device_uri_parsing() {
        let u = parse_device_uri("lpd://printhost:515/queue1").expect("parse");
        assert_eq!(u.scheme, "lpd");
        assert_eq!(u.host, "printhost");
        assert_eq!(u.port, Some(515));
        assert_eq!(u.path, "queue1");

        let u = parse_device_uri("socket://10.0.0.5").expect("parse");
        assert_eq!(u.port, None);
        assert_eq!(u.path, "");

        assert!(parse_device_uri("not-a-uri").is_none());
    }

    #[tokio::test]
    async fn registry_selects_by_scheme_case_insensitively() {
        let registry = BackendRegistry::new();
        registry.register(Arc::new(FakeBackend { scheme: "socket" }));
        registry.register(Arc::new(FakeBackend { scheme: "ipp" }));

        assert!(registry.for_uri("SOCKET://h:9100").is_some());
        assert_eq!(
            registry.for_uri("ipps://h/print").expect("backend").name(),
            "fake"
        );
        assert!(registry.for_uri("lpd://h/q").is_none());
    }

    #[tokio::test]
    async fn registry_aggregates_devices() {
        let registry = BackendRegistry::new();
        registry.register(Arc::new(FakeBackend { scheme: "socket" }));
        registry.register(Arc::new(FakeBackend { scheme: "ipp" }));
        let devices = registry.list_devices().await;
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn seeded_device_parsing() {
        // Environment mutation is process-global; keep it to one test.
        unsafe {
            std::env::set_var(
                "DRUCKWERK_TEST_DEVICES",
                "socket://a:9100|Office|Acme 100|MFG:Acme;|hall,lpd://b/lp",
            );
        }
        let devices = seeded_devices("DRUCKWERK_TEST_DEVICES", DeviceClass::Network);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].uri, "socket://a:9100");
        assert_eq!(devices[0].info, "Office");
        assert_eq!(devices[0].make_and_model, "Acme 100");
        assert_eq!(devices[1].uri, "lpd://b/lp");
    }
}
