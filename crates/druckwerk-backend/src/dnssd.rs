// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNS-SD (mDNS) backend.
//
// `dnssd://` URIs name a service instance rather than a host. Delivery
// resolves the instance with a bounded mDNS browse, rewrites the URI into
// the concrete transport (ipp/ipps/socket/lpd), and re-dispatches through
// the registry. Discovery browses the printer service types and reports
// whatever answers.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

use druckwerk_core::types::{Device, DeviceClass, Document, Job, Printer, SupplyStatus};

use crate::{Backend, BackendError, BackendRegistry, BackendResult, seeded_devices};

/// Service types browsed for printers.
const SERVICE_TYPES: &[&str] = &[
    "_ipp._tcp.local.",
    "_ipps._tcp.local.",
    "_pdl-datastream._tcp.local.",
    "_printer._tcp.local.",
];

/// How long a browse may take before the lookup fails.
const BROWSE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct DnssdBackend {
    /// Weak to avoid a registry → backend → registry cycle.
    registry: Weak<BackendRegistry>,
}

impl DnssdBackend {
    pub fn new(registry: &Arc<BackendRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }

    /// Resolve the instance and return the rewritten concrete URI.
    async fn resolve_uri(&self, uri: &str, op: &'static str) -> BackendResult<String> {
        let target = parse_dnssd_uri(uri)
            .ok_or_else(|| BackendError::unsupported(op, uri, "invalid dnssd URI"))?;

        let uri_owned = uri.to_owned();
        let resolved = tokio::task::spawn_blocking(move || browse_for(&target))
            .await
            .map_err(|e| BackendError::temporary(op, &uri_owned, format!("browse task: {e}")))?;

        match resolved {
            Some(service) => {
                let concrete = rewrite_uri(&service);
                debug!(uri = %uri_owned, concrete = %concrete, "dnssd resolved");
                Ok(concrete)
            }
            None => Err(BackendError::temporary(
                op,
                &uri_owned,
                "service did not resolve within the browse window",
            )),
        }
    }

    fn registry(&self, op: &'static str, uri: &str) -> BackendResult<Arc<BackendRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| BackendError::permanent(op, uri, "backend registry is gone"))
    }
}

#[async_trait]
impl Backend for DnssdBackend {
    fn name(&self) -> &'static str {
        "dnssd"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["dnssd", "mdns"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        let mut devices = seeded_devices("CUPS_DNSSD_DEVICES", DeviceClass::Network);

        let browsed = tokio::task::spawn_blocking(browse_all)
            .await
            .map_err(|e| BackendError::temporary("list", "dnssd:", format!("browse task: {e}")))?;
        devices.extend(browsed);
        Ok(devices)
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        job: &Job,
        doc: &Document,
        file_path: &Path,
    ) -> BackendResult<()> {
        let concrete_uri = self.resolve_uri(&printer.uri, "submit").await?;
        let registry = self.registry("submit", &printer.uri)?;
        let backend = registry.for_uri(&concrete_uri).ok_or_else(|| {
            BackendError::unsupported("submit", &concrete_uri, "no backend for resolved URI")
        })?;

        let mut concrete = printer.clone();
        concrete.uri = concrete_uri;
        info!(job_id = job.id, backend = backend.name(), uri = %concrete.uri, "re-dispatching resolved job");
        backend.submit_job(&concrete, job, doc, file_path).await
    }

    async fn query_supplies(&self, printer: &Printer) -> BackendResult<SupplyStatus> {
        let concrete_uri = self.resolve_uri(&printer.uri, "supplies").await?;
        let registry = self.registry("supplies", &printer.uri)?;
        let backend = registry.for_uri(&concrete_uri).ok_or_else(|| {
            BackendError::unsupported("supplies", &concrete_uri, "no backend for resolved URI")
        })?;
        let mut concrete = printer.clone();
        concrete.uri = concrete_uri;
        backend.query_supplies(&concrete).await
    }
}

/// A `dnssd://` target: instance name plus service type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnssdTarget {
    /// Decoded instance name; empty means browse-only (take any match).
    pub instance: String,
    /// Fully qualified service type, e.g. `_ipp._tcp.local.`.
    pub service_type: String,
}

/// Resolved service facts needed for the rewrite.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub service_type: String,
    pub host: String,
    pub port: u16,
    /// TXT `rp` (resource path / queue name), if present.
    pub rp: Option<String>,
    pub instance: String,
}

/// Parse `dnssd://instance._service._tcp.[domain][/...]`.
pub fn parse_dnssd_uri(uri: &str) -> Option<DnssdTarget> {
    let rest = uri.strip_prefix("dnssd://").or_else(|| uri.strip_prefix("mdns://"))?;
    let name = rest.split(['/', '?']).next()?;
    if name.is_empty() {
        return None;
    }

    let marker = name.find("._")?;
    let instance = percent_decode(&name[..marker]);
    let mut service = name[marker + 1..].trim_end_matches('.').to_owned();
    // Normalize to the .local. browse domain used by mDNS.
    if let Some(stripped) = service.strip_suffix(".local") {
        service = stripped.to_owned();
    }
    Some(DnssdTarget {
        instance,
        service_type: format!("{service}.local."),
    })
}

/// Rewrite a resolved service into a concrete backend URI.
pub fn rewrite_uri(service: &ResolvedService) -> String {
    let host = &service.host;
    match service.service_type.as_str() {
        t if t.starts_with("_ipps.") => {
            let rp = service.rp.clone().unwrap_or_default();
            format!("ipps://{host}:{}/{rp}", service.port)
        }
        t if t.starts_with("_ipp.") => {
            let rp = service.rp.clone().unwrap_or_default();
            format!("ipp://{host}:{}/{rp}", service.port)
        }
        t if t.starts_with("_pdl-datastream.") => {
            let port = if service.port == 0 { 9100 } else { service.port };
            format!("socket://{host}:{port}")
        }
        t if t.starts_with("_printer.") => {
            let queue = service
                .rp
                .clone()
                .filter(|q| !q.is_empty())
                .or_else(|| {
                    if service.instance.is_empty() {
                        None
                    } else {
                        Some(service.instance.clone())
                    }
                })
                .unwrap_or_else(|| "lp".to_owned());
            format!("lpd://{host}:515/{queue}")
        }
        _ => format!("socket://{host}:9100"),
    }
}

/// Blocking browse for one target; returns the first matching resolution.
fn browse_for(target: &DnssdTarget) -> Option<ResolvedService> {
    let daemon = ServiceDaemon::new().ok()?;
    let receiver = daemon.browse(&target.service_type).ok()?;

    let deadline = Instant::now() + BROWSE_TIMEOUT;
    let mut found = None;
    while found.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(resolved_info)) => {
                let service = to_resolved(&resolved_info, &target.service_type);
                if let Some(service) = service {
                    let matches = target.instance.is_empty()
                        || service
                            .instance
                            .eq_ignore_ascii_case(&target.instance);
                    if matches {
                        found = Some(service);
                    }
                }
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(&target.service_type);
    let _ = daemon.shutdown();
    found
}

/// Blocking browse across every printer service type for discovery.
fn browse_all() -> Vec<Device> {
    let Ok(daemon) = ServiceDaemon::new() else {
        return Vec::new();
    };
    let mut receivers = Vec::new();
    for service_type in SERVICE_TYPES {
        match daemon.browse(service_type) {
            Ok(r) => receivers.push((service_type, r)),
            Err(e) => warn!(service_type, error = %e, "mDNS browse failed"),
        }
    }

    let deadline = Instant::now() + BROWSE_TIMEOUT;
    let mut devices: Vec<Device> = Vec::new();
    for (service_type, receiver) in &receivers {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(resolved_info)) => {
                    if let Some(service) = to_resolved(&resolved_info, service_type) {
                        let uri = format!(
                            "dnssd://{}.{}",
                            percent_encode(&service.instance),
                            service.service_type
                        );
                        if !devices.iter().any(|d| d.uri == uri) {
                            devices.push(Device {
                                uri,
                                info: service.instance.clone(),
                                make_and_model: resolved_info
                                    .get_property_val_str("ty")
                                    .unwrap_or("")
                                    .to_owned(),
                                class: DeviceClass::Network,
                                device_id: None,
                                location: resolved_info
                                    .get_property_val_str("note")
                                    .map(str::to_owned),
                            });
                        }
                    }
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        let _ = daemon.stop_browse(service_type);
    }
    let _ = daemon.shutdown();
    devices
}

fn to_resolved(info: &ServiceInfo, service_type: &str) -> Option<ResolvedService> {
    // Prefer IPv4 for widest printer compatibility.
    let host = info
        .get_addresses()
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .map(|a| a.to_string())?;

    let fullname = info.get_fullname();
    let instance = fullname
        .split("._")
        .next()
        .unwrap_or(fullname)
        .to_owned();

    Some(ResolvedService {
        service_type: service_type.to_owned(),
        host,
        port: info.get_port(),
        rp: info.get_property_val_str("rp").map(str::to_owned),
        instance,
    })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len()
            && let Ok(v) = u8::from_str_radix(&s[i + 1..i + 3], 16)
        {
            out.push(v);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == ' ' || c == '%' || c == '/' {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dnssd_uris() {
        let t = parse_dnssd_uri("dnssd://Front%20Desk._ipp._tcp.local./?uuid=abc").expect("parse");
        assert_eq!(t.instance, "Front Desk");
        assert_eq!(t.service_type, "_ipp._tcp.local.");

        let t = parse_dnssd_uri("dnssd://Laser._pdl-datastream._tcp").expect("parse");
        assert_eq!(t.instance, "Laser");
        assert_eq!(t.service_type, "_pdl-datastream._tcp.local.");

        assert!(parse_dnssd_uri("dnssd://").is_none());
        assert!(parse_dnssd_uri("socket://h").is_none());
    }

    fn resolved(service_type: &str, port: u16, rp: Option<&str>) -> ResolvedService {
        ResolvedService {
            service_type: service_type.into(),
            host: "192.0.2.20".into(),
            port,
            rp: rp.map(str::to_owned),
            instance: "Front Desk".into(),
        }
    }

    #[test]
    fn rewrites_to_concrete_uris() {
        assert_eq!(
            rewrite_uri(&resolved("_ipp._tcp.local.", 631, Some("ipp/print"))),
            "ipp://192.0.2.20:631/ipp/print"
        );
        assert_eq!(
            rewrite_uri(&resolved("_ipps._tcp.local.", 631, Some("ipp/print"))),
            "ipps://192.0.2.20:631/ipp/print"
        );
        assert_eq!(
            rewrite_uri(&resolved("_pdl-datastream._tcp.local.", 0, None)),
            "socket://192.0.2.20:9100"
        );
        assert_eq!(
            rewrite_uri(&resolved("_printer._tcp.local.", 515, None)),
            "lpd://192.0.2.20:515/Front Desk"
        );
        assert_eq!(
            rewrite_uri(&resolved("_printer._tcp.local.", 515, Some("raw"))),
            "lpd://192.0.2.20:515/raw"
        );
    }

    #[test]
    fn percent_round_trip() {
        assert_eq!(percent_decode("Front%20Desk"), "Front Desk");
        assert_eq!(percent_encode("Front Desk"), "Front%20Desk");
        assert_eq!(percent_decode("plain"), "plain");
    }
}
