// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP/IPPS delivery via the `ipp` crate's async client.
//
// Print-Job requests carry the typed job-template attributes derived from
// the option map (see `attrs`). Failures are classified three ways: IPP
// status codes numerically, HTTP statuses from the transport error text,
// and everything else by substring. Supply queries go over
// Get-Printer-Attributes with an SNMP fallback when the printer reports
// nothing useful.

pub mod attrs;

use std::io::Cursor;
use std::path::Path;

use ::ipp::prelude::*;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use druckwerk_core::types::{
    Device, DeviceClass, Document, ErrorKind, Job, Printer, SupplyStatus,
};

use crate::{Backend, BackendError, BackendResult, seeded_devices};

/// Fallback user for Print-Job when the job carries none.
const ANONYMOUS_USER: &str = "anonymous";

/// Fallback title for Print-Job when the job carries none.
const UNTITLED_JOB: &str = "Untitled";

pub struct IppBackend;

impl IppBackend {
    pub fn new() -> Self {
        Self
    }

    fn client(&self, uri: Uri) -> AsyncIppClient {
        if std::env::var("CUPS_IPP_INSECURE").is_ok_and(|v| !v.is_empty() && v != "0") {
            AsyncIppClient::builder(uri).ignore_tls_errors(true).build()
        } else {
            AsyncIppClient::new(uri)
        }
    }

    fn parse_uri(&self, uri: &str, op: &'static str) -> BackendResult<Uri> {
        uri.parse()
            .map_err(|e| BackendError::unsupported(op, uri, format!("invalid URI: {e}")))
    }

    /// Remote queue listing (Get-Jobs), used by diagnostics.
    pub async fn get_jobs(&self, printer: &Printer) -> BackendResult<Vec<(i32, String)>> {
        let uri = self.parse_uri(&printer.uri, "get-jobs")?;
        let operation = IppOperationBuilder::get_jobs(uri.clone()).build();
        let response = self
            .client(uri)
            .send(operation)
            .await
            .map_err(|e| classify_send_error("get-jobs", &printer.uri, &e.to_string()))?;
        check_status("get-jobs", &printer.uri, &response)?;

        let mut jobs = Vec::new();
        for group in response.attributes().groups_of(DelimiterTag::JobAttributes) {
            let attributes = group.attributes();
            let id = attributes.get("job-id").and_then(|a| {
                if let IppValue::Integer(id) = a.value() {
                    Some(*id)
                } else {
                    None
                }
            });
            let name = attributes
                .get("job-name")
                .map(|a| format!("{}", a.value()))
                .unwrap_or_default();
            if let Some(id) = id {
                jobs.push((id, name));
            }
        }
        Ok(jobs)
    }

    /// Cancel a remote job by printer-assigned id.
    pub async fn cancel_job(&self, printer: &Printer, remote_id: i32) -> BackendResult<()> {
        let uri = self.parse_uri(&printer.uri, "cancel-job")?;
        let operation = IppOperationBuilder::cancel_job(uri.clone(), remote_id).build();
        let response = self
            .client(uri)
            .send(operation)
            .await
            .map_err(|e| classify_send_error("cancel-job", &printer.uri, &e.to_string()))?;
        check_status("cancel-job", &printer.uri, &response)?;
        info!(remote_id, uri = %printer.uri, "remote job cancelled");
        Ok(())
    }
}

impl Default for IppBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for IppBackend {
    fn name(&self) -> &'static str {
        "ipp"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ipp", "ipps", "http", "https"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        Ok(seeded_devices("CUPS_IPP_DEVICES", DeviceClass::Network))
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        job: &Job,
        doc: &Document,
        file_path: &Path,
    ) -> BackendResult<()> {
        let uri = self.parse_uri(&printer.uri, "submit")?;

        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| BackendError::permanent("submit", &printer.uri, format!("open output: {e}")))?;
        let size = bytes.len();
        let payload = IppPayload::new(Cursor::new(bytes));

        let user = if job.user_name.is_empty() {
            ANONYMOUS_USER
        } else {
            &job.user_name
        };
        let title = if job.name.is_empty() {
            UNTITLED_JOB
        } else {
            &job.name
        };
        let format = if doc.mime_type.is_empty() {
            "application/octet-stream"
        } else {
            &doc.mime_type
        };

        let operation = IppOperationBuilder::print_job(uri.clone(), payload)
            .user_name(user)
            .job_title(title)
            .document_format(format)
            .attributes(attrs::job_template_attributes(&job.options))
            .build();

        debug!(job_id = job.id, uri = %printer.uri, size, "sending Print-Job");
        let response = self
            .client(uri)
            .send(operation)
            .await
            .map_err(|e| classify_send_error("submit", &printer.uri, &e.to_string()))?;
        check_status("submit", &printer.uri, &response)?;

        info!(job_id = job.id, uri = %printer.uri, size, "IPP delivery complete");
        Ok(())
    }

    async fn query_supplies(&self, printer: &Printer) -> BackendResult<SupplyStatus> {
        let uri = self.parse_uri(&printer.uri, "supplies")?;
        let operation = IppOperationBuilder::get_printer_attributes(uri.clone()).build();
        let response = self
            .client(uri)
            .send(operation)
            .await
            .map_err(|e| classify_send_error("supplies", &printer.uri, &e.to_string()))?;
        check_status("supplies", &printer.uri, &response)?;

        let mut status = SupplyStatus::default();
        for group in response.attributes().groups() {
            for (name, attribute) in group.attributes() {
                if name == "printer-state-message" {
                    status.state = format!("{}", attribute.value());
                } else if name.starts_with("marker-") || name.starts_with("printer-supply") {
                    status
                        .details
                        .insert(name.clone(), format!("{}", attribute.value()));
                }
            }
        }

        // A printer that exposes no marker attributes may still answer SNMP.
        if status.details.is_empty() {
            if let Some(host) = crate::parse_device_uri(&printer.uri).map(|p| p.host)
                && !host.is_empty()
            {
                debug!(uri = %printer.uri, "no IPP supply data, trying SNMP");
                if let Ok(snmp) = crate::snmp::query_supplies_host(&host).await {
                    return Ok(snmp);
                }
            }
        }
        Ok(status)
    }
}

/// Map a non-success IPP response to a classified error.
fn check_status(
    op: &'static str,
    uri: &str,
    response: &IppRequestResponse,
) -> BackendResult<()> {
    let code = response.header().status_code();
    if code.is_success() {
        return Ok(());
    }
    let kind = classify_ipp_status(code as u16);
    warn!(op, uri, status = ?code, kind = ?kind, "IPP request failed");
    Err(BackendError::new(
        kind,
        op,
        uri,
        format!("IPP status {code:?}"),
    ))
}

/// Classify an IPP status code.
///
/// The explicitly unsupported set covers format/attribute rejections; the
/// temporary set covers device and server conditions worth retrying;
/// everything else from redirection upward is permanent.
pub fn classify_ipp_status(code: u16) -> ErrorKind {
    const UNSUPPORTED: &[u16] = &[
        0x0501, // operation-not-supported
        0x040a, // document-format-not-supported
        0x041b, // document-unprintable
        0x0411, // document-format-error
        0x040b, // attributes-or-values-not-supported
        0x040c, // uri-scheme-not-supported
    ];
    const TEMPORARY: &[u16] = &[
        0x0505, // temporary-error
        0x0502, // service-unavailable
        0x0506, // not-accepting-jobs
        0x0507, // busy
        0x0504, // device-error
        0x050a, // printer-is-deactivated
        0x0405, // timeout
        0x050b, // too-many-jobs
        0x050c, // too-many-documents
    ];

    if UNSUPPORTED.contains(&code) {
        ErrorKind::Unsupported
    } else if TEMPORARY.contains(&code) || code >= 0x0500 {
        ErrorKind::Temporary
    } else if code >= 0x0300 {
        ErrorKind::Permanent
    } else {
        ErrorKind::Permanent
    }
}

/// Classify a transport-level send failure from its message text.
///
/// HTTP statuses are pulled out of the message when present; otherwise the
/// usual network failure phrases count as temporary, and format complaints
/// as unsupported.
fn classify_send_error(op: &'static str, uri: &str, message: &str) -> BackendError {
    let lower = message.to_ascii_lowercase();

    let kind = if lower.contains("http") {
        match extract_status(&lower) {
            Some(code) => classify_http_status(code),
            None => ErrorKind::Temporary,
        }
    } else if lower.contains("unsupported") || lower.contains("unprintable") || lower.contains("format")
    {
        ErrorKind::Unsupported
    } else {
        // Dial failures, resets, TLS trouble, timeouts: worth retrying.
        ErrorKind::Temporary
    };

    BackendError::new(kind, op, uri, message.to_owned())
}

/// Classify an HTTP status per the delivery contract.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        500.. => ErrorKind::Temporary,
        408 | 429 => ErrorKind::Temporary,
        404 | 410 | 501 => ErrorKind::Unsupported,
        _ => ErrorKind::Permanent,
    }
}

/// First plausible HTTP status number in an error message.
fn extract_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse::<u16>().ok())
        .find(|n| (100..=599).contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipp_status_classification() {
        // Unsupported set.
        assert_eq!(classify_ipp_status(0x0501), ErrorKind::Unsupported);
        assert_eq!(classify_ipp_status(0x040a), ErrorKind::Unsupported);
        assert_eq!(classify_ipp_status(0x040c), ErrorKind::Unsupported);
        // Temporary set including everything at or above internal-error.
        assert_eq!(classify_ipp_status(0x0502), ErrorKind::Temporary);
        assert_eq!(classify_ipp_status(0x0507), ErrorKind::Temporary);
        assert_eq!(classify_ipp_status(0x0405), ErrorKind::Temporary);
        assert_eq!(classify_ipp_status(0x0500), ErrorKind::Temporary);
        assert_eq!(classify_ipp_status(0x0509), ErrorKind::Temporary);
        // Permanent remainder.
        assert_eq!(classify_ipp_status(0x0300), ErrorKind::Permanent);
        assert_eq!(classify_ipp_status(0x0400), ErrorKind::Permanent);
        assert_eq!(classify_ipp_status(0x0406), ErrorKind::Permanent);
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(classify_http_status(500), ErrorKind::Temporary);
        assert_eq!(classify_http_status(503), ErrorKind::Temporary);
        assert_eq!(classify_http_status(408), ErrorKind::Temporary);
        assert_eq!(classify_http_status(429), ErrorKind::Temporary);
        assert_eq!(classify_http_status(404), ErrorKind::Unsupported);
        assert_eq!(classify_http_status(410), ErrorKind::Unsupported);
        assert_eq!(classify_http_status(501), ErrorKind::Unsupported);
        assert_eq!(classify_http_status(403), ErrorKind::Permanent);
        assert_eq!(classify_http_status(400), ErrorKind::Permanent);
    }

    #[test]
    fn send_error_classification() {
        let e = classify_send_error("submit", "ipp://p", "HTTP error: 503 Service Unavailable");
        assert_eq!(e.kind, ErrorKind::Temporary);

        let e = classify_send_error("submit", "ipp://p", "HTTP error: 404 Not Found");
        assert_eq!(e.kind, ErrorKind::Unsupported);

        let e = classify_send_error("submit", "ipp://p", "connection refused");
        assert_eq!(e.kind, ErrorKind::Temporary);

        let e = classify_send_error("submit", "ipp://p", "document format not recognised");
        assert_eq!(e.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn status_extraction() {
        assert_eq!(extract_status("http error: 404 not found"), Some(404));
        assert_eq!(extract_status("status 599"), Some(599));
        assert_eq!(extract_status("code 1234 ignored, then 500"), Some(500));
        assert_eq!(extract_status("no digits"), None);
    }
}
