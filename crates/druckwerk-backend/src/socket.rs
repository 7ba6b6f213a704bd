// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP delivery (JetDirect, port 9100).
//
// The simplest transport: open a socket and stream the prepared file. No
// negotiation, no job tracking — the printer must understand the bytes
// natively.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use druckwerk_core::types::{Device, DeviceClass, Document, Job, Printer};

use crate::{Backend, BackendError, BackendResult, parse_device_uri, seeded_devices};

/// Default JetDirect port.
pub const SOCKET_PORT: u16 = 9100;

/// Dial timeout for the initial connect.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SocketBackend;

impl SocketBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SocketBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for SocketBackend {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["socket"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        Ok(seeded_devices("CUPS_SOCKET_DEVICES", DeviceClass::Network))
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        job: &Job,
        _doc: &Document,
        file_path: &Path,
    ) -> BackendResult<()> {
        let uri = printer.uri.as_str();
        let parsed = parse_device_uri(uri)
            .filter(|p| !p.host.is_empty())
            .ok_or_else(|| BackendError::unsupported("submit", uri, "invalid socket URI"))?;
        let addr = format!("{}:{}", parsed.host, parsed.port.unwrap_or(SOCKET_PORT));

        let mut file = tokio::fs::File::open(file_path)
            .await
            .map_err(|e| BackendError::permanent("submit", uri, format!("open output: {e}")))?;

        debug!(addr = %addr, job_id = job.id, "dialing raw socket");
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                BackendError::temporary(
                    "submit",
                    uri,
                    format!("connect to {addr} timed out after {}s", DIAL_TIMEOUT.as_secs()),
                )
            })?
            .map_err(|e| BackendError::temporary("submit", uri, format!("connect to {addr}: {e}")))?;

        let sent = tokio::io::copy(&mut file, &mut stream)
            .await
            .map_err(|e| BackendError::temporary("submit", uri, format!("stream: {e}")))?;

        stream
            .flush()
            .await
            .map_err(|e| BackendError::temporary("submit", uri, format!("flush: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| BackendError::temporary("submit", uri, format!("shutdown: {e}")))?;

        info!(job_id = job.id, bytes = sent, addr = %addr, "socket delivery complete");
        Ok(())
    }
}
