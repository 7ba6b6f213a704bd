// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LPD client (RFC 1179, port 515).
//
// Strict request/response discipline: every command and every file payload
// is followed by reading one acknowledgement byte (0 = OK) before anything
// else goes on the wire. The control file is sent before the data file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use druckwerk_core::types::{Device, DeviceClass, Document, Job, Printer};

use crate::{Backend, BackendError, BackendResult, parse_device_uri, seeded_devices};

/// Default LPD port.
pub const LPD_PORT: u16 = 515;

/// Default queue when the URI has no path component.
pub const DEFAULT_QUEUE: &str = "lp";

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LpdBackend;

impl LpdBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LpdBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LpdBackend {
    fn name(&self) -> &'static str {
        "lpd"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["lpd"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        Ok(seeded_devices("CUPS_LPD_DEVICES", DeviceClass::Network))
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        job: &Job,
        doc: &Document,
        file_path: &Path,
    ) -> BackendResult<()> {
        let uri = printer.uri.as_str();
        let parsed = parse_device_uri(uri)
            .filter(|p| !p.host.is_empty())
            .ok_or_else(|| BackendError::unsupported("submit", uri, "invalid lpd URI"))?;
        let queue = if parsed.path.is_empty() {
            DEFAULT_QUEUE.to_owned()
        } else {
            parsed.path.clone()
        };
        let addr = format!("{}:{}", parsed.host, parsed.port.unwrap_or(LPD_PORT));

        let data = tokio::fs::read(file_path)
            .await
            .map_err(|e| BackendError::permanent("submit", uri, format!("open output: {e}")))?;

        debug!(addr = %addr, queue = %queue, job_id = job.id, "dialing LPD");
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                BackendError::temporary("submit", uri, format!("connect to {addr} timed out"))
            })?
            .map_err(|e| BackendError::temporary("submit", uri, format!("connect to {addr}: {e}")))?;

        let host = &job.origin_host;
        let seq = job.id.rem_euclid(1000);
        let host15: String = host.chars().take(15).collect();
        let cf_name = format!("cfA{seq:03}{host15}");
        let df_name = format!("dfA{seq:03}{host15}");

        let banner = wants_banner(job);
        let control = control_file(job, doc, &df_name, banner);

        // Receive-a-printer-job for the queue.
        send_command(&mut stream, uri, format!("\x02{queue}\n").as_bytes()).await?;
        // Control file: announce, payload, NUL terminator.
        send_command(
            &mut stream,
            uri,
            format!("\x02{} {cf_name}\n", control.len()).as_bytes(),
        )
        .await?;
        send_payload(&mut stream, uri, control.as_bytes()).await?;
        // Data file: announce, payload, NUL terminator.
        send_command(
            &mut stream,
            uri,
            format!("\x03{} {df_name}\n", data.len()).as_bytes(),
        )
        .await?;
        send_payload(&mut stream, uri, &data).await?;

        info!(job_id = job.id, queue = %queue, bytes = data.len(), "LPD delivery complete");
        Ok(())
    }
}

/// Whether the job requests a banner page (`job-sheets` with a part other
/// than `none`).
fn wants_banner(job: &Job) -> bool {
    job.options
        .get("job-sheets")
        .map(|v| v.split(',').any(|part| !part.trim().is_empty() && part.trim() != "none"))
        .unwrap_or(false)
}

/// Build the RFC 1179 control file.
///
/// Field length limits follow the RFC: H ≤ 31, P ≤ 31, J ≤ 99, N ≤ 131.
fn control_file(job: &Job, doc: &Document, df_name: &str, banner: bool) -> String {
    let host = clip(&job.origin_host, 31);
    let user = clip(&job.user_name, 31);
    let title = clip(&job.name, 99);

    let mut cf = String::new();
    cf.push_str(&format!("H{host}\n"));
    cf.push_str(&format!("P{user}\n"));
    cf.push_str(&format!("J{title}\n"));
    if banner {
        cf.push_str(&format!("C{host}\n"));
        cf.push_str(&format!("L{user}\n"));
    }
    for _ in 0..job.copies() {
        cf.push_str(&format!("l{df_name}\n"));
    }
    cf.push_str(&format!("U{df_name}\n"));
    cf.push_str(&format!("N{}\n", clip(&doc.file_name, 131)));
    cf
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Write a command line and read the one-byte acknowledgement.
async fn send_command(stream: &mut TcpStream, uri: &str, bytes: &[u8]) -> BackendResult<()> {
    stream
        .write_all(bytes)
        .await
        .map_err(|e| BackendError::temporary("submit", uri, format!("write: {e}")))?;
    read_ack(stream, uri).await
}

/// Write a file payload followed by the NUL terminator, then read the
/// acknowledgement.
async fn send_payload(stream: &mut TcpStream, uri: &str, bytes: &[u8]) -> BackendResult<()> {
    stream
        .write_all(bytes)
        .await
        .map_err(|e| BackendError::temporary("submit", uri, format!("write payload: {e}")))?;
    stream
        .write_all(&[0])
        .await
        .map_err(|e| BackendError::temporary("submit", uri, format!("write terminator: {e}")))?;
    read_ack(stream, uri).await
}

async fn read_ack(stream: &mut TcpStream, uri: &str) -> BackendResult<()> {
    let mut ack = [0u8; 1];
    stream
        .read_exact(&mut ack)
        .await
        .map_err(|e| BackendError::temporary("submit", uri, format!("read ack: {e}")))?;
    if ack[0] != 0 {
        return Err(BackendError::temporary(
            "submit",
            uri,
            format!("printer rejected command (ack {})", ack[0]),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::options::JobOptions;
    use druckwerk_core::types::{ErrorKind, JobState, PrinterState};

    fn printer(uri: &str) -> Printer {
        Printer {
            id: 1,
            name: "lpd-test".into(),
            uri: uri.into(),
            ppd_name: None,
            info: String::new(),
            location: String::new(),
            state: PrinterState::Idle,
            accepting: true,
            shared: false,
            is_temporary: false,
            is_default: false,
            job_sheets_default: "none,none".into(),
            default_options: JobOptions::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn job(options: JobOptions) -> Job {
        Job {
            id: 1042,
            printer_id: 1,
            name: "quarterly report".into(),
            user_name: "ada".into(),
            origin_host: "workstation".into(),
            options,
            state: JobState::Processing,
            state_reason: String::new(),
            impressions: 0,
            submitted_at: chrono::Utc::now(),
            processing_at: None,
            completed_at: None,
        }
    }

    fn doc() -> Document {
        Document {
            id: 1,
            job_id: 1042,
            file_name: "report.ps".into(),
            mime_type: "application/postscript".into(),
            size_bytes: 4,
            sha256: String::new(),
            path: String::new(),
        }
    }

    /// Minimal in-process LPD server: acks everything, records the bytes.
    async fn ack_server(
        listener: tokio::net::TcpListener,
    ) -> tokio::task::JoinHandle<Vec<u8>> {
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut wire = Vec::new();
            let mut expecting_payload: Option<usize> = None;
            loop {
                if let Some(len) = expecting_payload.take() {
                    // Payload plus NUL terminator.
                    let mut buf = vec![0u8; len + 1];
                    if conn.read_exact(&mut buf).await.is_err() {
                        break;
                    }
                    wire.extend_from_slice(&buf);
                    conn.write_all(&[0]).await.expect("ack");
                    continue;
                }
                // Read one command line.
                let mut line = Vec::new();
                let mut byte = [0u8; 1];
                loop {
                    match conn.read_exact(&mut byte).await {
                        Ok(_) => {
                            line.push(byte[0]);
                            if byte[0] == b'\n' {
                                break;
                            }
                        }
                        Err(_) => return wire,
                    }
                }
                wire.extend_from_slice(&line);
                if line[0] == 0x02 && line.len() > 1 && line[1].is_ascii_digit()
                    || line[0] == 0x03
                {
                    // File announcement: "\x02<len> <name>\n" or \x03 ….
                    let text = String::from_utf8_lossy(&line[1..]);
                    let len: usize = text
                        .split_whitespace()
                        .next()
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(0);
                    expecting_payload = Some(len);
                }
                conn.write_all(&[0]).await.expect("ack");
            }
            wire
        })
    }

    #[tokio::test]
    async fn wire_sequence_matches_rfc1179() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = ack_server(listener).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.ps");
        std::fs::write(&path, b"%!PS").expect("write");

        LpdBackend::new()
            .submit_job(
                &printer(&format!("lpd://{}:{}/raw1", addr.ip(), addr.port())),
                &job(JobOptions::new()),
                &doc(),
                &path,
            )
            .await
            .expect("submit");

        let wire = server.await.expect("join");

        // Receive-job for the queue.
        assert!(wire.starts_with(b"\x02raw1\n"));

        // Control file announcement names cfA042workstation (1042 % 1000).
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("cfA042workstation\n"));
        assert!(text.contains("Hworkstation\nPada\nJquarterly report\n"));
        assert!(text.contains("ldfA042workstation\nUdfA042workstation\nNreport.ps\n"));
        // No banner lines by default.
        assert!(!text.contains("Cworkstation"));

        // Data file announcement and payload with NUL terminator.
        assert!(text.contains("\u{3}4 dfA042workstation\n"));
        assert!(wire.windows(5).any(|w| w == b"%!PS\0"));
    }

    #[tokio::test]
    async fn copies_and_banner_expand_control_file() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = ack_server(listener).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.ps");
        std::fs::write(&path, b"%!PS").expect("write");

        let mut options = JobOptions::new();
        options.set("copies", "2");
        options.set("job-sheets", "standard,none");

        LpdBackend::new()
            .submit_job(
                &printer(&format!("lpd://{}:{}", addr.ip(), addr.port())),
                &job(options),
                &doc(),
                &path,
            )
            .await
            .expect("submit");

        let wire = server.await.expect("join");
        let text = String::from_utf8_lossy(&wire);
        // Default queue when the URI has no path.
        assert!(text.starts_with("\u{2}lp\n"));
        // Banner class/name lines and one print line per copy.
        assert!(text.contains("Cworkstation\nLada\n"));
        assert_eq!(text.matches("ldfA042workstation\n").count(), 2);
    }

    #[tokio::test]
    async fn rejected_handshake_is_temporary() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 64];
            let _ = conn.read(&mut buf).await;
            conn.write_all(&[1]).await.expect("nak"); // reject
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.ps");
        std::fs::write(&path, b"%!PS").expect("write");

        let err = LpdBackend::new()
            .submit_job(
                &printer(&format!("lpd://{}:{}", addr.ip(), addr.port())),
                &job(JobOptions::new()),
                &doc(),
                &path,
            )
            .await
            .expect_err("should fail");
        assert_eq!(err.kind, ErrorKind::Temporary);
        assert!(err.message.contains("ack 1"));
    }
}
