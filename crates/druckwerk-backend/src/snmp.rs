// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SNMPv1 discovery and supply reporting.
//
// No SNMP crate is carried; the backend speaks the few PDUs it needs with
// a small BER codec: GetRequest out, GetResponse in, over one UDP
// datagram each. Discovery probes the configured hosts and subnets with a
// bounded worker pool; submission is not a thing SNMP can do.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use druckwerk_core::types::{Device, DeviceClass, Document, Job, Printer, SupplyStatus};

use crate::{Backend, BackendError, BackendResult, seeded_devices};

/// Default community string.
const DEFAULT_COMMUNITY: &str = "public";

/// Default per-host probe timeout.
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(800);

/// Default and maximum scan concurrency.
const DEFAULT_SCAN_WORKERS: usize = 32;
const MAX_SCAN_WORKERS: usize = 256;

// Printer-MIB / HOST-RESOURCES-MIB objects.
const OID_SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const OID_HR_DEVICE_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 3, 2, 1, 3, 1];
const OID_SUPPLY_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 43, 11, 1, 1, 6, 1];
const OID_SUPPLY_LEVEL: &[u32] = &[1, 3, 6, 1, 2, 1, 43, 11, 1, 1, 9, 1];
const OID_SUPPLY_MAX: &[u32] = &[1, 3, 6, 1, 2, 1, 43, 11, 1, 1, 8, 1];

/// Highest supply table index queried.
const MAX_SUPPLY_INDEX: u32 = 8;

pub struct SnmpBackend;

impl SnmpBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SnmpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for SnmpBackend {
    fn name(&self) -> &'static str {
        "snmp"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["snmp"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        let mut devices = seeded_devices("CUPS_SNMP_DEVICES", DeviceClass::Network);

        let hosts = scan_hosts();
        if hosts.is_empty() {
            return Ok(devices);
        }

        let community = community();
        let timeout = scan_timeout();
        let workers = scan_concurrency();
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut tasks = Vec::new();
        for host in hosts {
            let community = community.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                probe_host(&host, &community, timeout).await
            }));
        }
        for task in tasks {
            if let Ok(Some(device)) = task.await {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        _job: &Job,
        _doc: &Document,
        _file_path: &Path,
    ) -> BackendResult<()> {
        Err(BackendError::unsupported(
            "submit",
            &printer.uri,
            "SNMP is a discovery and monitoring transport",
        ))
    }

    async fn query_supplies(&self, printer: &Printer) -> BackendResult<SupplyStatus> {
        let host = crate::parse_device_uri(&printer.uri)
            .map(|p| p.host)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BackendError::unsupported("supplies", &printer.uri, "invalid URI"))?;
        query_supplies_host(&host).await
    }
}

/// Query Printer-MIB marker supplies on one host. Also used as the IPP
/// backend's fallback.
pub async fn query_supplies_host(host: &str) -> BackendResult<SupplyStatus> {
    let community = community();
    let timeout = scan_timeout();
    let uri = format!("snmp://{host}");

    let mut status = SupplyStatus::default();
    for index in 1..=MAX_SUPPLY_INDEX {
        let descr_oid = with_index(OID_SUPPLY_DESCR, index);
        let level_oid = with_index(OID_SUPPLY_LEVEL, index);
        let max_oid = with_index(OID_SUPPLY_MAX, index);

        let Ok(values) = snmp_get(
            host,
            &community,
            &[&descr_oid, &level_oid, &max_oid],
            timeout,
        )
        .await
        else {
            break;
        };
        let Some(values) = values else { break };

        let descr = values.iter().find(|(oid, _)| *oid == descr_oid);
        let level = values.iter().find(|(oid, _)| *oid == level_oid);
        let max = values.iter().find(|(oid, _)| *oid == max_oid);

        let Some((_, SnmpValue::Text(descr))) = descr else {
            break; // table exhausted
        };
        let level = match level {
            Some((_, SnmpValue::Integer(n))) => *n,
            _ => -1,
        };
        let max = match max {
            Some((_, SnmpValue::Integer(n))) => *n,
            _ => -1,
        };
        status
            .details
            .insert(descr.clone(), format!("{level}/{max}"));
        if max > 0 && level >= 0 && level * 10 < max {
            status.state = "supply-low".to_owned();
        }
    }

    if status.state.is_empty() && !status.details.is_empty() {
        status.state = "ok".to_owned();
    }
    if status.details.is_empty() {
        return Err(BackendError::temporary(
            "supplies",
            &uri,
            "no SNMP supply data",
        ));
    }
    Ok(status)
}

/// Probe one host: answerers become socket devices.
async fn probe_host(host: &str, community: &str, timeout: Duration) -> Option<Device> {
    let values = snmp_get(
        host,
        community,
        &[OID_SYS_DESCR, OID_HR_DEVICE_DESCR],
        timeout,
    )
    .await
    .ok()??;

    let text = |oid: &[u32]| -> String {
        values
            .iter()
            .find(|(o, _)| o == oid)
            .and_then(|(_, v)| match v {
                SnmpValue::Text(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default()
    };

    let make_and_model = {
        let hr = text(OID_HR_DEVICE_DESCR);
        if hr.is_empty() { text(OID_SYS_DESCR) } else { hr }
    };
    debug!(host, make = %make_and_model, "SNMP probe answered");
    Some(Device {
        uri: format!("socket://{host}:9100"),
        info: make_and_model.clone(),
        make_and_model,
        class: DeviceClass::Network,
        device_id: None,
        location: None,
    })
}

// ---------------------------------------------------------------------------
// Configuration from the environment
// ---------------------------------------------------------------------------

fn community() -> String {
    std::env::var("CUPS_SNMP_COMMUNITY").unwrap_or_else(|_| DEFAULT_COMMUNITY.to_owned())
}

/// `CUPS_SNMP_SCAN_TIMEOUT`: bare milliseconds or `<n>ms`/`<n>s`.
fn scan_timeout() -> Duration {
    let Ok(raw) = std::env::var("CUPS_SNMP_SCAN_TIMEOUT") else {
        return DEFAULT_SCAN_TIMEOUT;
    };
    parse_timeout(&raw).unwrap_or(DEFAULT_SCAN_TIMEOUT)
}

fn parse_timeout(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = raw.strip_suffix('s') {
        return s.trim().parse().ok().map(Duration::from_secs);
    }
    raw.parse().ok().map(Duration::from_millis)
}

fn scan_concurrency() -> usize {
    std::env::var("CUPS_SNMP_SCAN_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_SCAN_WORKERS)
        .min(MAX_SCAN_WORKERS)
}

/// Hosts to probe: `CUPS_SNMP_HOSTS` entries plus every address of each
/// `CUPS_SNMP_SUBNETS` IPv4 /24.
fn scan_hosts() -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    if let Ok(list) = std::env::var("CUPS_SNMP_HOSTS") {
        hosts.extend(
            list.split([',', ';', ' '])
                .filter(|h| !h.is_empty())
                .map(str::to_owned),
        );
    }
    if let Ok(list) = std::env::var("CUPS_SNMP_SUBNETS") {
        for subnet in list.split([',', ';', ' ']).filter(|s| !s.is_empty()) {
            hosts.extend(expand_subnet(subnet));
        }
    }
    hosts
}

/// Expand `a.b.c.0/24` (or `a.b.c`) into its host addresses.
fn expand_subnet(subnet: &str) -> Vec<String> {
    let base = subnet.split('/').next().unwrap_or(subnet);
    let octets: Vec<&str> = base.split('.').collect();
    let prefix = match octets.len() {
        4 => octets[..3].join("."),
        3 => base.to_owned(),
        _ => {
            warn!(subnet, "ignoring unparseable SNMP subnet");
            return Vec::new();
        }
    };
    (1..255).map(|n| format!("{prefix}.{n}")).collect()
}

fn with_index(oid: &[u32], index: u32) -> Vec<u32> {
    let mut v = oid.to_vec();
    v.push(index);
    v
}

// ---------------------------------------------------------------------------
// Wire I/O
// ---------------------------------------------------------------------------

/// Decoded SNMP values the caller cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    Text(String),
    Null,
    Other,
}

/// One SNMPv1 get. `Ok(None)` means the agent answered with an error
/// status (typically noSuchName).
async fn snmp_get(
    host: &str,
    community: &str,
    oids: &[&[u32]],
    timeout: Duration,
) -> std::io::Result<Option<Vec<(Vec<u32>, SnmpValue)>>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;

    let request_id = std::process::id() as i32 & 0x7fff_ffff;
    let packet = encode_get_request(community, oids, request_id);
    socket.send_to(&packet, (host, 161)).await?;

    let mut buf = vec![0u8; 4096];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "SNMP timeout"))??;
    buf.truncate(len);

    Ok(decode_get_response(&buf, request_id))
}

// ---------------------------------------------------------------------------
// BER codec (the subset SNMPv1 needs)
// ---------------------------------------------------------------------------

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_GET_REQUEST: u8 = 0xa0;
const TAG_GET_RESPONSE: u8 = 0xa2;

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let significant = &bytes[skip..];
        out.push(0x80 | significant.len() as u8);
        out.extend_from_slice(significant);
    }
}

fn encode_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    encode_length(out, content.len());
    out.extend_from_slice(content);
}

fn encode_integer(out: &mut Vec<u8>, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Trim redundant leading bytes while keeping the sign bit intact.
    while start < 7 {
        let b = bytes[start];
        let next_msb = bytes[start + 1] & 0x80;
        if (b == 0x00 && next_msb == 0) || (b == 0xff && next_msb != 0) {
            start += 1;
        } else {
            break;
        }
    }
    encode_tlv(out, TAG_INTEGER, &bytes[start..]);
}

fn encode_oid(out: &mut Vec<u8>, oid: &[u32]) {
    let mut content = Vec::new();
    if oid.len() >= 2 {
        content.push((oid[0] * 40 + oid[1]) as u8);
        for &arc in &oid[2..] {
            let mut chunk = [0u8; 5];
            let mut n = arc;
            let mut i = 5;
            loop {
                i -= 1;
                chunk[i] = (n & 0x7f) as u8;
                n >>= 7;
                if n == 0 {
                    break;
                }
            }
            for (j, b) in chunk[i..].iter().enumerate() {
                let last = j == chunk[i..].len() - 1;
                content.push(if last { *b } else { *b | 0x80 });
            }
        }
    }
    encode_tlv(out, TAG_OID, &content);
}

/// Encode a full SNMPv1 GetRequest message.
fn encode_get_request(community: &str, oids: &[&[u32]], request_id: i32) -> Vec<u8> {
    let mut varbinds = Vec::new();
    for oid in oids {
        let mut varbind = Vec::new();
        encode_oid(&mut varbind, oid);
        encode_tlv(&mut varbind, TAG_NULL, &[]);
        encode_tlv(&mut varbinds, TAG_SEQUENCE, &varbind);
    }

    let mut pdu = Vec::new();
    encode_integer(&mut pdu, request_id as i64);
    encode_integer(&mut pdu, 0); // error-status
    encode_integer(&mut pdu, 0); // error-index
    encode_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

    let mut message = Vec::new();
    encode_integer(&mut message, 0); // version 1
    encode_tlv(&mut message, TAG_OCTET_STRING, community.as_bytes());
    encode_tlv(&mut message, TAG_GET_REQUEST, &pdu);

    let mut out = Vec::new();
    encode_tlv(&mut out, TAG_SEQUENCE, &message);
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    fn read_tlv(&mut self) -> Option<(u8, &'a [u8])> {
        let tag = *self.buf.get(self.pos)?;
        self.pos += 1;
        let first = *self.buf.get(self.pos)?;
        self.pos += 1;
        let len = if first < 0x80 {
            first as usize
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 {
                return None;
            }
            let mut len = 0usize;
            for _ in 0..count {
                len = (len << 8) | *self.buf.get(self.pos)? as usize;
                self.pos += 1;
            }
            len
        };
        let content = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some((tag, content))
    }
}

fn decode_integer(content: &[u8]) -> i64 {
    let mut value: i64 = if content.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    for &b in content {
        value = (value << 8) | b as i64;
    }
    value
}

fn decode_oid(content: &[u8]) -> Vec<u32> {
    let mut oid = Vec::new();
    let mut iter = content.iter();
    if let Some(&first) = iter.next() {
        oid.push((first / 40) as u32);
        oid.push((first % 40) as u32);
    }
    let mut acc: u32 = 0;
    for &b in iter {
        acc = (acc << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            oid.push(acc);
            acc = 0;
        }
    }
    oid
}

/// Decode a GetResponse, checking the request id and error status.
fn decode_get_response(packet: &[u8], request_id: i32) -> Option<Vec<(Vec<u32>, SnmpValue)>> {
    let mut outer = Reader::new(packet);
    let (tag, message) = outer.read_tlv()?;
    if tag != TAG_SEQUENCE {
        return None;
    }

    let mut message = Reader::new(message);
    let (_, _version) = message.read_tlv()?;
    let (_, _community) = message.read_tlv()?;
    let (tag, pdu) = message.read_tlv()?;
    if tag != TAG_GET_RESPONSE {
        return None;
    }

    let mut pdu = Reader::new(pdu);
    let (_, rid) = pdu.read_tlv()?;
    if decode_integer(rid) != request_id as i64 {
        return None;
    }
    let (_, error_status) = pdu.read_tlv()?;
    let (_, _error_index) = pdu.read_tlv()?;
    if decode_integer(error_status) != 0 {
        return None;
    }

    let (tag, varbinds) = pdu.read_tlv()?;
    if tag != TAG_SEQUENCE {
        return None;
    }

    let mut out = Vec::new();
    let mut varbinds = Reader::new(varbinds);
    while varbinds.remaining() {
        let (tag, varbind) = varbinds.read_tlv()?;
        if tag != TAG_SEQUENCE {
            return None;
        }
        let mut varbind = Reader::new(varbind);
        let (tag, oid) = varbind.read_tlv()?;
        if tag != TAG_OID {
            return None;
        }
        let (tag, content) = varbind.read_tlv()?;
        let value = match tag {
            TAG_INTEGER | 0x41 | 0x42 => SnmpValue::Integer(decode_integer(content)),
            TAG_OCTET_STRING => SnmpValue::Text(String::from_utf8_lossy(content).into_owned()),
            TAG_NULL => SnmpValue::Null,
            _ => SnmpValue::Other,
        };
        out.push((decode_oid(oid), value));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_round_trip() {
        for oid in [
            OID_SYS_DESCR.to_vec(),
            OID_HR_DEVICE_DESCR.to_vec(),
            with_index(OID_SUPPLY_DESCR, 3),
            vec![1, 3, 6, 1, 4, 1, 2699, 1],
        ] {
            let mut encoded = Vec::new();
            encode_oid(&mut encoded, &oid);
            let mut reader = Reader::new(&encoded);
            let (tag, content) = reader.read_tlv().expect("tlv");
            assert_eq!(tag, TAG_OID);
            assert_eq!(decode_oid(content), oid);
        }
    }

    #[test]
    fn integer_round_trip() {
        for n in [0i64, 1, 127, 128, 255, 256, 0x7fff_ffff, -1, -129] {
            let mut encoded = Vec::new();
            encode_integer(&mut encoded, n);
            let mut reader = Reader::new(&encoded);
            let (tag, content) = reader.read_tlv().expect("tlv");
            assert_eq!(tag, TAG_INTEGER);
            assert_eq!(decode_integer(content), n, "value {n}");
        }
    }

    #[test]
    fn long_form_lengths() {
        let content = vec![0xabu8; 300];
        let mut encoded = Vec::new();
        encode_tlv(&mut encoded, TAG_OCTET_STRING, &content);
        let mut reader = Reader::new(&encoded);
        let (_, decoded) = reader.read_tlv().expect("tlv");
        assert_eq!(decoded, &content[..]);
    }

    /// Build a GetResponse answering the given request with one string
    /// varbind; exercises both codec directions.
    fn fake_response(request_id: i32, oid: &[u32], text: &str) -> Vec<u8> {
        let mut varbind = Vec::new();
        encode_oid(&mut varbind, oid);
        encode_tlv(&mut varbind, TAG_OCTET_STRING, text.as_bytes());
        let mut varbinds = Vec::new();
        encode_tlv(&mut varbinds, TAG_SEQUENCE, &varbind);

        let mut pdu = Vec::new();
        encode_integer(&mut pdu, request_id as i64);
        encode_integer(&mut pdu, 0);
        encode_integer(&mut pdu, 0);
        encode_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

        let mut message = Vec::new();
        encode_integer(&mut message, 0);
        encode_tlv(&mut message, TAG_OCTET_STRING, b"public");
        encode_tlv(&mut message, TAG_GET_RESPONSE, &pdu);

        let mut out = Vec::new();
        encode_tlv(&mut out, TAG_SEQUENCE, &message);
        out
    }

    #[test]
    fn response_decoding() {
        let packet = fake_response(42, OID_SYS_DESCR, "Acme LaserWriter 9000");
        let values = decode_get_response(&packet, 42).expect("decode");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].0, OID_SYS_DESCR);
        assert_eq!(
            values[0].1,
            SnmpValue::Text("Acme LaserWriter 9000".into())
        );

        // Wrong request id is rejected.
        assert!(decode_get_response(&packet, 43).is_none());
    }

    #[test]
    fn request_encoding_is_well_formed() {
        let packet = encode_get_request("public", &[OID_SYS_DESCR], 7);
        let mut reader = Reader::new(&packet);
        let (tag, message) = reader.read_tlv().expect("outer");
        assert_eq!(tag, TAG_SEQUENCE);

        let mut message = Reader::new(message);
        let (tag, version) = message.read_tlv().expect("version");
        assert_eq!(tag, TAG_INTEGER);
        assert_eq!(decode_integer(version), 0);
        let (tag, community) = message.read_tlv().expect("community");
        assert_eq!(tag, TAG_OCTET_STRING);
        assert_eq!(community, b"public");
        let (tag, _) = message.read_tlv().expect("pdu");
        assert_eq!(tag, TAG_GET_REQUEST);
    }

    #[test]
    fn subnet_expansion() {
        let hosts = expand_subnet("192.0.2.0/24");
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], "192.0.2.1");
        assert_eq!(hosts[253], "192.0.2.254");

        assert_eq!(expand_subnet("10.1.2"), expand_subnet("10.1.2.0/24"));
        assert!(expand_subnet("garbage").is_empty());
    }

    #[test]
    fn timeout_parsing() {
        assert_eq!(parse_timeout("800"), Some(Duration::from_millis(800)));
        assert_eq!(parse_timeout("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_timeout("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_timeout("junk"), None);
    }

    #[tokio::test]
    async fn get_over_loopback() {
        // A one-shot UDP agent answering sysDescr.
        let agent = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let agent_addr = agent.local_addr().expect("addr");
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, peer) = agent.recv_from(&mut buf).await.expect("recv");
            buf.truncate(len);
            // Echo the request id back in a canned response.
            let decoded = {
                let mut outer = Reader::new(&buf);
                let (_, message) = outer.read_tlv().expect("msg");
                let mut message = Reader::new(message);
                let _ = message.read_tlv();
                let _ = message.read_tlv();
                let (_, pdu) = message.read_tlv().expect("pdu");
                let mut pdu = Reader::new(pdu);
                let (_, rid) = pdu.read_tlv().expect("rid");
                decode_integer(rid) as i32
            };
            let response = fake_response(decoded, OID_SYS_DESCR, "Loopback Printer");
            agent.send_to(&response, peer).await.expect("send");
        });

        // Talk to the fake agent directly rather than port 161.
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let request_id = 99;
        let packet = encode_get_request("public", &[OID_SYS_DESCR], request_id);
        socket
            .send_to(&packet, agent_addr)
            .await
            .expect("send");
        let mut buf = vec![0u8; 4096];
        let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .expect("deadline")
            .expect("recv");
        buf.truncate(len);

        let values = decode_get_response(&buf, request_id).expect("decode");
        assert_eq!(values[0].1, SnmpValue::Text("Loopback Printer".into()));
    }
}
