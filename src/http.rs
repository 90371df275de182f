//! Observation of plain-text HTTP exchanges.
use std::fmt::{Display, Formatter};

use log::{info, trace};

/// TCP port whose payloads are handed to the [`HttpDecoder`].
pub const HTTP_PORT: u16 = 80;

/// Bytes of an undecodable payload shown in trace logs.
const TRACE_PREFIX: usize = 32;

/// Receives the TCP payloads exchanged with port 80.
pub trait HttpDecoder {
    /// Payload of a segment sent to port 80.
    fn decode_request(&mut self, payload: &[u8]);
    /// Payload of a segment sent from port 80.
    fn decode_reply(&mut self, payload: &[u8]);
}

/// Logs the start line of requests and replies.
#[derive(Clone, Debug, Default)]
pub struct HttpLogger;

impl HttpDecoder for HttpLogger {
    fn decode_request(&mut self, payload: &[u8]) {
        match HttpRequest::parse(payload) {
            Some(request) => info!("{}", request),
            None => trace_payload("request", payload),
        }
    }

    fn decode_reply(&mut self, payload: &[u8]) {
        match HttpReply::parse(payload) {
            Some(reply) => info!("{}", reply),
            None => trace_payload("reply", payload),
        }
    }
}

fn trace_payload(kind: &str, payload: &[u8]) {
    if !payload.is_empty() {
        let prefix = &payload[..payload.len().min(TRACE_PREFIX)];
        trace!("http_{} len={} data={}", kind, payload.len(), hex::encode(prefix));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub host: Option<String>,
}

impl HttpRequest {
    /// Parse the request line and the `Host` header at the start of `payload`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut lines = head_lines(payload);
        let start = lines.next()?;
        let mut parts = start.splitn(3, ' ');
        let method = parts.next()?;
        let target = parts.next()?;
        let version = parts.next()?;
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
            return None;
        }
        if !version.starts_with("HTTP/") {
            return None;
        }
        let host = lines.find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("host")
                .then(|| value.trim().to_string())
        });
        Some(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            host,
        })
    }
}

impl Display for HttpRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.method, self.target, self.version)?;
        if let Some(host) = &self.host {
            write!(f, " host={}", host)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub version: String,
    pub status: u16,
    pub reason: String,
}

impl HttpReply {
    /// Parse the status line at the start of `payload`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let start = head_lines(payload).next()?;
        let mut parts = start.splitn(3, ' ');
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        let status = parts.next()?.parse().ok()?;
        let reason = parts.next().unwrap_or_default();
        Some(Self {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
        })
    }
}

impl Display for HttpReply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.version, self.status, self.reason)
    }
}

/// The lines of the message head, i.e. up to the first empty line.
///
/// Lines that are not valid UTF-8 end the head.
fn head_lines(payload: &[u8]) -> impl Iterator<Item = &str> {
    payload
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .map_while(|line| std::str::from_utf8(line).ok())
        .take_while(|line| !line.is_empty())
}
