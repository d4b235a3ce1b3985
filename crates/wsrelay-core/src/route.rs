//! Routing header extraction.
//!
//! The first chunk a client sends is treated as pseudo-HTTP headers for the
//! sole purpose of finding one routing header, e.g.
//!
//! ```text
//! GET / HTTP/1.1
//! Host: cdn.example.com
//! X-Real-Host: 10.0.0.5:2222
//! Upgrade: websocket
//! ```
//!
//! Nothing else is interpreted and the request line is not validated.
//! Parsing is best-effort: anything that cannot be decoded or split yields
//! `None` and the caller falls back to the binding's default target.

use crate::config::{parse_port, Target};

/// Header consulted when no other name is configured.
pub const DEFAULT_ROUTE_HEADER: &str = "X-Real-Host";

/// Find the routing directive in `chunk`.
///
/// Lines are CRLF (or bare LF) delimited. The first line whose name matches
/// `header` case-insensitively decides the outcome: its value is `host` or
/// `host:port`, and a missing port becomes `default_port`. Lines that are
/// not valid UTF-8 are skipped.
pub fn extract_route(chunk: &[u8], header: &str, default_port: u16) -> Option<Target> {
    let value = chunk
        .split(|&b| b == b'\n')
        .filter_map(|line| std::str::from_utf8(line.strip_suffix(b"\r").unwrap_or(line)).ok())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case(header).then_some(value)
        })?;

    parse_host_port(value.trim(), default_port)
}

/// Split `host`, `host:port`, `[v6]` or `[v6]:port`.
fn parse_host_port(value: &str, default_port: u16) -> Option<Target> {
    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':')?)),
        }
    } else {
        match value.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (value, None),
        }
    };

    if host.is_empty() {
        return None;
    }
    let port = match port {
        Some(p) => parse_port(p.trim())?,
        None => default_port,
    };
    Some(Target::new(host, port))
}
