//! Inbound headers the engine reads before running a chain.
//!
//! Every header is optional. Absent or undecodable values fall back to a
//! default and never fail the request.
//!
//! | Header | Meaning | Default |
//! |---|---|---|
//! | `x-mochi-mirror` | shadow/mirrored request | `false` |
//! | `x-mochi-user` | upstream caller id | `""` |
//! | `x-mochi-timeout` | client budget, milliseconds | ignored |
//! | `x-mochi-real-ip` | overrides the computed peer IP | forwarding headers, then peer |
//! | `x-mochi-real-port` | client port | `""` |

use std::net::SocketAddr;
use std::time::Duration;

use http::HeaderMap;
use tracing::warn;

use crate::metadata::{self, Metadata, keys};

pub const MIRROR: &str = "x-mochi-mirror";
pub const CALLER: &str = "x-mochi-user";
pub const TIMEOUT: &str = "x-mochi-timeout";
pub const REMOTE_IP: &str = "x-mochi-real-ip";
pub const REMOTE_PORT: &str = "x-mochi-real-port";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Client budgets above this many milliseconds lose [`TIMEOUT_MARGIN`] so the
/// server answers before the client gives up.
const TIMEOUT_FLOOR_MS: i64 = 20;
const TIMEOUT_MARGIN_MS: i64 = 20;

fn get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Present, non-empty, and not the literal `null` some proxies send.
fn get_set<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    get(headers, name).filter(|v| !v.is_empty() && *v != "null")
}

/// The client-declared budget, less the safety margin.
///
/// `None` when the header is absent, undecodable, zero or negative. Values
/// at or below the floor are returned as-is.
pub(crate) fn client_timeout(headers: &HeaderMap) -> Option<Duration> {
    let mut ms: i64 = get(headers, TIMEOUT)?.trim().parse().ok()?;
    if ms <= 0 {
        return None;
    }
    if ms > TIMEOUT_FLOOR_MS {
        ms -= TIMEOUT_MARGIN_MS;
    }
    Some(Duration::from_millis(ms.unsigned_abs()))
}

/// Client IP, preferring in order: the dedicated header, the first entry of
/// `x-forwarded-for`, `x-real-ip`, and finally the peer address.
pub(crate) fn remote_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(ip) = get_set(headers, REMOTE_IP) {
        return ip.to_owned();
    }
    if let Some(first) = get(headers, FORWARDED_FOR)
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_owned();
    }
    if let Some(ip) = get_set(headers, REAL_IP) {
        return ip.to_owned();
    }
    peer.ip().to_string()
}

pub(crate) fn remote_port(headers: &HeaderMap) -> String {
    get_set(headers, REMOTE_PORT).unwrap_or_default().to_owned()
}

pub(crate) fn caller(headers: &HeaderMap) -> String {
    get(headers, CALLER).unwrap_or_default().to_owned()
}

pub(crate) fn mirror(headers: &HeaderMap) -> bool {
    let Some(raw) = get(headers, MIRROR).filter(|v| !v.is_empty()) else {
        return false;
    };
    match metadata::parse_bool(raw) {
        Some(v) => v,
        None => {
            warn!(value = raw, "failed to parse mirror header, treating as false");
            false
        }
    }
}

/// Builds the per-request metadata from connection facts and the effective timeout.
pub(crate) fn request_metadata(headers: &HeaderMap, peer: SocketAddr, timeout: Duration) -> Metadata {
    let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    let mut md = Metadata::new();
    md.insert(keys::REMOTE_IP, remote_ip(headers, peer));
    md.insert(keys::REMOTE_PORT, remote_port(headers));
    md.insert(keys::CALLER, caller(headers));
    md.insert(keys::MIRROR, mirror(headers));
    md.insert(keys::TIMEOUT, timeout_ms);
    md
}
