//! Server and per-route configuration.
//!
//! Durations are written the way operators write them in config files:
//! `"1s"`, `"250ms"`, `"1m30s"`, `"1.5s"`. Negative durations do not parse,
//! so a deserialized config can never carry a negative timeout.
//!
//! ```rust
//! use std::time::Duration;
//! use mochi::ServerConfig;
//!
//! let conf: ServerConfig = serde_json::from_str(r#"{
//!     "address": "127.0.0.1:9090",
//!     "timeout": "250ms",
//!     "read_timeout": "5s"
//! }"#).unwrap();
//!
//! assert_eq!(conf.network, "tcp");
//! assert_eq!(conf.timeout, Duration::from_millis(250));
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Network kinds the listener understands.
const NETWORKS: [&str; 3] = ["tcp", "tcp4", "tcp6"];

/// Listener and request-budget configuration of an [`Engine`](crate::Engine).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// `tcp` (either family), `tcp4` or `tcp6`. Empty means `tcp`.
    pub network: String,
    /// `host:port`, or `:port` for every interface. Empty falls back to
    /// `$PORT`, then `:8080`.
    pub address: String,
    /// Default per-request budget. Zero disables the deadline.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Upper bound on reading request headers. Zero disables it.
    #[serde(deserialize_with = "deserialize_duration")]
    pub read_timeout: Duration,
    /// Upper bound on dispatching one request. Zero disables it.
    #[serde(deserialize_with = "deserialize_duration")]
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_owned(),
            address: String::new(),
            timeout: Duration::from_secs(1),
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
        }
    }
}

impl ServerConfig {
    /// Normalizes and checks the config in place.
    pub fn validate(&mut self) -> Result<()> {
        if self.network.is_empty() {
            self.network = "tcp".to_owned();
        }
        if !NETWORKS.contains(&self.network.as_str()) {
            return Err(Error::Config(format!(
                "unsupported network `{}`, expected one of {NETWORKS:?}",
                self.network
            )));
        }
        Ok(())
    }
}

/// Per-path overrides, keyed by absolute route path on the engine.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct MethodConfig {
    /// Replaces the server default budget for this path. Zero disables the deadline.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl MethodConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    let text = String::deserialize(d)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

/// Parses a duration such as `"300ms"`, `"1.5s"` or `"2h45m"`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `"0"` is zero.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let invalid = || Error::Config(format!("invalid duration `{text}`"));

    if text.starts_with('-') {
        return Err(Error::Config(format!("negative duration `{text}`")));
    }
    let mut rest = text.strip_prefix('+').unwrap_or(text);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
