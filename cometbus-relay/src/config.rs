// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Configuration
//!
//! Settings are read from `COMETBUS_*` environment variables. Missing or
//! unparsable values fall back to the defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use cometbus_core::QueueConfig;
use tracing::warn;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP listener (bus endpoint, health, metrics).
    pub listen_addr: SocketAddr,
    /// WebSocket listener.
    pub ws_listen_addr: SocketAddr,
    /// Longest a long-poll request waits for messages.
    pub long_poll_timeout_ms: u64,
    /// Lifetime of one SSE response.
    pub sse_timeout_ms: u64,
    /// Longest a single SSE cycle waits before writing a frame.
    pub sse_poll_timeout_ms: u64,
    pub sse_enabled: bool,
    pub long_polling_enabled: bool,
    /// Idle time after which a session's queue expires.
    pub session_timeout_secs: u64,
    /// Maximum messages pending per queue.
    pub queue_capacity: usize,
    /// Maximum inbound payload size in bytes.
    pub max_message_size: usize,
    /// Requests allowed per client per minute.
    pub rate_limit_per_min: u32,
    /// Interval between expired-session sweeps.
    pub cleanup_interval_secs: u64,
    /// Bearer token required on `/metrics`, if set.
    pub metrics_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_listen_addr: SocketAddr::from(([0, 0, 0, 0], 8085)),
            long_poll_timeout_ms: 45_000,
            sse_timeout_ms: 30_000,
            sse_poll_timeout_ms: 10_000,
            sse_enabled: true,
            long_polling_enabled: true,
            session_timeout_secs: 300,
            queue_capacity: 1000,
            max_message_size: 256 * 1024,
            rate_limit_per_min: 600,
            cleanup_interval_secs: 30,
            metrics_token: None,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayConfig::default();
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        RelayConfig {
            listen_addr: parse_or(&read, "COMETBUS_LISTEN_ADDR", defaults.listen_addr),
            ws_listen_addr: parse_or(&read, "COMETBUS_WS_LISTEN_ADDR", defaults.ws_listen_addr),
            long_poll_timeout_ms: parse_or(
                &read,
                "COMETBUS_LONG_POLL_TIMEOUT_MS",
                defaults.long_poll_timeout_ms,
            ),
            sse_timeout_ms: parse_or(&read, "COMETBUS_SSE_TIMEOUT_MS", defaults.sse_timeout_ms),
            sse_poll_timeout_ms: nonzero_or(
                &read,
                "COMETBUS_SSE_POLL_TIMEOUT_MS",
                defaults.sse_poll_timeout_ms,
            ),
            sse_enabled: parse_or(&read, "COMETBUS_SSE_ENABLED", defaults.sse_enabled),
            long_polling_enabled: parse_or(
                &read,
                "COMETBUS_LONG_POLLING_ENABLED",
                defaults.long_polling_enabled,
            ),
            session_timeout_secs: parse_or(
                &read,
                "COMETBUS_SESSION_TIMEOUT_SECS",
                defaults.session_timeout_secs,
            ),
            queue_capacity: nonzero_or(&read, "COMETBUS_QUEUE_CAPACITY", defaults.queue_capacity),
            max_message_size: parse_or(
                &read,
                "COMETBUS_MAX_MESSAGE_SIZE",
                defaults.max_message_size,
            ),
            rate_limit_per_min: parse_or(
                &read,
                "COMETBUS_RATE_LIMIT_PER_MIN",
                defaults.rate_limit_per_min,
            ),
            cleanup_interval_secs: nonzero_or(
                &read,
                "COMETBUS_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval_secs,
            ),
            metrics_token: read("COMETBUS_METRICS_TOKEN"),
        }
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }

    pub fn sse_timeout(&self) -> Duration {
        Duration::from_millis(self.sse_timeout_ms)
    }

    /// At least 1 ms, so the SSE loop always waits.
    pub fn sse_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.sse_poll_timeout_ms.max(1))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// At least 1 s; `tokio::time::interval` rejects a zero period.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Queue settings for the server bus.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
        }
    }
}

fn parse_or<T, F>(read: &F, name: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match read(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using default", name, raw);
            default
        }),
        None => default,
    }
}

/// Like [`parse_or`], but zero also falls back to the default.
fn nonzero_or<T, F>(read: &F, name: &str, default: T) -> T
where
    T: FromStr + PartialEq + Default + Copy,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(read, name, default);
    if value == T::default() {
        warn!("Ignoring zero {}, using default", name);
        return default;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> RelayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]);
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.ws_listen_addr.port(), 8085);
        assert_eq!(config.long_poll_timeout(), Duration::from_secs(45));
        assert_eq!(config.sse_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_timeout(), Duration::from_secs(300));
        assert!(config.sse_enabled);
        assert!(config.long_polling_enabled);
        assert_eq!(config.queue_config().capacity, 1000);
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_vars(&[
            ("COMETBUS_LISTEN_ADDR", "127.0.0.1:9000"),
            ("COMETBUS_SSE_ENABLED", "false"),
            ("COMETBUS_LONG_POLL_TIMEOUT_MS", "1500"),
            ("COMETBUS_QUEUE_CAPACITY", "10"),
            ("COMETBUS_METRICS_TOKEN", "secret"),
        ]);
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(!config.sse_enabled);
        assert_eq!(config.long_poll_timeout(), Duration::from_millis(1500));
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.metrics_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_vars(&[
            ("COMETBUS_RATE_LIMIT_PER_MIN", "lots"),
            ("COMETBUS_WS_LISTEN_ADDR", "nowhere"),
            ("COMETBUS_METRICS_TOKEN", "  "),
        ]);
        assert_eq!(config.rate_limit_per_min, 600);
        assert_eq!(config.ws_listen_addr.port(), 8085);
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn test_zero_poll_and_interval_fall_back() {
        let config = from_vars(&[
            ("COMETBUS_SSE_POLL_TIMEOUT_MS", "0"),
            ("COMETBUS_CLEANUP_INTERVAL_SECS", "0"),
            ("COMETBUS_QUEUE_CAPACITY", "0"),
        ]);
        assert_eq!(config.sse_poll_timeout(), Duration::from_secs(10));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(30));
        assert_eq!(config.queue_capacity, 1000);

        let config = from_vars(&[("COMETBUS_SSE_POLL_TIMEOUT_MS", "1")]);
        assert_eq!(config.sse_poll_timeout(), Duration::from_millis(1));

        let config = RelayConfig {
            sse_poll_timeout_ms: 0,
            cleanup_interval_secs: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.sse_poll_timeout(), Duration::from_millis(1));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1));
    }
}
