// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! CometBus Relay
//!
//! Gateway between browser clients and the server bus:
//! - HTTP bus endpoint with SSE, long-poll and flush delivery
//! - WebSocket channel for clients that upgrade
//! - Health checks and Prometheus metrics

pub mod config;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod sse;
pub mod websocket;

use std::sync::Arc;

use cometbus_core::ServerBus;
use tracing::info;

use config::RelayConfig;
use metrics::RelayMetrics;

/// Creates the server bus for a relay configuration.
pub fn create_bus(config: &RelayConfig) -> Arc<ServerBus> {
    Arc::new(ServerBus::new(config.queue_config(), config.session_timeout()))
}

/// Removes expired sessions every `cleanup_interval`, forever.
pub async fn run_session_cleanup(bus: Arc<ServerBus>, config: RelayConfig, metrics: RelayMetrics) {
    let mut interval = tokio::time::interval(config.cleanup_interval());
    loop {
        interval.tick().await;
        let removed = bus.cleanup_expired(config.session_timeout());
        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
            metrics.sessions_expired_total.inc_by(removed as u64);
        }
        metrics.sessions_active.set(bus.session_count() as i64);
    }
}
