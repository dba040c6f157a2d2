// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Relay metrics, registered on a private registry.
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    pub polls_total: IntCounter,
    pub sse_frames_total: IntCounter,
    pub messages_received_total: IntCounter,
    pub messages_delivered_total: IntCounter,
    pub disconnects_sent_total: IntCounter,
    pub poll_errors_total: IntCounter,
    pub sessions_expired_total: IntCounter,
    pub ws_connections_total: IntCounter,
    pub rate_limited_total: IntCounter,
    pub sessions_active: IntGauge,
    pub ws_connections_active: IntGauge,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        Ok(RelayMetrics {
            polls_total: counter(&registry, "cometbus_polls_total", "Bus poll requests served")?,
            sse_frames_total: counter(
                &registry,
                "cometbus_sse_frames_total",
                "Server-sent event frames written",
            )?,
            messages_received_total: counter(
                &registry,
                "cometbus_messages_received_total",
                "Messages received from clients",
            )?,
            messages_delivered_total: counter(
                &registry,
                "cometbus_messages_delivered_total",
                "Messages delivered to clients",
            )?,
            disconnects_sent_total: counter(
                &registry,
                "cometbus_disconnects_sent_total",
                "Session expiry disconnects sent to clients",
            )?,
            poll_errors_total: counter(
                &registry,
                "cometbus_poll_errors_total",
                "Poll requests that failed",
            )?,
            sessions_expired_total: counter(
                &registry,
                "cometbus_sessions_expired_total",
                "Idle sessions removed by cleanup",
            )?,
            ws_connections_total: counter(
                &registry,
                "cometbus_ws_connections_total",
                "WebSocket connections accepted",
            )?,
            rate_limited_total: counter(
                &registry,
                "cometbus_rate_limited_total",
                "Requests rejected by the rate limiter",
            )?,
            sessions_active: gauge(&registry, "cometbus_sessions_active", "Live session queues")?,
            ws_connections_active: gauge(
                &registry,
                "cometbus_ws_connections_active",
                "Open WebSocket connections",
            )?,
            registry,
        })
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}
