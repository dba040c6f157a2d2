// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! CometBus Relay Server
//!
//! Serves the bus over HTTP (SSE, long-poll, flush) and WebSocket.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};

use cometbus_relay::config::RelayConfig;
use cometbus_relay::http::{create_router, HttpState};
use cometbus_relay::metrics::RelayMetrics;
use cometbus_relay::{create_bus, run_session_cleanup, websocket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cometbus_relay=info".parse()?),
        )
        .init();

    let config = RelayConfig::from_env();
    info!(
        "Starting CometBus Relay Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("HTTP (bus/health/metrics): {}", config.listen_addr);
    info!("WebSocket: {}", config.ws_listen_addr);
    info!(
        "SSE {}, long-polling {}",
        if config.sse_enabled { "on" } else { "off" },
        if config.long_polling_enabled { "on" } else { "off" }
    );

    let metrics = RelayMetrics::new()?;
    let bus = create_bus(&config);

    let http_state = HttpState::new(bus.clone(), config.clone(), metrics.clone());
    let rate_limiter = http_state.rate_limiter.clone();
    let http_router = create_router(http_state);

    let http_listener = TcpListener::bind(config.listen_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(
            http_listener,
            http_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await {
            error!("HTTP server stopped: {}", e);
        }
    });

    tokio::spawn(run_session_cleanup(bus.clone(), config.clone(), metrics.clone()));

    // Remove stale rate limiter buckets
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = rate_limiter.cleanup_inactive(Duration::from_secs(1800));
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter entries", removed);
            }
        }
    });

    let listener = TcpListener::bind(config.ws_listen_addr).await?;
    info!("WebSocket server listening on {}", config.ws_listen_addr);

    while let Ok((stream, addr)) = listener.accept().await {
        let bus = bus.clone();
        let metrics = metrics.clone();
        let max_message_size = config.max_message_size;

        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(ws_stream) => {
                    info!("New connection from {}", addr);
                    metrics.ws_connections_total.inc();
                    metrics.ws_connections_active.inc();

                    websocket::handle_connection(ws_stream, bus, metrics.clone(), max_message_size)
                        .await;

                    metrics.ws_connections_active.dec();
                    info!("Connection closed: {}", addr);
                }
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                }
            }
        });
    }

    Ok(())
}
