// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for server bus routing across sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cometbus_core::message::{commands, parts, subjects};
use cometbus_core::{BusError, Message, QueueConfig, QueueError, QueueSession, ServerBus};

fn bus() -> Arc<ServerBus> {
    Arc::new(ServerBus::new(
        QueueConfig::default(),
        Duration::from_secs(300),
    ))
}

fn connect(bus: &ServerBus, session: &QueueSession) {
    bus.store(
        session,
        Message::command(subjects::SERVER_BUS, commands::CONNECT_TO_QUEUE),
    )
    .unwrap();
    bus.get_queue(session).unwrap().flush().unwrap();
}

fn subscribe(bus: &ServerBus, session: &QueueSession, subject: &str) {
    bus.store(
        session,
        Message::command(subjects::SERVER_BUS, commands::REMOTE_SUBSCRIBE)
            .with(parts::SUBJECT, subject),
    )
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_long_poll_wakes_on_publish() {
    let bus = bus();
    let sender = QueueSession::new("h1", "sender");
    let listener = QueueSession::new("h2", "listener");
    connect(&bus, &sender);
    connect(&bus, &listener);
    subscribe(&bus, &listener, "news");

    let queue = bus.get_queue(&listener).unwrap();
    let poll = tokio::spawn(async move { queue.poll(Duration::from_secs(45)).await });

    tokio::time::sleep(Duration::from_secs(3)).await;
    bus.store(&sender, Message::to("news").with("headline", "bus works"))
        .unwrap();

    let delivered = poll.await.unwrap().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].get_str("headline"), Some("bus works"));
}

#[test]
fn test_fan_out_to_every_subscriber() {
    let bus = bus();
    let sender = QueueSession::new("h", "0");
    connect(&bus, &sender);

    let listeners: Vec<QueueSession> = (1..=3)
        .map(|i| QueueSession::new("h", i.to_string()))
        .collect();
    for listener in &listeners {
        connect(&bus, listener);
        subscribe(&bus, listener, "room");
    }

    let delivered = bus.store(&sender, Message::to("room")).unwrap();
    assert_eq!(delivered, 3);

    for listener in &listeners {
        assert_eq!(bus.get_queue(listener).unwrap().len(), 1);
    }
}

#[test]
fn test_local_and_remote_subscribers_both_receive() {
    let bus = bus();
    let session = QueueSession::new("h", "1");
    connect(&bus, &session);
    subscribe(&bus, &session, "audit");

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    bus.subscribe("audit", move |_: &ServerBus, _: &QueueSession, _: &Message| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(bus.store(&session, Message::to("audit")).unwrap(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(bus.get_queue(&session).unwrap().len(), 1);
}

#[test]
fn test_heartbeat_requires_queue() {
    let bus = bus();
    let session = QueueSession::new("h", "ghost");

    let result = bus.store(
        &session,
        Message::command(subjects::SERVER_BUS, commands::HEARTBEAT),
    );
    assert!(matches!(result, Err(BusError::QueueUnavailable(_))));
}

#[test]
fn test_send_to_full_queue_reports_back_pressure() {
    let bus = Arc::new(ServerBus::new(
        QueueConfig { capacity: 1 },
        Duration::from_secs(300),
    ));
    let session = QueueSession::new("h", "1");
    connect(&bus, &session);

    bus.send(&session, Message::to("x")).unwrap();
    assert_eq!(
        bus.send(&session, Message::to("y")),
        Err(BusError::Queue(QueueError::Full { capacity: 1 }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_sessions_expire() {
    let bus = Arc::new(ServerBus::new(
        QueueConfig::default(),
        Duration::from_secs(60),
    ));
    let session = QueueSession::new("h", "1");
    connect(&bus, &session);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(bus.get_queue(&session).is_some());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(bus.get_queue(&session).is_none());
    assert_eq!(bus.session_count(), 0);
}
