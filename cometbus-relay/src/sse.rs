// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Server-Sent Events Stream
//!
//! One SSE response keeps polling the session's queue until its lifetime
//! runs out. Every cycle writes the frame prefix, waits for traffic, then
//! writes the message array and the frame terminator, so each poll produces
//! exactly one frame (possibly `[]`).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use cometbus_core::{encode_messages, Message, MessageQueue};
use futures_util::stream::{self, Stream};
use tokio::time::Instant;
use tracing::warn;

use crate::metrics::RelayMetrics;

pub const FRAME_PREFIX: &str = "retry: 500\nevent: bus-traffic\ndata: ";
pub const FRAME_TERMINATOR: &str = "\n\n";

enum Step {
    Prefix,
    Poll,
    Done,
}

struct SseState {
    queue: Arc<MessageQueue>,
    deadline: Instant,
    poll_timeout: Duration,
    metrics: RelayMetrics,
    step: Step,
}

/// Streams bus traffic for `queue` as SSE chunks for `lifetime`.
///
/// A failed poll is written as one error frame and ends the stream.
pub fn event_stream(
    queue: Arc<MessageQueue>,
    lifetime: Duration,
    poll_timeout: Duration,
    metrics: RelayMetrics,
) -> impl Stream<Item = Result<String, Infallible>> + Send {
    let state = SseState {
        queue,
        deadline: Instant::now() + lifetime,
        poll_timeout,
        metrics,
        step: Step::Prefix,
    };

    stream::unfold(state, |mut state| async move {
        match state.step {
            Step::Done => None,
            Step::Prefix => {
                if Instant::now() >= state.deadline {
                    return None;
                }
                state.step = Step::Poll;
                Some((Ok(FRAME_PREFIX.to_string()), state))
            }
            Step::Poll => {
                let remaining = state.deadline.saturating_duration_since(Instant::now());
                let chunk = match state.queue.poll(remaining.min(state.poll_timeout)).await {
                    Ok(messages) => {
                        state.queue.heartbeat();
                        state.metrics.sse_frames_total.inc();
                        state
                            .metrics
                            .messages_delivered_total
                            .inc_by(messages.len() as u64);
                        state.step = Step::Prefix;
                        encode_messages(&messages)
                    }
                    Err(e) => {
                        warn!("SSE poll failed for {}: {}", state.queue.session(), e);
                        state.metrics.poll_errors_total.inc();
                        state.step = Step::Done;
                        encode_messages(&[Message::error(
                            "failed to poll message queue",
                            Some(&e.to_string()),
                        )])
                    }
                };
                Some((Ok(format!("{}{}", chunk, FRAME_TERMINATOR)), state))
            }
        }
    })
}
