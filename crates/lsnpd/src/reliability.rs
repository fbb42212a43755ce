//! Reliability layer — message-id dedup, per-message retry, ACK tracking.
//!
//! Sender side: every reliable record is parked here with its serialized
//! bytes; a sweep task retransmits due entries on an exponential schedule
//! (base × 2^attempt) until an ACK lands or attempts run out. Completion is
//! a one-shot channel per MESSAGE_ID — the receive path resolves it, the
//! original caller awaits it, and nothing else shares state.
//!
//! Receiver side: a bounded per-sender set of recently seen ids makes
//! receipt idempotent. Duplicates are ACKed again but never re-dispatched.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Per-sender capacity of the seen-id window.
pub const SEEN_CAPACITY: usize = 1024;

/// Final fate of a reliable send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Acked,
    /// Retries exhausted without an ACK.
    Failed,
}

struct ReliableEntry {
    dest: SocketAddr,
    payload: Bytes,
    /// Retransmissions performed so far.
    attempt: u32,
    next_due: Instant,
    waiter: Option<oneshot::Sender<Delivery>>,
}

#[derive(Default)]
struct SeenIds {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenIds {
    /// True the first time an id is observed; older ids fall off the window.
    fn first_sight(&mut self, message_id: &str) -> bool {
        if self.set.contains(message_id) {
            return false;
        }
        self.set.insert(message_id.to_string());
        self.order.push_back(message_id.to_string());
        while self.order.len() > SEEN_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

pub struct ReliabilityLayer {
    inflight: DashMap<String, ReliableEntry>,
    /// Seen-id windows keyed by sender full id.
    seen: DashMap<String, SeenIds>,
    base: Duration,
    max_attempts: u32,
}

impl ReliabilityLayer {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            inflight: DashMap::new(),
            seen: DashMap::new(),
            base,
            max_attempts,
        }
    }

    // ── Sender side ──────────────────────────────────────────────────────────

    /// Park a reliable message. The caller transmits the initial copy; this
    /// layer owns every retransmission after that. The returned receiver
    /// resolves on ACK or on retry exhaustion.
    pub fn register(
        &self,
        message_id: &str,
        dest: SocketAddr,
        payload: Bytes,
    ) -> oneshot::Receiver<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.inflight.insert(
            message_id.to_string(),
            ReliableEntry {
                dest,
                payload,
                attempt: 0,
                next_due: Instant::now() + self.base,
                waiter: Some(tx),
            },
        );
        rx
    }

    /// An ACK arrived for this id. Resolves the waiter; unknown ids (late
    /// ACKs after exhaustion or cancellation) are ignored.
    pub fn ack(&self, message_id: &str) {
        if let Some((_, mut entry)) = self.inflight.remove(message_id) {
            if let Some(waiter) = entry.waiter.take() {
                let _ = waiter.send(Delivery::Acked);
            }
            tracing::debug!(message_id, "delivery acknowledged");
        }
    }

    /// Collect every entry whose retry deadline passed: due entries are
    /// rescheduled and returned for retransmission; exhausted entries are
    /// removed and their waiters told of failure. Cancelled sends — the
    /// caller dropped its waiter — are evicted without any verdict.
    pub fn due_retries(&self) -> Vec<(SocketAddr, Bytes)> {
        let now = Instant::now();
        let mut resend = Vec::new();
        let mut exhausted = Vec::new();
        let mut cancelled = Vec::new();

        for mut entry in self.inflight.iter_mut() {
            if entry
                .waiter
                .as_ref()
                .is_some_and(|waiter| waiter.is_closed())
            {
                cancelled.push(entry.key().clone());
                continue;
            }
            if entry.next_due > now {
                continue;
            }
            if entry.attempt >= self.max_attempts {
                exhausted.push(entry.key().clone());
                continue;
            }
            entry.attempt += 1;
            let backoff = self.base * 2u32.pow(entry.attempt);
            entry.next_due = now + backoff;
            tracing::debug!(
                message_id = %entry.key(),
                attempt = entry.attempt,
                next_backoff_ms = backoff.as_millis() as u64,
                "retransmitting"
            );
            resend.push((entry.dest, entry.payload.clone()));
        }

        for message_id in cancelled {
            if self.inflight.remove(&message_id).is_some() {
                tracing::debug!(message_id = %message_id, "reliable send cancelled by caller");
            }
        }
        for message_id in exhausted {
            if let Some((_, mut entry)) = self.inflight.remove(&message_id) {
                tracing::warn!(message_id = %message_id, "retries exhausted, delivery failed");
                if let Some(waiter) = entry.waiter.take() {
                    let _ = waiter.send(Delivery::Failed);
                }
            }
        }
        resend
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    // ── Receiver side ────────────────────────────────────────────────────────

    /// True when `(sender, message_id)` has not been processed recently.
    /// A false return means: ACK again, but do not re-dispatch.
    pub fn first_sight(&self, sender: &str, message_id: &str) -> bool {
        self.seen
            .entry(sender.to_string())
            .or_default()
            .first_sight(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:50999".parse().unwrap()
    }

    #[test]
    fn seen_ids_are_per_sender_and_bounded() {
        let layer = ReliabilityLayer::new(Duration::from_secs(2), 3);

        assert!(layer.first_sight("alice@10.0.0.1", "m1"));
        assert!(!layer.first_sight("alice@10.0.0.1", "m1"));
        // A different sender has its own window.
        assert!(layer.first_sight("bob@10.0.0.2", "m1"));

        // Old ids fall out once the window overflows.
        for i in 0..SEEN_CAPACITY {
            layer.first_sight("alice@10.0.0.1", &format!("fill-{i}"));
        }
        assert!(layer.first_sight("alice@10.0.0.1", "m1"));
    }

    #[tokio::test]
    async fn ack_resolves_the_waiter_and_clears_the_entry() {
        let layer = ReliabilityLayer::new(Duration::from_secs(2), 3);
        let rx = layer.register("m1", addr(), Bytes::from_static(b"x"));
        assert_eq!(layer.inflight_len(), 1);

        layer.ack("m1");
        assert_eq!(rx.await.unwrap(), Delivery::Acked);
        assert_eq!(layer.inflight_len(), 0);

        // A replayed ACK for a gone id is harmless.
        layer.ack("m1");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_schedule_backs_off_exponentially() {
        let base = Duration::from_secs(2);
        let layer = ReliabilityLayer::new(base, 3);
        let _rx = layer.register("m1", addr(), Bytes::from_static(b"x"));

        // Nothing due before the base interval.
        assert!(layer.due_retries().is_empty());

        // Retries become due at +2s, then +4s, then +8s after each other.
        for expected_gap in [2u64, 4, 8] {
            tokio::time::advance(Duration::from_secs(expected_gap)).await;
            let due = layer.due_retries();
            assert_eq!(due.len(), 1, "one retry due after {expected_gap}s");
            // Immediately after, nothing further is due.
            assert!(layer.due_retries().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_failure() {
        let layer = ReliabilityLayer::new(Duration::from_millis(10), 3);
        let rx = layer.register("m1", addr(), Bytes::from_static(b"x"));

        // Drain all three retransmissions, then the failure deadline.
        let mut sent = 0;
        for _ in 0..8 {
            tokio::time::advance(Duration::from_millis(200)).await;
            sent += layer.due_retries().len();
        }
        assert_eq!(sent, 3, "retry count stops at max_attempts");
        assert_eq!(rx.await.unwrap(), Delivery::Failed);
        assert_eq!(layer.inflight_len(), 0);
    }

    #[tokio::test]
    async fn dropping_the_waiter_cancels_the_send() {
        let layer = ReliabilityLayer::new(Duration::from_secs(2), 3);
        let rx = layer.register("m1", addr(), Bytes::from_static(b"x"));
        assert_eq!(layer.inflight_len(), 1);

        // The caller walks away; the next sweep evicts the entry without
        // retransmitting it or reporting failure anywhere.
        drop(rx);
        assert!(layer.due_retries().is_empty());
        assert_eq!(layer.inflight_len(), 0);
    }
}
