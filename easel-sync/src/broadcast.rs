//! Fan-out of server events to the participants of one room.
//!
//! Every participant owns an [`Outbox`]: a single FIFO queue drained by the
//! connection's writer, so a participant sees events in exactly the order
//! they were queued.
//!
//! ```text
//! operation_*, participant_*, …  ──► always queued ─────────┐
//!                                                            ├─► FIFO ─► writer ─► WebSocket
//! cursor_update, stroke_* relays ─► queued while fewer than ─┘
//!                                   `capacity` relays wait,
//!                                   dropped otherwise
//! ```
//!
//! Messages are encoded once per broadcast and shared between receivers.
//! Sends never block, so a broadcast can run to completion while the
//! room registry is locked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{ParticipantId, ProtocolError, ServerMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters, shared with every outbox of the group.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

// ───────────────────────────────────────────────────────────────────
// Outbox
// ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Envelope {
    payload: Arc<str>,
    ephemeral: bool,
}

/// Sending half of a participant's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Envelope>,
    /// Ephemeral messages queued but not yet taken by the receiver
    ephemeral_waiting: Arc<AtomicUsize>,
    ephemeral_capacity: usize,
}

/// Receiving half, drained by the connection's writer.
#[derive(Debug)]
pub struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
    ephemeral_waiting: Arc<AtomicUsize>,
}

/// Create an outbox that holds at most `ephemeral_capacity` waiting ephemeral messages.
pub fn outbox(ephemeral_capacity: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ephemeral_waiting = Arc::new(AtomicUsize::new(0));
    (
        Outbox {
            tx,
            ephemeral_waiting: ephemeral_waiting.clone(),
            ephemeral_capacity: ephemeral_capacity.max(1),
        },
        OutboxReceiver { rx, ephemeral_waiting },
    )
}

/// Result of handing one message to one outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Too many ephemeral messages already waiting.
    Dropped,
    /// Receiver gone (connection shutting down).
    Closed,
}

impl Outbox {
    /// Queue a pre-encoded message. Ephemeral messages are subject to the cap.
    pub fn deliver(&self, payload: Arc<str>, ephemeral: bool) -> Delivery {
        if ephemeral {
            let admitted = self
                .ephemeral_waiting
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |waiting| {
                    (waiting < self.ephemeral_capacity).then_some(waiting + 1)
                })
                .is_ok();
            if !admitted {
                return Delivery::Dropped;
            }
        }

        match self.tx.send(Envelope { payload, ephemeral }) {
            Ok(()) => Delivery::Queued,
            Err(_) => {
                if ephemeral {
                    self.ephemeral_waiting.fetch_sub(1, Ordering::AcqRel);
                }
                Delivery::Closed
            }
        }
    }

    /// Encode and queue a single message.
    pub fn send(&self, msg: &ServerMessage) -> Result<Delivery, ProtocolError> {
        let encoded: Arc<str> = msg.encode()?.into();
        Ok(self.deliver(encoded, msg.is_ephemeral()))
    }
}

impl OutboxReceiver {
    /// Next message to write, in queue order.
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        let envelope = self.rx.recv().await?;
        Some(self.take(envelope))
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        let envelope = self.rx.try_recv().ok()?;
        Some(self.take(envelope))
    }

    fn take(&self, envelope: Envelope) -> Arc<str> {
        if envelope.ephemeral {
            self.ephemeral_waiting.fetch_sub(1, Ordering::AcqRel);
        }
        envelope.payload
    }
}

// ───────────────────────────────────────────────────────────────────
// Broadcast group
// ───────────────────────────────────────────────────────────────────

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    AllExcept(ParticipantId),
}

impl Audience {
    fn includes(&self, participant_id: &ParticipantId) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::AllExcept(excluded) => excluded != participant_id,
        }
    }
}

/// The outboxes of every participant in one room.
pub struct BroadcastGroup {
    peers: HashMap<ParticipantId, Outbox>,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            atomic_stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    pub fn add_peer(&mut self, participant_id: ParticipantId, outbox: Outbox) {
        self.peers.insert(participant_id, outbox);
    }

    pub fn remove_peer(&mut self, participant_id: &ParticipantId) -> bool {
        self.peers.remove(participant_id).is_some()
    }

    /// Encode `msg` once and queue it for the audience.
    ///
    /// Returns the number of outboxes that accepted the message.
    pub fn broadcast(&self, msg: &ServerMessage, audience: Audience) -> Result<usize, ProtocolError> {
        let encoded: Arc<str> = msg.encode()?.into();
        let ephemeral = msg.is_ephemeral();
        let mut queued = 0;

        for (participant_id, outbox) in &self.peers {
            if !audience.includes(participant_id) {
                continue;
            }
            match outbox.deliver(encoded.clone(), ephemeral) {
                Delivery::Queued => queued += 1,
                Delivery::Dropped => {
                    self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Dropped ephemeral message for lagging peer {participant_id}");
                }
                Delivery::Closed => {
                    log::debug!("Outbox of peer {participant_id} is closed");
                }
            }
        }

        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(queued)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, participant_id: &ParticipantId) -> bool {
        self.peers.contains_key(participant_id)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.len(),
        }
    }
}

impl Default for BroadcastGroup {
    fn default() -> Self {
        Self::new()
    }
}
