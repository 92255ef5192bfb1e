//! Stochastic datagram bearer: latency, jitter, loss, and reordering on
//! PDUs, one instance per direction.
//!
//! For each enqueued PDU the bearer draws from its dedicated RNG stream:
//!
//! 1. `u₁ < loss_rate` → the PDU is dropped at enqueue time.
//! 2. `delay = latency_ms + uniform(−jitter_ms, +jitter_ms)`, clamped ≥ 0.
//! 3. `u₂ < reorder_rate` → a second jitter draw, applied with the sign
//!    opposite the first draw's, so the PDU can overtake (or be overtaken
//!    by) a neighbor. The PDU is marked reordered.
//! 4. Insertion into a per-direction priority queue keyed by
//!    `(scheduled_t_ms, enqueue seq)`.
//!
//! Delivery drains everything with `scheduled ≤ t_ms` in key order, so ties
//! resolve to enqueue order unless a reorder offset fired. No duplication
//! in v1. With `jitter_ms = 0` both draws are zero and delivery order
//! equals enqueue order regardless of `reorder_rate`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

use rand::Rng;
use rand_chacha::ChaCha20Rng;

use drybox_domain::BearerConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Rolling-statistics window in logical milliseconds.
pub const STATS_WINDOW_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Delivered / enqueue outcome
// ---------------------------------------------------------------------------

/// One PDU handed back by [`Bearer::poll_deliver`].
#[derive(Debug, Clone)]
pub struct Delivered {
    // ---
    pub payload: Vec<u8>,
    pub enqueue_t_ms: u64,
    pub scheduled_t_ms: u64,
    pub reordered: bool,
}

/// Immediate outcome of [`Bearer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Scheduled for delivery at the contained logical time.
    Scheduled(u64),
    /// Dropped by the loss model at enqueue time.
    Dropped,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Rolling-window bearer statistics for the metrics row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BearerStats {
    // ---
    /// Dropped / enqueued over the window.
    pub loss_rate: f64,
    /// Reorder-marked / delivered over the window.
    pub reorder_rate: f64,
    /// RFC3550-style smoothed transit-time variation, in ms.
    pub jitter_ms: f64,
}

#[derive(Debug, Clone, Copy)]
enum TxOutcome {
    Sent,
    Dropped,
}

// ---------------------------------------------------------------------------
// Bearer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InFlight {
    payload: Vec<u8>,
    enqueue_t_ms: u64,
    scheduled_t_ms: u64,
    seq: u64,
    reordered: bool,
}

// Heap entry ordered by (scheduled, seq); the payload rides along.
impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_t_ms == other.scheduled_t_ms && self.seq == other.seq
    }
}
impl Eq for InFlight {}
impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.scheduled_t_ms, self.seq).cmp(&(other.scheduled_t_ms, other.seq))
    }
}

// ---

/// One direction's bearer. Owns its RNG stream and in-flight queue.
#[derive(Debug)]
pub struct Bearer {
    config: BearerConfig,
    rng: ChaCha20Rng,
    queue: BinaryHeap<Reverse<InFlight>>,
    next_seq: u64,

    // Rolling stats over the last STATS_WINDOW_MS of logical time.
    tx_window: VecDeque<(u64, TxOutcome)>,
    reorder_window: VecDeque<(u64, bool)>,
    last_transit_ms: Option<u64>,
    jitter_ms: f64,
}

// ---

impl Bearer {
    // ---
    pub fn new(config: BearerConfig, rng: ChaCha20Rng) -> Self {
        Self {
            config,
            rng,
            queue: BinaryHeap::new(),
            next_seq: 0,
            tx_window: VecDeque::new(),
            reorder_window: VecDeque::new(),
            last_transit_ms: None,
            jitter_ms: 0.0,
        }
    }

    pub fn config(&self) -> &BearerConfig {
        &self.config
    }

    /// Uniform draw in `[-jitter_ms, +jitter_ms]`. Zero when jitter is off
    /// (no RNG consumption, so enabling jitter never perturbs the loss and
    /// reorder sequences of a jitter-free run and vice versa is explicit).
    fn jitter_draw(&mut self) -> f64 {
        // ---
        let j = self.config.jitter_ms as f64;
        if j == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-j..=j)
    }

    /// Submit one PDU for direction-local delivery.
    pub fn enqueue(&mut self, payload: Vec<u8>, t_ms: u64) -> Enqueue {
        // ---
        self.prune_windows(t_ms);

        let u1: f64 = self.rng.gen();
        if u1 < self.config.loss_rate {
            self.tx_window.push_back((t_ms, TxOutcome::Dropped));
            return Enqueue::Dropped;
        }
        self.tx_window.push_back((t_ms, TxOutcome::Sent));

        let jitter = self.jitter_draw();
        let mut delay = self.config.latency_ms as f64 + jitter;

        let u2: f64 = self.rng.gen();
        let mut reordered = false;
        if u2 < self.config.reorder_rate {
            // Second draw, opposite sign of the first, so the offset pushes
            // this PDU past (or behind) its neighbors.
            let offset = self.jitter_draw().abs();
            delay += if jitter >= 0.0 { -offset } else { offset };
            reordered = true;
        }

        let delay = delay.max(0.0).round() as u64;
        let scheduled_t_ms = t_ms + delay;
        let seq = self.next_seq;
        self.next_seq += 1;

        self.queue.push(Reverse(InFlight {
            payload,
            enqueue_t_ms: t_ms,
            scheduled_t_ms,
            seq,
            reordered,
        }));
        Enqueue::Scheduled(scheduled_t_ms)
    }

    /// Drain every PDU with `scheduled ≤ t_ms`, in `(scheduled, seq)` order.
    pub fn poll_deliver(&mut self, t_ms: u64) -> Vec<Delivered> {
        // ---
        let mut out = Vec::new();
        while let Some(Reverse(head)) = self.queue.peek() {
            if head.scheduled_t_ms > t_ms {
                break;
            }
            let Reverse(item) = self.queue.pop().expect("peeked entry exists");

            // RFC3550-style jitter estimate over transit-time deltas.
            let transit = item.scheduled_t_ms - item.enqueue_t_ms;
            if let Some(prev) = self.last_transit_ms {
                let d = transit.abs_diff(prev) as f64;
                self.jitter_ms += (d - self.jitter_ms) / 16.0;
            }
            self.last_transit_ms = Some(transit);
            self.reorder_window.push_back((t_ms, item.reordered));

            out.push(Delivered {
                payload: item.payload,
                enqueue_t_ms: item.enqueue_t_ms,
                scheduled_t_ms: item.scheduled_t_ms,
                reordered: item.reordered,
            });
        }
        out
    }

    /// Rolling-window statistics snapshot.
    pub fn stats(&self) -> BearerStats {
        // ---
        let tx = self.tx_window.len();
        let dropped = self
            .tx_window
            .iter()
            .filter(|(_, o)| matches!(o, TxOutcome::Dropped))
            .count();
        let delivered = self.reorder_window.len();
        let reordered = self.reorder_window.iter().filter(|(_, r)| *r).count();

        BearerStats {
            loss_rate: if tx == 0 { 0.0 } else { dropped as f64 / tx as f64 },
            reorder_rate: if delivered == 0 {
                0.0
            } else {
                reordered as f64 / delivered as f64
            },
            jitter_ms: self.jitter_ms,
        }
    }

    /// Number of PDUs still in flight.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    fn prune_windows(&mut self, t_ms: u64) {
        // ---
        let horizon = t_ms.saturating_sub(STATS_WINDOW_MS);
        while matches!(self.tx_window.front(), Some(&(t, _)) if t < horizon) {
            self.tx_window.pop_front();
        }
        while matches!(self.reorder_window.front(), Some(&(t, _)) if t < horizon) {
            self.reorder_window.pop_front();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
