//! SAR-lite: segmentation and reassembly for SDUs larger than the bearer MTU.
//!
//! ## Fragment header (3 bytes)
//!
//! Every PDU produced by the fragmenter begins with this fixed header,
//! followed by up to `MTU − 3` payload bytes.
//!
//! ```text
//! offset
//!    0  frag_id (u8)  — group id, monotone per direction, wraps mod 256
//!    1  idx     (u8)  — fragment index within the group
//!    2  last    (u8)  — highest index in the group (identical across it)
//! ------
//!    payload (≤ MTU − 3 bytes)
//! ```
//!
//! Within a group, `idx` covers `[0..last]` exactly once. A group whose
//! fragments disagree on `last` is dropped wholesale (`sar_inconsistent`).
//! Groups that sit incomplete for longer than `2 × RTT_est` are purged
//! silently at the start of every tick (`sar_timeout`); late fragments for
//! a purged id simply open a fresh group.

use std::collections::HashMap;

use drybox_domain::{DryBoxError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fragment header size: frag_id(1) + idx(1) + last(1).
pub const HEADER_LEN: usize = 3;

/// Maximum fragments per group (`idx` and `last` are u8).
pub const MAX_FRAGMENTS: usize = 256;

// ---------------------------------------------------------------------------
// Fragmenter
// ---------------------------------------------------------------------------

/// Splits SDUs into headered fragments. One instance per direction so
/// `frag_id` sequences never interleave.
#[derive(Debug)]
pub struct Fragmenter {
    mtu_bytes: usize,
    next_frag_id: u8,
}

// ---

impl Fragmenter {
    // ---
    /// `mtu_bytes` must exceed [`HEADER_LEN`]; the scenario validator
    /// guarantees this before the kernel is entered.
    pub fn new(mtu_bytes: usize) -> Self {
        debug_assert!(mtu_bytes > HEADER_LEN);
        Self {
            mtu_bytes,
            next_frag_id: 0,
        }
    }

    /// Payload capacity per fragment.
    pub fn capacity(&self) -> usize {
        self.mtu_bytes - HEADER_LEN
    }

    /// Fragment `sdu` into `⌈len/capacity⌉` PDUs (at least one — an empty
    /// SDU still produces a single headered fragment).
    ///
    /// Fails with [`DryBoxError::OversizeSdu`] when more than
    /// [`MAX_FRAGMENTS`] fragments would be needed.
    pub fn fragment(&mut self, sdu: &[u8]) -> Result<Vec<Vec<u8>>> {
        // ---
        let cap = self.capacity();
        let n = sdu.len().div_ceil(cap).max(1);
        if n > MAX_FRAGMENTS {
            return Err(DryBoxError::OversizeSdu {
                sdu_len: sdu.len(),
                mtu: self.mtu_bytes,
            });
        }

        let frag_id = self.next_frag_id;
        self.next_frag_id = self.next_frag_id.wrapping_add(1);
        let last = (n - 1) as u8;

        let mut out = Vec::with_capacity(n);
        for idx in 0..n {
            let beg = idx * cap;
            let end = (beg + cap).min(sdu.len());
            let mut pdu = Vec::with_capacity(HEADER_LEN + (end - beg));
            pdu.push(frag_id);
            pdu.push(idx as u8);
            pdu.push(last);
            pdu.extend_from_slice(&sdu[beg..end]);
            out.push(pdu);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Reassembler
// ---------------------------------------------------------------------------

/// Outcome of pushing one fragment into the reassembly table.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembly {
    /// Group still incomplete.
    Pending,
    /// Group completed; the original SDU, byte for byte.
    Complete(Vec<u8>),
    /// Fragments disagreed on `last`; the group was dropped.
    Inconsistent { frag_id: u8 },
    /// Fragment shorter than the header; ignored.
    Malformed,
}

#[derive(Debug)]
struct Group {
    started_t_ms: u64,
    last: u8,
    received: [bool; MAX_FRAGMENTS],
    received_count: usize,
    parts: Vec<Option<Vec<u8>>>,
}

impl Group {
    fn new(started_t_ms: u64, last: u8) -> Self {
        Self {
            started_t_ms,
            last,
            received: [false; MAX_FRAGMENTS],
            received_count: 0,
            parts: {
                let mut v = Vec::with_capacity(last as usize + 1);
                v.resize_with(last as usize + 1, || None);
                v
            },
        }
    }

    fn complete(&self) -> bool {
        self.received_count == self.last as usize + 1
    }
}

// ---

/// Per-direction reassembly table, keyed by `frag_id`.
#[derive(Debug)]
pub struct Reassembler {
    groups: HashMap<u8, Group>,
    timeout_ms: u64,
}

// ---

impl Reassembler {
    // ---
    /// `rtt_est_ms` drives the purge horizon: groups older than
    /// `2 × rtt_est_ms` are dropped.
    pub fn new(rtt_est_ms: u64) -> Self {
        Self {
            groups: HashMap::new(),
            timeout_ms: (2 * rtt_est_ms).max(1),
        }
    }

    /// Drop groups whose first fragment is older than the timeout. Returns
    /// the purged `frag_id`s so the runner can log `sar_timeout` events.
    /// Called at the start of every tick.
    pub fn purge_expired(&mut self, t_ms: u64) -> Vec<u8> {
        // ---
        let timeout = self.timeout_ms;
        let expired: Vec<u8> = self
            .groups
            .iter()
            .filter(|(_, g)| t_ms.saturating_sub(g.started_t_ms) > timeout)
            .map(|(&id, _)| id)
            .collect();
        for id in &expired {
            self.groups.remove(id);
        }
        let mut expired = expired;
        expired.sort_unstable();
        expired
    }

    /// Record one arriving fragment.
    pub fn push(&mut self, pdu: &[u8], t_ms: u64) -> Reassembly {
        // ---
        if pdu.len() < HEADER_LEN {
            return Reassembly::Malformed;
        }
        let frag_id = pdu[0];
        let idx = pdu[1];
        let last = pdu[2];
        let payload = &pdu[HEADER_LEN..];

        let group = self
            .groups
            .entry(frag_id)
            .or_insert_with(|| Group::new(t_ms, last));

        if group.last != last || idx > last {
            self.groups.remove(&frag_id);
            return Reassembly::Inconsistent { frag_id };
        }

        if !group.received[idx as usize] {
            group.received[idx as usize] = true;
            group.received_count += 1;
            group.parts[idx as usize] = Some(payload.to_vec());
        }

        if group.complete() {
            let group = self.groups.remove(&frag_id).expect("group exists");
            let mut sdu = Vec::new();
            for part in group.parts.into_iter() {
                sdu.extend_from_slice(&part.expect("complete group has every part"));
            }
            return Reassembly::Complete(sdu);
        }
        Reassembly::Pending
    }

    /// Number of in-flight (incomplete) groups.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
