//! ByteLink smoke-test peer with an Ed25519-authenticated handshake.
//!
//! ## Frame layout
//!
//! ```text
//! offset
//!    0  type (u8)  — SYN / SYN-ACK / ACK / DATA
//!    1  ┐
//!    2  │ seq (u32, little-endian)
//!    3  │
//!    4  ┘
//! ------
//!    payload
//! ```
//!
//! ## Handshake
//!
//! Left initiates: `SYN` carries `L_nonce(8) ‖ sig_L(64)` over
//! `"PPv1|SYN|" ‖ L_nonce`. Right answers `SYN-ACK` with
//! `R_nonce(8) ‖ sig_R(64)` over `"PPv1|SYNACK|" ‖ L_nonce ‖ R_nonce`, and
//! left closes with `ACK` carrying `sig_L(64)` over
//! `"PPv1|ACK|" ‖ L_nonce ‖ R_nonce`. The domain prefix keeps handshake
//! signatures from colliding with any DATA payload. Nonces come from the
//! side's deterministic RNG stream, so a reseeded rerun replays the same
//! handshake bytes.
//!
//! After the handshake each side emits a small `DATA` ping every 200 ms,
//! swapping in a 400-byte bulk frame once per five-second stripe so SAR has
//! something to chew on at small MTUs. Events emitted along the way:
//! `crypto_info`, `hs_syn`, `hs_synack`, `hs_done`, `hs_fail`,
//! `data_sched`, `data_rx`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde_json::json;

use drybox_domain::{
    Adapter, AdapterConfig, AdapterCtx, Capabilities, CryptoMaterial, Result, Side, TxSdu,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const TYPE_SYN: u8 = 0x01;
const TYPE_SYNACK: u8 = 0x02;
const TYPE_ACK: u8 = 0x03;
const TYPE_DATA: u8 = 0x10;

/// Signature domain prefix.
const DOMAIN: &[u8] = b"PPv1|";

/// Frame header: type(1) + seq(4).
const HEADER_LEN: usize = 5;

const NONCE_LEN: usize = 8;
const SIG_LEN: usize = 64;

/// SYN retransmit interval and cap.
const SYN_RETRY_MS: u64 = 200;
const SYN_RETRY_MAX: u32 = 5;

/// DATA cadence after the handshake.
const DATA_PERIOD_MS: u64 = 200;

/// Bulk payload size; at MTU 96 this fragments into several PDUs.
const BULK_BYTES: usize = 400;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HsState {
    Idle,
    SynSent,
    SynAckSent,
    Done,
    Failed,
}

// ---------------------------------------------------------------------------
// PingPong
// ---------------------------------------------------------------------------

/// ByteLink test adapter. Left is the handshake initiator, right the
/// responder.
#[derive(Debug)]
pub struct PingPong {
    role: Role,
    state: HsState,
    seq: u32,
    txq: Vec<Vec<u8>>,

    crypto: Option<CryptoMaterial>,

    hs_start_ms: Option<u64>,
    last_syn_ms: u64,
    syn_retries: u32,

    last_data_ms: u64,

    nonce_local: Option<[u8; NONCE_LEN]>,
    nonce_peer: Option<[u8; NONCE_LEN]>,
}

// ---

impl Default for PingPong {
    fn default() -> Self {
        Self::new()
    }
}

impl PingPong {
    // ---
    pub fn new() -> Self {
        Self {
            role: Role::Initiator,
            state: HsState::Idle,
            seq: 0,
            txq: Vec::new(),
            crypto: None,
            hs_start_ms: None,
            last_syn_ms: 0,
            syn_retries: 0,
            last_data_ms: 0,
            nonce_local: None,
            nonce_peer: None,
        }
    }

    fn frame(&mut self, typ: u8, payload: &[u8]) -> Vec<u8> {
        // ---
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(typ);
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(payload);
        self.seq = self.seq.wrapping_add(1);
        out
    }

    fn sign(&self, parts: &[&[u8]]) -> Option<[u8; SIG_LEN]> {
        // ---
        let crypto = self.crypto.as_ref()?;
        let key = SigningKey::from_bytes(&crypto.priv_seed);
        let mut msg = Vec::from(DOMAIN);
        for part in parts {
            msg.extend_from_slice(part);
        }
        Some(key.sign(&msg).to_bytes())
    }

    fn verify_peer(&self, parts: &[&[u8]], sig: &[u8]) -> bool {
        // ---
        let Some(crypto) = self.crypto.as_ref() else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&crypto.peer_public) else {
            return false;
        };
        let Ok(sig) = <&[u8; SIG_LEN]>::try_from(sig) else {
            return false;
        };
        let mut msg = Vec::from(DOMAIN);
        for part in parts {
            msg.extend_from_slice(part);
        }
        key.verify(&msg, &Signature::from_bytes(sig)).is_ok()
    }

    fn draw_nonce(ctx: &mut AdapterCtx<'_>) -> [u8; NONCE_LEN] {
        ctx.rng.next_u64().to_le_bytes()
    }

    fn send_syn(&mut self, ctx: &mut AdapterCtx<'_>, retry: bool) {
        // ---
        let nonce = *self
            .nonce_local
            .get_or_insert_with(|| Self::draw_nonce(ctx));
        let mut payload = Vec::from(nonce.as_slice());
        if let Some(sig) = self.sign(&[b"SYN|", &nonce]) {
            payload.extend_from_slice(&sig);
        }
        let frame = self.frame(TYPE_SYN, &payload);
        self.txq.push(frame);
        self.last_syn_ms = ctx.now_ms();
        self.state = HsState::SynSent;
        if self.hs_start_ms.is_none() {
            self.hs_start_ms = Some(ctx.now_ms());
        }
        let mut payload = json!({"role": "init"});
        if retry {
            payload["retry"] = json!(self.syn_retries);
        }
        ctx.emit_event("hs_syn", payload);
    }

    fn handshake_done(&mut self, ctx: &mut AdapterCtx<'_>, who: &str) {
        // ---
        self.state = HsState::Done;
        self.last_data_ms = ctx.now_ms();
        let elapsed = ctx.now_ms() - self.hs_start_ms.unwrap_or(ctx.now_ms());
        ctx.emit_event(
            "hs_done",
            json!({
                "role": match self.role { Role::Initiator => "init", Role::Responder => "resp" },
                "who": who,
                "time_ms": elapsed,
                "auth": if self.crypto.is_some() { "ok" } else { "none" },
            }),
        );
    }

    // --- inbound frame handlers ---

    fn on_syn(&mut self, payload: &[u8], seq: u32, ctx: &mut AdapterCtx<'_>) {
        // ---
        if self.role != Role::Responder || self.state == HsState::Done {
            return;
        }
        if self.hs_start_ms.is_none() {
            self.hs_start_ms = Some(ctx.now_ms());
        }
        if payload.len() < NONCE_LEN + SIG_LEN {
            return;
        }
        let mut nonce_l = [0u8; NONCE_LEN];
        nonce_l.copy_from_slice(&payload[..NONCE_LEN]);
        let sig = &payload[NONCE_LEN..NONCE_LEN + SIG_LEN];
        if !self.verify_peer(&[b"SYN|", &nonce_l], sig) {
            ctx.emit_event("hs_fail", json!({"reason": "bad_sig_syn"}));
            return;
        }
        self.nonce_peer = Some(nonce_l);

        let nonce_r = *self
            .nonce_local
            .get_or_insert_with(|| Self::draw_nonce(ctx));
        let mut reply = Vec::from(nonce_r.as_slice());
        if let Some(sig) = self.sign(&[b"SYNACK|", &nonce_l, &nonce_r]) {
            reply.extend_from_slice(&sig);
        }
        let frame = self.frame(TYPE_SYNACK, &reply);
        self.txq.push(frame);
        self.state = HsState::SynAckSent;
        ctx.emit_event("hs_synack", json!({"peer_seq": seq, "auth": "ok"}));
    }

    fn on_synack(&mut self, payload: &[u8], ctx: &mut AdapterCtx<'_>) {
        // ---
        if self.role != Role::Initiator || self.state == HsState::Done {
            return;
        }
        let Some(nonce_l) = self.nonce_local else {
            return;
        };
        if payload.len() < NONCE_LEN + SIG_LEN {
            return;
        }
        let mut nonce_r = [0u8; NONCE_LEN];
        nonce_r.copy_from_slice(&payload[..NONCE_LEN]);
        let sig = &payload[NONCE_LEN..NONCE_LEN + SIG_LEN];
        if !self.verify_peer(&[b"SYNACK|", &nonce_l, &nonce_r], sig) {
            ctx.emit_event("hs_fail", json!({"reason": "bad_sig_synack"}));
            return;
        }
        self.nonce_peer = Some(nonce_r);

        let mut ack = Vec::new();
        if let Some(sig) = self.sign(&[b"ACK|", &nonce_l, &nonce_r]) {
            ack.extend_from_slice(&sig);
        }
        let frame = self.frame(TYPE_ACK, &ack);
        self.txq.push(frame);
        self.handshake_done(ctx, "initiator");
    }

    fn on_ack(&mut self, payload: &[u8], ctx: &mut AdapterCtx<'_>) {
        // ---
        if self.role != Role::Responder || self.state == HsState::Done {
            return;
        }
        let (Some(nonce_l), Some(nonce_r)) = (self.nonce_peer, self.nonce_local) else {
            return;
        };
        if payload.len() < SIG_LEN {
            return;
        }
        if !self.verify_peer(&[b"ACK|", &nonce_l, &nonce_r], &payload[..SIG_LEN]) {
            ctx.emit_event("hs_fail", json!({"reason": "bad_sig_ack"}));
            return;
        }
        self.handshake_done(ctx, "responder");
    }
}

// ---

impl Adapter for PingPong {
    // ---
    fn capabilities(&self) -> Capabilities {
        Capabilities::bytelink(1_024)
    }

    fn init(&mut self, cfg: &AdapterConfig) -> Result<()> {
        // ---
        self.role = match cfg.side {
            Side::Left => Role::Initiator,
            Side::Right => Role::Responder,
        };
        self.crypto = cfg.crypto.clone();
        Ok(())
    }

    fn start(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<()> {
        // ---
        if let Some(crypto) = &self.crypto {
            ctx.emit_event(
                "crypto_info",
                json!({
                    "key_id": crypto.key_id,
                    "peer_key_id": crypto.peer_key_id,
                    "pub_hex": hex::encode(crypto.public),
                    "peer_pub_hex": hex::encode(crypto.peer_public),
                }),
            );
        }
        self.last_data_ms = ctx.now_ms();
        if self.role == Role::Initiator {
            self.send_syn(ctx, false);
        }
        Ok(())
    }

    fn on_timer(&mut self, t_ms: u64, ctx: &mut AdapterCtx<'_>) -> Result<()> {
        // ---
        // SYN retransmission, initiator only.
        if self.role == Role::Initiator && self.state == HsState::SynSent {
            if t_ms.saturating_sub(self.last_syn_ms) >= SYN_RETRY_MS {
                if self.syn_retries < SYN_RETRY_MAX {
                    self.syn_retries += 1;
                    self.send_syn(ctx, true);
                } else {
                    self.state = HsState::Failed;
                    ctx.emit_event("hs_fail", json!({"reason": "syn_timeout"}));
                }
            }
        }

        // Periodic traffic once the handshake has settled.
        if self.state == HsState::Done && t_ms.saturating_sub(self.last_data_ms) >= DATA_PERIOD_MS {
            let bulk = (t_ms / 1_000) % 5 == 0;
            let payload: Vec<u8> = if bulk {
                vec![b'D'; BULK_BYTES]
            } else {
                b"ping".to_vec()
            };
            ctx.emit_event(
                "data_sched",
                json!({"bytes": payload.len(), "bulk": bulk}),
            );
            let frame = self.frame(TYPE_DATA, &payload);
            self.txq.push(frame);
            self.last_data_ms = t_ms;
        }
        Ok(())
    }

    fn poll_link_tx(&mut self, budget: usize, _ctx: &mut AdapterCtx<'_>) -> Result<Vec<TxSdu>> {
        // ---
        let take = budget.min(self.txq.len());
        Ok(self.txq.drain(..take).map(TxSdu::Bytes).collect())
    }

    fn on_link_rx(&mut self, sdu: &[u8], ctx: &mut AdapterCtx<'_>) -> Result<()> {
        // ---
        if sdu.len() < HEADER_LEN {
            return Ok(()); // runt frame, ignore
        }
        let typ = sdu[0];
        let seq = u32::from_le_bytes(sdu[1..5].try_into().expect("header length checked"));
        let payload = &sdu[HEADER_LEN..];

        match typ {
            TYPE_SYN => self.on_syn(payload, seq, ctx),
            TYPE_SYNACK => self.on_synack(payload, ctx),
            TYPE_ACK => self.on_ack(payload, ctx),
            TYPE_DATA => {
                ctx.emit_event("data_rx", json!({"bytes": payload.len(), "seq": seq}));
            }
            _ => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
