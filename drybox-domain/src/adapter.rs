//! Adapter ABI: the contract between the kernel and a peer under test.
//!
//! An adapter is an in-process trait object satisfying [`Adapter`]. The
//! kernel never retries adapter calls; any `Err` is an endpoint failure and
//! terminates the run with exit code 3.
//!
//! ## Canonical callback signatures
//!
//! Both audio callbacks carry the logical time: `pull_tx_block(t_ms)` and
//! `push_rx_block(pcm, t_ms)`. Blocks are owned contiguous `i16` buffers of
//! exactly [`BLOCK_SAMPLES`](crate::BLOCK_SAMPLES) samples; anything else is
//! rejected at the host boundary.

use std::path::PathBuf;

use rand::RngCore;
use serde_json::Value;

use super::audio::{AudioBlock, AudioParams};
use super::config::Mode;
use super::crypto::CryptoMaterial;
use super::error::{DryBoxError, Result};
use super::link::{Side, TxSdu};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// ABI version adapters must advertise.
pub const ABI_VERSION: &str = "1.0";

/// Default SDU size cap when an adapter does not declare one.
pub const DEFAULT_SDU_MAX_BYTES: usize = 1_024;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Static capability set an adapter advertises before the run starts.
///
/// Negotiation: the scenario's mode must be advertised by both adapters or
/// the run aborts with exit code 4. Advertised `audioparams` differing from
/// the kernel defaults are recorded (`audioparams_override` event) but the
/// kernel's defaults win.
#[derive(Debug, Clone)]
pub struct Capabilities {
    // ---
    pub abi_version: &'static str,
    pub bytelink: bool,
    pub audioblock: bool,
    pub sdu_max_bytes: usize,
    pub audioparams: Option<AudioParams>,
}

// ---

impl Capabilities {
    // ---
    /// ByteLink-only adapter with the given SDU cap.
    pub fn bytelink(sdu_max_bytes: usize) -> Self {
        Self {
            abi_version: ABI_VERSION,
            bytelink: true,
            audioblock: false,
            sdu_max_bytes,
            audioparams: None,
        }
    }

    /// AudioBlock-only adapter advertising the kernel-default PCM format.
    pub fn audioblock() -> Self {
        Self {
            abi_version: ABI_VERSION,
            bytelink: false,
            audioblock: true,
            sdu_max_bytes: DEFAULT_SDU_MAX_BYTES,
            audioparams: Some(AudioParams::default()),
        }
    }

    /// Whether this adapter supports the given run mode.
    pub fn supports(&self, mode: Mode) -> bool {
        match mode {
            Mode::Byte => self.bytelink,
            Mode::Audio => self.audioblock,
        }
    }
}

// ---------------------------------------------------------------------------
// AdapterConfig
// ---------------------------------------------------------------------------

/// Static configuration handed to [`Adapter::init`] before the run starts.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    // ---
    pub side: Side,
    pub mode: Mode,
    pub tick_ms: u64,
    pub seed: u64,
    pub sdu_max_bytes: usize,
    pub out_dir: PathBuf,

    /// Per-side key material; `None` when the scenario disables crypto
    /// provisioning entirely (never the case in v1 — keys are derived when
    /// not supplied).
    pub crypto: Option<CryptoMaterial>,
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Write-only destination for adapter events (`events.jsonl`).
///
/// The kernel owns the file handles; adapters only ever see this trait
/// through [`AdapterCtx::emit_event`].
pub trait EventSink {
    fn emit(&mut self, t_ms: u64, side: Side, kind: &str, payload: Value);
}

// ---------------------------------------------------------------------------
// AdapterCtx
// ---------------------------------------------------------------------------

/// Per-callback execution context.
///
/// Borrowed, not stored: the kernel constructs a fresh `AdapterCtx` for
/// every callback, so adapters cannot hold references into the runner
/// across ticks. The RNG is this side's dedicated deterministic stream.
pub struct AdapterCtx<'a> {
    // ---
    pub side: Side,
    pub t_ms: u64,
    pub tick_ms: u64,
    pub rng: &'a mut dyn RngCore,
    pub crypto: Option<&'a CryptoMaterial>,
    events: &'a mut dyn EventSink,
}

// ---

impl<'a> AdapterCtx<'a> {
    // ---
    pub fn new(
        side: Side,
        t_ms: u64,
        tick_ms: u64,
        rng: &'a mut dyn RngCore,
        crypto: Option<&'a CryptoMaterial>,
        events: &'a mut dyn EventSink,
    ) -> Self {
        Self {
            side,
            t_ms,
            tick_ms,
            rng,
            crypto,
            events,
        }
    }

    /// Current logical time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.t_ms
    }

    /// Append an event to `events.jsonl`, stamped with this side and the
    /// current logical time.
    pub fn emit_event(&mut self, kind: &str, payload: Value) {
        self.events.emit(self.t_ms, self.side, kind, payload);
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// The peer contract.
///
/// Lifecycle: `capabilities` → `init(cfg)` → `start(ctx)` → per-tick
/// callbacks → `stop`. Mode A adapters implement `poll_link_tx` /
/// `on_link_rx`; Mode B adapters implement `pull_tx_block` /
/// `push_rx_block`. The defaults return endpoint errors so an adapter that
/// mis-advertises its capabilities fails loudly rather than silently.
pub trait Adapter: std::fmt::Debug {
    // ---
    /// Advertised capability set. Called once, before `init`.
    fn capabilities(&self) -> Capabilities;

    /// Optional one-time configuration, before `start`.
    fn init(&mut self, _cfg: &AdapterConfig) -> Result<()> {
        Ok(())
    }

    /// Run start. The context carries this side's RNG and event sink.
    fn start(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<()> {
        Ok(())
    }

    /// Run end. Always called, including on failure paths.
    fn stop(&mut self) {}

    /// Per-tick timer, strictly before any I/O for the tick.
    fn on_timer(&mut self, t_ms: u64, ctx: &mut AdapterCtx<'_>) -> Result<()>;

    // --- Mode A: ByteLink ---

    /// Drain up to `budget` outbound SDUs.
    fn poll_link_tx(&mut self, _budget: usize, _ctx: &mut AdapterCtx<'_>) -> Result<Vec<TxSdu>> {
        Err(DryBoxError::Endpoint(
            "adapter does not implement poll_link_tx".into(),
        ))
    }

    /// Deliver one reassembled inbound SDU.
    fn on_link_rx(&mut self, _sdu: &[u8], _ctx: &mut AdapterCtx<'_>) -> Result<()> {
        Err(DryBoxError::Endpoint(
            "adapter does not implement on_link_rx".into(),
        ))
    }

    // --- Mode B: AudioBlock ---

    /// Produce the PCM block to transmit at `t_ms`.
    fn pull_tx_block(&mut self, _t_ms: u64, _ctx: &mut AdapterCtx<'_>) -> Result<AudioBlock> {
        Err(DryBoxError::Endpoint(
            "adapter does not implement pull_tx_block".into(),
        ))
    }

    /// Deliver the received PCM block for `t_ms`.
    fn push_rx_block(
        &mut self,
        _pcm: &AudioBlock,
        _t_ms: u64,
        _ctx: &mut AdapterCtx<'_>,
    ) -> Result<()> {
        Err(DryBoxError::Endpoint(
            "adapter does not implement push_rx_block".into(),
        ))
    }
}

// ---

/// Convenience type alias for a heap-allocated [`Adapter`].
pub type AdapterPtr = Box<dyn Adapter>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
