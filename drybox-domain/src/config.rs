//! Immutable resolved configuration consumed by the kernel.
//!
//! The scenario file loader (in `drybox-cli`) parses YAML, applies
//! defaults, and validates ranges; the kernel only ever sees this resolved
//! form. [`ResolvedScenario::validate`] is the single range gate — any
//! violation maps to exit code 4 at the boundary.

use serde::{Deserialize, Serialize};

use super::error::{DryBoxError, Result};

// ---------------------------------------------------------------------------
// Defaults — kept here so the resolver and tests can import them directly.
// ---------------------------------------------------------------------------

/// Default logical tick in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 20;

/// Default run duration in milliseconds.
pub const DEFAULT_DURATION_MS: u64 = 2_000;

/// Default master seed when the scenario omits one.
pub const DEFAULT_SEED: u64 = 123_456;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Which of the two data paths the run exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// ByteLink: SDU queue → SAR → bearer → reassembly.
    Byte,
    /// AudioBlock: PCM pull → channel → vocoder → PLC → PCM push.
    Audio,
}

// ---------------------------------------------------------------------------
// BearerConfig
// ---------------------------------------------------------------------------

/// Stochastic bearer parameters (one set, applied to both directions with
/// independent RNG streams).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerConfig {
    // ---
    /// Named preset the scenario asked for (`ideal`, `volte_evs`, `ott_udp`).
    /// Informational once resolved; the fields below are authoritative.
    pub kind: String,

    /// One-way base latency in milliseconds.
    pub latency_ms: u64,

    /// Uniform jitter half-width in milliseconds.
    pub jitter_ms: u64,

    /// Probability `[0, 1]` that an enqueued PDU is dropped.
    pub loss_rate: f64,

    /// Probability `[0, 1]` that a PDU receives a reorder offset.
    pub reorder_rate: f64,

    /// Maximum PDU size; larger SDUs are segmented by SAR.
    pub mtu_bytes: usize,
}

// ---

impl BearerConfig {
    // ---
    /// Perfect link — no impairments. Useful as a baseline.
    pub fn ideal() -> Self {
        Self {
            kind: "ideal".into(),
            latency_ms: 0,
            jitter_ms: 0,
            loss_rate: 0.0,
            reorder_rate: 0.0,
            mtu_bytes: 1_024,
        }
    }

    /// RTT estimate used by the reassembly timeout: `2 × latency_ms`,
    /// floored at one tick's worth of time.
    pub fn rtt_est_ms(&self) -> u64 {
        (2 * self.latency_ms).max(1)
    }
}

// ---------------------------------------------------------------------------
// ChannelConfig
// ---------------------------------------------------------------------------

/// Radio channel kind for the AudioBlock path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Awgn,
    Rayleigh,
}

/// Channel model parameters (AudioBlock mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    // ---
    #[serde(rename = "type")]
    pub kind: ChannelKind,

    /// Target signal-to-noise ratio in dB.
    pub snr_db: f64,

    /// Maximum Doppler frequency in Hz (Rayleigh only).
    #[serde(default = "default_doppler_hz")]
    pub doppler_hz: f64,

    /// Number of Jakes oscillators (Rayleigh only).
    #[serde(default = "default_num_paths")]
    pub num_paths: usize,
}

fn default_doppler_hz() -> f64 {
    50.0
}

fn default_num_paths() -> usize {
    8
}

// ---------------------------------------------------------------------------
// VocoderConfig
// ---------------------------------------------------------------------------

/// Vocoder mock kind for the AudioBlock path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VocoderKind {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "amr12k2_mock")]
    Amr12k2Mock,
    #[serde(rename = "evs13k2_mock")]
    Evs13k2Mock,
    #[serde(rename = "opus_nb_mock")]
    OpusNbMock,
}

/// Vocoder parameters (AudioBlock mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocoderConfig {
    // ---
    #[serde(rename = "type")]
    pub kind: VocoderKind,

    /// Enable voice-activity detection / discontinuous transmission.
    #[serde(default)]
    pub vad_dtx: bool,

    /// Audio-level frame loss probability `[0, 1]`. When absent, the
    /// resolver copies the bearer's `loss_rate`.
    #[serde(default)]
    pub loss_rate: f64,
}

// ---------------------------------------------------------------------------
// EndpointConfig
// ---------------------------------------------------------------------------

/// Per-side adapter binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    // ---
    /// Adapter spec: `name[:Class]`; absent class defaults to `Adapter`.
    pub adapter: String,

    /// Linear gain applied to this side's transmitted audio blocks.
    #[serde(default = "default_gain")]
    pub gain: f64,
}

fn default_gain() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// CryptoKeySource
// ---------------------------------------------------------------------------

/// Explicit private-key material in the scenario's `crypto` block.
///
/// Accepted encodings: hex string, base64 string, or `{path: ...}` pointing
/// at a file containing either. 32-byte seeds are used as-is; 64-byte
/// extended keys are truncated to their 32-byte seed half.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CryptoKeySource {
    /// Inline hex or base64 text.
    Inline(String),
    /// Key material read from a file.
    File { path: String },
}

// ---------------------------------------------------------------------------
// AcceptanceConfig
// ---------------------------------------------------------------------------

/// Optional post-run acceptance check. If `require_event` was not emitted
/// at or before `within_ms`, the run exits with code 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceConfig {
    // ---
    pub require_event: String,
    pub within_ms: u64,
}

// ---------------------------------------------------------------------------
// ResolvedScenario
// ---------------------------------------------------------------------------

/// The immutable configuration a run executes. Produced by the scenario
/// resolver, consumed by the kernel, and written back verbatim as
/// `scenario.resolved.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedScenario {
    // ---
    pub mode: Mode,
    pub duration_ms: u64,
    pub tick_ms: u64,
    pub seed: u64,
    pub bearer: BearerConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocoder: Option<VocoderConfig>,

    pub left: EndpointConfig,
    pub right: EndpointConfig,

    // Private-key sources never serialize: the resolved-scenario artifact
    // must not leak key material. pubkeys.txt records the public halves.
    #[serde(skip_serializing, default)]
    pub crypto_left: Option<CryptoKeySource>,

    #[serde(skip_serializing, default)]
    pub crypto_right: Option<CryptoKeySource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<AcceptanceConfig>,
}

// ---

impl ResolvedScenario {
    // ---
    /// Validate fields the type system cannot express as constraints.
    ///
    /// This is the exit-4 gate: every violation here is a
    /// [`DryBoxError::Scenario`].
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.tick_ms == 0 {
            return Err(DryBoxError::Scenario("tick_ms must be > 0".into()));
        }
        if self.duration_ms < self.tick_ms {
            return Err(DryBoxError::Scenario(format!(
                "duration_ms {} is shorter than one tick ({} ms)",
                self.duration_ms, self.tick_ms
            )));
        }
        for (name, rate) in [
            ("bearer.loss_rate", self.bearer.loss_rate),
            ("bearer.reorder_rate", self.bearer.reorder_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(DryBoxError::Scenario(format!(
                    "{name} must be in [0, 1], got {rate}"
                )));
            }
        }
        // SAR needs room for its 3-byte header plus at least one payload byte.
        if self.bearer.mtu_bytes < 4 {
            return Err(DryBoxError::Scenario(format!(
                "bearer.mtu_bytes must be >= 4, got {}",
                self.bearer.mtu_bytes
            )));
        }
        if let Some(v) = &self.vocoder {
            if !(0.0..=1.0).contains(&v.loss_rate) {
                return Err(DryBoxError::Scenario(format!(
                    "vocoder.loss_rate must be in [0, 1], got {}",
                    v.loss_rate
                )));
            }
        }
        if let Some(c) = &self.channel {
            if c.num_paths == 0 {
                return Err(DryBoxError::Scenario(
                    "channel.num_paths must be > 0".into(),
                ));
            }
            if c.doppler_hz < 0.0 {
                return Err(DryBoxError::Scenario(format!(
                    "channel.doppler_hz must be >= 0, got {}",
                    c.doppler_hz
                )));
            }
        }
        for (name, gain) in [("left.gain", self.left.gain), ("right.gain", self.right.gain)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(DryBoxError::Scenario(format!(
                    "{name} must be a finite non-negative number, got {gain}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
