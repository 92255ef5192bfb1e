//! Vocoder mocks and packet-loss concealment for the AudioBlock path.
//!
//! A mock is a pure block-level transform `encode_decode(block) →
//! (block, lost)`. It imitates codec fidelity with a coarse int8
//! companding stage, optionally replaces low-energy frames with comfort
//! noise when VAD/DTX is enabled, and marks frames lost with the configured
//! audio-level probability. The `lost` flag is consumed by [`Plc`] and
//! never propagates upstream of it.
//!
//! Contract across kinds: the identity kind preserves block energy; the
//! mocks reduce energy only through their documented companding scale and
//! never amplify. The concrete numeric parameters live in
//! [`VocoderParams`] and are recorded into `scenario.resolved.yaml`.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

use drybox_domain::{AudioBlock, VocoderConfig, VocoderKind};

// ---------------------------------------------------------------------------
// VocoderParams
// ---------------------------------------------------------------------------

/// Kind-specific mock numerics.
#[derive(Debug, Clone, Copy)]
pub struct VocoderParams {
    // ---
    /// Nominal bitrate, bits/s. Informational.
    pub bitrate: u32,

    /// Companding scale: samples are quantized to
    /// `clip(round(x_norm × scale), −128, 127)` and reconstructed by the
    /// inverse. A scale above 127 clips loud frames (EVS-style brightness
    /// at the cost of headroom).
    pub compand_scale: f64,

    /// VAD energy threshold (mean square over raw i16 samples).
    pub dtx_energy_threshold: f64,

    /// VAD hangover: frames below threshold tolerated before DTX engages.
    pub dtx_hangover_frames: u32,

    /// Comfort-noise sigma in raw i16 units.
    pub comfort_noise_sigma: f64,
}

// ---

impl VocoderParams {
    // ---
    pub fn for_kind(kind: VocoderKind) -> Self {
        // ---
        match kind {
            VocoderKind::None => Self {
                bitrate: 128_000,
                compand_scale: 0.0, // identity: no companding stage
                dtx_energy_threshold: 0.0,
                dtx_hangover_frames: 0,
                comfort_noise_sigma: 0.0,
            },
            VocoderKind::Amr12k2Mock => Self {
                bitrate: 12_200,
                compand_scale: 127.0,
                dtx_energy_threshold: 100.0,
                dtx_hangover_frames: 5,
                comfort_noise_sigma: 10.0,
            },
            VocoderKind::Evs13k2Mock => Self {
                bitrate: 13_200,
                compand_scale: 200.0,
                dtx_energy_threshold: 100.0,
                dtx_hangover_frames: 5,
                comfort_noise_sigma: 8.0,
            },
            VocoderKind::OpusNbMock => Self {
                bitrate: 16_000,
                compand_scale: 127.0,
                dtx_energy_threshold: 80.0,
                dtx_hangover_frames: 5,
                comfort_noise_sigma: 5.0,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Vocoder
// ---------------------------------------------------------------------------

/// One direction's vocoder mock. Owns its RNG stream (coding noise, DTX
/// comfort noise, and the frame-loss draw all come from it).
#[derive(Debug)]
pub struct Vocoder {
    kind: VocoderKind,
    params: VocoderParams,
    vad_dtx: bool,
    loss_rate: f64,
    hangover_left: u32,
    frame_count: u64,
    rng: ChaCha20Rng,
}

// ---

impl Vocoder {
    // ---
    pub fn from_config(cfg: &VocoderConfig, rng: ChaCha20Rng) -> Self {
        let params = VocoderParams::for_kind(cfg.kind);
        Self {
            kind: cfg.kind,
            params,
            vad_dtx: cfg.vad_dtx,
            loss_rate: cfg.loss_rate,
            hangover_left: params.dtx_hangover_frames,
            frame_count: 0,
            rng,
        }
    }

    pub fn kind(&self) -> VocoderKind {
        self.kind
    }

    pub fn params(&self) -> &VocoderParams {
        &self.params
    }

    /// Run one block through the codec model.
    ///
    /// Returns the degraded block and whether the frame was lost in
    /// transport. A lost frame's content is still produced (the PLC decides
    /// what the listener hears).
    pub fn encode_decode(&mut self, block: &AudioBlock) -> (AudioBlock, bool) {
        // ---
        self.frame_count += 1;

        let processed = if self.vad_dtx && self.update_vad(block) {
            self.comfort_noise()
        } else {
            self.compand(block)
        };

        let lost = self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate;
        (processed, lost)
    }

    /// Track VAD hangover. Returns true when DTX should replace the frame.
    fn update_vad(&mut self, block: &AudioBlock) -> bool {
        // ---
        if block.energy() >= self.params.dtx_energy_threshold {
            self.hangover_left = self.params.dtx_hangover_frames;
            return false;
        }
        if self.hangover_left > 0 {
            self.hangover_left -= 1;
            return false;
        }
        true
    }

    fn compand(&self, block: &AudioBlock) -> AudioBlock {
        // ---
        let scale = self.params.compand_scale;
        if scale == 0.0 {
            return block.clone();
        }
        let pcm: Vec<i16> = block
            .samples()
            .iter()
            .map(|&s| {
                let x = s as f64 / 32_768.0;
                let q = (x * scale).round().clamp(-128.0, 127.0);
                ((q / scale) * 32_767.0).round() as i16
            })
            .collect();
        AudioBlock::from_samples(pcm).expect("companding keeps the block length")
    }

    fn comfort_noise(&mut self) -> AudioBlock {
        // ---
        let sigma = self.params.comfort_noise_sigma;
        if sigma == 0.0 {
            return AudioBlock::silence();
        }
        let sampler = Normal::new(0.0, sigma).expect("comfort noise sigma is finite");
        let pcm: Vec<i16> = (0..drybox_domain::BLOCK_SAMPLES)
            .map(|_| sampler.sample(&mut self.rng).round() as i16)
            .collect();
        AudioBlock::from_samples(pcm).expect("comfort noise keeps the block length")
    }
}

// ---------------------------------------------------------------------------
// Plc
// ---------------------------------------------------------------------------

/// Attenuation factor applied per consecutive lost frame.
const PLC_FADE: f64 = 0.8;

/// Loss-run length (in milliseconds) after which the PLC outputs silence.
const PLC_SILENCE_AFTER_MS: u64 = 60;

// ---

/// Packet-loss concealment: hold the last good block with a compounding
/// fade, then silence.
#[derive(Debug)]
pub struct Plc {
    last_good: Option<AudioBlock>,
    consecutive_losses: u32,
    /// Loss run length at which output switches to silence.
    max_hold_frames: u32,
}

// ---

impl Plc {
    // ---
    pub fn new(tick_ms: u64) -> Self {
        Self {
            last_good: None,
            consecutive_losses: 0,
            max_hold_frames: (PLC_SILENCE_AFTER_MS / tick_ms.max(1)).max(1) as u32,
        }
    }

    /// Consume the vocoder's `lost` flag and produce the block the listener
    /// hears. A good frame passes through directly and resets the fade.
    pub fn conceal(&mut self, block: AudioBlock, lost: bool) -> AudioBlock {
        // ---
        if !lost {
            self.consecutive_losses = 0;
            self.last_good = Some(block.clone());
            return block;
        }

        self.consecutive_losses += 1;
        if self.consecutive_losses > self.max_hold_frames {
            return AudioBlock::silence();
        }
        match &self.last_good {
            None => AudioBlock::silence(),
            Some(good) => {
                let mut out = good.clone();
                out.apply_gain(PLC_FADE.powi(self.consecutive_losses as i32));
                out
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
