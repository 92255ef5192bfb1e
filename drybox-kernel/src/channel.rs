//! Radio channel models for the AudioBlock path.
//!
//! Two models: AWGN (per-block Gaussian noise at a configured SNR) and
//! Rayleigh fading (Jakes-style sum of sinusoids applied as a multiplicative
//! gain, followed by AWGN at the same SNR). Both draw from dedicated RNG
//! streams so per-tick noise is reproducible, and both keep all arithmetic
//! in the normalized `[-1, 1]` float domain before clipping back to `i16`.

use std::f64::consts::PI;

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

use drybox_domain::{AudioBlock, ChannelConfig, ChannelKind};

// ---------------------------------------------------------------------------
// Normalization helpers
// ---------------------------------------------------------------------------

const I16_SCALE: f64 = 32_768.0;

fn to_float(block: &AudioBlock) -> Vec<f64> {
    block.samples().iter().map(|&s| s as f64 / I16_SCALE).collect()
}

fn to_block(samples: &[f64]) -> AudioBlock {
    // ---
    let pcm: Vec<i16> = samples
        .iter()
        .map(|&x| (x.clamp(-1.0, 1.0) * 32_767.0).round() as i16)
        .collect();
    AudioBlock::from_samples(pcm).expect("channel output keeps the block length")
}

fn mean_power(samples: &[f64]) -> f64 {
    // At-least-one-sample floor keeps the division well-defined.
    let n = samples.len().max(1) as f64;
    samples.iter().map(|&x| x * x).sum::<f64>() / n
}

// ---------------------------------------------------------------------------
// SNR estimation
// ---------------------------------------------------------------------------

/// Estimate the delivered SNR between an input block and the channel
/// output. `None` when no noise was added (infinite SNR).
pub fn estimated_snr_db(original: &AudioBlock, processed: &AudioBlock) -> Option<f64> {
    // ---
    let orig = to_float(original);
    let proc = to_float(processed);
    let noise: Vec<f64> = orig.iter().zip(&proc).map(|(a, b)| b - a).collect();

    let sig_power = mean_power(&orig);
    let noise_power = mean_power(&noise);
    if noise_power == 0.0 {
        return None;
    }
    Some(10.0 * (sig_power / noise_power).log10())
}

// ---------------------------------------------------------------------------
// AwgnChannel
// ---------------------------------------------------------------------------

/// Additive white Gaussian noise at a configured SNR.
///
/// Noise variance is derived per block from the block's own signal power:
/// `P_n = P_s / 10^(snr_db / 10)`. A silent block (zero power) and an
/// infinite SNR both pass through unchanged.
#[derive(Debug)]
pub struct AwgnChannel {
    snr_db: f64,
    rng: ChaCha20Rng,
}

// ---

impl AwgnChannel {
    // ---
    pub fn new(snr_db: f64, rng: ChaCha20Rng) -> Self {
        Self { snr_db, rng }
    }

    pub fn apply(&mut self, block: &AudioBlock) -> AudioBlock {
        // ---
        let sig = to_float(block);
        let noisy = add_awgn(&sig, self.snr_db, &mut self.rng);
        to_block(&noisy)
    }
}

/// Shared AWGN core: add i.i.d. Gaussian noise at `snr_db` relative to the
/// signal's own power. Identity for silent input or non-finite SNR.
fn add_awgn(sig: &[f64], snr_db: f64, rng: &mut ChaCha20Rng) -> Vec<f64> {
    // ---
    let sig_power = mean_power(sig);
    if sig_power == 0.0 || snr_db.is_infinite() {
        return sig.to_vec();
    }
    let snr_linear = 10f64.powf(snr_db / 10.0);
    let noise_power = sig_power / snr_linear;
    let sampler =
        Normal::new(0.0, noise_power.sqrt()).expect("noise sigma is finite and non-negative");
    sig.iter().map(|&x| x + sampler.sample(rng)).collect()
}

// ---------------------------------------------------------------------------
// RayleighChannel
// ---------------------------------------------------------------------------

/// Jakes-style Rayleigh fading: `L` complex oscillators with evenly
/// distributed angles of arrival and pseudo-random initial phases. Each
/// oscillator's phase advances by `2π · f_d·cos(α_i) · tick_s` per tick;
/// the instantaneous gain magnitude `|h|` scales the block, then AWGN is
/// applied at the configured SNR. Oscillator state persists across ticks.
#[derive(Debug)]
pub struct RayleighChannel {
    snr_db: f64,
    tick_s: f64,
    /// Per-oscillator Doppler shift in Hz (`f_d · cos(α_i)`).
    dopplers: Vec<f64>,
    /// Per-oscillator phase, radians.
    phases: Vec<f64>,
    rng: ChaCha20Rng,
}

// ---

impl RayleighChannel {
    // ---
    pub fn new(snr_db: f64, doppler_hz: f64, num_paths: usize, tick_ms: u64, mut rng: ChaCha20Rng) -> Self {
        // ---
        let l = num_paths.max(1);
        let mut dopplers = Vec::with_capacity(l);
        let mut phases = Vec::with_capacity(l);
        for i in 0..l {
            // Angles of arrival evenly spread over the circle; the +0.5
            // offset avoids the degenerate cos(0) = 1 pile-up at i = 0.
            let alpha = 2.0 * PI * (i as f64 + 0.5) / l as f64;
            dopplers.push(doppler_hz * alpha.cos());
            phases.push(rng.gen_range(0.0..(2.0 * PI)));
        }
        Self {
            snr_db,
            tick_s: tick_ms as f64 / 1_000.0,
            dopplers,
            phases,
            rng,
        }
    }

    /// Instantaneous complex-gain magnitude, normalized so the mean power
    /// over time is one.
    pub fn gain_magnitude(&self) -> f64 {
        // ---
        let (mut re, mut im) = (0.0, 0.0);
        for &phi in &self.phases {
            re += phi.cos();
            im += phi.sin();
        }
        let norm = (self.phases.len() as f64).sqrt();
        ((re * re + im * im).sqrt()) / norm
    }

    fn advance(&mut self) {
        // ---
        for (phi, &fd) in self.phases.iter_mut().zip(&self.dopplers) {
            *phi = (*phi + 2.0 * PI * fd * self.tick_s).rem_euclid(2.0 * PI);
        }
    }

    pub fn apply(&mut self, block: &AudioBlock) -> AudioBlock {
        // ---
        self.advance();
        let h = self.gain_magnitude();
        let faded: Vec<f64> = to_float(block).iter().map(|&x| x * h).collect();
        let noisy = add_awgn(&faded, self.snr_db, &mut self.rng);
        to_block(&noisy)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Configured channel instance for one run.
#[derive(Debug)]
pub enum Channel {
    Awgn(AwgnChannel),
    Rayleigh(RayleighChannel),
}

// ---

impl Channel {
    // ---
    pub fn from_config(cfg: &ChannelConfig, tick_ms: u64, awgn_rng: ChaCha20Rng, fading_rng: ChaCha20Rng) -> Self {
        // ---
        match cfg.kind {
            ChannelKind::Awgn => Channel::Awgn(AwgnChannel::new(cfg.snr_db, awgn_rng)),
            ChannelKind::Rayleigh => Channel::Rayleigh(RayleighChannel::new(
                cfg.snr_db,
                cfg.doppler_hz,
                cfg.num_paths,
                tick_ms,
                fading_rng,
            )),
        }
    }

    pub fn apply(&mut self, block: &AudioBlock) -> AudioBlock {
        match self {
            Channel::Awgn(c) => c.apply(block),
            Channel::Rayleigh(c) => c.apply(block),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use rand::SeedableRng;

    use drybox_domain::BLOCK_SAMPLES;

    use super::*;

    fn sine_block(freq_hz: f64, amplitude: f64) -> AudioBlock {
        // ---
        let pcm: Vec<i16> = (0..BLOCK_SAMPLES)
            .map(|n| {
                let t = n as f64 / 8_000.0;
                (amplitude * (2.0 * PI * freq_hz * t).sin() * 32_767.0) as i16
            })
            .collect();
        AudioBlock::from_samples(pcm).unwrap()
    }

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    // ---

    #[test]
    fn silent_input_passes_through() {
        // ---
        let mut ch = AwgnChannel::new(10.0, rng(1));
        let out = ch.apply(&AudioBlock::silence());
        assert!(out.is_silent(), "zero-power input must stay silent");
    }

    #[test]
    fn infinite_snr_is_identity() {
        // ---
        let block = sine_block(1_000.0, 0.8);
        let mut ch = AwgnChannel::new(f64::INFINITY, rng(1));
        assert_eq!(ch.apply(&block), block);
        assert_eq!(estimated_snr_db(&block, &block), None);
    }

    /// Full-scale 1 kHz sine at 10 dB: the measured SNR across many blocks
    /// must average into the [8, 12] dB acceptance band.
    #[test]
    fn awgn_hits_the_configured_snr() {
        // ---
        let block = sine_block(1_000.0, 1.0);
        let mut ch = AwgnChannel::new(10.0, rng(42));

        let mut sum = 0.0;
        let runs = 250;
        for _ in 0..runs {
            let out = ch.apply(&block);
            sum += estimated_snr_db(&block, &out).expect("noise was added");
        }
        let mean = sum / runs as f64;
        assert!(
            (8.0..=12.0).contains(&mean),
            "mean estimated SNR {mean:.2} dB outside [8, 12]"
        );
    }

    #[test]
    fn awgn_is_deterministic_per_seed() {
        // ---
        let block = sine_block(400.0, 0.5);
        let a = AwgnChannel::new(10.0, rng(7)).apply(&block);
        let b = AwgnChannel::new(10.0, rng(7)).apply(&block);
        assert_eq!(a, b);
    }

    #[test]
    fn rayleigh_gain_varies_over_ticks() {
        // ---
        let mut ch = RayleighChannel::new(20.0, 50.0, 8, 20, rng(3));
        let mut gains = Vec::new();
        for _ in 0..50 {
            ch.advance();
            gains.push(ch.gain_magnitude());
        }
        let min = gains.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = gains.iter().cloned().fold(0.0, f64::max);
        assert!(max > min, "fading gain must evolve with the Doppler process");
        assert!(max < 4.0, "normalized Jakes gain should stay bounded");
    }

    #[test]
    fn rayleigh_state_persists_across_blocks() {
        // ---
        let block = sine_block(1_000.0, 0.5);
        let mut ch = RayleighChannel::new(f64::INFINITY, 50.0, 8, 20, rng(9));
        let first = ch.apply(&block);
        let second = ch.apply(&block);
        assert_ne!(
            first, second,
            "oscillator phases advance, so consecutive blocks differ"
        );
    }
}
