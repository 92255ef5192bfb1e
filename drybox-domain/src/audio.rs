use serde::{Deserialize, Serialize};

use super::error::{DryBoxError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Kernel-default sample rate in Hz.
pub const SAMPLE_RATE: u32 = 8_000;

/// Kernel-default block length in samples (20 ms at 8 kHz).
pub const BLOCK_SAMPLES: usize = 160;

// ---------------------------------------------------------------------------
// AudioParams
// ---------------------------------------------------------------------------

/// Audio format advertised by an adapter in its capabilities.
///
/// If an adapter advertises values that differ from the kernel defaults,
/// the kernel keeps its own defaults and records an `audioparams_override`
/// event; it never reshapes blocks to an adapter's preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    // ---
    /// Sample rate in Hz.
    pub sr: u32,

    /// Samples per block.
    pub block: usize,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sr: SAMPLE_RATE,
            block: BLOCK_SAMPLES,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioBlock
// ---------------------------------------------------------------------------

/// One fixed-cadence PCM block: [`BLOCK_SAMPLES`] mono `i16` samples.
///
/// Silence is a zero-filled block, never an absent one. The inner buffer is
/// owned and contiguous; adapters read and write through plain slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    samples: Vec<i16>,
}

// ---

impl AudioBlock {
    // ---
    /// All-zero (silent) block.
    pub fn silence() -> Self {
        Self {
            samples: vec![0; BLOCK_SAMPLES],
        }
    }

    /// Wrap a sample buffer, rejecting any length other than
    /// [`BLOCK_SAMPLES`]. Shape violations are endpoint errors.
    pub fn from_samples(samples: Vec<i16>) -> Result<Self> {
        // ---
        if samples.len() != BLOCK_SAMPLES {
            return Err(DryBoxError::Endpoint(format!(
                "PCM block must be exactly {BLOCK_SAMPLES} samples, got {}",
                samples.len()
            )));
        }
        Ok(Self { samples })
    }

    /// Read-only view of the samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Mutable view of the samples.
    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Mean square of the samples — the block's energy proxy used by
    /// VAD thresholds and the PLC fade tests.
    pub fn energy(&self) -> f64 {
        // ---
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64;
                v * v
            })
            .sum();
        sum / self.samples.len() as f64
    }

    /// True when every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Scale every sample by `gain`, saturating to the `i16` range.
    pub fn apply_gain(&mut self, gain: f64) {
        // ---
        if (gain - 1.0).abs() < f64::EPSILON {
            return;
        }
        for s in &mut self.samples {
            let scaled = (*s as f64 * gain).round();
            *s = scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }
}

impl Default for AudioBlock {
    fn default() -> Self {
        Self::silence()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
