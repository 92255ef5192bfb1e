//! AudioBlock test peer: a sine source with a received-power probe.
//!
//! The transmit side produces a continuous tone with phase carried across
//! blocks, so the downstream channel and vocoder see a spectrally clean,
//! full-cadence signal. The receive side integrates block power and emits
//! an `audio_rx_power` event once per logical second — enough to assert
//! channel SNR and PLC fade behaviour from `events.jsonl` alone.

use std::f64::consts::PI;

use serde_json::json;

use drybox_domain::{
    Adapter, AdapterCtx, AudioBlock, Capabilities, Result, BLOCK_SAMPLES, SAMPLE_RATE,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Tone frequency in Hz. 440 Hz is deliberately not an integer divisor of
/// the block rate, so phase visibly carries across block boundaries.
const TONE_HZ: f64 = 440.0;

/// Tone amplitude relative to full scale.
const AMPLITUDE: f64 = 0.5;

/// Cadence of `audio_rx_power` events.
const REPORT_PERIOD_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Tone
// ---------------------------------------------------------------------------

/// Sine-source / power-probe adapter for AudioBlock mode.
#[derive(Debug)]
pub struct Tone {
    phase: f64,
    rx_blocks: u64,
    rx_power_accum: f64,
    last_report_ms: u64,
}

// ---

impl Default for Tone {
    fn default() -> Self {
        Self::new()
    }
}

impl Tone {
    // ---
    pub fn new() -> Self {
        Self {
            phase: 0.0,
            rx_blocks: 0,
            rx_power_accum: 0.0,
            last_report_ms: 0,
        }
    }
}

// ---

impl Adapter for Tone {
    // ---
    fn capabilities(&self) -> Capabilities {
        Capabilities::audioblock()
    }

    fn on_timer(&mut self, t_ms: u64, ctx: &mut AdapterCtx<'_>) -> Result<()> {
        // ---
        if t_ms.saturating_sub(self.last_report_ms) >= REPORT_PERIOD_MS && self.rx_blocks > 0 {
            let avg_power = self.rx_power_accum / self.rx_blocks as f64;
            ctx.emit_event(
                "audio_rx_power",
                json!({"blocks": self.rx_blocks, "avg_power": avg_power}),
            );
            self.rx_blocks = 0;
            self.rx_power_accum = 0.0;
            self.last_report_ms = t_ms;
        }
        Ok(())
    }

    fn pull_tx_block(&mut self, _t_ms: u64, _ctx: &mut AdapterCtx<'_>) -> Result<AudioBlock> {
        // ---
        let step = 2.0 * PI * TONE_HZ / SAMPLE_RATE as f64;
        let pcm: Vec<i16> = (0..BLOCK_SAMPLES)
            .map(|_| {
                let sample = (AMPLITUDE * self.phase.sin() * 32_767.0).round() as i16;
                self.phase = (self.phase + step).rem_euclid(2.0 * PI);
                sample
            })
            .collect();
        AudioBlock::from_samples(pcm)
    }

    fn push_rx_block(
        &mut self,
        pcm: &AudioBlock,
        _t_ms: u64,
        _ctx: &mut AdapterCtx<'_>,
    ) -> Result<()> {
        // ---
        self.rx_blocks += 1;
        self.rx_power_accum += pcm.energy();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
