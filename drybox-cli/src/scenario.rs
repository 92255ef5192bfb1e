//! Scenario file loader: YAML → [`ResolvedScenario`].
//!
//! This is the exit-4 boundary. Parsing is strict (unknown keys are
//! rejected), named bearer presets expand into concrete parameters, defaults
//! fill the gaps, and [`ResolvedScenario::validate`] gates ranges. The
//! kernel never sees anything but the resolved form.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use drybox_domain::{
    AcceptanceConfig, BearerConfig, ChannelConfig, CryptoKeySource, DryBoxError, EndpointConfig,
    Mode, ResolvedScenario, Result, VocoderConfig, VocoderKind, DEFAULT_DURATION_MS, DEFAULT_SEED,
    DEFAULT_TICK_MS,
};

// ---------------------------------------------------------------------------
// Raw document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScenario {
    mode: Option<Mode>,
    duration_ms: Option<u64>,
    tick_ms: Option<u64>,
    seed: Option<u64>,
    network: Option<RawNetwork>,
    channel: Option<ChannelConfig>,
    vocoder: Option<RawVocoder>,
    left: Option<RawEndpoint>,
    right: Option<RawEndpoint>,
    crypto: Option<RawCrypto>,
    acceptance: Option<AcceptanceConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNetwork {
    bearer: Option<String>,
    latency_ms: Option<u64>,
    jitter_ms: Option<u64>,
    loss_rate: Option<f64>,
    reorder_rate: Option<f64>,
    mtu: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVocoder {
    #[serde(rename = "type")]
    kind: VocoderKind,
    #[serde(default)]
    vad_dtx: bool,
    /// Absent → inherit the bearer's loss rate.
    loss_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    adapter: Option<String>,
    gain: Option<f64>,
    /// Modem tuning block consumed by modem-aware adapters; the kernel
    /// itself does not interpret it.
    #[serde(default)]
    #[allow(dead_code)]
    modem: Option<serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCrypto {
    left_priv: Option<CryptoKeySource>,
    right_priv: Option<CryptoKeySource>,
}

// ---------------------------------------------------------------------------
// Bearer presets
// ---------------------------------------------------------------------------

/// Expand a named bearer into its parameter defaults. Explicit `network`
/// fields override the preset afterwards.
fn bearer_preset(kind: &str) -> Result<BearerConfig> {
    // ---
    let canonical = kind.to_ascii_lowercase();
    let preset = match canonical.as_str() {
        "ideal" => BearerConfig::ideal(),
        "volte_evs" | "telco_volte_evs" | "volte" => BearerConfig {
            kind: "volte_evs".into(),
            latency_ms: 60,
            jitter_ms: 20,
            loss_rate: 0.0,
            reorder_rate: 0.0,
            mtu_bytes: 1_024,
        },
        "ott_udp" | "udp" | "ip" => BearerConfig {
            kind: "ott_udp".into(),
            latency_ms: 40,
            jitter_ms: 10,
            loss_rate: 0.0,
            reorder_rate: 0.0,
            mtu_bytes: 1_200,
        },
        other => {
            return Err(DryBoxError::Scenario(format!(
                "unknown bearer kind '{other}' (known: ideal, volte_evs, ott_udp)"
            )))
        }
    };
    Ok(preset)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// CLI-level overrides applied after the file is resolved.
#[derive(Debug, Default)]
pub struct Overrides {
    pub seed: Option<u64>,
    pub tick_ms: Option<u64>,
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Load, default, and validate a scenario file.
pub fn load_scenario(path: &Path, overrides: &Overrides) -> Result<ResolvedScenario> {
    // ---
    let text = fs::read_to_string(path)
        .map_err(|e| DryBoxError::Scenario(format!("cannot read scenario {}: {e}", path.display())))?;
    let raw: RawScenario = serde_yaml::from_str(&text)
        .map_err(|e| DryBoxError::Scenario(format!("malformed scenario YAML: {e}")))?;
    resolve(raw, overrides)
}

fn resolve(raw: RawScenario, overrides: &Overrides) -> Result<ResolvedScenario> {
    // ---
    let mode = raw.mode.unwrap_or(Mode::Audio);

    // Bearer: preset first, explicit fields second.
    let network = raw.network.unwrap_or_default();
    let mut bearer = bearer_preset(network.bearer.as_deref().unwrap_or("volte_evs"))?;
    if let Some(v) = network.latency_ms {
        bearer.latency_ms = v;
    }
    if let Some(v) = network.jitter_ms {
        bearer.jitter_ms = v;
    }
    if let Some(v) = network.loss_rate {
        bearer.loss_rate = v;
    }
    if let Some(v) = network.reorder_rate {
        bearer.reorder_rate = v;
    }
    if let Some(v) = network.mtu {
        bearer.mtu_bytes = v;
    }

    let vocoder = raw.vocoder.map(|v| VocoderConfig {
        kind: v.kind,
        vad_dtx: v.vad_dtx,
        loss_rate: v.loss_rate.unwrap_or(bearer.loss_rate),
    });

    // Mode-appropriate default adapter when neither the scenario nor the
    // CLI names one.
    let default_adapter = match mode {
        Mode::Byte => "pingpong",
        Mode::Audio => "tone",
    };
    let endpoint = |raw: Option<RawEndpoint>, cli: &Option<String>| {
        let raw = raw.unwrap_or_default();
        EndpointConfig {
            adapter: cli
                .clone()
                .or(raw.adapter)
                .unwrap_or_else(|| default_adapter.to_string()),
            gain: raw.gain.unwrap_or(1.0),
        }
    };
    let left = endpoint(raw.left, &overrides.left);
    let right = endpoint(raw.right, &overrides.right);

    let crypto = raw.crypto.unwrap_or_default();

    let scenario = ResolvedScenario {
        mode,
        duration_ms: raw.duration_ms.unwrap_or(DEFAULT_DURATION_MS),
        tick_ms: overrides
            .tick_ms
            .or(raw.tick_ms)
            .unwrap_or(DEFAULT_TICK_MS),
        seed: overrides.seed.or(raw.seed).unwrap_or(DEFAULT_SEED),
        bearer,
        channel: raw.channel,
        vocoder,
        left,
        right,
        crypto_left: crypto.left_priv,
        crypto_right: crypto.right_priv,
        acceptance: raw.acceptance,
    };
    scenario.validate()?;
    Ok(scenario)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
