//! Adapter spec resolution.
//!
//! A spec is `name[:Class]`; the class segment defaults to `Adapter`, the
//! name every built-in registers its primary class under. The reference
//! implementation loaded arbitrary user code by file path — here the loader
//! is an in-process constructor table, which is the swappable part of the
//! design; the ABI in `drybox-domain` is the contract.

use drybox_domain::{AdapterPtr, DryBoxError, Result};

use crate::pingpong::PingPong;
use crate::tone::Tone;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Class name used when a spec has no `:Class` segment.
const DEFAULT_CLASS: &str = "Adapter";

/// Names accepted by [`resolve_adapter`], for help text and error messages.
pub const AVAILABLE_ADAPTERS: &[&str] = &["pingpong", "tone"];

// ---------------------------------------------------------------------------
// resolve_adapter
// ---------------------------------------------------------------------------

/// Resolve `name[:Class]` into a fresh adapter instance.
///
/// Unknown names and classes are scenario errors (exit 4): a run cannot
/// meaningfully start without both endpoints.
pub fn resolve_adapter(spec: &str) -> Result<AdapterPtr> {
    // ---
    let spec = spec.trim();
    let (name, class) = match spec.split_once(':') {
        Some((n, c)) if !c.is_empty() => (n, c),
        Some((n, _)) => (n, DEFAULT_CLASS),
        None => (spec, DEFAULT_CLASS),
    };

    if class != DEFAULT_CLASS {
        return Err(DryBoxError::Scenario(format!(
            "adapter '{name}' has no class '{class}' (built-ins register '{DEFAULT_CLASS}')"
        )));
    }

    match name {
        "pingpong" => Ok(Box::new(PingPong::new())),
        "tone" => Ok(Box::new(Tone::new())),
        other => Err(DryBoxError::Scenario(format!(
            "unknown adapter '{other}' (available: {})",
            AVAILABLE_ADAPTERS.join(", ")
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
