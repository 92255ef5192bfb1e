//! Per-side key provisioning.
//!
//! Each side gets a 32-byte Ed25519 seed: either supplied explicitly by the
//! scenario (hex, base64, or file — malformed material is a scenario error,
//! exit 4) or derived deterministically from the master seed via
//! HKDF-SHA256. Derivation depends only on the master seed, the two adapter
//! specs, and the side, so sweeps over non-crypto parameters keep the keys
//! stable.

use std::fs;
use std::path::Path;

use base64::Engine;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use drybox_domain::{
    CryptoKeySource, CryptoMaterial, DryBoxError, KeyProvenance, Result, Side,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// HKDF info prefix. Versioned so a future derivation change cannot
/// silently collide with v1 keys.
const KDF_INFO_PREFIX: &str = "drybox/v1/";

// ---------------------------------------------------------------------------
// key_id
// ---------------------------------------------------------------------------

/// Short fingerprint of a public key: first 8 hex characters of
/// SHA-256(pub). A pure function of the key bytes.
pub fn key_id(public: &[u8; 32]) -> String {
    let digest = Sha256::digest(public);
    hex::encode(&digest[..4])
}

// ---------------------------------------------------------------------------
// Private-seed parsing
// ---------------------------------------------------------------------------

/// Parse explicit private-key material.
///
/// Accepts 32-byte seeds and 64-byte extended keys (truncated to the seed
/// half). Inline text is tried as hex first (even length, hex digits only),
/// then base64. Anything else is a scenario error.
fn parse_priv(source: &CryptoKeySource) -> Result<[u8; 32]> {
    // ---
    let text = match source {
        CryptoKeySource::Inline(s) => s.trim().to_string(),
        CryptoKeySource::File { path } => fs::read_to_string(Path::new(path))
            .map_err(|e| DryBoxError::Scenario(format!("cannot read key file {path}: {e}")))?
            .trim()
            .to_string(),
    };

    let bytes = if text.len() % 2 == 0 && text.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(&text)
            .map_err(|e| DryBoxError::Scenario(format!("invalid hex key material: {e}")))?
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(&text)
            .map_err(|e| DryBoxError::Scenario(format!("invalid base64 key material: {e}")))?
    };

    match bytes.len() {
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            Ok(seed)
        }
        64 => {
            // Extended key: keep the 32-byte seed half.
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes[..32]);
            Ok(seed)
        }
        n => Err(DryBoxError::Scenario(format!(
            "private key must be 32 or 64 bytes, got {n}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive one side's 32-byte private seed via HKDF-SHA256.
///
/// salt = master seed (little-endian), ikm = the same seed bytes,
/// info = `drybox/v1/<side>/<left_spec>/<right_spec>`.
fn derive_priv_seed(seed: u64, left_spec: &str, right_spec: &str, side: Side) -> [u8; 32] {
    // ---
    let seed_bytes = seed.to_le_bytes();
    let info = format!(
        "{KDF_INFO_PREFIX}{}/{left_spec}/{right_spec}",
        side.label()
    );
    let hk = Hkdf::<Sha256>::new(Some(&seed_bytes), &seed_bytes);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32-byte OKM is within the HKDF-SHA256 output bound");
    okm
}

/// Ed25519 public key for a 32-byte private seed.
fn public_from_seed(priv_seed: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(priv_seed).verifying_key().to_bytes()
}

// ---------------------------------------------------------------------------
// resolve_keypairs
// ---------------------------------------------------------------------------

/// Resolve both sides' key material.
///
/// Explicit scenario keys win; absent ones are derived. Returns
/// `(left, right)` with each side's `peer_public`/`peer_key_id` already
/// cross-filled.
pub fn resolve_keypairs(
    seed: u64,
    left_spec: &str,
    right_spec: &str,
    crypto_left: Option<&CryptoKeySource>,
    crypto_right: Option<&CryptoKeySource>,
) -> Result<(CryptoMaterial, CryptoMaterial)> {
    // ---
    let (l_priv, l_prov) = match crypto_left {
        Some(src) => (parse_priv(src)?, KeyProvenance::Scenario),
        None => (
            derive_priv_seed(seed, left_spec, right_spec, Side::Left),
            KeyProvenance::Derived,
        ),
    };
    let (r_priv, r_prov) = match crypto_right {
        Some(src) => (parse_priv(src)?, KeyProvenance::Scenario),
        None => (
            derive_priv_seed(seed, left_spec, right_spec, Side::Right),
            KeyProvenance::Derived,
        ),
    };

    let l_pub = public_from_seed(&l_priv);
    let r_pub = public_from_seed(&r_priv);
    let l_id = key_id(&l_pub);
    let r_id = key_id(&r_pub);

    let left = CryptoMaterial {
        priv_seed: l_priv,
        public: l_pub,
        peer_public: r_pub,
        key_id: l_id.clone(),
        peer_key_id: r_id.clone(),
        provenance: l_prov,
    };
    let right = CryptoMaterial {
        priv_seed: r_priv,
        public: r_pub,
        peer_public: l_pub,
        key_id: r_id,
        peer_key_id: l_id,
        provenance: r_prov,
    };
    Ok((left, right))
}

// ---------------------------------------------------------------------------
// pubkeys.txt
// ---------------------------------------------------------------------------

/// Render the `pubkeys.txt` artifact: public keys and fingerprints only.
pub fn render_pubkeys(
    left: &CryptoMaterial,
    right: &CryptoMaterial,
    left_spec: &str,
    right_spec: &str,
) -> String {
    // ---
    let mut out = String::new();
    out.push_str("# DryBox public keys (Ed25519) — private keys are never persisted\n");
    out.push_str(&format!("L.key_id={}\n", left.key_id));
    out.push_str(&format!("L.pub_hex={}\n", hex::encode(left.public)));
    out.push_str(&format!("L.provenance={}\n", left.provenance));
    out.push_str(&format!("R.key_id={}\n", right.key_id));
    out.push_str(&format!("R.pub_hex={}\n", hex::encode(right.public)));
    out.push_str(&format!("R.provenance={}\n", right.provenance));
    out.push_str(&format!("left_adapter={left_spec}\n"));
    out.push_str(&format!("right_adapter={right_spec}\n"));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn derivation_is_stable() {
        // ---
        let a = derive_priv_seed(42, "pingpong", "pingpong", Side::Left);
        let b = derive_priv_seed(42, "pingpong", "pingpong", Side::Left);
        assert_eq!(a, b);
    }

    #[test]
    fn sides_get_distinct_keys() {
        // ---
        let l = derive_priv_seed(42, "pingpong", "pingpong", Side::Left);
        let r = derive_priv_seed(42, "pingpong", "pingpong", Side::Right);
        assert_ne!(l, r);
    }

    #[test]
    fn derivation_depends_on_specs_and_seed_only() {
        // ---
        let base = derive_priv_seed(42, "a", "b", Side::Left);
        assert_ne!(base, derive_priv_seed(43, "a", "b", Side::Left));
        assert_ne!(base, derive_priv_seed(42, "a", "c", Side::Left));
    }

    #[test]
    fn key_id_is_eight_hex_chars_of_pub_hash() {
        // ---
        let public = public_from_seed(&[7u8; 32]);
        let id = key_id(&public);
        assert_eq!(id.len(), 8);
        let full = hex::encode(Sha256::digest(public));
        assert_eq!(id, full[..8]);
    }

    #[test]
    fn hex_and_base64_and_truncation() {
        // ---
        let seed = [0xABu8; 32];
        let from_hex = parse_priv(&CryptoKeySource::Inline(hex::encode(seed))).unwrap();
        assert_eq!(from_hex, seed);

        let b64 = base64::engine::general_purpose::STANDARD.encode(seed);
        let from_b64 = parse_priv(&CryptoKeySource::Inline(b64)).unwrap();
        assert_eq!(from_b64, seed);

        // 64-byte extended key keeps the first 32 bytes.
        let mut extended = [0u8; 64];
        extended[..32].copy_from_slice(&seed);
        let from_ext = parse_priv(&CryptoKeySource::Inline(hex::encode(extended))).unwrap();
        assert_eq!(from_ext, seed);
    }

    #[test]
    fn malformed_key_is_a_scenario_error() {
        // ---
        let err = parse_priv(&CryptoKeySource::Inline("zz!not-a-key".into())).unwrap_err();
        assert_eq!(err.exit_code(), 4);

        let short = parse_priv(&CryptoKeySource::Inline(hex::encode([1u8; 16]))).unwrap_err();
        assert_eq!(short.exit_code(), 4);
    }

    #[test]
    fn explicit_keys_override_derivation() {
        // ---
        let src = CryptoKeySource::Inline(hex::encode([9u8; 32]));
        let (l, r) = resolve_keypairs(42, "a", "b", Some(&src), None).unwrap();
        assert_eq!(l.priv_seed, [9u8; 32]);
        assert_eq!(l.provenance, KeyProvenance::Scenario);
        assert_eq!(r.provenance, KeyProvenance::Derived);
        assert_eq!(l.peer_public, r.public);
        assert_eq!(r.peer_key_id, l.key_id);
    }

    #[test]
    fn pubkeys_render_has_no_private_material() {
        // ---
        let (l, r) = resolve_keypairs(42, "a", "b", None, None).unwrap();
        let text = render_pubkeys(&l, &r, "a", "b");
        assert!(text.contains(&hex::encode(l.public)));
        assert!(!text.contains(&hex::encode(l.priv_seed)));
        assert!(!text.contains(&hex::encode(r.priv_seed)));
    }
}
