use std::fmt;

// ---------------------------------------------------------------------------
// KeyProvenance
// ---------------------------------------------------------------------------

/// Where a side's private seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProvenance {
    /// Supplied explicitly in the scenario's `crypto` block.
    Scenario,
    /// Derived deterministically from the master seed via HKDF.
    Derived,
}

impl fmt::Display for KeyProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyProvenance::Scenario => f.write_str("scenario"),
            KeyProvenance::Derived => f.write_str("derived"),
        }
    }
}

// ---------------------------------------------------------------------------
// CryptoMaterial
// ---------------------------------------------------------------------------

/// Per-side Ed25519 key material handed to an adapter at `init`.
///
/// `key_id` is a pure function of `public` (the first 8 hex characters of
/// SHA-256(public)). Private seeds never leave memory; only `public` and
/// `key_id` are persisted, into `pubkeys.txt`.
#[derive(Clone)]
pub struct CryptoMaterial {
    // ---
    /// 32-byte Ed25519 private seed. Never persisted.
    pub priv_seed: [u8; 32],

    /// This side's 32-byte public key.
    pub public: [u8; 32],

    /// The peer's 32-byte public key.
    pub peer_public: [u8; 32],

    /// First 8 hex characters of SHA-256(`public`).
    pub key_id: String,

    /// First 8 hex characters of SHA-256(`peer_public`).
    pub peer_key_id: String,

    /// Origin of `priv_seed`.
    pub provenance: KeyProvenance,
}

// ---

// Keep private seeds out of debug output and logs.
impl fmt::Debug for CryptoMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoMaterial")
            .field("key_id", &self.key_id)
            .field("peer_key_id", &self.peer_key_id)
            .field("provenance", &self.provenance)
            .finish_non_exhaustive()
    }
}
