//! Adapter host: capability negotiation and lifecycle of one peer.
//!
//! The host is the only code that touches adapter callbacks. Every call is
//! wrapped so that any adapter failure — an `Err`, an over-length SDU, a
//! mis-shaped block — surfaces as a single [`DryBoxError::Endpoint`] carrying
//! the side and adapter spec. The kernel never retries an adapter call.

use rand_chacha::ChaCha20Rng;

use drybox_domain::{
    Adapter, AdapterConfig, AdapterCtx, AdapterPtr, AudioBlock, AudioParams, Capabilities,
    CryptoMaterial, DryBoxError, EventSink, Mode, Result, Side, TxSdu,
};

// ---------------------------------------------------------------------------
// negotiate
// ---------------------------------------------------------------------------

/// Check that both adapters advertise the scenario's mode.
///
/// A mode neither (or only one) endpoint supports is a configuration
/// problem, not an endpoint crash: the run aborts with exit code 4.
pub fn negotiate(mode: Mode, left: &Capabilities, right: &Capabilities) -> Result<()> {
    // ---
    let mode_name = match mode {
        Mode::Byte => "byte",
        Mode::Audio => "audio",
    };
    for (side, caps) in [(Side::Left, left), (Side::Right, right)] {
        if caps.abi_version != drybox_domain::ABI_VERSION {
            return Err(DryBoxError::Endpoint(format!(
                "{side} adapter advertises ABI {}, kernel speaks {}",
                caps.abi_version,
                drybox_domain::ABI_VERSION
            )));
        }
        if !caps.supports(mode) {
            return Err(DryBoxError::Scenario(format!(
                "{side} adapter does not advertise {mode_name} mode"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AdapterHost
// ---------------------------------------------------------------------------

/// One side's adapter plus the per-side state the kernel threads through
/// its callbacks: the dedicated RNG stream and the key material.
pub struct AdapterHost {
    adapter: AdapterPtr,
    caps: Capabilities,
    side: Side,
    spec: String,
    tick_ms: u64,
    rng: ChaCha20Rng,
    crypto: CryptoMaterial,
}

// Builds the per-callback context from split field borrows; a method
// receiver would alias the `adapter` borrow held by the caller.
macro_rules! with_ctx {
    ($host:expr, $t_ms:expr, $events:expr, |$adapter:ident, $ctx:ident| $body:expr) => {{
        let host = $host;
        let $adapter = &mut host.adapter;
        let mut $ctx = AdapterCtx::new(
            host.side,
            $t_ms,
            host.tick_ms,
            &mut host.rng,
            Some(&host.crypto),
            $events,
        );
        $body
    }};
}

// ---

impl AdapterHost {
    // ---
    pub fn new(
        adapter: AdapterPtr,
        spec: String,
        side: Side,
        tick_ms: u64,
        rng: ChaCha20Rng,
        crypto: CryptoMaterial,
    ) -> Self {
        // ---
        let caps = adapter.capabilities();
        Self {
            adapter,
            caps,
            side,
            spec,
            tick_ms,
            rng,
            crypto,
        }
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn crypto(&self) -> &CryptoMaterial {
        &self.crypto
    }

    /// Advertised audio params when they diverge from the kernel defaults.
    pub fn audioparams_divergence(&self) -> Option<AudioParams> {
        // ---
        match self.caps.audioparams {
            Some(p) if p != AudioParams::default() => Some(p),
            _ => None,
        }
    }

    fn endpoint_err(&self, what: &str, e: DryBoxError) -> DryBoxError {
        DryBoxError::Endpoint(format!("{} adapter {} {what}: {e}", self.side, self.spec))
    }

    // --- lifecycle ---

    pub fn init(&mut self, cfg: &AdapterConfig) -> Result<()> {
        self.adapter
            .init(cfg)
            .map_err(|e| self.endpoint_err("init", e))
    }

    pub fn start(&mut self, events: &mut dyn EventSink) -> Result<()> {
        // ---
        with_ctx!(&mut *self, 0, events, |adapter, ctx| adapter.start(&mut ctx))
            .map_err(|e| self.endpoint_err("start", e))
    }

    pub fn stop(&mut self) {
        self.adapter.stop();
    }

    pub fn on_timer(&mut self, t_ms: u64, events: &mut dyn EventSink) -> Result<()> {
        // ---
        with_ctx!(&mut *self, t_ms, events, |adapter, ctx| {
            adapter.on_timer(t_ms, &mut ctx)
        })
        .map_err(|e| self.endpoint_err("on_timer", e))
    }

    // --- Mode A ---

    /// Drain outbound SDUs, normalized to plain byte payloads and checked
    /// against the adapter's declared `sdu_max_bytes`. An over-length SDU
    /// is a fatal adapter error.
    pub fn poll_link_tx(
        &mut self,
        budget: usize,
        t_ms: u64,
        events: &mut dyn EventSink,
    ) -> Result<Vec<Vec<u8>>> {
        // ---
        let raw = with_ctx!(&mut *self, t_ms, events, |adapter, ctx| {
            adapter.poll_link_tx(budget, &mut ctx)
        })
        .map_err(|e| self.endpoint_err("poll_link_tx", e))?;

        let limit = self.caps.sdu_max_bytes;
        let mut sdus = Vec::with_capacity(raw.len());
        for item in raw {
            let payload = match item {
                TxSdu::Bytes(b) => b,
                TxSdu::Stamped(b, _) => b,
            };
            if payload.len() > limit {
                return Err(DryBoxError::Endpoint(format!(
                    "{} adapter {} emitted a {}-byte SDU above its declared sdu_max_bytes {limit}",
                    self.side,
                    self.spec,
                    payload.len()
                )));
            }
            sdus.push(payload);
        }
        Ok(sdus)
    }

    pub fn on_link_rx(&mut self, sdu: &[u8], t_ms: u64, events: &mut dyn EventSink) -> Result<()> {
        // ---
        with_ctx!(&mut *self, t_ms, events, |adapter, ctx| {
            adapter.on_link_rx(sdu, &mut ctx)
        })
        .map_err(|e| self.endpoint_err("on_link_rx", e))
    }

    // --- Mode B ---

    pub fn pull_tx_block(&mut self, t_ms: u64, events: &mut dyn EventSink) -> Result<AudioBlock> {
        // ---
        with_ctx!(&mut *self, t_ms, events, |adapter, ctx| {
            adapter.pull_tx_block(t_ms, &mut ctx)
        })
        .map_err(|e| self.endpoint_err("pull_tx_block", e))
    }

    pub fn push_rx_block(
        &mut self,
        pcm: &AudioBlock,
        t_ms: u64,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        // ---
        with_ctx!(&mut *self, t_ms, events, |adapter, ctx| {
            adapter.push_rx_block(pcm, t_ms, &mut ctx)
        })
        .map_err(|e| self.endpoint_err("push_rx_block", e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use rand::SeedableRng;
    use serde_json::Value;

    use drybox_domain::KeyProvenance;

    use super::*;

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&mut self, _t_ms: u64, _side: Side, _kind: &str, _payload: Value) {}
    }

    fn dummy_crypto() -> CryptoMaterial {
        // ---
        CryptoMaterial {
            priv_seed: [0; 32],
            public: [0; 32],
            peer_public: [0; 32],
            key_id: "00000000".into(),
            peer_key_id: "00000000".into(),
            provenance: KeyProvenance::Derived,
        }
    }

    #[derive(Debug)]
    struct Chatty {
        sdu: Vec<u8>,
    }

    impl Adapter for Chatty {
        fn capabilities(&self) -> Capabilities {
            Capabilities::bytelink(8)
        }
        fn on_timer(&mut self, _t_ms: u64, _ctx: &mut AdapterCtx<'_>) -> Result<()> {
            Ok(())
        }
        fn poll_link_tx(&mut self, _budget: usize, _ctx: &mut AdapterCtx<'_>) -> Result<Vec<TxSdu>> {
            Ok(vec![
                TxSdu::Bytes(self.sdu.clone()),
                TxSdu::Stamped(self.sdu.clone(), 7),
            ])
        }
    }

    fn host(sdu: Vec<u8>) -> AdapterHost {
        // ---
        AdapterHost::new(
            Box::new(Chatty { sdu }),
            "chatty".into(),
            Side::Left,
            20,
            ChaCha20Rng::seed_from_u64(0),
            dummy_crypto(),
        )
    }

    // ---

    #[test]
    fn negotiate_rejects_unsupported_mode() {
        // ---
        let byte_only = Capabilities::bytelink(64);
        let audio_only = Capabilities::audioblock();
        assert!(negotiate(Mode::Byte, &byte_only, &byte_only).is_ok());
        let err = negotiate(Mode::Audio, &byte_only, &audio_only).unwrap_err();
        assert_eq!(err.exit_code(), 4, "mode mismatch is a scenario error");
    }

    #[test]
    fn tuples_are_normalized_to_bytes() {
        // ---
        let mut h = host(b"abcd".to_vec());
        let sdus = h.poll_link_tx(32, 0, &mut NullSink).unwrap();
        assert_eq!(sdus, vec![b"abcd".to_vec(), b"abcd".to_vec()]);
    }

    #[test]
    fn oversize_sdu_is_fatal() {
        // ---
        let mut h = host(vec![0; 9]); // declared sdu_max_bytes = 8
        let err = h.poll_link_tx(32, 0, &mut NullSink).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn adapter_errors_carry_side_and_spec() {
        // ---
        #[derive(Debug)]
        struct Failing;
        impl Adapter for Failing {
            fn capabilities(&self) -> Capabilities {
                Capabilities::bytelink(64)
            }
            fn on_timer(&mut self, _t_ms: u64, _ctx: &mut AdapterCtx<'_>) -> Result<()> {
                Err(DryBoxError::Endpoint("boom".into()))
            }
        }
        let mut h = AdapterHost::new(
            Box::new(Failing),
            "failing".into(),
            Side::Right,
            20,
            ChaCha20Rng::seed_from_u64(0),
            dummy_crypto(),
        );
        let err = h.on_timer(40, &mut NullSink).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("R adapter failing on_timer"), "got: {msg}");
    }

    #[test]
    fn divergent_audioparams_are_reported() {
        // ---
        #[derive(Debug)]
        struct OddAudio;
        impl Adapter for OddAudio {
            fn capabilities(&self) -> Capabilities {
                let mut caps = Capabilities::audioblock();
                caps.audioparams = Some(AudioParams {
                    sr: 16_000,
                    block: 320,
                });
                caps
            }
            fn on_timer(&mut self, _t_ms: u64, _ctx: &mut AdapterCtx<'_>) -> Result<()> {
                Ok(())
            }
        }
        let h = AdapterHost::new(
            Box::new(OddAudio),
            "odd".into(),
            Side::Right,
            20,
            ChaCha20Rng::seed_from_u64(0),
            dummy_crypto(),
        );
        let divergent = h.audioparams_divergence().unwrap();
        assert_eq!(divergent.sr, 16_000);
    }
}
