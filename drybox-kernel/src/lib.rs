//! Deterministic simulation kernel for the DryBox test bench.
//!
//! DryBox couples two opaque peer adapters (left and right) through a
//! simulated transport and drives them on a logical clock — no wall-clock
//! pacing, no sockets, no threads. Re-running a scenario with the same seed
//! and configuration produces byte-identical artifacts.
//!
//! # Structure
//!
//! - [`rng`]     — master-seed fan-out into per-subsystem RNG streams
//! - [`keys`]    — HKDF key derivation, explicit-key parsing, `pubkeys.txt`
//! - [`sar`]     — segmentation/reassembly for SDUs above the bearer MTU
//! - [`bearer`]  — stochastic delivery: latency, jitter, loss, reordering
//! - [`channel`] — AWGN and Jakes/Rayleigh channel models
//! - [`vocoder`] — codec mocks, VAD/DTX, and packet-loss concealment
//! - [`metrics`] — `metrics.csv` and `events.jsonl` writers
//! - [`capture`] — binary `capture.dbxcap` writer
//! - [`host`]    — adapter negotiation and lifecycle
//! - [`runner`]  — the tick loop gluing all of the above

pub mod bearer;
pub mod capture;
pub mod channel;
pub mod host;
pub mod keys;
pub mod metrics;
pub mod rng;
pub mod runner;
pub mod sar;
pub mod vocoder;

// --- the one-call surface most users need
pub use runner::run;
