//! Built-in in-process adapters for the DryBox test bench.
//!
//! Adapters are resolved by spec string (`name[:Class]`) through
//! [`resolve_adapter`]; the class segment defaults to `Adapter`. The ABI
//! contract itself lives in `drybox-domain` — the kernel accepts any
//! [`drybox_domain::Adapter`] trait object, so this registry is just the
//! loader the CLI happens to use.
//!
//! - [`PingPong`] — ByteLink smoke-test peer: Ed25519-authenticated
//!   three-way handshake, then periodic DATA traffic with occasional bulk
//!   frames sized to exercise SAR.
//! - [`Tone`]     — AudioBlock peer: sine source on the transmit side,
//!   received-power probe on the receive side.

mod pingpong;
mod registry;
mod tone;

pub use pingpong::PingPong;
pub use registry::{resolve_adapter, AVAILABLE_ADAPTERS};
pub use tone::Tone;
