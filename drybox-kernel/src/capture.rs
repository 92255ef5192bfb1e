//! Binary capture file (`capture.dbxcap`): a replayable byte-level dump of
//! ByteLink and bearer traffic.
//!
//! ## File layout
//!
//! ```text
//! offset
//!    0  [0x44 0x42 0x58 0x43] magic "DBXC"
//!    4  [0x01] version
//! ------
//!    records:
//!      t_ms  (u64, little-endian)
//!      side  (u8)  0 = L→R, 1 = R→L
//!      layer (u8)  0 = bytelink, 1 = bearer
//!      event (u8)  0 = tx, 1 = rx, 2 = drop
//!      len   (u32, little-endian)
//!      data  (len bytes)
//! ```
//!
//! Records are appended (a) after SAR on the sender (pre-bearer), (b) on
//! bearer delivery (post-bearer), and (c) on drop. Buffered records are
//! flushed at the end of every tick.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use drybox_domain::{Direction, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File magic.
pub const MAGIC: &[u8; 4] = b"DBXC";

/// Capture format version.
pub const VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// CaptureLayer / CaptureEvent
// ---------------------------------------------------------------------------

/// Layer byte of a capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureLayer {
    ByteLink = 0,
    Bearer = 1,
}

/// Event byte of a capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Tx = 0,
    Rx = 1,
    Drop = 2,
}

// ---------------------------------------------------------------------------
// CaptureWriter
// ---------------------------------------------------------------------------

/// Owns `capture.dbxcap` for one run.
pub struct CaptureWriter {
    out: BufWriter<File>,
}

// ---

impl CaptureWriter {
    // ---
    pub fn create(path: &Path) -> Result<Self> {
        // ---
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        out.write_all(&[VERSION])?;
        Ok(Self { out })
    }

    /// Append one record.
    pub fn write(
        &mut self,
        t_ms: u64,
        direction: Direction,
        layer: CaptureLayer,
        event: CaptureEvent,
        data: &[u8],
    ) -> Result<()> {
        // ---
        self.out.write_all(&t_ms.to_le_bytes())?;
        self.out.write_all(&[direction.wire_byte(), layer as u8, event as u8])?;
        self.out.write_all(&(data.len() as u32).to_le_bytes())?;
        self.out.write_all(data)?;
        Ok(())
    }

    /// Flush buffered records (called at the end of every tick).
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Flush and close the file.
    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
