//! Per-tick metrics rows (`metrics.csv`) and adapter events
//! (`events.jsonl`).
//!
//! The CSV header is fixed — column order included — and floats are
//! rendered with six decimals so reruns with identical inputs produce
//! byte-identical artifacts. Cells the kernel did not observe stay empty.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use drybox_domain::{EventSink, Result, Side};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed CSV header. Any change here is an artifact-format change.
pub const CSV_HEADER: &str = "t_ms,side,layer,event,rtt_ms_est,latency_ms,jitter_ms,loss_rate,\
reorder_rate,goodput_bps,snr_db_est,ber,per,cfo_hz_est,lock_ratio,hs_time_ms,rekey_ms,aead_fail_cnt";

// ---------------------------------------------------------------------------
// Layer / RowEvent
// ---------------------------------------------------------------------------

/// Observation layer of a metrics row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    ByteLink,
    Bearer,
    AudioBlock,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::ByteLink => "bytelink",
            Layer::Bearer => "bearer",
            Layer::AudioBlock => "audioblock",
        }
    }
}

/// Event column of a metrics row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEvent {
    Tx,
    Rx,
    Drop,
    Tick,
}

impl RowEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            RowEvent::Tx => "tx",
            RowEvent::Rx => "rx",
            RowEvent::Drop => "drop",
            RowEvent::Tick => "tick",
        }
    }
}

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// Observed cells of one metrics row. Unset fields render as empty cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct Row {
    // ---
    pub rtt_ms_est: Option<f64>,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub loss_rate: Option<f64>,
    pub reorder_rate: Option<f64>,
    pub goodput_bps: Option<f64>,
    pub snr_db_est: Option<f64>,
    pub ber: Option<f64>,
    pub per: Option<f64>,
    pub cfo_hz_est: Option<f64>,
    pub lock_ratio: Option<f64>,
    pub hs_time_ms: Option<f64>,
    pub rekey_ms: Option<f64>,
    pub aead_fail_cnt: Option<u64>,
}

fn fmt_cell(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:.6}"),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// EventRecord
// ---------------------------------------------------------------------------

// Field order is the JSONL field order.
#[derive(Serialize)]
struct EventRecord<'a> {
    t_ms: u64,
    side: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a Value,
}

// ---------------------------------------------------------------------------
// MetricsWriter
// ---------------------------------------------------------------------------

/// Owns `metrics.csv` and `events.jsonl` for one run.
///
/// Also keeps an in-memory `(t_ms, type)` log of emitted events so the
/// post-run acceptance check can scan without re-reading the file.
pub struct MetricsWriter {
    csv: BufWriter<File>,
    events: BufWriter<File>,
    event_log: Vec<(u64, String)>,
}

// ---

impl MetricsWriter {
    // ---
    pub fn create(csv_path: &Path, events_path: &Path) -> Result<Self> {
        // ---
        let mut csv = BufWriter::new(File::create(csv_path)?);
        writeln!(csv, "{CSV_HEADER}")?;
        let events = BufWriter::new(File::create(events_path)?);
        Ok(Self {
            csv,
            events,
            event_log: Vec::new(),
        })
    }

    /// Append one metrics row.
    pub fn write_metric(
        &mut self,
        t_ms: u64,
        side: Side,
        layer: Layer,
        event: RowEvent,
        row: &Row,
    ) -> Result<()> {
        // ---
        let aead = row
            .aead_fail_cnt
            .map(|n| n.to_string())
            .unwrap_or_default();
        writeln!(
            self.csv,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            t_ms,
            side.label(),
            layer.as_str(),
            event.as_str(),
            fmt_cell(row.rtt_ms_est),
            fmt_cell(row.latency_ms),
            fmt_cell(row.jitter_ms),
            fmt_cell(row.loss_rate),
            fmt_cell(row.reorder_rate),
            fmt_cell(row.goodput_bps),
            fmt_cell(row.snr_db_est),
            fmt_cell(row.ber),
            fmt_cell(row.per),
            fmt_cell(row.cfo_hz_est),
            fmt_cell(row.lock_ratio),
            fmt_cell(row.hs_time_ms),
            fmt_cell(row.rekey_ms),
            aead,
        )?;
        Ok(())
    }

    /// Append one event line. Infallible for callers (adapters emit through
    /// the sink trait); I/O failures surface when the writer is closed.
    pub fn write_event(&mut self, t_ms: u64, side: Side, kind: &str, payload: &Value) {
        // ---
        let record = EventRecord {
            t_ms,
            side: side.label(),
            kind,
            payload,
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = writeln!(self.events, "{line}");
        }
        self.event_log.push((t_ms, kind.to_string()));
    }

    /// In-memory `(t_ms, type)` log for the acceptance check.
    pub fn event_log(&self) -> &[(u64, String)] {
        &self.event_log
    }

    /// Flush and close both files.
    pub fn close(mut self) -> Result<()> {
        // ---
        self.csv.flush()?;
        self.events.flush()?;
        Ok(())
    }
}

impl EventSink for MetricsWriter {
    fn emit(&mut self, t_ms: u64, side: Side, kind: &str, payload: Value) {
        self.write_event(t_ms, side, kind, &payload);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
