//! The logical-clock event loop.
//!
//! `run` drives one complete simulation: artifact setup, key provisioning,
//! adapter lifecycle, the tick loop, and teardown. Within a tick the order
//! is fixed — left timer, right timer, mode-specific I/O (L→R enqueue
//! before R→L), metrics, capture flush — and the kernel never sleeps: all
//! time is the logical `t_ms`.
//!
//! Exit policy: adapter failures terminate the run immediately with exit
//! code 3; scenario-level problems (mode negotiation, bad keys) exit 4; a
//! failed post-run acceptance check exits 2. Artifacts are closed cleanly
//! on every path.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, info};

use serde::Serialize;

use drybox_domain::{
    AdapterConfig, AdapterPtr, Direction, DryBoxError, Mode, ResolvedScenario, Result, Side,
};

use crate::bearer::{Bearer, Enqueue};
use crate::capture::{CaptureEvent, CaptureLayer, CaptureWriter};
use crate::channel::{estimated_snr_db, Channel};
use crate::host::{negotiate, AdapterHost};
use crate::keys::{render_pubkeys, resolve_keypairs};
use crate::metrics::{Layer, MetricsWriter, Row, RowEvent};
use crate::rng::{label, RngTree};
use crate::sar::{Fragmenter, Reassembler, Reassembly};
use crate::vocoder::{Plc, Vocoder, VocoderParams};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// SDUs drained from each adapter per tick.
const TX_BUDGET_PER_TICK: usize = 32;

/// Goodput / progress reporting window in logical milliseconds.
const REPORT_WINDOW_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Execute one scenario with the given adapters, writing artifacts into
/// `out_dir`.
pub fn run(
    scenario: &ResolvedScenario,
    left_adapter: AdapterPtr,
    right_adapter: AdapterPtr,
    out_dir: &Path,
    ui_enabled: bool,
) -> Result<()> {
    // ---
    fs::create_dir_all(out_dir)?;

    // Key provisioning happens before anything observable: pubkeys.txt is
    // part of every run's artifact set, failures included.
    let (left_keys, right_keys) = resolve_keypairs(
        scenario.seed,
        &scenario.left.adapter,
        &scenario.right.adapter,
        scenario.crypto_left.as_ref(),
        scenario.crypto_right.as_ref(),
    )?;
    fs::write(
        out_dir.join("pubkeys.txt"),
        render_pubkeys(
            &left_keys,
            &right_keys,
            &scenario.left.adapter,
            &scenario.right.adapter,
        ),
    )?;
    write_resolved_yaml(scenario, &out_dir.join("scenario.resolved.yaml"))?;

    let mut metrics = MetricsWriter::create(
        &out_dir.join("metrics.csv"),
        &out_dir.join("events.jsonl"),
    )?;
    let mut capture = CaptureWriter::create(&out_dir.join("capture.dbxcap"))?;

    let rng_tree = RngTree::new(scenario.seed);
    let mut left = AdapterHost::new(
        left_adapter,
        scenario.left.adapter.clone(),
        Side::Left,
        scenario.tick_ms,
        rng_tree.adapter(Side::Left),
        left_keys,
    );
    let mut right = AdapterHost::new(
        right_adapter,
        scenario.right.adapter.clone(),
        Side::Right,
        scenario.tick_ms,
        rng_tree.adapter(Side::Right),
        right_keys,
    );

    // Negotiation gates everything else; teardown is not needed yet because
    // no adapter has been started.
    negotiate(scenario.mode, left.caps(), right.caps())?;

    let outcome = drive(
        scenario,
        &rng_tree,
        &mut left,
        &mut right,
        out_dir,
        &mut metrics,
        &mut capture,
        ui_enabled,
    );

    // Teardown runs on success and failure alike.
    left.stop();
    right.stop();
    let event_log: Vec<(u64, String)> = metrics.event_log().to_vec();
    metrics.close()?;
    capture.close()?;
    outcome?;

    // Optional acceptance gate (exit 2).
    if let Some(acc) = &scenario.acceptance {
        let seen = event_log
            .iter()
            .any(|(t, kind)| kind == &acc.require_event && *t <= acc.within_ms);
        if !seen {
            return Err(DryBoxError::Acceptance(format!(
                "event '{}' not observed within {} ms",
                acc.require_event, acc.within_ms
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tick loop
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn drive(
    scenario: &ResolvedScenario,
    rng_tree: &RngTree,
    left: &mut AdapterHost,
    right: &mut AdapterHost,
    out_dir: &Path,
    metrics: &mut MetricsWriter,
    capture: &mut CaptureWriter,
    ui_enabled: bool,
) -> Result<()> {
    // ---
    for host in [&mut *left, &mut *right] {
        let cfg = AdapterConfig {
            side: host.side(),
            mode: scenario.mode,
            tick_ms: scenario.tick_ms,
            seed: scenario.seed,
            sdu_max_bytes: host.caps().sdu_max_bytes,
            out_dir: PathBuf::from(out_dir),
            crypto: Some(host.crypto().clone()),
        };
        host.init(&cfg)?;
    }
    left.start(metrics)?;
    right.start(metrics)?;

    for host in [&*left, &*right] {
        if let Some(p) = host.audioparams_divergence() {
            let side = host.side();
            metrics.write_event(
                0,
                side,
                "audioparams_override",
                &json!({
                    "advertised": {"sr": p.sr, "block": p.block},
                    "using": {"sr": drybox_domain::SAMPLE_RATE, "block": drybox_domain::BLOCK_SAMPLES},
                }),
            );
        }
    }

    match scenario.mode {
        Mode::Byte => drive_byte(scenario, rng_tree, left, right, metrics, capture, ui_enabled),
        Mode::Audio => drive_audio(scenario, rng_tree, left, right, metrics, ui_enabled),
    }
}

// ---------------------------------------------------------------------------
// ByteLink mode
// ---------------------------------------------------------------------------

struct ByteLinkPath {
    direction: Direction,
    bearer: Bearer,
    fragmenter: Option<Fragmenter>,
    reassembler: Reassembler,
    bytes_delivered_window: u64,
}

fn drive_byte(
    scenario: &ResolvedScenario,
    rng_tree: &RngTree,
    left: &mut AdapterHost,
    right: &mut AdapterHost,
    metrics: &mut MetricsWriter,
    capture: &mut CaptureWriter,
    ui_enabled: bool,
) -> Result<()> {
    // ---
    let rtt_est_ms = scenario.bearer.rtt_est_ms();
    let mut paths: Vec<ByteLinkPath> = [Direction::LtoR, Direction::RtoL]
        .into_iter()
        .map(|direction| {
            let src_caps_max = match direction.source() {
                Side::Left => left.caps().sdu_max_bytes,
                Side::Right => right.caps().sdu_max_bytes,
            };
            // SAR engages for a direction only when the bearer MTU cannot
            // carry that source's largest SDU.
            let sar_active = scenario.bearer.mtu_bytes < src_caps_max;
            ByteLinkPath {
                direction,
                bearer: Bearer::new(scenario.bearer.clone(), rng_tree.bearer(direction)),
                fragmenter: sar_active.then(|| Fragmenter::new(scenario.bearer.mtu_bytes)),
                reassembler: Reassembler::new(rtt_est_ms),
                bytes_delivered_window: 0,
            }
        })
        .collect();

    let mut window_start_ms = 0u64;
    let mut t_ms = 0u64;
    while t_ms < scenario.duration_ms {
        // (0) Purge expired reassembly groups before any callback runs.
        for path in &mut paths {
            for frag_id in path.reassembler.purge_expired(t_ms) {
                debug!(t_ms, direction = %path.direction, frag_id, "reassembly group timed out");
                metrics.write_event(
                    t_ms,
                    path.direction.dest(),
                    "sar_timeout",
                    &json!({"frag_id": frag_id}),
                );
            }
        }

        // (1)(2) Timers, left strictly before right.
        left.on_timer(t_ms, metrics)?;
        right.on_timer(t_ms, metrics)?;

        // (3) Enqueue, L→R strictly before R→L.
        for path in &mut paths {
            let src = match path.direction.source() {
                Side::Left => &mut *left,
                Side::Right => &mut *right,
            };
            let sdus = src.poll_link_tx(TX_BUDGET_PER_TICK, t_ms, metrics)?;
            for sdu in sdus {
                let pdus: Vec<Vec<u8>> = match &mut path.fragmenter {
                    Some(frag) => frag.fragment(&sdu)?,
                    None => vec![sdu],
                };
                for pdu in pdus {
                    capture.write(t_ms, path.direction, CaptureLayer::Bearer, CaptureEvent::Tx, &pdu)?;
                    metrics.write_metric(
                        t_ms,
                        path.direction.source(),
                        Layer::Bearer,
                        RowEvent::Tx,
                        &Row {
                            rtt_ms_est: Some(rtt_est_ms as f64),
                            ..Row::default()
                        },
                    )?;
                    if let Enqueue::Dropped = path.bearer.enqueue(pdu.clone(), t_ms) {
                        capture.write(
                            t_ms,
                            path.direction,
                            CaptureLayer::Bearer,
                            CaptureEvent::Drop,
                            &pdu,
                        )?;
                        metrics.write_metric(
                            t_ms,
                            path.direction.source(),
                            Layer::Bearer,
                            RowEvent::Drop,
                            &Row {
                                loss_rate: Some(path.bearer.stats().loss_rate),
                                ..Row::default()
                            },
                        )?;
                    }
                }
            }
        }

        // (4) Delivery, both directions.
        for path in &mut paths {
            let dest = match path.direction.dest() {
                Side::Left => &mut *left,
                Side::Right => &mut *right,
            };
            for pdu in path.bearer.poll_deliver(t_ms) {
                capture.write(
                    t_ms,
                    path.direction,
                    CaptureLayer::Bearer,
                    CaptureEvent::Rx,
                    &pdu.payload,
                )?;
                let latency_ms = (t_ms - pdu.enqueue_t_ms) as f64;

                let sdu = match &mut path.fragmenter {
                    None => Some(pdu.payload),
                    Some(_) => match path.reassembler.push(&pdu.payload, t_ms) {
                        Reassembly::Complete(sdu) => Some(sdu),
                        Reassembly::Pending => None,
                        Reassembly::Inconsistent { frag_id } => {
                            metrics.write_event(
                                t_ms,
                                path.direction.dest(),
                                "sar_inconsistent",
                                &json!({"frag_id": frag_id}),
                            );
                            None
                        }
                        Reassembly::Malformed => None,
                    },
                };

                if let Some(sdu) = sdu {
                    dest.on_link_rx(&sdu, t_ms, metrics)?;
                    let stats = path.bearer.stats();
                    metrics.write_metric(
                        t_ms,
                        path.direction.dest(),
                        Layer::ByteLink,
                        RowEvent::Rx,
                        &Row {
                            latency_ms: Some(latency_ms),
                            jitter_ms: Some(stats.jitter_ms),
                            loss_rate: Some(stats.loss_rate),
                            reorder_rate: Some(stats.reorder_rate),
                            ..Row::default()
                        },
                    )?;
                    path.bytes_delivered_window += sdu.len() as u64;
                }
            }
        }

        // (5) Windowed goodput rows once per logical second.
        if t_ms - window_start_ms >= REPORT_WINDOW_MS {
            let elapsed = (t_ms - window_start_ms).max(1);
            for path in &mut paths {
                let goodput_bps = (path.bytes_delivered_window * 8) as f64 / elapsed as f64 * 1_000.0;
                metrics.write_metric(
                    t_ms,
                    path.direction.dest(),
                    Layer::ByteLink,
                    RowEvent::Tick,
                    &Row {
                        goodput_bps: Some(goodput_bps),
                        ..Row::default()
                    },
                )?;
                path.bytes_delivered_window = 0;
            }
            if ui_enabled {
                let l2r = paths[0].bearer.stats();
                let r2l = paths[1].bearer.stats();
                info!(
                    t_ms,
                    l2r_loss = l2r.loss_rate,
                    l2r_jitter_ms = l2r.jitter_ms,
                    r2l_loss = r2l.loss_rate,
                    r2l_jitter_ms = r2l.jitter_ms,
                    "bytelink",
                );
            }
            window_start_ms = t_ms;
        }

        // (6) Flush capture records buffered during the tick.
        capture.flush()?;

        t_ms += scenario.tick_ms;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AudioBlock mode
// ---------------------------------------------------------------------------

struct AudioPath {
    direction: Direction,
    gain: f64,
    vocoder: Option<Vocoder>,
    plc: Plc,
}

fn drive_audio(
    scenario: &ResolvedScenario,
    rng_tree: &RngTree,
    left: &mut AdapterHost,
    right: &mut AdapterHost,
    metrics: &mut MetricsWriter,
    ui_enabled: bool,
) -> Result<()> {
    // ---
    let mut channel = scenario.channel.as_ref().map(|cfg| {
        Channel::from_config(
            cfg,
            scenario.tick_ms,
            rng_tree.stream(label::AWGN),
            rng_tree.stream(label::FADING),
        )
    });

    let mut paths: Vec<AudioPath> = [Direction::LtoR, Direction::RtoL]
        .into_iter()
        .map(|direction| AudioPath {
            direction,
            gain: match direction.source() {
                Side::Left => scenario.left.gain,
                Side::Right => scenario.right.gain,
            },
            vocoder: scenario
                .vocoder
                .as_ref()
                .map(|cfg| Vocoder::from_config(cfg, rng_tree.vocoder(direction.source()))),
            plc: Plc::new(scenario.tick_ms),
        })
        .collect();

    let rtt_est_ms = scenario.bearer.rtt_est_ms();
    let mut last_report_ms = 0u64;
    let mut t_ms = 0u64;
    while t_ms < scenario.duration_ms {
        // (1)(2) Timers, left strictly before right.
        left.on_timer(t_ms, metrics)?;
        right.on_timer(t_ms, metrics)?;

        // (3) PCM pipeline, L→R strictly before R→L.
        for path in &mut paths {
            let (src, dest) = match path.direction {
                Direction::LtoR => (&mut *left, &mut *right),
                Direction::RtoL => (&mut *right, &mut *left),
            };

            let mut block = src.pull_tx_block(t_ms, metrics)?;
            block.apply_gain(path.gain);
            metrics.write_metric(
                t_ms,
                path.direction.source(),
                Layer::AudioBlock,
                RowEvent::Tx,
                &Row {
                    rtt_ms_est: Some(rtt_est_ms as f64),
                    ..Row::default()
                },
            )?;

            let after_channel = match &mut channel {
                Some(ch) => ch.apply(&block),
                None => block.clone(),
            };
            let snr_db_est = estimated_snr_db(&block, &after_channel);

            let delivered = match &mut path.vocoder {
                Some(vocoder) => {
                    let (coded, lost) = vocoder.encode_decode(&after_channel);
                    if lost {
                        metrics.write_metric(
                            t_ms,
                            path.direction.dest(),
                            Layer::AudioBlock,
                            RowEvent::Drop,
                            &Row {
                                per: Some(1.0),
                                ..Row::default()
                            },
                        )?;
                    }
                    // The lost flag stops here; downstream only ever sees
                    // the concealed block.
                    path.plc.conceal(coded, lost)
                }
                None => after_channel,
            };

            dest.push_rx_block(&delivered, t_ms, metrics)?;
            metrics.write_metric(
                t_ms,
                path.direction.dest(),
                Layer::AudioBlock,
                RowEvent::Rx,
                &Row {
                    latency_ms: Some(0.0),
                    snr_db_est,
                    ..Row::default()
                },
            )?;
        }

        if ui_enabled && t_ms - last_report_ms >= REPORT_WINDOW_MS {
            info!(t_ms, "audioblock cadence steady");
            last_report_ms = t_ms;
        }

        t_ms += scenario.tick_ms;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolved-scenario write-back
// ---------------------------------------------------------------------------

// The executed configuration plus the vocoder mock numerics made explicit.
#[derive(Serialize)]
struct ResolvedDoc<'a> {
    #[serde(flatten)]
    scenario: &'a ResolvedScenario,
    #[serde(skip_serializing_if = "Option::is_none")]
    vocoder_params: Option<VocoderParamsDoc>,
}

#[derive(Serialize)]
struct VocoderParamsDoc {
    bitrate: u32,
    compand_scale: f64,
    dtx_energy_threshold: f64,
    dtx_hangover_frames: u32,
    comfort_noise_sigma: f64,
}

/// Write `scenario.resolved.yaml`: the exact configuration executed.
fn write_resolved_yaml(scenario: &ResolvedScenario, path: &Path) -> Result<()> {
    // ---
    let vocoder_params = scenario.vocoder.as_ref().map(|v| {
        let p = VocoderParams::for_kind(v.kind);
        VocoderParamsDoc {
            bitrate: p.bitrate,
            compand_scale: p.compand_scale,
            dtx_energy_threshold: p.dtx_energy_threshold,
            dtx_hangover_frames: p.dtx_hangover_frames,
            comfort_noise_sigma: p.comfort_noise_sigma,
        }
    });
    let doc = ResolvedDoc {
        scenario,
        vocoder_params,
    };
    let text = serde_yaml::to_string(&doc)
        .map_err(|e| DryBoxError::Scenario(format!("cannot serialize scenario: {e}")))?;
    fs::write(path, text)?;
    Ok(())
}
