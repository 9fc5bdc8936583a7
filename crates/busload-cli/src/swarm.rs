//! Wave runner – drives the script module the way a load script would.
//!
//! One wave is `vus` writer threads, each trickling one fixed-length JSON
//! payload through `writeByRate`, plus a single reader thread that
//! reassembles the whole wave's byte stream with `readFragmented`.  All
//! payloads of a plan share one length, so the reassembled stream splits
//! back into `vus` payloads when nothing was lost.
//!
//! The reader runs on a detached thread: `readFragmented` waits without a
//! bound, so the wave gives up on it after [`RunPlan::reader_timeout`].

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use busload_module::{ScriptModule, WRITE_BY_RATE_OK};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::RunPlan;

/// Min / average / max over a set of call latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

impl LatencySummary {
    /// `None` for an empty sample set.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        let min = samples.iter().min().copied()?;
        let max = samples.iter().max().copied()?;
        let total: Duration = samples.iter().sum();
        let avg = total / u32::try_from(samples.len()).unwrap_or(u32::MAX);
        Some(Self { min, avg, max })
    }
}

/// What happened to the wave's reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderOutcome {
    /// `readFragmented` returned; `intact` payloads of this wave were found.
    Completed { latency: Duration, intact: usize },
    /// `readFragmented` returned a failure string.
    Failed { latency: Duration, message: String },
    /// Still blocked when the timeout expired.  The reader keeps the reader
    /// lock, so no further wave can read.
    Stalled,
}

/// Result of one wave.
#[derive(Debug, Clone)]
pub struct WaveReport {
    pub wave: usize,
    pub writer_latencies: Vec<Duration>,
    pub writer_failures: Vec<String>,
    pub reader: ReaderOutcome,
}

impl WaveReport {
    pub fn writers(&self) -> Option<LatencySummary> {
        LatencySummary::from_samples(&self.writer_latencies)
    }

    pub fn is_clean(&self, vus: usize) -> bool {
        self.writer_failures.is_empty()
            && matches!(self.reader, ReaderOutcome::Completed { intact, .. } if intact == vus)
    }
}

/// Fixed-length JSON payload for virtual user `vu` in `wave`, padded up to
/// `target_bytes` when that is larger than the bare record.
///
/// The text is already canonical (compact, keys sorted), so its length is
/// exactly what `writeByRate` puts on the bus.
pub fn payload_for(wave: usize, vu: usize, target_bytes: usize) -> String {
    let record = |pad: String| {
        json!({
            "pad": pad,
            "vu": format!("{vu:06}"),
            "wave": format!("{wave:06}"),
        })
        .to_string()
    };
    let bare = record(String::new()).len();
    record("x".repeat(target_bytes.saturating_sub(bare)))
}

/// Length every [`payload_for`] record has for a `target_bytes` plan: the
/// target, or the bare record when the target is smaller.
pub fn payload_len(target_bytes: usize) -> usize {
    target_bytes.max(payload_for(0, 0, 0).len())
}

/// Count the payloads of `wave` in a reassembled stream of
/// `payload_len`-byte records.
pub fn count_intact(stream: &str, payload_len: usize, wave: usize) -> usize {
    if payload_len == 0 {
        return 0;
    }
    let expected = format!("{wave:06}");
    stream
        .as_bytes()
        .chunks(payload_len)
        .filter(|chunk| chunk.len() == payload_len)
        .filter_map(|chunk| serde_json::from_slice::<Value>(chunk).ok())
        .filter(|record| record.get("wave").and_then(Value::as_str) == Some(expected.as_str()))
        .count()
}

/// Run one wave against an initialised module.
///
/// The plan must have passed [`RunPlan::validate`].
pub fn run_wave(module: &Arc<ScriptModule>, plan: &RunPlan, wave: usize) -> WaveReport {
    let payload_len = payload_len(plan.payload_bytes);
    let Some(total) = plan.wave_stream_len() else {
        warn!(wave, vus = plan.vus, payload_len, "wave byte stream overflows; skipping wave");
        return WaveReport {
            wave,
            writer_latencies: Vec::new(),
            writer_failures: vec!["wave byte stream too large".to_string()],
            reader: ReaderOutcome::Failed {
                latency: Duration::ZERO,
                message: "wave byte stream too large".to_string(),
            },
        };
    };

    let (tx, rx) = mpsc::channel();
    let reader = Arc::clone(module);
    let policy = plan.policy;
    thread::spawn(move || {
        let started = Instant::now();
        let text = reader.read_fragmented(total, policy);
        let _ = tx.send((text, started.elapsed()));
    });

    let rate = i64::try_from(plan.rate).unwrap_or(i64::MAX);
    let chunk_size = i64::try_from(plan.chunk_size).unwrap_or(i64::MAX);
    let results: Vec<(String, Duration)> = thread::scope(|s| {
        let handles: Vec<_> = (0..plan.vus)
            .map(|vu| {
                let payload = payload_for(wave, vu, plan.payload_bytes);
                s.spawn(move || {
                    let started = Instant::now();
                    let result = module.write_by_rate(&payload, rate, chunk_size);
                    (result, started.elapsed())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| ("writer thread panicked".to_string(), Duration::ZERO))
            })
            .collect()
    });

    let mut writer_latencies = Vec::with_capacity(results.len());
    let mut writer_failures = Vec::new();
    for (result, latency) in results {
        if result == WRITE_BY_RATE_OK {
            writer_latencies.push(latency);
        } else {
            writer_failures.push(result);
        }
    }
    debug!(wave, written = writer_latencies.len(), "writers done");

    let reader = match rx.recv_timeout(plan.reader_timeout()) {
        Ok((text, latency)) if i64::try_from(text.len()) == Ok(total) => ReaderOutcome::Completed {
            latency,
            intact: count_intact(&text, payload_len, wave),
        },
        Ok((message, latency)) => ReaderOutcome::Failed { latency, message },
        Err(_) => {
            warn!(wave, timeout_secs = plan.reader_timeout_secs, "wave reader stalled");
            ReaderOutcome::Stalled
        }
    };

    info!(
        wave,
        writer_failures = writer_failures.len(),
        reader = ?reader,
        "wave finished"
    );
    WaveReport {
        wave,
        writer_latencies,
        writer_failures,
        reader,
    }
}
