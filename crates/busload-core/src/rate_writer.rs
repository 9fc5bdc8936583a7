//! Rate-limited fragment writer.
//!
//! Trickles a payload onto the bus one byte per sample, stride by stride,
//! pausing after every byte.  This is the publishing side of the fragment
//! protocol that [`reassemble`][crate::reassembler::reassemble] consumes.
//!
//! The pause is a deliberate throughput throttle: the calling thread sleeps
//! for [`WritePlan::byte_pause`] after each committed byte.

use std::thread;
use std::time::Duration;

use busload_connector::OutputHandle;
use busload_types::{BridgeError, WritePlan};
use tracing::{debug, warn};

/// Source of the per-byte pause.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Outcome of a completed [`write_by_rate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReport {
    pub strides: usize,
    pub bytes_written: usize,
    pub byte_pause: Duration,
}

/// Write every byte of `plan` to the `field` byte field of `output`, one
/// committed sample per byte.
///
/// # Errors
///
/// The first setter or commit failure aborts the call with
/// [`BridgeError::Write`].  Bytes already committed stay on the bus; there is
/// no retry.
pub fn write_by_rate(
    output: &dyn OutputHandle,
    field: &str,
    plan: &WritePlan,
    pacer: &dyn Pacer,
) -> Result<WriteReport, BridgeError> {
    let byte_pause = plan.byte_pause();
    if byte_pause.is_zero() && plan.rate() > 0 {
        warn!(
            rate = plan.rate(),
            chunk_size = plan.chunk_size(),
            "chunk size exceeds rate; per-byte pause truncates to zero"
        );
    }

    let mut report = WriteReport {
        byte_pause,
        ..WriteReport::default()
    };

    for stride in plan.strides() {
        for &byte in stride {
            output.set_byte_field(field, byte).map_err(as_write)?;
            output.commit().map_err(as_write)?;
            report.bytes_written += 1;
            pacer.pause(byte_pause);
        }
        report.strides += 1;
        debug!(
            output = %output.name(),
            stride = report.strides,
            written = report.bytes_written,
            total = plan.payload().len(),
            "stride written"
        );
    }

    Ok(report)
}

fn as_write(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Write(_) => err,
        other => BridgeError::Write(other.to_string()),
    }
}
