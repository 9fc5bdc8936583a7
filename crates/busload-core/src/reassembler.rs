//! Fragment reassembly.
//!
//! A fragmented message of `N` bytes travels as `N` single-byte samples.
//! [`reassemble`] polls an [`InputHandle`] batch after batch until `N`
//! valid bytes have been collected:
//!
//! | Policy | Slots read per batch |
//! |---|---|
//! | [`DeliveryPolicy::Sequenced`] | every valid slot, in arrival order |
//! | [`DeliveryPolicy::LatestOnly`] | slot 0 only, when valid |
//!
//! `LatestOnly` tolerates dropped fragments by construction, which also means
//! it silently loses bytes; use it only when the freshest fragment is all
//! that matters.
//!
//! The wait for each batch is unbounded.  If the publisher stalls before the
//! message is complete, the call blocks until more samples arrive or the
//! process exits.  Samples that remain in the final batch once the message
//! is complete are discarded with it.

use busload_connector::{InputHandle, WaitTimeout};
use busload_types::{BridgeError, DeliveryPolicy};
use tracing::debug;

/// Upper bound on the buffer reserved up front.  `total_length` comes
/// straight from a script, so it only sizes the buffer when it is small.
const PREALLOC_LIMIT: usize = 4096;

/// Collect exactly `total_length` bytes from the `field` byte field of
/// successive batches of `input`.
///
/// Returns an empty message without waiting when `total_length` is zero.
///
/// # Errors
///
/// Any wait, take or field-read failure aborts the call immediately; the
/// bytes gathered so far are dropped.  Failures are reported as
/// [`BridgeError::Read`].
pub fn reassemble(
    input: &dyn InputHandle,
    field: &str,
    total_length: usize,
    policy: DeliveryPolicy,
) -> Result<Vec<u8>, BridgeError> {
    let mut message = Vec::with_capacity(total_length.min(PREALLOC_LIMIT));
    if total_length == 0 {
        return Ok(message);
    }

    let mut batches = 0usize;
    loop {
        input.wait_for_data(WaitTimeout::Infinite).map_err(as_read)?;
        input.take().map_err(as_read)?;
        batches += 1;

        let slots = match policy {
            DeliveryPolicy::Sequenced => input.sample_count(),
            DeliveryPolicy::LatestOnly => input.sample_count().min(1),
        };

        for index in 0..slots {
            if !input.is_valid(index) {
                continue;
            }
            message.push(input.read_byte_field(index, field).map_err(as_read)?);
            if message.len() == total_length {
                debug!(
                    input = %input.name(),
                    %policy,
                    bytes = total_length,
                    batches,
                    "fragmented message complete"
                );
                return Ok(message);
            }
        }

        debug!(
            input = %input.name(),
            received = message.len(),
            total_length,
            "batch exhausted, waiting for more fragments"
        );
    }
}

fn as_read(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Read(_) => err,
        other => BridgeError::Read(other.to_string()),
    }
}
