//! Endpoint handle traits.
//!
//! One [`InputHandle`] wraps one named reader on the bus and one
//! [`OutputHandle`] wraps one named writer.  Handles are **not reentrant**:
//! a `take` followed by reads of the taken batch must not interleave with
//! another caller's `take`.  Serialising that access is the job of the
//! access coordinator in `busload-core`, not of the handle.
//!
//! Methods take `&self` so that handles can be shared behind an `Arc`;
//! implementations use interior mutability for the current batch and the
//! staged outgoing sample.

use std::time::Duration;

use busload_types::{BridgeError, EndpointRef};

/// How long [`InputHandle::wait_for_data`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Block until data arrives.  The connector's `-1`.
    Infinite,
    /// Give up after the given duration.
    After(Duration),
}

impl WaitTimeout {
    /// Decode the connector's millisecond convention, where any negative
    /// value means "wait forever".
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            WaitTimeout::Infinite
        } else {
            WaitTimeout::After(Duration::from_millis(ms as u64))
        }
    }
}

/// A named input (reader) on the bus.
pub trait InputHandle: Send + Sync {
    /// Name this handle was resolved from.
    fn name(&self) -> &EndpointRef;

    /// Block until at least one undelivered sample is available.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Read`] when a finite timeout elapses or the
    /// connector reports a failure.
    fn wait_for_data(&self, timeout: WaitTimeout) -> Result<(), BridgeError>;

    /// Replace the current sample batch with every sample delivered since the
    /// previous take.  An empty batch is not an error.
    fn take(&self) -> Result<(), BridgeError>;

    /// Number of slots in the current batch, valid or not.
    fn sample_count(&self) -> usize;

    /// Whether slot `index` of the current batch holds live data.
    /// Out-of-range indices are reported as invalid.
    fn is_valid(&self, index: usize) -> bool;

    /// Read a single-byte field of slot `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Read`] for an out-of-range index, a missing
    /// field, or a connector failure.
    fn read_byte_field(&self, index: usize, field: &str) -> Result<u8, BridgeError>;

    /// JSON encoding of slot `index`.
    fn read_json(&self, index: usize) -> Result<Vec<u8>, BridgeError>;
}

/// A named output (writer) on the bus.
///
/// Field setters stage values on the outgoing sample; [`commit`] publishes
/// the staged sample and clears it.
///
/// [`commit`]: OutputHandle::commit
pub trait OutputHandle: Send + Sync {
    /// Name this handle was resolved from.
    fn name(&self) -> &EndpointRef;

    /// Stage a whole sample from its JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Write`] when the bytes are not a JSON object the
    /// connector can map onto the sample type.
    fn set_json(&self, json: &[u8]) -> Result<(), BridgeError>;

    /// Stage one single-byte field.
    fn set_byte_field(&self, field: &str, value: u8) -> Result<(), BridgeError>;

    /// Publish the staged sample.
    fn commit(&self) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_millis_mean_infinite() {
        assert_eq!(WaitTimeout::from_millis(-1), WaitTimeout::Infinite);
        assert_eq!(WaitTimeout::from_millis(-500), WaitTimeout::Infinite);
    }

    #[test]
    fn non_negative_millis_are_finite() {
        assert_eq!(WaitTimeout::from_millis(0), WaitTimeout::After(Duration::ZERO));
        assert_eq!(
            WaitTimeout::from_millis(250),
            WaitTimeout::After(Duration::from_millis(250))
        );
    }
}
