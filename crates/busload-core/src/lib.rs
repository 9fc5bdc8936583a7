//! `busload-core` – access coordination and message framing.
//!
//! Sits between many concurrent script-driven callers and the few shared,
//! non-reentrant endpoint handles of the bus.
//!
//! # Modules
//!
//! - [`barrier`] – [`CohortBarrier`]: cyclic arrive-and-wait barrier that
//!   releases a fixed-size cohort of callers together.
//! - [`coordinator`] – [`AccessCoordinator`]: one lock per direction
//!   (reader / writer) plus one cohort barrier per direction.
//! - [`reassembler`] – [`reassemble`][reassembler::reassemble]: rebuilds a
//!   fragmented message from single-byte samples under a
//!   [`DeliveryPolicy`][busload_types::DeliveryPolicy].
//! - [`rate_writer`] – [`write_by_rate`][rate_writer::write_by_rate]: emits a
//!   payload one byte per sample with a per-byte pause.
//! - [`context`] – [`BridgeContext`]: the explicit state of one initialised
//!   bridge, passed by reference to every operation.

pub mod barrier;
pub mod context;
pub mod coordinator;
pub mod rate_writer;
pub mod reassembler;

pub use barrier::{CohortBarrier, CohortWait};
pub use context::{BridgeContext, BridgeSettings, DEFAULT_BYTE_FIELD, canonical_json};
pub use coordinator::{AccessCoordinator, CohortSizes};
pub use rate_writer::{Pacer, ThreadPacer, WriteReport};
