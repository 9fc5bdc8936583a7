//! [`AccessCoordinator`] – per-direction mutual exclusion plus cohort
//! rendezvous.
//!
//! Endpoint handles are not reentrant, so every call that touches the bus
//! runs inside [`AccessCoordinator::with_reader_access`] or
//! [`AccessCoordinator::with_writer_access`].  Each entry point:
//!
//! 1. acquires the lock of its direction,
//! 2. runs the closure,
//! 3. releases the lock on every exit path, including an `Err` result,
//! 4. arrives at the direction's [`CohortBarrier`] and blocks until the
//!    whole cohort has arrived.
//!
//! The two directions never share a lock, so a reader and a writer can be
//! inside their critical sections at the same time, and no call path ever
//! holds both locks.

use busload_types::Direction;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::barrier::CohortBarrier;

/// Number of callers per cohort, per direction.  `0` or `1` disables the
/// rendezvous for that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CohortSizes {
    pub writer: usize,
    pub reader: usize,
}

impl CohortSizes {
    pub fn new(writer: usize, reader: usize) -> Self {
        Self { writer, reader }
    }

    /// No rendezvous in either direction.
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Owns the two direction locks and the two cohort barriers.
pub struct AccessCoordinator {
    reader_lock: Mutex<()>,
    writer_lock: Mutex<()>,
    reader_cohort: CohortBarrier,
    writer_cohort: CohortBarrier,
}

impl AccessCoordinator {
    pub fn new(sizes: CohortSizes) -> Self {
        Self {
            reader_lock: Mutex::new(()),
            writer_lock: Mutex::new(()),
            reader_cohort: CohortBarrier::new(sizes.reader),
            writer_cohort: CohortBarrier::new(sizes.writer),
        }
    }

    pub fn with_reader_access<T>(&self, f: impl FnOnce() -> T) -> T {
        self.with_access(Direction::Reader, f)
    }

    pub fn with_writer_access<T>(&self, f: impl FnOnce() -> T) -> T {
        self.with_access(Direction::Writer, f)
    }

    /// Barrier of the given direction, for inspection.
    pub fn cohort(&self, direction: Direction) -> &CohortBarrier {
        match direction {
            Direction::Reader => &self.reader_cohort,
            Direction::Writer => &self.writer_cohort,
        }
    }

    fn lock(&self, direction: Direction) -> &Mutex<()> {
        match direction {
            Direction::Reader => &self.reader_lock,
            Direction::Writer => &self.writer_lock,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, f))]
    fn with_access<T>(&self, direction: Direction, f: impl FnOnce() -> T) -> T {
        let outcome = {
            let _guard = self.lock(direction).lock();
            f()
        };

        let cohort = self.cohort(direction);
        let wait = cohort.wait();
        if cohort.is_enabled() {
            if wait.is_leader {
                info!(
                    %direction,
                    generation = wait.generation,
                    parties = cohort.parties(),
                    "cohort released"
                );
            } else {
                debug!(%direction, generation = wait.generation, "left cohort");
            }
        }
        outcome
    }
}
