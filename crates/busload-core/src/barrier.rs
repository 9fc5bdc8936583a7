//! [`CohortBarrier`] – cyclic rendezvous for a fixed number of callers.
//!
//! A cohort of `parties` callers arrives one by one; every caller blocks in
//! [`CohortBarrier::wait`] until the last one arrives, then all of them are
//! released together and the barrier resets for the next generation.
//!
//! A barrier built with `parties <= 1` is disabled: `wait` returns at once.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use busload_core::CohortBarrier;
//!
//! let barrier = Arc::new(CohortBarrier::new(3));
//! let handles: Vec<_> = (0..3)
//!     .map(|_| {
//!         let b = Arc::clone(&barrier);
//!         thread::spawn(move || b.wait())
//!     })
//!     .collect();
//!
//! let leaders = handles
//!     .into_iter()
//!     .map(|h| h.join().unwrap())
//!     .filter(|w| w.is_leader)
//!     .count();
//! assert_eq!(leaders, 1);
//! assert_eq!(barrier.generation(), 1);
//! ```

use parking_lot::{Condvar, Mutex};

/// What a caller learns when it leaves [`CohortBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortWait {
    /// Generation (epoch) this caller belonged to.
    pub generation: u64,
    /// `true` for exactly one caller per generation: the one whose arrival
    /// completed the cohort.
    pub is_leader: bool,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Reusable arrive-and-wait barrier for `parties` callers.
pub struct CohortBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl CohortBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Configured cohort size.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// `false` when the cohort size is 0 or 1 and waits never block.
    pub fn is_enabled(&self) -> bool {
        self.parties > 1
    }

    /// Number of completed generations.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Callers currently blocked in the open generation.
    pub fn waiting(&self) -> usize {
        self.state.lock().arrived
    }

    /// Arrive and block until the whole cohort has arrived.
    ///
    /// Blocks forever if fewer than `parties` callers ever arrive.
    pub fn wait(&self) -> CohortWait {
        let mut state = self.state.lock();
        let generation = state.generation;

        if !self.is_enabled() {
            state.generation += 1;
            return CohortWait {
                generation,
                is_leader: true,
            };
        }

        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return CohortWait {
                generation,
                is_leader: true,
            };
        }

        // Spurious wakeups are filtered by the generation change.
        while state.generation == generation {
            self.released.wait(&mut state);
        }
        CohortWait {
            generation,
            is_leader: false,
        }
    }
}
