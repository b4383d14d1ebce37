// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::SyncError;
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State {
    count: usize,
    closed: bool,
}

/// A counting semaphore bounded by a creation-time maximum.
///
/// [Semaphore::wait] blocks until a count is available.  Once [Semaphore::close] is called,
/// waiters still drain any remaining count, then fail with [SyncError::Closed].
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
    available: Condvar,
    max: usize,
}

impl Semaphore {
    pub fn new(initial: usize, max: usize) -> Self {
        assert!(initial <= max, "initial count {initial} exceeds maximum {max}");
        Semaphore {
            state: Mutex::new(State {
                count: initial,
                closed: false,
            }),
            available: Condvar::new(),
            max,
        }
    }

    /// Blocks until a count can be taken, then takes it.
    pub fn wait(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        loop {
            if state.count > 0 {
                state.count -= 1;
                return Ok(());
            }
            if state.closed {
                return Err(SyncError::Closed);
            }
            self.available.wait(&mut state);
        }
    }

    /// Takes a count if one is immediately available.
    pub fn try_wait(&self) -> Result<bool, SyncError> {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            Ok(true)
        } else if state.closed {
            Err(SyncError::Closed)
        } else {
            Ok(false)
        }
    }

    /// Returns `n` counts.
    ///
    /// Releasing past the maximum is a contract violation.
    pub fn release(&self, n: usize) {
        let mut state = self.state.lock();
        debug_assert!(
            state.count + n <= self.max,
            "semaphore released past its maximum {}",
            self.max
        );
        state.count = (state.count + n).min(self.max);
        drop(state);
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Wakes every waiter.  Waiters that find no count fail with [SyncError::Closed].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
