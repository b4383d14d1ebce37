// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use parking_lot::{Condvar, Mutex};

/**
Counts outstanding work items and gates on the count reaching zero.

Producers call [CountEvent::increment] once per item handed out; consumers call
[CountEvent::signal] once per completed item.  While the count is above zero the gate is
closed and [CountEvent::wait] blocks.  The gate reopens on the N→0 transition, and since
waiting does not consume anything the event is reusable across flushes.
*/
#[derive(Debug, Default)]
pub struct CountEvent {
    count: Mutex<usize>,
    gate: Condvar,
}

impl CountEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one outstanding item.  The 0→1 transition closes the gate.
    pub fn increment(&self) {
        *self.count.lock() += 1;
    }

    /// Marks one outstanding item complete.  The N→0 transition opens the gate.
    pub fn signal(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "CountEvent signaled more times than incremented");
        *count -= 1;
        if *count == 0 {
            drop(count);
            self.gate.notify_all();
        }
    }

    /// Blocks until no items are outstanding.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        self.gate.wait_while(&mut count, |count| *count > 0);
    }

    pub fn outstanding(&self) -> usize {
        *self.count.lock()
    }
}
