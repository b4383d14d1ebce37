// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Thread coordination building blocks for the scheduler.

* [Semaphore] - a counting semaphore with a fixed maximum
* [CountEvent] - an "outstanding work" counter whose gate opens when the count drains to zero
* [BoundedQueue] - a fixed-capacity producer/consumer ring

All three are built on `parking_lot` mutexes and condition variables.
*/

mod bounded_queue;
mod count_event;
mod semaphore;

pub use bounded_queue::BoundedQueue;
pub use count_event::CountEvent;
pub use semaphore::Semaphore;

/// Failure of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The primitive was closed while (or before) waiting.
    #[error("closed")]
    Closed,
}
