// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{Semaphore, SyncError};
use parking_lot::Mutex;

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
    closed: bool,
}

/**
A fixed-capacity producer/consumer ring.

One mutex guards the ring pointers; two semaphores count the items available to consumers
and the slots available to producers.  A full queue applies backpressure: producers block
in [BoundedQueue::try_produce] until a consumer frees a slot.
*/
#[derive(Debug)]
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    items: Semaphore,
    free_slots: Semaphore,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue needs at least one slot");
        BoundedQueue {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                closed: false,
            }),
            items: Semaphore::new(0, capacity),
            free_slots: Semaphore::new(capacity, capacity),
            capacity,
        }
    }

    /// Blocks until a slot is free, then enqueues `item`.
    ///
    /// Fails with [SyncError::Closed] once the queue is closed; the item is dropped.
    pub fn try_produce(&self, item: T) -> Result<(), SyncError> {
        self.free_slots.wait()?;
        let mut ring = self.ring.lock();
        if ring.closed {
            drop(ring);
            self.free_slots.release(1);
            return Err(SyncError::Closed);
        }
        let tail = (ring.head + ring.len) % self.capacity;
        debug_assert!(ring.slots[tail].is_none());
        ring.slots[tail] = Some(item);
        ring.len += 1;
        drop(ring);
        self.items.release(1);
        Ok(())
    }

    /// Blocks until an item is available, then dequeues it.
    ///
    /// After [BoundedQueue::close], remaining items are still handed out; once the ring is
    /// empty consumers fail with [SyncError::Closed].
    pub fn try_consume(&self) -> Result<T, SyncError> {
        self.items.wait()?;
        let mut ring = self.ring.lock();
        let head = ring.head;
        let Some(item) = ring.slots[head].take() else {
            return Err(SyncError::Closed);
        };
        ring.head = (head + 1) % self.capacity;
        ring.len -= 1;
        drop(ring);
        self.free_slots.release(1);
        Ok(item)
    }

    /// Wakes all blocked producers and consumers.
    pub fn close(&self) {
        self.ring.lock().closed = true;
        self.items.close();
        self.free_slots.close();
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_wraps_around() {
        let q = BoundedQueue::new(2);
        for i in 0..5 {
            q.try_produce(i).unwrap();
            assert_eq!(q.try_consume().unwrap(), i);
        }
        q.try_produce(10).unwrap();
        q.try_produce(11).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_consume().unwrap(), 10);
        assert_eq!(q.try_consume().unwrap(), 11);
        assert!(q.is_empty());
    }

    #[test]
    fn closed_queue_rejects_producers() {
        let q = BoundedQueue::new(1);
        q.close();
        assert_eq!(q.try_produce(1), Err(SyncError::Closed));
        assert!(q.is_empty());
    }
}
