// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Multibuffering implementation.

Frame-buffered state keeps one copy per in-flight frame slot.  Frame `n` uses slot `n % D`,
so a slot is reused exactly one ring lap (D frames) after it was last used.
*/

#[derive(Debug)]
pub(crate) struct Multibuffer<T> {
    slots: Vec<T>,
}

impl<T> Multibuffer<T> {
    pub(crate) fn new(count: usize, mut make: impl FnMut(usize) -> T) -> Self {
        assert!(count > 0, "a multibuffer needs at least one slot");
        Multibuffer {
            slots: (0..count).map(&mut make).collect(),
        }
    }

    pub(crate) fn try_new<E>(count: usize, make: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        assert!(count > 0, "a multibuffer needs at least one slot");
        Ok(Multibuffer {
            slots: (0..count).map(make).collect::<Result<_, E>>()?,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// The slot used by frame `frame`.
    pub(crate) fn slot(&self, frame: usize) -> &T {
        &self.slots[frame % self.slots.len()]
    }

    pub(crate) fn slot_mut(&mut self, frame: usize) -> &mut T {
        let len = self.slots.len();
        &mut self.slots[frame % len]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}
