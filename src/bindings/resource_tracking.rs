// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Resource state tracking for barrier insertion
//!
//! Every resource remembers the GPU usage state it was last transitioned to.  When a command
//! context needs a resource in some state, the tracker decides which barrier (if any) must be
//! recorded and atomically moves the tracked state forward.
//!
//! # Rules
//!
//! - A transition is recorded only when the target differs from the tracked state.
//! - A read-only target already contained in a read-only tracked state is skipped, so a
//!   resource in `GENERIC_READ` satisfies a request for `PIXEL_SHADER_RESOURCE` without a barrier.
//! - Requesting `UNORDERED_ACCESS` on a resource already in `UNORDERED_ACCESS` records a UAV
//!   barrier instead, ordering successive unordered writes.
//! - Resources living in upload memory are pinned to `GENERIC_READ`, and resources in readback
//!   memory are pinned to `COPY_DEST`.  Transitions on pinned resources are skipped.
//!
//! # Concurrency
//!
//! The tracked state is stored atomically, so racing requests cannot tear it.  Two threads
//! using the same resource within one flush window is still a logical race: whichever list
//! executes first observes a state the other list assumed.  Callers assign disjoint resources
//! to worker threads or keep such resources on thread 0.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// GPU usage state of a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 9;
        const COPY_DEST = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const PRESENT = 1 << 12;
        const RAYTRACING_ACCELERATION_STRUCTURE = 1 << 22;

        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

const READ_ONLY: ResourceState = ResourceState::GENERIC_READ
    .union(ResourceState::DEPTH_READ)
    .union(ResourceState::RAYTRACING_ACCELERATION_STRUCTURE);

impl ResourceState {
    /// Whether every bit of this state is a read-only usage.
    pub fn is_read_only(self) -> bool {
        !self.is_empty() && READ_ONLY.contains(self)
    }
}

/// The barrier a state request requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    None,
    Transition {
        before: ResourceState,
        after: ResourceState,
    },
    UnorderedAccess,
}

/// Decides the barrier for moving from `current` to `target`.
pub fn barrier_for(current: ResourceState, target: ResourceState) -> Barrier {
    if current == target {
        if target == ResourceState::UNORDERED_ACCESS {
            Barrier::UnorderedAccess
        } else {
            Barrier::None
        }
    } else if target.is_read_only() && current.is_read_only() && current.contains(target) {
        Barrier::None
    } else {
        Barrier::Transition {
            before: current,
            after: target,
        }
    }
}

/// Atomic tracked state of one resource.
pub(crate) struct StateTracker {
    state: AtomicU32,
    pinned: bool,
}

impl Debug for StateTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker")
            .field("state", &self.current())
            .field("pinned", &self.pinned)
            .finish()
    }
}

impl StateTracker {
    pub(crate) fn new(initial: ResourceState) -> Self {
        StateTracker {
            state: AtomicU32::new(initial.bits()),
            pinned: false,
        }
    }

    /// A tracker whose state never changes.
    pub(crate) fn pinned(state: ResourceState) -> Self {
        StateTracker {
            state: AtomicU32::new(state.bits()),
            pinned: true,
        }
    }

    pub(crate) fn current(&self) -> ResourceState {
        ResourceState::from_bits_retain(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Moves the tracked state to `target`, returning the barrier to record.
    pub(crate) fn request(&self, target: ResourceState) -> Barrier {
        if self.pinned {
            return Barrier::None;
        }
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let barrier = barrier_for(ResourceState::from_bits_retain(current), target);
            if !matches!(barrier, Barrier::Transition { .. }) {
                return barrier;
            }
            match self.state.compare_exchange_weak(
                current,
                target.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return barrier,
                Err(actual) => current = actual,
            }
        }
    }
}
