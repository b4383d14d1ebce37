// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-engine command list and queue wrapper.
//!
//! Each engine owns one fenced queue, one reusable command list per scheduler thread, and one
//! command allocator per frame slot and thread.  Thread wrappers sit behind uncontended mutexes:
//! a thread slot is only ever recorded by the thread pinned to it.

use crate::error::Error;
use crate::imp::{self, CommandAllocator, CommandList, DescriptorContent, FenceEvent, Queue, RawDescriptorHeap, RecordedCommands};
use crate::multibuffer::Multibuffer;
use parking_lot::{Mutex, MutexGuard};

/// One of the independent GPU submission paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineKind {
    Graphics,
    Compute,
    Copy,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Graphics, EngineKind::Compute, EngineKind::Copy];

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Graphics => "graphics",
            EngineKind::Compute => "compute",
            EngineKind::Copy => "copy",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn mask(self) -> EngineMask {
        match self {
            EngineKind::Graphics => EngineMask::GRAPHICS,
            EngineKind::Compute => EngineMask::COMPUTE,
            EngineKind::Copy => EngineMask::COPY,
        }
    }
}

bitflags::bitflags! {
    /// A selection of engines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EngineMask: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const COPY = 1 << 2;
    }
}

impl EngineMask {
    pub fn engines(self) -> impl Iterator<Item = EngineKind> {
        EngineKind::ALL.into_iter().filter(move |kind| self.contains(kind.mask()))
    }
}

/// One thread's command list on one engine.
#[derive(Debug)]
pub(crate) struct ThreadList {
    pub(crate) list: CommandList,
    active: bool,
    //shader-visible slots and the descriptors captured for them, written at flush
    pending_copies: Vec<(u32, DescriptorContent)>,
}

impl ThreadList {
    /// Starts recording against `allocator`, once per frame.  Idempotent while active.
    pub(crate) fn activate(&mut self, allocator: &CommandAllocator) -> Result<(), Error> {
        if !self.active {
            self.list.reset(allocator)?;
            self.active = true;
        }
        Ok(())
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    /// Queues `content` for `gpu_slot`.  The content is captured now, so the view it came from
    /// may drop before the flush.
    pub(crate) fn queue_descriptor_copy(&mut self, gpu_slot: u32, content: DescriptorContent) {
        self.pending_copies.push((gpu_slot, content));
    }
}

#[derive(Debug)]
pub(crate) struct Engine {
    kind: EngineKind,
    queue: Queue,
    threads: Vec<Mutex<ThreadList>>,
    allocators: Multibuffer<Vec<CommandAllocator>>,
}

impl Engine {
    pub(crate) fn new(device: &imp::Device, kind: EngineKind, threads: usize, frames: usize) -> Result<Self, Error> {
        let queue = device.create_queue(kind)?;
        let lists = (0..threads)
            .map(|thread| {
                Ok(Mutex::new(ThreadList {
                    list: device.create_command_list(kind, thread)?,
                    active: false,
                    pending_copies: Vec::new(),
                }))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let allocators = Multibuffer::try_new(frames, |_| {
            (0..threads)
                .map(|_| device.create_command_allocator(kind))
                .collect::<Result<Vec<_>, Error>>()
        })?;
        Ok(Engine {
            kind,
            queue,
            threads: lists,
            allocators,
        })
    }

    pub(crate) fn kind(&self) -> EngineKind {
        self.kind
    }

    pub(crate) fn thread(&self, thread: usize) -> MutexGuard<'_, ThreadList> {
        self.threads[thread].lock()
    }

    pub(crate) fn allocator(&self, frame: usize, thread: usize) -> &CommandAllocator {
        &self.allocators.slot(frame)[thread]
    }

    /// Resets every allocator of a frame slot.  The slot's previous work must have completed.
    pub(crate) fn reset_allocators(&self, frame: usize) -> Result<(), Error> {
        for allocator in self.allocators.slot(frame) {
            allocator.reset()?;
        }
        Ok(())
    }

    /// Closes every active list and writes pending descriptor copies into the shader-visible heap.
    pub(crate) fn close_all(&self, gpu_heap: &RawDescriptorHeap) -> Result<Vec<RecordedCommands>, Error> {
        let mut closed = Vec::new();
        for thread in &self.threads {
            let mut thread = thread.lock();
            if !thread.pending_copies.is_empty() {
                gpu_heap.write_batch(&thread.pending_copies)?;
                thread.pending_copies.clear();
            }
            if thread.active {
                thread.active = false;
                thread.list.close()?;
                if let Some(recorded) = thread.list.take_recorded() {
                    closed.push(recorded);
                }
            }
        }
        Ok(closed)
    }

    /// Drops whatever is recorded without submitting it.
    pub(crate) fn discard_all(&self) {
        for thread in &self.threads {
            let mut thread = thread.lock();
            thread.pending_copies.clear();
            if thread.active {
                thread.active = false;
                //the list may be mid-recording after a failed process
                if thread.list.close().is_ok() {
                    thread.list.take_recorded();
                }
            }
        }
    }

    pub(crate) fn commit(&self, lists: Vec<RecordedCommands>) -> Result<(), Error> {
        log::trace!("{} engine committing {} lists", self.kind.name(), lists.len());
        self.queue.execute(lists)
    }

    pub(crate) fn signal(&self) -> Result<u64, Error> {
        self.queue.signal()
    }

    pub(crate) fn trigger_event(&self, value: u64) -> FenceEvent {
        self.queue.trigger_event(value)
    }

    pub(crate) fn completed_value(&self) -> u64 {
        self.queue.completed_value()
    }
}
