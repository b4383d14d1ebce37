// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Descriptor heap managers.

Descriptors are handed out as stable integer slot indices; handles are `base + index * stride`.

* [CpuDescriptorHeap] is a free list over a CPU-only heap.  Views cache their descriptors here.
* [GpuDescriptorHeap] is the single shader-visible heap.  Its low end is a ring split into one region
  per frame slot, rewound wholesale when the slot is set up again and allocated with an atomic add.
  Its high end is a persistent region for long-lived tables such as bindless arrays, allocated
  downward from the top.

```text
| frame 0 | frame 1 | ... | frame D-1 |   free   | persistent (grows down) |
0         fc        2fc    (D-1)fc    D*fc                          capacity
```
*/

use crate::error::Error;
use crate::imp::{self, DescriptorContent, HeapKind, RawDescriptorHeap};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct CpuDescriptorHeap {
    raw: RawDescriptorHeap,
    free: Mutex<FreeList>,
}

#[derive(Debug)]
struct FreeList {
    //never-allocated slots start here
    next: u32,
    returned: Vec<u32>,
}

impl CpuDescriptorHeap {
    pub(crate) fn new(device: &imp::Device, kind: HeapKind, capacity: u32) -> Result<Self, Error> {
        Ok(CpuDescriptorHeap {
            raw: device.create_descriptor_heap(kind, capacity, false)?,
            free: Mutex::new(FreeList {
                next: 0,
                returned: Vec::new(),
            }),
        })
    }

    pub fn kind(&self) -> HeapKind {
        self.raw.kind()
    }

    pub fn capacity(&self) -> u32 {
        self.raw.capacity()
    }

    pub(crate) fn raw(&self) -> &RawDescriptorHeap {
        &self.raw
    }

    pub fn cpu_handle(&self, index: u32) -> u64 {
        self.raw.cpu_handle(index)
    }

    pub fn allocate(&self) -> Result<u32, Error> {
        let mut free = self.free.lock();
        if let Some(index) = free.returned.pop() {
            return Ok(index);
        }
        if free.next >= self.raw.capacity() {
            log::error!("{} CPU descriptor heap exhausted", self.kind().name());
            return Err(Error::OutOfDescriptors {
                heap: self.kind().name(),
                capacity: self.raw.capacity(),
            });
        }
        let index = free.next;
        free.next += 1;
        Ok(index)
    }

    pub fn free(&self, index: u32) {
        self.raw.clear(index);
        let mut free = self.free.lock();
        debug_assert!(index < free.next && !free.returned.contains(&index), "double free of descriptor {index}");
        free.returned.push(index);
    }

    /// Slots that can still be allocated.
    pub fn available(&self) -> u32 {
        let free = self.free.lock();
        self.raw.capacity() - free.next + free.returned.len() as u32
    }
}

/// One CPU-only heap per descriptor kind.
#[derive(Debug)]
pub struct CpuHeaps {
    pub cbv_srv_uav: CpuDescriptorHeap,
    pub sampler: CpuDescriptorHeap,
    pub rtv: CpuDescriptorHeap,
    pub dsv: CpuDescriptorHeap,
}

impl CpuHeaps {
    pub(crate) fn new(device: &imp::Device, views: u32, samplers: u32, rtvs: u32, dsvs: u32) -> Result<Self, Error> {
        Ok(CpuHeaps {
            cbv_srv_uav: CpuDescriptorHeap::new(device, HeapKind::CbvSrvUav, views)?,
            sampler: CpuDescriptorHeap::new(device, HeapKind::Sampler, samplers)?,
            rtv: CpuDescriptorHeap::new(device, HeapKind::Rtv, rtvs)?,
            dsv: CpuDescriptorHeap::new(device, HeapKind::Dsv, dsvs)?,
        })
    }

    pub fn for_kind(&self, kind: HeapKind) -> &CpuDescriptorHeap {
        match kind {
            HeapKind::CbvSrvUav => &self.cbv_srv_uav,
            HeapKind::Sampler => &self.sampler,
            HeapKind::Rtv => &self.rtv,
            HeapKind::Dsv => &self.dsv,
        }
    }
}

#[derive(Debug)]
struct PersistentRegion {
    //lowest slot handed out from the top so far
    low: u32,
    returned: Vec<(u32, u32)>,
}

#[derive(Debug)]
pub struct GpuDescriptorHeap {
    raw: RawDescriptorHeap,
    frames: u32,
    frame_capacity: u32,
    cursor: AtomicU32,
    frame_end: AtomicU32,
    persistent: Mutex<PersistentRegion>,
}

impl GpuDescriptorHeap {
    pub(crate) fn new(
        device: &imp::Device,
        frames: u32,
        frame_capacity: u32,
        persistent_capacity: u32,
    ) -> Result<Self, Error> {
        let capacity = frames * frame_capacity + persistent_capacity;
        let raw = device.create_descriptor_heap(HeapKind::CbvSrvUav, capacity, true)?;
        Ok(GpuDescriptorHeap {
            raw,
            frames,
            frame_capacity,
            cursor: AtomicU32::new(0),
            frame_end: AtomicU32::new(frame_capacity),
            persistent: Mutex::new(PersistentRegion {
                low: capacity,
                returned: Vec::new(),
            }),
        })
    }

    pub(crate) fn raw(&self) -> &RawDescriptorHeap {
        &self.raw
    }

    pub fn frame_capacity(&self) -> u32 {
        self.frame_capacity
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn gpu_handle(&self, index: u32) -> u64 {
        //the heap is created shader visible
        self.raw.gpu_handle(index).unwrap_or_default()
    }

    /// The descriptor in slot `index`, as the GPU would see it.
    pub fn read(&self, index: u32) -> Option<DescriptorContent> {
        self.raw.read(index)
    }

    /// Rewinds the ring to the start of `frame`'s region.
    ///
    /// Only call once every use of the region from the previous lap has completed on the GPU.
    pub fn restart_allocator_for_frame(&self, frame: u32) {
        assert!(frame < self.frames, "frame slot {frame} outside a ring of {}", self.frames);
        let start = frame * self.frame_capacity;
        self.frame_end.store(start + self.frame_capacity, Ordering::Release);
        self.cursor.store(start, Ordering::Release);
        log::trace!("descriptor ring rewound to {start} for frame slot {frame}");
    }

    /// Current ring cursor.
    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Allocates `count` contiguous slots in the current frame's region.
    ///
    /// A failed allocation leaves the cursor where it was.
    pub fn allocate_in_frame(&self, count: u32) -> Result<u32, Error> {
        let end = self.frame_end.load(Ordering::Acquire);
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |start| {
                start.checked_add(count).filter(|last| *last <= end)
            })
            .map_err(|start| {
                log::error!(
                    "per-frame descriptor region exhausted allocating {count} at {start} (region ends at {end})"
                );
                Error::OutOfDescriptors {
                    heap: "frame ring",
                    capacity: self.frame_capacity,
                }
            })
    }

    /// Allocates `count` contiguous persistent slots.
    pub fn allocate_persistent(&self, count: u32) -> Result<u32, Error> {
        let mut persistent = self.persistent.lock();
        if let Some(position) = persistent.returned.iter().position(|(_, len)| *len >= count) {
            let (start, len) = persistent.returned[position];
            if len == count {
                persistent.returned.swap_remove(position);
            } else {
                persistent.returned[position] = (start + count, len - count);
            }
            return Ok(start);
        }
        let ring_end = self.frames * self.frame_capacity;
        match persistent.low.checked_sub(count) {
            Some(start) if start >= ring_end => {
                persistent.low = start;
                Ok(start)
            }
            _ => {
                log::error!("persistent descriptor region exhausted allocating {count}");
                Err(Error::OutOfDescriptors {
                    heap: "persistent",
                    capacity: self.raw.capacity() - ring_end,
                })
            }
        }
    }

    pub fn free_persistent(&self, start: u32, count: u32) {
        for index in start..start + count {
            self.raw.clear(index);
        }
        let mut persistent = self.persistent.lock();
        if start == persistent.low {
            persistent.low += count;
        } else {
            persistent.returned.push((start, count));
        }
    }
}
