// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
An in-process device implementing the explicit-GPU-API contract the engine is written against.

Each engine gets a hardware queue executed by its own thread, with a fence that advances as
signals retire.  Allocations own real bytes, so copies recorded into command lists are
observable after the fence passes.  The device can record an event log (list closes,
batch submissions, fence completions, presents) stamped from one global counter, which is how
ordering guarantees are checked.
*/

mod command;
mod command_list;
mod descriptor_heap;
mod memory;
mod queue;

pub use command::{
    AccelerationStructureBuild, BuildFlags, BuildInputs, Command, CopyRegion, GeometryInputs,
    RecordedCommands, ShaderTableRange,
};
pub(crate) use command::built_header;
pub use command_list::{CommandAllocator, CommandList, ListState};
pub use descriptor_heap::{DescriptorContent, HeapKind, RawDescriptorHeap};
pub use memory::{Allocation, MemoryHeap};
pub use queue::{FenceEvent, Queue};

use crate::error::{DeviceRemovedReason, Error};
use crate::images::engine::EngineKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Size of a shader identifier in a shader record.
pub const SHADER_IDENTIFIER_SIZE: usize = 32;
/// Size of one descriptor on this device.
pub const DESCRIPTOR_STRIDE: u64 = 32;

#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub label: String,
    /// Total bytes of allocations the device will hand out.
    pub memory_budget: u64,
    /// Simulated execution time of each submitted batch.
    pub execution_delay: Duration,
    /// Whether to keep the [QueueEvent] log.
    pub record_events: bool,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        DeviceDescriptor {
            label: "software device".to_string(),
            memory_budget: 1 << 30,
            execution_delay: Duration::ZERO,
            record_events: false,
        }
    }
}

/// Instrumentation record of device activity.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Closed {
        engine: EngineKind,
        thread: usize,
        stamp: u64,
    },
    Submitted {
        engine: EngineKind,
        stamp: u64,
        lists: Vec<Arc<RecordedCommands>>,
    },
    Completed {
        engine: EngineKind,
        fence: u64,
        stamp: u64,
    },
    Presented {
        back_buffer: u64,
        stamp: u64,
    },
}

/// Sizes a build needs, as reported before building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
    pub update_scratch_size: u64,
}

#[derive(Debug)]
pub(crate) struct DeviceShared {
    descriptor: DeviceDescriptor,
    pub(crate) allocated: AtomicU64,
    next_id: AtomicU64,
    next_address: AtomicU64,
    stamp: AtomicU64,
    removed: Mutex<Option<DeviceRemovedReason>>,
    events: Mutex<Vec<QueueEvent>>,
}

#[derive(Debug, Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

fn align_address(value: u64) -> u64 {
    crate::bittricks::align_up(value, 65536)
}

impl Device {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        log::info!(
            "Creating {} with a {} byte budget",
            descriptor.label,
            descriptor.memory_budget
        );
        Device {
            shared: Arc::new(DeviceShared {
                descriptor,
                allocated: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                next_address: AtomicU64::new(1 << 32),
                stamp: AtomicU64::new(1),
                removed: Mutex::new(None),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.descriptor.label
    }

    pub(crate) fn execution_delay(&self) -> Duration {
        self.shared.descriptor.execution_delay
    }

    pub(crate) fn next_stamp(&self) -> u64 {
        self.shared.stamp.fetch_add(1, Ordering::Relaxed)
    }

    fn reserve_address_range(&self, size: u64) -> u64 {
        self.shared
            .next_address
            .fetch_add(align_address(size.max(1)), Ordering::Relaxed)
    }

    pub(crate) fn log(&self, event: QueueEvent) {
        if self.shared.descriptor.record_events {
            self.shared.events.lock().push(event);
        }
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<QueueEvent> {
        self.shared.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.shared.events.lock().clear();
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.shared.allocated.load(Ordering::Relaxed)
    }

    /// Marks the device removed.  Every later create/submit/present fails.
    pub fn remove(&self, reason: DeviceRemovedReason) {
        let mut removed = self.shared.removed.lock();
        if removed.is_none() {
            log::error!("{} removed: {}", self.label(), reason);
            *removed = Some(reason);
        }
    }

    pub fn removed_reason(&self) -> Option<DeviceRemovedReason> {
        *self.shared.removed.lock()
    }

    pub fn check_removed(&self) -> Result<(), Error> {
        match self.removed_reason() {
            Some(reason) => Err(Error::DeviceRemoved { reason }),
            None => Ok(()),
        }
    }

    pub fn create_allocation(&self, label: &str, size: u64, heap: MemoryHeap) -> Result<Arc<Allocation>, Error> {
        self.check_removed()?;
        let budget = self.shared.descriptor.memory_budget;
        let reserved = self
            .shared
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |allocated| {
                allocated.checked_add(size).filter(|total| *total <= budget)
            });
        if reserved.is_err() {
            log::error!("Out of device memory allocating {size} bytes for {label}");
            return Err(Error::OutOfDeviceMemory {
                label: label.to_string(),
                requested: size,
            });
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let address = self.reserve_address_range(size);
        Ok(Arc::new(Allocation::new(
            self.shared.clone(),
            id,
            label.to_string(),
            heap,
            size,
            address,
        )))
    }

    pub fn create_queue(&self, engine: EngineKind) -> Result<Queue, Error> {
        self.check_removed()?;
        Queue::new(self.clone(), engine)
    }

    pub fn create_command_allocator(&self, engine: EngineKind) -> Result<CommandAllocator, Error> {
        self.check_removed()?;
        Ok(CommandAllocator::new(self.clone(), engine))
    }

    pub fn create_command_list(&self, engine: EngineKind, thread: usize) -> Result<CommandList, Error> {
        self.check_removed()?;
        Ok(CommandList::new(self.clone(), engine, thread))
    }

    pub fn create_descriptor_heap(
        &self,
        kind: HeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<RawDescriptorHeap, Error> {
        self.check_removed()?;
        if shader_visible && !matches!(kind, HeapKind::CbvSrvUav | HeapKind::Sampler) {
            return Err(Error::invalid(format!(
                "{} heaps cannot be shader visible",
                kind.name()
            )));
        }
        let bytes = capacity as u64 * DESCRIPTOR_STRIDE;
        let cpu_base = self.reserve_address_range(bytes);
        let gpu_base = shader_visible.then(|| self.reserve_address_range(bytes));
        Ok(RawDescriptorHeap::new(
            kind,
            capacity,
            DESCRIPTOR_STRIDE,
            cpu_base,
            gpu_base,
        ))
    }

    /// Reports the buffer sizes a build of `inputs` with `flags` requires.
    pub fn acceleration_structure_prebuild_info(&self, inputs: &BuildInputs, flags: BuildFlags) -> PrebuildInfo {
        use crate::bittricks::align_up;
        let primitives = inputs.primitive_count();
        let per_primitive = match inputs {
            BuildInputs::BottomLevel(_) => 64,
            BuildInputs::TopLevel { .. } => 128,
        };
        let mut result = 256 + primitives * per_primitive;
        if flags.contains(BuildFlags::PREFER_FAST_TRACE) {
            result += result / 2;
        }
        if flags.contains(BuildFlags::ALLOW_UPDATE) {
            result += result / 4;
        }
        PrebuildInfo {
            result_size: align_up(result, 256),
            scratch_size: align_up(256 + primitives * 32, 256),
            update_scratch_size: align_up(128 + primitives * 8, 256),
        }
    }

    /// Returns the identifier of an exported shader, as written into shader records.
    pub fn shader_identifier(&self, export: &str) -> [u8; SHADER_IDENTIFIER_SIZE] {
        //FNV-1a, spread over the identifier
        let mut identifier = [0u8; SHADER_IDENTIFIER_SIZE];
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for chunk in identifier.chunks_mut(8) {
            for byte in export.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            chunk.copy_from_slice(&hash.to_le_bytes());
        }
        identifier
    }

    pub fn present(&self, back_buffer: u64) -> Result<(), Error> {
        self.check_removed()?;
        self.log(QueueEvent::Presented {
            back_buffer,
            stamp: self.next_stamp(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new(DeviceDescriptor {
            memory_budget: 4096,
            record_events: true,
            ..Default::default()
        })
    }

    #[test]
    fn budget_is_enforced_and_returned() {
        let device = device();
        let a = device.create_allocation("a", 3000, MemoryHeap::Default).unwrap();
        assert!(matches!(
            device.create_allocation("b", 2000, MemoryHeap::Default),
            Err(Error::OutOfDeviceMemory { .. })
        ));
        drop(a);
        assert_eq!(device.allocated_bytes(), 0);
        device.create_allocation("b", 2000, MemoryHeap::Default).unwrap();
    }

    #[test]
    fn removal_fails_later_calls() {
        let device = device();
        device.remove(DeviceRemovedReason::Hung);
        assert_eq!(
            device.create_queue(EngineKind::Copy).err(),
            Some(Error::DeviceRemoved {
                reason: DeviceRemovedReason::Hung
            })
        );
    }

    #[test]
    fn queue_executes_copies_before_signal() {
        let device = device();
        let queue = device.create_queue(EngineKind::Copy).unwrap();
        let allocator = device.create_command_allocator(EngineKind::Copy).unwrap();
        let mut list = device.create_command_list(EngineKind::Copy, 0).unwrap();
        let src = device.create_allocation("src", 16, MemoryHeap::Upload).unwrap();
        let dst = device.create_allocation("dst", 16, MemoryHeap::Readback).unwrap();
        src.write_mapped(0, &[7; 16]).unwrap();

        list.reset(&allocator).unwrap();
        list.record(Command::Copy {
            src: src.clone(),
            dst: dst.clone(),
            regions: vec![CopyRegion {
                src_offset: 4,
                dst_offset: 0,
                len: 8,
            }],
        });
        list.close().unwrap();
        queue.execute(vec![list.take_recorded().unwrap()]).unwrap();
        let value = queue.signal().unwrap();
        queue.trigger_event(value).wait();

        assert_eq!(dst.read_mapped(0, 8).unwrap(), vec![7; 8]);
        assert_eq!(dst.read_mapped(8, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn update_of_non_updatable_build_removes_device() {
        let device = device();
        let queue = device.create_queue(EngineKind::Compute).unwrap();
        let allocator = device.create_command_allocator(EngineKind::Compute).unwrap();
        let mut list = device.create_command_list(EngineKind::Compute, 0).unwrap();
        let inputs = BuildInputs::TopLevel {
            instances: 0,
            instance_count: 2,
        };
        let info = device.acceleration_structure_prebuild_info(&inputs, BuildFlags::empty());
        let dest = device.create_allocation("tlas", info.result_size, MemoryHeap::Default).unwrap();
        let scratch = device.create_allocation("scratch", info.scratch_size, MemoryHeap::Default).unwrap();
        list.reset(&allocator).unwrap();
        for flags in [BuildFlags::empty(), BuildFlags::PERFORM_UPDATE] {
            list.record(Command::BuildAccelerationStructure(AccelerationStructureBuild {
                inputs: inputs.clone(),
                flags,
                dest: dest.clone(),
                scratch: scratch.clone(),
                source: None,
            }));
        }
        list.close().unwrap();
        queue.execute(vec![list.take_recorded().unwrap()]).unwrap();
        let value = queue.signal().unwrap();
        queue.trigger_event(value).wait();
        assert_eq!(device.removed_reason(), Some(DeviceRemovedReason::InvalidCall));
        assert_eq!(built_header(&dest).map(|h| h.generation), Some(1));
    }
}
