// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::DeviceShared;
use super::command::CopyRegion;
use crate::error::Error;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Which memory pool an allocation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryHeap {
    /// GPU-only memory.  Not mappable.
    Default,
    /// CPU-writable, GPU-readable memory.  Mappable for the allocation's lifetime.
    Upload,
    /// GPU-writable, CPU-readable memory.
    Readback,
}

impl MemoryHeap {
    pub fn is_mappable(self) -> bool {
        !matches!(self, MemoryHeap::Default)
    }
}

/// A committed allocation on the software device.
///
/// Dropping the last reference returns the bytes to the device's memory budget.
pub struct Allocation {
    id: u64,
    label: String,
    heap: MemoryHeap,
    size: u64,
    gpu_address: u64,
    bytes: Mutex<Vec<u8>>,
    device: Arc<DeviceShared>,
}

impl Debug for Allocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("heap", &self.heap)
            .field("size", &self.size)
            .finish()
    }
}

impl Allocation {
    pub(super) fn new(
        device: Arc<DeviceShared>,
        id: u64,
        label: String,
        heap: MemoryHeap,
        size: u64,
        gpu_address: u64,
    ) -> Self {
        Allocation {
            id,
            label,
            heap,
            size,
            gpu_address,
            bytes: Mutex::new(vec![0; size as usize]),
            device,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn heap(&self) -> MemoryHeap {
        self.heap
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), Error> {
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return Err(Error::invalid(format!(
                "range {offset}+{len} outside allocation {} of {} bytes",
                self.label, self.size
            )));
        }
        Ok(())
    }

    /// Writes through the CPU mapping.
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
        if self.heap != MemoryHeap::Upload {
            return Err(Error::invalid(format!(
                "allocation {} is not CPU-writable",
                self.label
            )));
        }
        self.check_range(offset, data.len() as u64)?;
        let start = offset as usize;
        self.bytes.lock()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Reads through the CPU mapping.
    pub fn read_mapped(&self, offset: u64, len: u64) -> Result<Vec<u8>, Error> {
        if !self.heap.is_mappable() {
            return Err(Error::invalid(format!(
                "allocation {} is not CPU-readable",
                self.label
            )));
        }
        self.check_range(offset, len)?;
        let start = offset as usize;
        Ok(self.bytes.lock()[start..start + len as usize].to_vec())
    }

    /// GPU-side copy, executed on a queue thread.
    ///
    /// Source bytes are gathered before the destination is locked, so concurrent copies in
    /// opposite directions on different queues cannot deadlock.
    pub(super) fn gpu_copy_from(&self, src: &Allocation, regions: &[CopyRegion]) -> bool {
        let gathered: Option<Vec<Vec<u8>>> = {
            let src_bytes = src.bytes.lock();
            regions
                .iter()
                .map(|r| {
                    let start = r.src_offset as usize;
                    let end = start.checked_add(r.len as usize)?;
                    src_bytes.get(start..end).map(|s| s.to_vec())
                })
                .collect()
        };
        let Some(gathered) = gathered else {
            return false;
        };
        let mut dst_bytes = self.bytes.lock();
        for (region, data) in regions.iter().zip(gathered) {
            let start = region.dst_offset as usize;
            match dst_bytes.get_mut(start..start + data.len()) {
                Some(dst) => dst.copy_from_slice(&data),
                None => return false,
            }
        }
        true
    }

    pub(super) fn gpu_write(&self, offset: u64, data: &[u8]) -> bool {
        let start = offset as usize;
        match self.bytes.lock().get_mut(start..start + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    pub(super) fn gpu_read(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        let start = offset as usize;
        self.bytes
            .lock()
            .get(start..start + len as usize)
            .map(|s| s.to_vec())
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.device.allocated.fetch_sub(self.size, Ordering::Relaxed);
    }
}
