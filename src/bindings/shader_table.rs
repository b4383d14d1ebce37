// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Ray-tracing shader tables.
//!
//! A table is a run of fixed-stride shader records in upload memory.  Records refer to
//! descriptor tables in the current frame's ring, so each frame slot gets its own copy of the
//! table and records must be populated again every frame before a ray dispatch uses them.

use crate::bittricks::align_up;
use crate::error::Error;
use crate::imp::{self, Allocation, MemoryHeap, SHADER_IDENTIFIER_SIZE, ShaderTableRange};
use parking_lot::Mutex;
use std::sync::Arc;

pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

#[derive(Debug)]
pub struct ShaderTable {
    allocation: Arc<Allocation>,
    records: u32,
    stride: u64,
    slot_size: u64,
    frames: usize,
    //frame number each record was last populated for, per frame slot
    populated: Mutex<Vec<Option<u64>>>,
}

impl ShaderTable {
    pub(crate) fn new(device: &imp::Device, label: &str, records: u32, stride: u64, frames: usize) -> Result<Self, Error> {
        let slot_size = align_up(records as u64 * stride, SHADER_TABLE_ALIGNMENT);
        let allocation = device.create_allocation(label, (slot_size * frames as u64).max(1), MemoryHeap::Upload)?;
        Ok(ShaderTable {
            allocation,
            records,
            stride,
            slot_size,
            frames,
            populated: Mutex::new(vec![None; records as usize * frames]),
        })
    }

    pub fn records(&self) -> u32 {
        self.records
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    fn record_offset(&self, slot: usize, index: u32) -> u64 {
        (slot % self.frames) as u64 * self.slot_size + index as u64 * self.stride
    }

    pub(crate) fn write_record(
        &self,
        slot: usize,
        frame: u64,
        index: u32,
        identifier: &[u8; SHADER_IDENTIFIER_SIZE],
        handles: &[u64],
    ) -> Result<(), Error> {
        if index >= self.records {
            return Err(Error::invalid(format!(
                "shader record {index} outside a table of {}",
                self.records
            )));
        }
        let mut record = Vec::with_capacity(self.stride as usize);
        record.extend_from_slice(identifier);
        for handle in handles {
            record.extend_from_slice(&handle.to_le_bytes());
        }
        if record.len() as u64 > self.stride {
            return Err(Error::invalid(format!(
                "{} byte shader record exceeds stride {}",
                record.len(),
                self.stride
            )));
        }
        record.resize(self.stride as usize, 0);
        self.allocation.write_mapped(self.record_offset(slot, index), &record)?;
        self.populated.lock()[(slot % self.frames) * self.records as usize + index as usize] = Some(frame);
        Ok(())
    }

    /// Whether record `index` was populated for `frame`.
    pub fn is_populated(&self, slot: usize, frame: u64, index: u32) -> bool {
        index < self.records
            && self.populated.lock()[(slot % self.frames) * self.records as usize + index as usize] == Some(frame)
    }

    /// The bytes of one record as last written.
    pub fn record(&self, slot: usize, index: u32) -> Result<Vec<u8>, Error> {
        self.allocation.read_mapped(self.record_offset(slot, index), self.stride)
    }

    pub fn range(&self, slot: usize) -> ShaderTableRange {
        ShaderTableRange {
            address: self.allocation.gpu_address() + self.record_offset(slot, 0),
            size: self.records as u64 * self.stride,
            stride: self.stride,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::{Device, DeviceDescriptor};

    #[test]
    fn records_are_per_frame_slot() {
        let device = Device::new(DeviceDescriptor::default());
        let table = ShaderTable::new(&device, "hit", 2, 64, 2).unwrap();
        table.write_record(1, 7, 1, &[9; 32], &[0xabcd]).unwrap();
        assert!(table.is_populated(1, 7, 1));
        assert!(!table.is_populated(1, 8, 1));
        assert!(!table.is_populated(0, 7, 1));
        let record = table.record(1, 1).unwrap();
        assert_eq!(&record[..32], &[9; 32]);
        assert_eq!(&record[32..40], &0xabcdu64.to_le_bytes());
        assert_eq!(table.range(1).address - table.range(0).address, 128);
    }
}
