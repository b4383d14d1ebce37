// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::bindings::resource::ViewKind;
use crate::error::Error;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

impl HeapKind {
    pub fn name(self) -> &'static str {
        match self {
            HeapKind::CbvSrvUav => "cbv_srv_uav",
            HeapKind::Sampler => "sampler",
            HeapKind::Rtv => "rtv",
            HeapKind::Dsv => "dsv",
        }
    }
}

/// What a descriptor slot describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorContent {
    Null(ViewKind),
    View {
        resource: u64,
        kind: ViewKind,
        first_mip: u32,
        mip_count: u32,
        first_element: u32,
        element_count: u32,
    },
}

/// A fixed-capacity descriptor heap on the software device.
#[derive(Debug)]
pub struct RawDescriptorHeap {
    kind: HeapKind,
    capacity: u32,
    stride: u64,
    cpu_base: u64,
    gpu_base: Option<u64>,
    slots: Mutex<Vec<Option<DescriptorContent>>>,
}

impl RawDescriptorHeap {
    pub(super) fn new(kind: HeapKind, capacity: u32, stride: u64, cpu_base: u64, gpu_base: Option<u64>) -> Self {
        RawDescriptorHeap {
            kind,
            capacity,
            stride,
            cpu_base,
            gpu_base,
            slots: Mutex::new(vec![None; capacity as usize]),
        }
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
    pub fn stride(&self) -> u64 {
        self.stride
    }
    pub fn is_shader_visible(&self) -> bool {
        self.gpu_base.is_some()
    }

    pub fn cpu_handle(&self, index: u32) -> u64 {
        self.cpu_base + index as u64 * self.stride
    }

    pub fn gpu_handle(&self, index: u32) -> Option<u64> {
        self.gpu_base.map(|base| base + index as u64 * self.stride)
    }

    fn check(&self, index: u32) -> Result<(), Error> {
        if index >= self.capacity {
            return Err(Error::invalid(format!(
                "descriptor index {index} outside {} heap of {}",
                self.kind.name(),
                self.capacity
            )));
        }
        Ok(())
    }

    pub fn write(&self, index: u32, content: DescriptorContent) -> Result<(), Error> {
        self.check(index)?;
        self.slots.lock()[index as usize] = Some(content);
        Ok(())
    }

    pub fn read(&self, index: u32) -> Option<DescriptorContent> {
        self.slots.lock().get(index as usize).cloned().flatten()
    }

    pub fn clear(&self, index: u32) {
        if let Some(slot) = self.slots.lock().get_mut(index as usize) {
            *slot = None;
        }
    }

    /// Writes `(index, content)` pairs as one batch.
    pub fn write_batch(&self, writes: &[(u32, DescriptorContent)]) -> Result<(), Error> {
        for (index, _) in writes {
            self.check(*index)?;
        }
        let mut slots = self.slots.lock();
        for (index, content) in writes {
            slots[*index as usize] = Some(content.clone());
        }
        Ok(())
    }

    /// Copies `(dst, src)` slot pairs from `src` into this heap as one batch.
    pub fn copy_from(&self, src: &RawDescriptorHeap, pairs: &[(u32, u32)]) -> Result<(), Error> {
        if src.kind != self.kind {
            return Err(Error::invalid(format!(
                "descriptor copy from {} heap into {} heap",
                src.kind.name(),
                self.kind.name()
            )));
        }
        let contents: Vec<Option<DescriptorContent>> = {
            let src_slots = src.slots.lock();
            pairs
                .iter()
                .map(|(_, s)| src_slots.get(*s as usize).cloned().flatten())
                .collect()
        };
        for (dst, _) in pairs {
            self.check(*dst)?;
        }
        let mut dst_slots = self.slots.lock();
        for ((dst, _), content) in pairs.iter().zip(contents) {
            dst_slots[*dst as usize] = content;
        }
        Ok(())
    }
}
