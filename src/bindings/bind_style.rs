// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Defines the way resources are bound for a pipeline.
//!
//! A [BindStyle] is a declarative list of shader register ranges.  Each entry names a slot (and
//! register space), the kind of descriptor range it is, and how many descriptors it spans.
//! Entries are either:
//!
//! - **Global**: bound once each time the pipeline is set on a command context.  The bound views
//!   are copied into the current frame's descriptor ring at that point.
//! - **Local**: declared here but supplied later, per draw/dispatch through
//!   [crate::images::command_context::CommandContext::bind_local], or per ray-tracing shader
//!   record through [crate::images::command_context::CommandContext::populate_shader_record].
//!
//! The style is compiled once into a [crate::bindings::root_signature::RootSignature].
//!
//! # Example
//!
//! ```
//! use fences_and_frames::bindings::bind_style::{BindSlot, BindStyle, RangeType};
//! use fences_and_frames::bindings::resource::CpuAccess;
//! use fences_and_frames::config::SchedulerDescriptor;
//! use fences_and_frames::images::BoundDevice;
//! use fences_and_frames::imp::{Device, DeviceDescriptor};
//!
//! let device = BoundDevice::bind(Device::new(DeviceDescriptor::default()), &SchedulerDescriptor::default()).unwrap();
//! let constants = device.create_buffer("constants", 256, 1, CpuAccess::WriteOnlyUpload).unwrap();
//!
//! let mut bind_style = BindStyle::new();
//! // Bind a constant buffer to b0
//! bind_style.bind_view(BindSlot::new(0), RangeType::Cbv, &constants);
//! // Each dispatch supplies its own output texture at u0
//! bind_style.declare_local(BindSlot::new(0), RangeType::Uav, 1);
//! assert_eq!(bind_style.len(), 2);
//! ```

use crate::bindings::descriptor_heap::GpuDescriptorHeap;
use crate::bindings::resource::{View, ViewKind};
use crate::bindings::sampler::{AddressMode, SamplerType};
use crate::error::Error;
use crate::images::BoundDevice;
use crate::raytracing::AccelerationStructureHandle;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// The kind of descriptor range a binding occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RangeType {
    /// Shader resource views, `t` registers.
    Srv,
    /// Unordered access views, `u` registers.
    Uav,
    /// Constant buffer views, `b` registers.
    Cbv,
}

impl RangeType {
    pub fn view_kind(self) -> ViewKind {
        match self {
            RangeType::Srv => ViewKind::Srv,
            RangeType::Uav => ViewKind::Uav,
            RangeType::Cbv => ViewKind::Cbv,
        }
    }
}

/// Represents a binding slot where a resource can be bound.
///
/// A slot is a register number within a register space.  Ranges of different [RangeType]s
/// have independent register numbering, so `t0` and `u0` do not collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindSlot {
    pub(crate) space: u32,
    pub(crate) register: u32,
}

impl BindSlot {
    /// Creates a new binding slot with the specified register in space 0.
    pub fn new(register: u32) -> Self {
        Self { space: 0, register }
    }

    pub fn in_space(register: u32, space: u32) -> Self {
        Self { space, register }
    }

    pub fn register(&self) -> u32 {
        self.register
    }
    pub fn space(&self) -> u32 {
        self.space
    }
}

/// Whether a binding is resolved with the pipeline or per use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Local,
}

/// Internal enumeration of all possible binding targets.
#[derive(Debug, Clone)]
pub(crate) enum BindTarget {
    /// Views copied into the frame ring when the pipeline is set.  `None` entries bind a null descriptor.
    Views(Vec<Option<View>>),
    /// A table living in the persistent region of the shader-visible heap.
    Persistent(Arc<PersistentTable>),
    /// The top-level structure a ray-tracing pipeline traces against.
    AccelerationStructure(AccelerationStructureHandle),
    /// Supplied per draw/dispatch or per shader record.
    Local,
}

/// Information about a single resource binding.
#[derive(Debug, Clone)]
pub struct BindInfo {
    pub(crate) range: RangeType,
    pub(crate) count: u32,
    pub(crate) target: BindTarget,
}

impl BindInfo {
    pub fn range(&self) -> RangeType {
        self.range
    }
    pub fn count(&self) -> u32 {
        self.count
    }
    pub fn scope(&self) -> Scope {
        match self.target {
            BindTarget::Local => Scope::Local,
            _ => Scope::Global,
        }
    }
}

/// A static sampler baked into the root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerInfo {
    pub slot: BindSlot,
    pub sampler_type: SamplerType,
    pub address_mode: AddressMode,
}

/// Describes how resources are bound for a pipeline.
///
/// Binding the same slot and range type twice replaces the earlier binding.
#[derive(Debug, Clone, Default)]
pub struct BindStyle {
    pub(crate) binds: BTreeMap<(BindSlot, RangeType), BindInfo>,
    pub(crate) samplers: Vec<SamplerInfo>,
}

impl BindStyle {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, slot: BindSlot, range: RangeType, count: u32, target: BindTarget) {
        self.binds.insert((slot, range), BindInfo { range, count, target });
    }

    /// Binds a single view.
    pub fn bind_view(&mut self, slot: BindSlot, range: RangeType, view: &View) {
        self.bind(slot, range, 1, BindTarget::Views(vec![Some(view.clone())]));
    }

    /// Binds an array of views occupying consecutive registers starting at `slot`.
    pub fn bind_views(&mut self, slot: BindSlot, range: RangeType, views: &[View]) {
        let views = views.iter().cloned().map(Some).collect::<Vec<_>>();
        self.bind(slot, range, views.len() as u32, BindTarget::Views(views));
    }

    /// Binds an array of `capacity` registers; entries past `views` are bound to null descriptors.
    pub fn bind_array(&mut self, slot: BindSlot, range: RangeType, capacity: u32, views: &[View]) -> Result<(), Error> {
        if views.len() as u32 > capacity {
            return Err(Error::invalid(format!(
                "{} views bound to an array of {capacity}",
                views.len()
            )));
        }
        let mut entries = views.iter().cloned().map(Some).collect::<Vec<_>>();
        entries.resize(capacity as usize, None);
        self.bind(slot, range, capacity, BindTarget::Views(entries));
        Ok(())
    }

    /// Binds a persistent table, such as a bindless texture array.
    pub fn bind_persistent(&mut self, slot: BindSlot, range: RangeType, table: &Arc<PersistentTable>) {
        self.bind(slot, range, table.capacity(), BindTarget::Persistent(table.clone()));
    }

    /// Binds the top-level acceleration structure as a shader resource.
    pub fn bind_acceleration_structure(&mut self, slot: BindSlot, structure: &AccelerationStructureHandle) {
        self.bind(slot, RangeType::Srv, 1, BindTarget::AccelerationStructure(structure.clone()));
    }

    /// Declares a range supplied per draw/dispatch or per shader record.
    pub fn declare_local(&mut self, slot: BindSlot, range: RangeType, count: u32) {
        self.bind(slot, range, count, BindTarget::Local);
    }

    pub fn bind_static_sampler(&mut self, slot: BindSlot, sampler_type: SamplerType, address_mode: AddressMode) {
        self.samplers.retain(|s| s.slot != slot);
        self.samplers.push(SamplerInfo {
            slot,
            sampler_type,
            address_mode,
        });
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }

    pub fn get(&self, slot: BindSlot, range: RangeType) -> Option<&BindInfo> {
        self.binds.get(&(slot, range))
    }

    pub(crate) fn entries(&self, scope: Scope) -> impl Iterator<Item = (&(BindSlot, RangeType), &BindInfo)> {
        self.binds.iter().filter(move |(_, info)| info.scope() == scope)
    }
}

/// A descriptor table in the persistent region of the shader-visible heap.
///
/// Entries are copied into the table as soon as they are set, and the table keeps the views
/// alive.  Unset entries hold null descriptors.  Dropping the table returns its region.
pub struct PersistentTable {
    device: Arc<BoundDevice>,
    start: u32,
    capacity: u32,
    kind: ViewKind,
    views: Mutex<Vec<Option<View>>>,
}

impl Debug for PersistentTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTable")
            .field("start", &self.start)
            .field("capacity", &self.capacity)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PersistentTable {
    pub fn new(device: &Arc<BoundDevice>, range: RangeType, capacity: u32) -> Result<Arc<Self>, Error> {
        let kind = range.view_kind();
        let heap: &GpuDescriptorHeap = device.gpu_heap();
        let start = heap.allocate_persistent(capacity)?;
        let null = device.null_descriptor(kind)?;
        let pairs = (0..capacity).map(|i| (start + i, null)).collect::<Vec<_>>();
        heap.raw().copy_from(device.cpu_heaps().cbv_srv_uav.raw(), &pairs)?;
        Ok(Arc::new(PersistentTable {
            device: device.clone(),
            start,
            capacity,
            kind,
            views: Mutex::new(vec![None; capacity as usize]),
        }))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// First slot of the table in the shader-visible heap.
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn gpu_handle(&self) -> u64 {
        self.device.gpu_heap().gpu_handle(self.start)
    }

    /// Sets entry `index`, or clears it back to null with `None`.
    pub fn set(&self, index: u32, view: Option<&View>) -> Result<(), Error> {
        if index >= self.capacity {
            return Err(Error::invalid(format!(
                "entry {index} outside a persistent table of {}",
                self.capacity
            )));
        }
        let source = match view {
            Some(view) => view.descriptor(self.kind)?,
            None => self.device.null_descriptor(self.kind)?,
        };
        let mut views = self.views.lock();
        self.device
            .gpu_heap()
            .raw()
            .copy_from(self.device.cpu_heaps().cbv_srv_uav.raw(), &[(self.start + index, source)])?;
        views[index as usize] = view.cloned();
        Ok(())
    }
}

impl Drop for PersistentTable {
    fn drop(&mut self) {
        self.device.gpu_heap().free_persistent(self.start, self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_replaces() {
        let mut style = BindStyle::new();
        style.declare_local(BindSlot::new(0), RangeType::Srv, 1);
        style.declare_local(BindSlot::new(0), RangeType::Srv, 4);
        style.declare_local(BindSlot::new(0), RangeType::Uav, 1);
        assert_eq!(style.len(), 2);
        assert_eq!(style.get(BindSlot::new(0), RangeType::Srv).map(BindInfo::count), Some(4));
        assert_eq!(style.entries(Scope::Local).count(), 2);
        assert_eq!(style.entries(Scope::Global).count(), 0);
    }
}
