// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The bound device: one explicit device plus the descriptor heaps every resource and pipeline
//! created on it shares.
//!
//! Null descriptors live here too, created once at bind time and released with the device.
use std::fmt::Formatter;
use std::sync::Arc;

use crate::bindings::descriptor_heap::{CpuHeaps, GpuDescriptorHeap};
use crate::bindings::resource::{CpuAccess, Dimension, Resource, ResourceDescriptor, View, ViewKind};
use crate::bindings::texture_builder::TextureBuilder;
use crate::config::SchedulerDescriptor;
use crate::error::Error;
use crate::imp::{self, DescriptorContent};

#[derive(Debug, Clone, Copy)]
struct NullDescriptors {
    srv: u32,
    uav: u32,
    cbv: u32,
}

pub struct BoundDevice {
    device: imp::Device,
    cpu_heaps: Arc<CpuHeaps>,
    gpu_heap: GpuDescriptorHeap,
    null: NullDescriptors,
    frames: usize,
}

impl std::fmt::Debug for BoundDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundDevice")
            .field("device", &self.device.label())
            .field("frames", &self.frames)
            .finish()
    }
}

impl BoundDevice {
    /// Binds `device`, sizing the descriptor heaps from `descriptor`.
    pub fn bind(device: imp::Device, descriptor: &SchedulerDescriptor) -> Result<Arc<Self>, Error> {
        if descriptor.frames == 0 {
            return Err(Error::invalid("a frame ring needs at least one slot"));
        }
        let cpu_heaps = Arc::new(CpuHeaps::new(
            &device,
            descriptor.cpu_view_descriptors,
            descriptor.cpu_sampler_descriptors,
            descriptor.cpu_rtv_descriptors,
            descriptor.cpu_dsv_descriptors,
        )?);
        let gpu_heap = GpuDescriptorHeap::new(
            &device,
            descriptor.frames as u32,
            descriptor.frame_descriptors,
            descriptor.persistent_descriptors,
        )?;
        let null = {
            let heap = &cpu_heaps.cbv_srv_uav;
            let make = |kind: ViewKind| -> Result<u32, Error> {
                let index = heap.allocate()?;
                heap.raw().write(index, DescriptorContent::Null(kind))?;
                Ok(index)
            };
            NullDescriptors {
                srv: make(ViewKind::Srv)?,
                uav: make(ViewKind::Uav)?,
                cbv: make(ViewKind::Cbv)?,
            }
        };
        log::info!(
            "Bound {} with a {}-frame ring, {} descriptors per frame",
            device.label(),
            descriptor.frames,
            descriptor.frame_descriptors
        );
        Ok(Arc::new(BoundDevice {
            device,
            cpu_heaps,
            gpu_heap,
            null,
            frames: descriptor.frames,
        }))
    }

    pub fn imp(&self) -> &imp::Device {
        &self.device
    }

    pub fn cpu_heaps(&self) -> &CpuHeaps {
        &self.cpu_heaps
    }

    pub fn gpu_heap(&self) -> &GpuDescriptorHeap {
        &self.gpu_heap
    }

    /// Frame ring depth the device was bound with.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// CPU slot of the null descriptor standing in for an unset entry of `kind`.
    pub(crate) fn null_descriptor(&self, kind: ViewKind) -> Result<u32, Error> {
        match kind {
            ViewKind::Srv => Ok(self.null.srv),
            ViewKind::Uav => Ok(self.null.uav),
            ViewKind::Cbv => Ok(self.null.cbv),
            ViewKind::Rtv | ViewKind::Dsv => Err(Error::invalid(format!("no null {kind:?} in shader tables"))),
        }
    }

    /// Allocates a resource and returns a view of all of it.
    pub fn create_resource(&self, descriptor: ResourceDescriptor) -> Result<View, Error> {
        let resource = Resource::new(&self.device, self.cpu_heaps.clone(), descriptor)?;
        Ok(View::whole(resource))
    }

    pub fn create_buffer(&self, label: &str, stride: u32, count: u32, cpu_access: CpuAccess) -> Result<View, Error> {
        let mut descriptor = ResourceDescriptor::buffer(label, stride, count);
        descriptor.cpu_access = cpu_access;
        self.create_resource(descriptor)
    }

    /// Starts describing a texture.
    pub fn texture<'a>(&'a self, label: &'a str, dimension: Dimension, texel_size: u32) -> TextureBuilder<'a> {
        TextureBuilder::new(self, label, dimension, texel_size)
    }

    pub fn create_texture_1d(&self, label: &str, texel_size: u32, width: u32, mips: u32) -> Result<View, Error> {
        self.texture(label, Dimension::Texture1D, texel_size)
            .with_size(width, 1, 1)
            .with_mips(mips)
            .build()
    }

    pub fn create_texture_2d(&self, label: &str, texel_size: u32, width: u32, height: u32, mips: u32) -> Result<View, Error> {
        self.texture(label, Dimension::Texture2D, texel_size)
            .with_size(width, height, 1)
            .with_mips(mips)
            .build()
    }

    pub fn create_texture_3d(&self, label: &str, texel_size: u32, width: u32, height: u32, depth: u32) -> Result<View, Error> {
        self.texture(label, Dimension::Texture3D, texel_size)
            .with_size(width, height, depth)
            .build()
    }
}

impl Drop for BoundDevice {
    fn drop(&mut self) {
        let heap = &self.cpu_heaps.cbv_srv_uav;
        heap.free(self.null.srv);
        heap.free(self.null.uav);
        heap.free(self.null.cbv);
    }
}

impl PartialEq for BoundDevice {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for BoundDevice {}
