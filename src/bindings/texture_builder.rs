// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Builder pattern for texture creation to reduce parameter count.

use crate::bindings::resource::{CpuAccess, Dimension, ResourceDescriptor, View};
use crate::bindings::resource_tracking::ResourceState;
use crate::error::Error;
use crate::images::BoundDevice;

/// Builder for creating textures with a cleaner API than long parameter lists.
///
/// Obtained from [BoundDevice::texture].  Unset fields default to a single 1x1 texel, one mip,
/// one array slice, in the `COPY_DEST` state, with no clear value.
pub struct TextureBuilder<'a> {
    device: &'a BoundDevice,
    descriptor: ResourceDescriptor,
}

impl<'a> TextureBuilder<'a> {
    pub(crate) fn new(device: &'a BoundDevice, label: &str, dimension: Dimension, texel_size: u32) -> Self {
        Self {
            device,
            descriptor: ResourceDescriptor {
                label: label.to_string(),
                dimension,
                stride: texel_size,
                width: 1,
                height: 1,
                depth_or_array: 1,
                mips: 1,
                initial_state: ResourceState::COPY_DEST,
                clear_value: None,
                cpu_access: CpuAccess::None,
            },
        }
    }

    /// Width, height and depth in texels.  Depth only applies to 3D textures.
    pub fn with_size(mut self, width: u32, height: u32, depth: u32) -> Self {
        self.descriptor.width = width;
        self.descriptor.height = height;
        if self.descriptor.dimension == Dimension::Texture3D {
            self.descriptor.depth_or_array = depth;
        }
        self
    }

    /// Array slices.  Ignored for 3D textures.
    pub fn with_array(mut self, slices: u32) -> Self {
        if self.descriptor.dimension != Dimension::Texture3D {
            self.descriptor.depth_or_array = slices;
        }
        self
    }

    pub fn with_mips(mut self, mips: u32) -> Self {
        self.descriptor.mips = mips;
        self
    }

    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.descriptor.initial_state = state;
        self
    }

    /// Optimized clear color for render targets.
    pub fn with_clear_value(mut self, color: [f32; 4]) -> Self {
        self.descriptor.clear_value = Some(color);
        self
    }

    /// Get the descriptor built so far.
    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn build(self) -> Result<View, Error> {
        self.device.create_resource(self.descriptor)
    }
}
