// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Commands the software device understands, and how a queue thread executes them.

use super::memory::Allocation;
use super::{Device, PrebuildInfo};
use crate::bindings::resource_tracking::ResourceState;
use crate::error::DeviceRemovedReason;
use crate::images::engine::EngineKind;
use std::sync::Arc;

/// One contiguous byte range of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub len: u64,
}

/// Location of one shader table as consumed by a ray dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderTableRange {
    pub address: u64,
    pub size: u64,
    pub stride: u64,
}

bitflags::bitflags! {
    /// Acceleration-structure build flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BuildFlags: u32 {
        const ALLOW_UPDATE = 1 << 0;
        const PREFER_FAST_TRACE = 1 << 1;
        const PREFER_FAST_BUILD = 1 << 2;
        const PERFORM_UPDATE = 1 << 3;
    }
}

/// Per-geometry build input of a bottom-level structure.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryInputs {
    Triangles {
        vertex_buffer: u64,
        vertex_stride: u32,
        vertex_count: u32,
        index_buffer: Option<u64>,
        index_count: u32,
        transform: Option<u64>,
        opaque: bool,
    },
    Aabbs {
        address: u64,
        count: u32,
        opaque: bool,
    },
}

impl GeometryInputs {
    pub fn primitive_count(&self) -> u64 {
        match self {
            GeometryInputs::Triangles {
                index_buffer: Some(_),
                index_count,
                ..
            } => (*index_count / 3) as u64,
            GeometryInputs::Triangles { vertex_count, .. } => (*vertex_count / 3) as u64,
            GeometryInputs::Aabbs { count, .. } => *count as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildInputs {
    BottomLevel(Vec<GeometryInputs>),
    TopLevel { instances: u64, instance_count: u32 },
}

impl BuildInputs {
    pub fn primitive_count(&self) -> u64 {
        match self {
            BuildInputs::BottomLevel(geometries) => {
                geometries.iter().map(GeometryInputs::primitive_count).sum()
            }
            BuildInputs::TopLevel { instance_count, .. } => *instance_count as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccelerationStructureBuild {
    pub inputs: BuildInputs,
    pub flags: BuildFlags,
    pub dest: Arc<Allocation>,
    pub scratch: Arc<Allocation>,
    /// Previous build to update from.  `None` with [BuildFlags::PERFORM_UPDATE] updates in place.
    pub source: Option<Arc<Allocation>>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Transition {
        resource: u64,
        before: ResourceState,
        after: ResourceState,
    },
    UavBarrier {
        resource: u64,
    },
    Copy {
        src: Arc<Allocation>,
        dst: Arc<Allocation>,
        regions: Vec<CopyRegion>,
    },
    ClearRenderTarget {
        resource: u64,
        color: [f32; 4],
    },
    SetPipeline {
        label: String,
    },
    SetDescriptorTable {
        parameter: u32,
        gpu_handle: u64,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    Draw {
        vertices: u32,
        instances: u32,
    },
    DispatchRays {
        width: u32,
        height: u32,
        depth: u32,
        ray_generation: ShaderTableRange,
        miss: ShaderTableRange,
        hit_groups: ShaderTableRange,
    },
    BuildAccelerationStructure(AccelerationStructureBuild),
    Marker(String),
}

impl Command {
    pub fn marker(&self) -> Option<&str> {
        match self {
            Command::Marker(label) => Some(label),
            _ => None,
        }
    }

    pub(super) fn execute(&self, device: &Device) -> Result<(), DeviceRemovedReason> {
        match self {
            Command::Copy { src, dst, regions } => {
                if dst.gpu_copy_from(src, regions) {
                    Ok(())
                } else {
                    Err(DeviceRemovedReason::InvalidCall)
                }
            }
            Command::BuildAccelerationStructure(build) => execute_build(device, build),
            _ => Ok(()),
        }
    }
}

/// The list of commands a command list held when it was closed.
#[derive(Debug)]
pub struct RecordedCommands {
    pub engine: EngineKind,
    pub thread: usize,
    pub close_stamp: u64,
    pub commands: Vec<Command>,
}

const HEADER_MAGIC: u32 = 0x5343_4341;
const HEADER_LEN: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StructureHeader {
    pub flags: BuildFlags,
    pub primitives: u32,
    pub generation: u32,
}

impl StructureHeader {
    fn read(allocation: &Allocation) -> Option<Self> {
        let bytes = allocation.gpu_read(0, HEADER_LEN)?;
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        if word(0) != HEADER_MAGIC {
            return None;
        }
        Some(StructureHeader {
            flags: BuildFlags::from_bits_truncate(word(4)),
            primitives: word(8),
            generation: word(12),
        })
    }

    fn write(&self, allocation: &Allocation) -> bool {
        let mut bytes = Vec::with_capacity(HEADER_LEN as usize);
        bytes.extend_from_slice(&HEADER_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&self.flags.bits().to_le_bytes());
        bytes.extend_from_slice(&self.primitives.to_le_bytes());
        bytes.extend_from_slice(&self.generation.to_le_bytes());
        allocation.gpu_write(0, &bytes)
    }
}

/// Reads back the header a build left in its destination, if any.
pub(crate) fn built_header(allocation: &Allocation) -> Option<StructureHeader> {
    StructureHeader::read(allocation)
}

fn execute_build(device: &Device, build: &AccelerationStructureBuild) -> Result<(), DeviceRemovedReason> {
    let update = build.flags.contains(BuildFlags::PERFORM_UPDATE);
    let PrebuildInfo {
        result_size,
        scratch_size,
        update_scratch_size,
    } = device.acceleration_structure_prebuild_info(&build.inputs, build.flags);
    let needed_scratch = if update { update_scratch_size } else { scratch_size };
    if build.dest.size() < result_size || build.scratch.size() < needed_scratch {
        return Err(DeviceRemovedReason::InvalidCall);
    }
    let primitives = build.inputs.primitive_count() as u32;
    let generation = if update {
        let source = build.source.as_ref().unwrap_or(&build.dest);
        let previous = StructureHeader::read(source).ok_or(DeviceRemovedReason::InvalidCall)?;
        if !previous.flags.contains(BuildFlags::ALLOW_UPDATE) || previous.primitives != primitives {
            return Err(DeviceRemovedReason::InvalidCall);
        }
        previous.generation + 1
    } else {
        1
    };
    let header = StructureHeader {
        flags: build.flags - BuildFlags::PERFORM_UPDATE,
        primitives,
        generation,
    };
    if header.write(&build.dest) {
        Ok(())
    } else {
        Err(DeviceRemovedReason::InvalidCall)
    }
}
