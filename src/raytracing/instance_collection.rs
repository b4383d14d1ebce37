// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{AccelerationStructureHandle, BakeOutcome, BuildFlags, BuildOptions, CollectionState, GeometryCollection, Structure};
use crate::error::Error;
use crate::images::command_context::CommandContext;
use crate::imp::{Allocation, BuildInputs, MemoryHeap};
use std::sync::Arc;

/// Bytes of one instance descriptor in the instance buffer.
pub const INSTANCE_DESC_SIZE: u64 = 64;
const MAX_24_BIT: u32 = 0x00ff_ffff;

#[derive(Debug, Clone)]
pub struct Instance {
    geometry: AccelerationStructureHandle,
    transform: [[f32; 4]; 3],
    mask: u8,
    contribution: u32,
    instance_id: u32,
}

impl Instance {
    pub fn geometry(&self) -> &AccelerationStructureHandle {
        &self.geometry
    }
    pub fn transform(&self) -> [[f32; 4]; 3] {
        self.transform
    }
    pub fn mask(&self) -> u8 {
        self.mask
    }
    /// Offset into the hit-group table.
    pub fn contribution(&self) -> u32 {
        self.contribution
    }
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// The descriptor consumed by a top-level build.
    ///
    /// ```text
    /// | transform (12 × f32) | id:24 mask:8 | contribution:24 flags:8 | bottom-level address (u64) |
    /// ```
    fn encode(&self, address: u64, out: &mut Vec<u8>) {
        for row in &self.transform {
            for value in row {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out.extend_from_slice(&(self.instance_id | (self.mask as u32) << 24).to_le_bytes());
        out.extend_from_slice(&self.contribution.to_le_bytes());
        out.extend_from_slice(&address.to_le_bytes());
    }
}

const IDENTITY: [[f32; 4]; 3] = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]];

/// The instances of one top-level acceleration structure.
///
/// Every bake copies the whole instance array into a persistently mapped upload buffer, updates
/// included.  The buffer holds one region per frame slot, and a bake writes only the region of
/// the slot it records in, so builds of frames still in flight keep reading their own instances.
#[derive(Debug)]
pub struct InstanceCollection {
    structure: Structure,
    instances: Vec<Instance>,
    instance_buffer: Option<Arc<Allocation>>,
    //bytes per frame slot in the instance buffer
    instance_region: u64,
    instance_offset: u64,
    //bottom-level result ids seen by the last bake, per instance
    baked_geometries: Vec<Option<u64>>,
}

impl InstanceCollection {
    pub fn new(label: &str) -> Self {
        InstanceCollection {
            structure: Structure::new(label),
            instances: Vec::new(),
            instance_buffer: None,
            instance_region: 0,
            instance_offset: 0,
            baked_geometries: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.structure.label
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Places `geometry` in the scene, returning the instance index.
    ///
    /// The instance starts fully visible (mask `0xff`), at hit-group contribution 0, with its index
    /// as instance ID.
    pub fn add(&mut self, geometry: &GeometryCollection, transform: [[f32; 4]; 3]) -> usize {
        let index = self.instances.len();
        self.instances.push(Instance {
            geometry: geometry.handle(),
            transform,
            mask: 0xff,
            contribution: 0,
            instance_id: index as u32 & MAX_24_BIT,
        });
        self.structure.versions.mark_structural();
        index
    }

    /// [InstanceCollection::add] with an identity transform.
    pub fn add_identity(&mut self, geometry: &GeometryCollection) -> usize {
        self.add(geometry, IDENTITY)
    }

    fn instance_mut(&mut self, index: usize) -> Result<&mut Instance, Error> {
        let label = &self.structure.label;
        self.instances
            .get_mut(index)
            .ok_or_else(|| Error::invalid(format!("no instance {index} in {label}")))
    }

    pub fn set_transform(&mut self, index: usize, transform: [[f32; 4]; 3]) -> Result<(), Error> {
        self.instance_mut(index)?.transform = transform;
        self.structure.versions.mark_updating();
        Ok(())
    }

    pub fn set_mask(&mut self, index: usize, mask: u8) -> Result<(), Error> {
        self.instance_mut(index)?.mask = mask;
        self.structure.versions.mark_updating();
        Ok(())
    }

    pub fn set_contribution(&mut self, index: usize, contribution: u32) -> Result<(), Error> {
        if contribution > MAX_24_BIT {
            return Err(Error::invalid(format!("hit-group contribution {contribution} exceeds 24 bits")));
        }
        self.instance_mut(index)?.contribution = contribution;
        self.structure.versions.mark_updating();
        Ok(())
    }

    pub fn set_instance_id(&mut self, index: usize, instance_id: u32) -> Result<(), Error> {
        if instance_id > MAX_24_BIT {
            return Err(Error::invalid(format!("instance ID {instance_id} exceeds 24 bits")));
        }
        self.instance_mut(index)?.instance_id = instance_id;
        self.structure.versions.mark_updating();
        Ok(())
    }

    /// Removes an instance; later instances shift down by one.
    pub fn remove(&mut self, index: usize) -> Result<Instance, Error> {
        if index >= self.instances.len() {
            return Err(Error::invalid(format!("no instance {index} in {}", self.label())));
        }
        self.structure.versions.mark_structural();
        Ok(self.instances.remove(index))
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.structure.versions.mark_structural();
    }

    //whether a referenced bottom-level structure moved to other buffers since the last bake
    fn geometry_moved(&self) -> bool {
        self.instances
            .iter()
            .zip(&self.baked_geometries)
            .any(|(instance, baked)| instance.geometry.allocation().map(|a| a.id()) != *baked)
    }

    pub fn state(&self) -> CollectionState {
        match self.structure.state() {
            CollectionState::UpToDate if self.geometry_moved() => {
                if self.structure.allows_update() {
                    CollectionState::NeedsUpdate
                } else {
                    CollectionState::NeedsRebuild
                }
            }
            state => state,
        }
    }

    /// Handle to the top-level structure, for binding to ray-tracing pipelines.
    pub fn handle(&self) -> AccelerationStructureHandle {
        self.structure.handle.clone()
    }

    /// Allocation id of the baked result buffer.
    pub fn result_id(&self) -> Option<u64> {
        self.structure.result().map(|r| r.id())
    }

    pub fn baked_flags(&self) -> Option<BuildFlags> {
        self.structure.baked_flags()
    }

    /// The instance buffer, one region per frame slot.
    pub fn instance_buffer(&self) -> Option<&Arc<Allocation>> {
        self.instance_buffer.as_ref()
    }

    /// Byte offset of the region the last bake wrote.
    pub fn instance_offset(&self) -> u64 {
        self.instance_offset
    }

    /// Records whatever build brings the top-level structure up to date.
    ///
    /// Every referenced geometry collection must have been baked first, in this or an earlier
    /// process.
    pub fn to_gpu(&mut self, ctx: &mut CommandContext<'_>, options: BuildOptions) -> Result<BakeOutcome, Error> {
        let state = self.state();
        if state == CollectionState::UpToDate {
            self.structure.allow_update |= options.allow_update;
            return Ok(BakeOutcome::Skipped);
        }
        let mut bytes = Vec::with_capacity(self.instances.len() * INSTANCE_DESC_SIZE as usize);
        let mut geometries = Vec::with_capacity(self.instances.len());
        for (index, instance) in self.instances.iter().enumerate() {
            let geometry = instance.geometry.allocation().ok_or_else(|| {
                Error::invalid(format!(
                    "instance {index} of {} references an unbuilt geometry collection",
                    self.label()
                ))
            })?;
            instance.encode(geometry.gpu_address(), &mut bytes);
            geometries.push(Some(geometry.id()));
        }
        let needed = (bytes.len() as u64).max(INSTANCE_DESC_SIZE);
        let buffer = match &self.instance_buffer {
            Some(buffer) if self.instance_region >= needed => buffer.clone(),
            _ => {
                let frames = ctx.device().frames() as u64;
                let buffer = ctx.device().imp().create_allocation(
                    &format!("{} instances", self.label()),
                    needed * frames,
                    MemoryHeap::Upload,
                )?;
                self.instance_buffer = Some(buffer.clone());
                self.instance_region = needed;
                buffer
            }
        };
        let offset = ctx.frame_slot() as u64 * self.instance_region;
        buffer.write_mapped(offset, &bytes)?;
        self.instance_offset = offset;
        let inputs = BuildInputs::TopLevel {
            instances: buffer.gpu_address() + offset,
            instance_count: self.instances.len() as u32,
        };
        let outcome = self.structure.bake(ctx, options, state, inputs)?;
        self.baked_geometries = geometries;
        Ok(outcome)
    }
}
