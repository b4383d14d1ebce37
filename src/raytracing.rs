// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Acceleration structures and their lifecycle.

A [GeometryCollection] describes the triangles and boxes of one bottom-level structure; an
[InstanceCollection] places bottom-level structures in the scene as one top-level structure.
Both are edited freely on the CPU and baked onto the GPU with `to_gpu` from inside a process,
typically once per frame.

Every edit moves one of two version counters (see [crate::bindings::dirty_tracking]):

| Edit                                                   | Version     |
|--------------------------------------------------------|-------------|
| add or remove entries, add or drop a geometry transform | structural  |
| swap a vertex buffer, move a transform, change mask/ID/contribution | updating |

and the [CollectionState] follows from comparing them with what the last bake saw:

```text
NotBuilt ──bake──▶ UpToDate ──data edit──▶ NeedsUpdate ──bake (refit in place)──▶ UpToDate
                      │  ▲                       (NeedsRebuild if baked without update support)
             structural edit
                      ▼  │
                  NeedsRebuild ──bake (new build, buffers reused if large enough)──┘
```

Update support is requested through [BuildOptions::allow_update].  Once requested for a
collection it stays requested, but a structure that was already baked without it can only be
rebuilt.  Each build is followed by a UAV barrier on the result so that the top-level build,
or a ray dispatch, waits for it.
*/

mod geometry_collection;
mod instance_collection;

pub use crate::bindings::dirty_tracking::DirtyState as CollectionState;
pub use geometry_collection::{Geometry, GeometryCollection, TransformRef, TriangleGeometry};
pub use instance_collection::{INSTANCE_DESC_SIZE, Instance, InstanceCollection};

use crate::bindings::dirty_tracking::{BakedVersions, Versions};
use crate::error::Error;
use crate::images::command_context::CommandContext;
use crate::imp::{AccelerationStructureBuild, Allocation, BuildFlags, BuildInputs, MemoryHeap};
use parking_lot::Mutex;
use std::sync::Arc;

/// Speed/quality tradeoff of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildPreference {
    #[default]
    FastTrace,
    FastBuild,
}

impl BuildPreference {
    fn flags(self) -> BuildFlags {
        match self {
            BuildPreference::FastTrace => BuildFlags::PREFER_FAST_TRACE,
            BuildPreference::FastBuild => BuildFlags::PREFER_FAST_BUILD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BuildOptions {
    pub preference: BuildPreference,
    /// Request builds that can later be updated in place.
    pub allow_update: bool,
}

impl BuildOptions {
    pub fn updatable() -> Self {
        BuildOptions {
            allow_update: true,
            ..Default::default()
        }
    }
}

/// What a `to_gpu` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BakeOutcome {
    /// The baked structure was up to date.
    Skipped,
    /// The baked structure was refit in place.
    Updated,
    /// The structure was built from scratch, into new buffers if `reallocated`.
    Rebuilt { reallocated: bool },
}

/// A shareable reference to the result buffer of a baked structure.
///
/// Bind it with [crate::bindings::bind_style::BindStyle::bind_acceleration_structure], or
/// reference a bottom-level structure from instances.  The handle stays empty until the first bake
/// and follows the structure into new buffers on reallocation.
#[derive(Debug, Clone, Default)]
pub struct AccelerationStructureHandle(Arc<Mutex<Option<Arc<Allocation>>>>);

impl AccelerationStructureHandle {
    pub fn is_built(&self) -> bool {
        self.0.lock().is_some()
    }

    pub fn gpu_address(&self) -> Option<u64> {
        self.0.lock().as_ref().map(|a| a.gpu_address())
    }

    pub fn allocation(&self) -> Option<Arc<Allocation>> {
        self.0.lock().clone()
    }

    fn set(&self, allocation: Arc<Allocation>) {
        *self.0.lock() = Some(allocation);
    }
}

#[derive(Debug)]
struct Baked {
    result: Arc<Allocation>,
    scratch: Arc<Allocation>,
    flags: BuildFlags,
    versions: BakedVersions,
}

/// Bake bookkeeping shared by both collection kinds.
#[derive(Debug)]
struct Structure {
    label: String,
    versions: Versions,
    allow_update: bool,
    baked: Option<Baked>,
    handle: AccelerationStructureHandle,
}

impl Structure {
    fn new(label: &str) -> Self {
        Structure {
            label: label.to_string(),
            versions: Versions::default(),
            allow_update: false,
            baked: None,
            handle: AccelerationStructureHandle::default(),
        }
    }

    fn state(&self) -> CollectionState {
        CollectionState::derive(self.versions, self.baked.as_ref().map(|b| b.versions))
    }

    fn allows_update(&self) -> bool {
        self.baked.as_ref().is_some_and(|b| b.versions.allows_update)
    }

    fn bake(
        &mut self,
        ctx: &mut CommandContext<'_>,
        options: BuildOptions,
        state: CollectionState,
        inputs: BuildInputs,
    ) -> Result<BakeOutcome, Error> {
        self.allow_update |= options.allow_update;
        match state {
            CollectionState::UpToDate => Ok(BakeOutcome::Skipped),
            CollectionState::NeedsUpdate => {
                let baked = self
                    .baked
                    .as_mut()
                    .ok_or_else(|| Error::invalid(format!("update of unbaked {}", self.label)))?;
                ctx.build_acceleration_structure(AccelerationStructureBuild {
                    inputs,
                    flags: baked.flags | BuildFlags::PERFORM_UPDATE,
                    dest: baked.result.clone(),
                    scratch: baked.scratch.clone(),
                    source: None,
                })?;
                ctx.uav_barrier_allocation(&baked.result);
                baked.versions.versions = self.versions;
                log::trace!("{} updated in place", self.label);
                Ok(BakeOutcome::Updated)
            }
            CollectionState::NotBuilt | CollectionState::NeedsRebuild => {
                let mut flags = options.preference.flags();
                if self.allow_update {
                    flags |= BuildFlags::ALLOW_UPDATE;
                }
                let device = ctx.device().imp().clone();
                let info = device.acceleration_structure_prebuild_info(&inputs, flags);
                let reusable = self.baked.as_ref().filter(|b| {
                    b.result.size() >= info.result_size && b.scratch.size() >= info.scratch_size
                });
                let (result, scratch, reallocated) = match reusable {
                    Some(baked) => (baked.result.clone(), baked.scratch.clone(), false),
                    None => (
                        device.create_allocation(&format!("{} result", self.label), info.result_size, MemoryHeap::Default)?,
                        device.create_allocation(&format!("{} scratch", self.label), info.scratch_size, MemoryHeap::Default)?,
                        true,
                    ),
                };
                ctx.build_acceleration_structure(AccelerationStructureBuild {
                    inputs,
                    flags,
                    dest: result.clone(),
                    scratch: scratch.clone(),
                    source: None,
                })?;
                ctx.uav_barrier_allocation(&result);
                log::trace!(
                    "{} rebuilt ({} bytes, {}reallocated, flags {flags:?})",
                    self.label,
                    result.size(),
                    if reallocated { "" } else { "not " }
                );
                self.handle.set(result.clone());
                self.baked = Some(Baked {
                    result,
                    scratch,
                    flags,
                    versions: BakedVersions {
                        versions: self.versions,
                        allows_update: flags.contains(BuildFlags::ALLOW_UPDATE),
                    },
                });
                Ok(BakeOutcome::Rebuilt { reallocated })
            }
        }
    }

    fn result(&self) -> Option<&Arc<Allocation>> {
        self.baked.as_ref().map(|b| &b.result)
    }

    fn baked_flags(&self) -> Option<BuildFlags> {
        self.baked.as_ref().map(|b| b.flags)
    }
}
