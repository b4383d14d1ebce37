// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The recording context a GPU process receives.

A context is bound to one engine's command list for one scheduler thread, for the duration of
one process.  Every operation records into that list in program order.  Resources are moved to
the state an operation needs first; see [crate::bindings::resource_tracking] for when that
records a barrier.

Operations that could not execute correctly fail synchronously with
[Error::InvalidOperation]: drawing without a graphics pipeline, dispatching without a compute
pipeline, dispatching rays without a ray-tracing pipeline, without a populated ray generation
record, or with an unbuilt acceleration structure bound.
*/

use crate::bindings::bind_style::{BindSlot, BindTarget, RangeType};
use crate::bindings::resource::{CpuAccess, View, ViewKind};
use crate::bindings::resource_tracking::{Barrier, ResourceState};
use crate::error::Error;
use crate::images::BoundDevice;
use crate::images::engine::{EngineKind, ThreadList};
use crate::images::pipeline::{Pipeline, PipelineKind, TableKind};
use crate::imp::{AccelerationStructureBuild, Allocation, Command, CopyRegion, DescriptorContent};
use std::sync::Arc;

fn state_for(kind: ViewKind) -> ResourceState {
    match kind {
        ViewKind::Srv => ResourceState::ALL_SHADER_RESOURCE,
        ViewKind::Uav => ResourceState::UNORDERED_ACCESS,
        ViewKind::Cbv => ResourceState::VERTEX_AND_CONSTANT_BUFFER,
        ViewKind::Rtv => ResourceState::RENDER_TARGET,
        ViewKind::Dsv => ResourceState::DEPTH_WRITE,
    }
}

pub struct CommandContext<'a> {
    device: &'a Arc<BoundDevice>,
    list: &'a mut ThreadList,
    engine: EngineKind,
    thread: usize,
    slot: usize,
    frame: u64,
    pipeline: Option<Arc<Pipeline>>,
    //set when the bound pipeline's acceleration structure was unbuilt at bind time
    unbuilt_structure: bool,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(
        device: &'a Arc<BoundDevice>,
        list: &'a mut ThreadList,
        engine: EngineKind,
        thread: usize,
        slot: usize,
        frame: u64,
    ) -> Self {
        CommandContext {
            device,
            list,
            engine,
            thread,
            slot,
            frame,
            pipeline: None,
            unbuilt_structure: false,
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Scheduler thread recording this context.  Thread 0 is the caller's thread.
    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn frame_slot(&self) -> usize {
        self.slot
    }

    /// Number of the frame being recorded.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn device(&self) -> &Arc<BoundDevice> {
        self.device
    }

    pub(crate) fn record(&mut self, command: Command) {
        self.list.list.record(command);
    }

    /// Records a debug marker.
    pub fn marker(&mut self, label: &str) {
        self.record(Command::Marker(label.to_string()));
    }

    /// Moves the view's resource into `state`, recording a barrier if one is needed.
    pub fn barrier(&mut self, view: &View, state: ResourceState) {
        let resource = view.resource();
        match resource.request_state(state) {
            Barrier::None => {}
            Barrier::Transition { before, after } => self.record(Command::Transition {
                resource: resource.id(),
                before,
                after,
            }),
            Barrier::UnorderedAccess => self.record(Command::UavBarrier {
                resource: resource.id(),
            }),
        }
    }

    /// Orders unordered-access writes to the view's resource.
    pub fn uav_barrier(&mut self, view: &View) {
        self.record(Command::UavBarrier {
            resource: view.resource().id(),
        });
    }

    pub(crate) fn uav_barrier_allocation(&mut self, allocation: &Allocation) {
        self.record(Command::UavBarrier {
            resource: allocation.id(),
        });
    }

    /// Copies data written with [View::write_data] from staging into the resource.
    ///
    /// Nothing is recorded for resources living in upload memory.
    pub fn upload(&mut self, view: &View) -> Result<(), Error> {
        let resource = view.resource();
        match resource.cpu_access() {
            CpuAccess::WriteOnlyUpload => return Ok(()),
            CpuAccess::ReadOnlyDownload => {
                return Err(Error::invalid(format!("upload into read-only {}", resource.label())));
            }
            CpuAccess::None => {}
        }
        let staging = resource
            .existing_upload_staging()
            .cloned()
            .ok_or_else(|| Error::invalid(format!("upload of {} before any data was written", resource.label())))?;
        self.barrier(view, ResourceState::COPY_DEST);
        self.record(Command::Copy {
            src: staging,
            dst: resource.allocation().clone(),
            regions: view.staging_regions(false),
        });
        Ok(())
    }

    /// Copies the view into its readback staging buffer, for [View::read_data] after the flush completes.
    ///
    /// Nothing is recorded for resources living in readback memory.
    pub fn download(&mut self, view: &View) -> Result<(), Error> {
        let resource = view.resource();
        match resource.cpu_access() {
            CpuAccess::ReadOnlyDownload => return Ok(()),
            CpuAccess::WriteOnlyUpload => {
                return Err(Error::invalid(format!("download of write-only {}", resource.label())));
            }
            CpuAccess::None => {}
        }
        let staging = resource.readback_staging()?.clone();
        self.barrier(view, ResourceState::COPY_SOURCE);
        self.record(Command::Copy {
            src: resource.allocation().clone(),
            dst: staging,
            regions: view.staging_regions(true),
        });
        Ok(())
    }

    /// Copies `src` onto `dst`.  The views must cover identically shaped ranges.
    pub fn copy(&mut self, dst: &View, src: &View) -> Result<(), Error> {
        let dst_regions = dst.packed_regions();
        let src_regions = src.packed_regions();
        let compatible = dst.resource().dimension() == src.resource().dimension()
            && dst.resource().stride() == src.resource().stride()
            && dst_regions.len() == src_regions.len()
            && dst_regions.iter().zip(&src_regions).all(|(d, s)| d.len == s.len);
        if !compatible {
            return Err(Error::invalid(format!(
                "copy from {} into differently shaped {}",
                src.resource().label(),
                dst.resource().label()
            )));
        }
        if dst.resource().cpu_access() == CpuAccess::WriteOnlyUpload {
            return Err(Error::invalid(format!("copy into upload resource {}", dst.resource().label())));
        }
        self.barrier(src, ResourceState::COPY_SOURCE);
        self.barrier(dst, ResourceState::COPY_DEST);
        let regions = dst_regions
            .iter()
            .zip(&src_regions)
            .map(|(d, s)| CopyRegion {
                src_offset: s.src_offset,
                dst_offset: d.dst_offset,
                len: d.len,
            })
            .collect();
        self.record(Command::Copy {
            src: src.resource().allocation().clone(),
            dst: dst.resource().allocation().clone(),
            regions,
        });
        Ok(())
    }

    /// Clears a render target to `color`, or to its clear value when `None`.
    pub fn clear_render_target(&mut self, view: &View, color: Option<[f32; 4]>) -> Result<(), Error> {
        if self.engine != EngineKind::Graphics {
            return Err(Error::invalid(format!("clear on the {} engine", self.engine.name())));
        }
        view.descriptor(ViewKind::Rtv)?;
        self.barrier(view, ResourceState::RENDER_TARGET);
        let color = color.or(view.resource().clear_value()).unwrap_or_default();
        self.record(Command::ClearRenderTarget {
            resource: view.resource().id(),
            color,
        });
        Ok(())
    }

    /// Copies a table of views into the frame ring, returning its shader-visible handle.
    fn stage_table(&mut self, views: &[Option<&View>], kind: ViewKind) -> Result<u64, Error> {
        let device = self.device;
        let heap = device.gpu_heap();
        let start = heap.allocate_in_frame(views.len() as u32)?;
        let cpu_heap = device.cpu_heaps().for_kind(kind.heap_kind()).raw();
        for (i, view) in views.iter().enumerate() {
            let cpu_slot = match view {
                Some(view) => {
                    let slot = view.descriptor(kind)?;
                    self.barrier(view, state_for(kind));
                    slot
                }
                None => device.null_descriptor(kind)?,
            };
            let content = cpu_heap.read(cpu_slot).unwrap_or(DescriptorContent::Null(kind));
            self.list.queue_descriptor_copy(start + i as u32, content);
        }
        Ok(heap.gpu_handle(start))
    }

    /// Sets the pipeline and binds its global bindings.
    pub fn set_pipeline(&mut self, pipeline: &Arc<Pipeline>) -> Result<(), Error> {
        if !pipeline.runs_on(self.engine) {
            return Err(Error::invalid(format!(
                "pipeline {} set on the {} engine",
                pipeline.label(),
                self.engine.name()
            )));
        }
        self.record(Command::SetPipeline {
            label: pipeline.label().to_string(),
        });
        self.unbuilt_structure = false;
        let root = pipeline.root_signature();
        for (index, parameter) in root.global_parameters().iter().enumerate() {
            let Some(info) = pipeline.bind_style().get(parameter.slot, parameter.range) else {
                continue;
            };
            let gpu_handle = match &info.target {
                BindTarget::Views(views) => {
                    let views = views.iter().map(Option::as_ref).collect::<Vec<_>>();
                    self.stage_table(&views, parameter.range.view_kind())?
                }
                BindTarget::Persistent(table) => table.gpu_handle(),
                BindTarget::AccelerationStructure(handle) => {
                    let device = self.device;
                    let heap = device.gpu_heap();
                    let slot = heap.allocate_in_frame(1)?;
                    let content = match handle.allocation() {
                        Some(structure) => DescriptorContent::View {
                            resource: structure.id(),
                            kind: ViewKind::Srv,
                            first_mip: 0,
                            mip_count: 1,
                            first_element: 0,
                            element_count: 1,
                        },
                        None => {
                            self.unbuilt_structure = true;
                            DescriptorContent::Null(ViewKind::Srv)
                        }
                    };
                    heap.raw().write(slot, content)?;
                    heap.gpu_handle(slot)
                }
                BindTarget::Local => continue,
            };
            self.record(Command::SetDescriptorTable {
                parameter: index as u32,
                gpu_handle,
            });
        }
        self.pipeline = Some(pipeline.clone());
        Ok(())
    }

    fn local_table(&mut self, slot: BindSlot, range: RangeType, views: &[&View]) -> Result<(u32, u64), Error> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| Error::invalid("local binding without a pipeline"))?;
        let root = pipeline.root_signature();
        let local = root
            .local_index(slot, range)
            .ok_or_else(|| Error::invalid(format!("{slot:?} {range:?} is not a local binding of {}", pipeline.label())))?;
        let parameter = root.local_parameters()[local];
        if views.len() as u32 > parameter.count {
            return Err(Error::invalid(format!(
                "{} views bound to a local range of {}",
                views.len(),
                parameter.count
            )));
        }
        let mut entries: Vec<Option<&View>> = views.iter().copied().map(Some).collect();
        entries.resize(parameter.count as usize, None);
        let handle = self.stage_table(&entries, range.view_kind())?;
        Ok((local as u32, handle))
    }

    /// Binds a local range of the current compute or graphics pipeline for the following draws/dispatches.
    pub fn bind_local(
        &mut self,
        slot: BindSlot,
        range: RangeType,
        views: &[&View],
    ) -> Result<(), Error> {
        if let Some(pipeline) = &self.pipeline {
            if pipeline.raytracing_pipeline().is_some() {
                return Err(Error::invalid(
                    "ray-tracing local bindings live in shader records",
                ));
            }
        }
        let (local, gpu_handle) = self.local_table(slot, range, views)?;
        let globals = self
            .pipeline
            .as_ref()
            .map(|p| p.root_signature().global_parameters().len() as u32)
            .unwrap_or_default();
        self.record(Command::SetDescriptorTable {
            parameter: globals + local,
            gpu_handle,
        });
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), Error> {
        if !matches!(self.pipeline.as_deref().map(Pipeline::kind), Some(PipelineKind::Compute { .. })) {
            return Err(Error::invalid("dispatch without a compute pipeline"));
        }
        self.record(Command::Dispatch { x, y, z });
        Ok(())
    }

    pub fn draw(&mut self, vertices: u32, instances: u32) -> Result<(), Error> {
        if !matches!(self.pipeline.as_deref().map(Pipeline::kind), Some(PipelineKind::Graphics { .. })) {
            return Err(Error::invalid("draw without a graphics pipeline"));
        }
        self.record(Command::Draw { vertices, instances });
        Ok(())
    }

    /// Writes record `index` of a shader table of the current ray-tracing pipeline for this frame.
    ///
    /// `locals` holds the views of each local binding, in root-signature order.
    pub fn populate_shader_record(&mut self, table: TableKind, index: u32, export: &str, locals: &[&[&View]]) -> Result<(), Error> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| Error::invalid("shader record populated without a pipeline"))?;
        let raytracing = pipeline
            .raytracing_pipeline()
            .ok_or_else(|| Error::invalid(format!("{} is not a ray-tracing pipeline", pipeline.label())))?;
        if !raytracing.exports(table, export) {
            return Err(Error::invalid(format!(
                "{export} is not a {table:?} export of {}",
                pipeline.label()
            )));
        }
        let parameters = pipeline.root_signature().local_parameters();
        if locals.len() != parameters.len() {
            return Err(Error::invalid(format!(
                "{} local tables supplied for {} local bindings",
                locals.len(),
                parameters.len()
            )));
        }
        let mut handles = Vec::with_capacity(locals.len());
        for (parameter, views) in parameters.iter().zip(locals) {
            let (_, handle) = self.local_table(parameter.slot, parameter.range, views)?;
            handles.push(handle);
        }
        let identifier = self.device.imp().shader_identifier(export);
        raytracing
            .table(table)
            .write_record(self.slot, self.frame, index, &identifier, &handles)
    }

    pub fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> Result<(), Error> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| Error::invalid("dispatch rays without a ray-tracing pipeline"))?;
        let raytracing = pipeline
            .raytracing_pipeline()
            .ok_or_else(|| Error::invalid("dispatch rays without a ray-tracing pipeline"))?;
        if self.unbuilt_structure {
            return Err(Error::invalid(format!(
                "dispatch rays on {} with an unbuilt acceleration structure",
                pipeline.label()
            )));
        }
        let ray_generation = raytracing.table(TableKind::RayGeneration);
        if !ray_generation.is_populated(self.slot, self.frame, 0) {
            return Err(Error::invalid(format!(
                "dispatch rays on {} before populating its ray generation record",
                pipeline.label()
            )));
        }
        self.record(Command::DispatchRays {
            width,
            height,
            depth,
            ray_generation: ray_generation.range(self.slot),
            miss: raytracing.table(TableKind::Miss).range(self.slot),
            hit_groups: raytracing.table(TableKind::HitGroup).range(self.slot),
        });
        Ok(())
    }

    pub(crate) fn build_acceleration_structure(&mut self, build: AccelerationStructureBuild) -> Result<(), Error> {
        if self.engine == EngineKind::Copy {
            return Err(Error::invalid("acceleration structure build on the copy engine"));
        }
        self.record(Command::BuildAccelerationStructure(build));
        Ok(())
    }
}
