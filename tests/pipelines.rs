use fences_and_frames::bindings::bind_style::{BindSlot, BindStyle, PersistentTable, RangeType};
use fences_and_frames::bindings::resource::{CpuAccess, View, ViewKind};
use fences_and_frames::bindings::resource_tracking::ResourceState;
use fences_and_frames::config::SchedulerDescriptor;
use fences_and_frames::error::{DeviceRemovedReason, Error};
use fences_and_frames::images::pipeline::{HitGroup, Pipeline, RaytracingDescriptor, TableKind};
use fences_and_frames::images::shader::ShaderBytecode;
use fences_and_frames::images::{BoundDevice, EngineKind, EngineMask, Port, Scheduler, process};
use fences_and_frames::imp::{Command, DescriptorContent, Device, DeviceDescriptor, QueueEvent};
use fences_and_frames::raytracing::{BuildOptions, GeometryCollection, InstanceCollection, TriangleGeometry};
use std::sync::Arc;

fn bind(descriptor: &SchedulerDescriptor) -> Arc<BoundDevice> {
    let device = Device::new(DeviceDescriptor {
        record_events: true,
        ..Default::default()
    });
    BoundDevice::bind(device, descriptor).unwrap()
}

fn setup() -> (Arc<BoundDevice>, Scheduler) {
    let descriptor = SchedulerDescriptor {
        threads: 2,
        ..Default::default()
    };
    let device = bind(&descriptor);
    let scheduler = Scheduler::new(device.clone(), descriptor).unwrap();
    (device, scheduler)
}

fn flush(scheduler: &Scheduler) {
    let signal = scheduler.flush_and_signal(EngineMask::all()).unwrap();
    scheduler.wait_for(&signal).unwrap();
}

fn submitted_commands(device: &BoundDevice) -> Vec<Command> {
    device
        .imp()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::Submitted { lists, .. } => Some(lists),
            _ => None,
        })
        .flatten()
        .flat_map(|list| list.commands.clone())
        .collect()
}

fn shader(label: &str) -> ShaderBytecode {
    ShaderBytecode::from_bytes(label, vec![0xde, 0xad, 0xbe, 0xef])
}

#[test]
fn compute_pipeline_binds_globals_then_locals() {
    let (device, scheduler) = setup();
    let constants = device.create_buffer("constants", 256, 1, CpuAccess::WriteOnlyUpload).unwrap();
    let output = device.create_texture_2d("output", 4, 16, 16, 1).unwrap();
    let mut style = BindStyle::new();
    style.bind_view(BindSlot::new(0), RangeType::Cbv, &constants);
    style.declare_local(BindSlot::new(0), RangeType::Uav, 1);
    let pipeline = Pipeline::compute("blur", shader("blur"), style).unwrap();
    assert_eq!(pipeline.root_signature().global_parameters().len(), 1);
    assert_eq!(pipeline.root_signature().local_parameters().len(), 1);

    scheduler
        .enqueue(process(EngineKind::Compute, |ctx| {
            assert!(matches!(ctx.dispatch(1, 1, 1), Err(Error::InvalidOperation(_))));
            ctx.set_pipeline(&pipeline)?;
            ctx.bind_local(BindSlot::new(0), RangeType::Uav, &[&output])?;
            ctx.dispatch(4, 4, 1)?;
            assert!(matches!(ctx.draw(3, 1), Err(Error::InvalidOperation(_))));
            Ok(())
        }))
        .unwrap();
    flush(&scheduler);

    let commands: Vec<Command> = submitted_commands(&device)
        .into_iter()
        .filter(|c| !matches!(c, Command::Transition { .. } | Command::UavBarrier { .. }))
        .collect();
    assert!(matches!(&commands[0], Command::SetPipeline { label } if label == "blur"));
    assert!(matches!(commands[1], Command::SetDescriptorTable { parameter: 0, .. }));
    assert!(matches!(commands[2], Command::SetDescriptorTable { parameter: 1, .. }));
    assert!(matches!(commands[3], Command::Dispatch { x: 4, y: 4, z: 1 }));
    assert_eq!(output.resource().state(), ResourceState::UNORDERED_ACCESS);
}

/// The descriptor the GPU heap holds at the start of the table behind `gpu_handle`.
fn bound_descriptor(device: &BoundDevice, gpu_handle: u64) -> Option<DescriptorContent> {
    let heap = device.gpu_heap();
    let stride = heap.gpu_handle(1) - heap.gpu_handle(0);
    heap.read(((gpu_handle - heap.gpu_handle(0)) / stride) as u32)
}

fn table_handles(device: &BoundDevice) -> Vec<(u32, u64)> {
    submitted_commands(device)
        .into_iter()
        .filter_map(|c| match c {
            Command::SetDescriptorTable { parameter, gpu_handle } => Some((parameter, gpu_handle)),
            _ => None,
        })
        .collect()
}

#[test]
fn views_dropped_before_flush_stay_bound() {
    let (device, scheduler) = setup();
    let particles = device.create_buffer("particles", 16, 32, CpuAccess::None).unwrap();
    let forces = device.create_buffer("forces", 16, 32, CpuAccess::None).unwrap();
    let particles_id = particles.resource().id();
    let forces_id = forces.resource().id();
    let mut forces = Some(forces);
    scheduler
        .enqueue(process(EngineKind::Compute, |ctx| {
            let mut style = BindStyle::new();
            if let Some(forces) = forces.take() {
                style.bind_view(BindSlot::new(0), RangeType::Srv, &forces);
            }
            style.declare_local(BindSlot::new(1), RangeType::Uav, 1);
            let pipeline = Pipeline::compute("simulate", shader("simulate"), style)?;
            ctx.set_pipeline(&pipeline)?;
            let upper = particles.slice_array(8, 16)?;
            ctx.bind_local(BindSlot::new(1), RangeType::Uav, &[&upper])?;
            drop(upper);
            //takes over a freed CPU slot
            particles.slice_array(0, 4)?.descriptor(ViewKind::Srv)?;
            ctx.dispatch(1, 1, 1)
        }))
        .unwrap();
    flush(&scheduler);

    let tables = table_handles(&device);
    assert_eq!(tables.len(), 2);
    assert!(matches!(
        bound_descriptor(&device, tables[0].1),
        Some(DescriptorContent::View { resource, kind: ViewKind::Srv, .. }) if resource == forces_id
    ));
    assert!(matches!(
        bound_descriptor(&device, tables[1].1),
        Some(DescriptorContent::View { resource, kind: ViewKind::Uav, first_element: 8, element_count: 16, .. })
            if resource == particles_id
    ));
}

#[test]
fn pipelines_run_on_matching_engines() {
    let graphics = Pipeline::graphics("quad", shader("vs"), shader("ps"), BindStyle::new()).unwrap();
    let compute = Pipeline::compute("cs", shader("cs"), BindStyle::new()).unwrap();
    let (_device, scheduler) = setup();
    scheduler
        .enqueue(process(EngineKind::Graphics, |ctx| {
            ctx.set_pipeline(&graphics)?;
            ctx.draw(3, 1)?;
            ctx.set_pipeline(&compute)?;
            ctx.dispatch(1, 1, 1)
        }))
        .unwrap();
    flush(&scheduler);

    let (_device, scheduler) = setup();
    let result = scheduler.enqueue(process(EngineKind::Compute, |ctx| ctx.set_pipeline(&graphics)));
    assert!(matches!(result, Err(Error::InvalidOperation(_))));
    let (_device, scheduler) = setup();
    let result = scheduler.enqueue(process(EngineKind::Copy, |ctx| ctx.set_pipeline(&compute)));
    assert!(matches!(result, Err(Error::InvalidOperation(_))));
}

#[test]
fn persistent_tables_bind_in_place() {
    let (device, scheduler) = setup();
    let textures: Vec<View> = (0..2)
        .map(|i| device.create_texture_2d(&format!("texture {i}"), 4, 4, 4, 1).unwrap())
        .collect();
    let table = PersistentTable::new(&device, RangeType::Srv, 8).unwrap();
    table.set(1, Some(&textures[1])).unwrap();
    table.set(5, Some(&textures[0])).unwrap();
    assert!(table.set(8, None).is_err());
    let mut style = BindStyle::new();
    style.bind_persistent(BindSlot::in_space(0, 1), RangeType::Srv, &table);
    let pipeline = Pipeline::compute("bindless", shader("bindless"), style).unwrap();
    scheduler
        .enqueue(process(EngineKind::Compute, |ctx| ctx.set_pipeline(&pipeline)))
        .unwrap();
    flush(&scheduler);
    let handle = table.gpu_handle();
    assert!(
        submitted_commands(&device)
            .iter()
            .any(|c| matches!(c, Command::SetDescriptorTable { parameter: 0, gpu_handle } if *gpu_handle == handle))
    );
}

fn raytracing_pipeline(device: &BoundDevice, structure: &InstanceCollection) -> Arc<Pipeline> {
    let mut style = BindStyle::new();
    style.bind_acceleration_structure(BindSlot::new(0), &structure.handle());
    style.declare_local(BindSlot::new(0), RangeType::Uav, 1);
    let descriptor = RaytracingDescriptor {
        library: shader("library"),
        ray_generation: "raygen".to_string(),
        misses: vec!["miss".to_string()],
        hit_groups: vec![HitGroup::triangles("hit", "closest")],
        hit_records: 2,
        max_recursion: 1,
    };
    Pipeline::raytracing(device, "paths", descriptor, style).unwrap()
}

#[test]
fn ray_dispatch_requires_built_structure() {
    let (device, scheduler) = setup();
    let geometry = GeometryCollection::new("unbaked");
    let mut instances = InstanceCollection::new("scene");
    instances.add_identity(&geometry);
    let pipeline = raytracing_pipeline(&device, &instances);
    let output = device.create_texture_2d("output", 4, 8, 8, 1).unwrap();
    let locals: [&[&View]; 1] = [&[&output]];
    let result = scheduler.enqueue(process(EngineKind::Compute, |ctx| {
        ctx.set_pipeline(&pipeline)?;
        ctx.populate_shader_record(TableKind::RayGeneration, 0, "raygen", &locals)?;
        ctx.dispatch_rays(8, 8, 1)
    }));
    assert!(matches!(result, Err(Error::InvalidOperation(message)) if message.contains("unbuilt")));
}

#[test]
fn shader_records_are_populated_per_frame() {
    let (device, mut scheduler) = setup();
    let vertices = device.create_buffer("vertices", 12, 3, CpuAccess::None).unwrap();
    let mut geometry = GeometryCollection::new("triangle");
    geometry.add_triangles(TriangleGeometry::new(vertices)).unwrap();
    let mut instances = InstanceCollection::new("scene");
    instances.add_identity(&geometry);
    instances.add_identity(&geometry);
    let pipeline = raytracing_pipeline(&device, &instances);
    let output = device.create_texture_2d("output", 4, 8, 8, 1).unwrap();
    let locals: [&[&View]; 1] = [&[&output]];

    scheduler.setup_frame(0).unwrap();
    scheduler
        .enqueue(process(EngineKind::Compute, |ctx| {
            geometry.to_gpu(ctx, BuildOptions::default())?;
            instances.to_gpu(ctx, BuildOptions::default())?;
            ctx.set_pipeline(&pipeline)?;
            assert!(matches!(ctx.dispatch_rays(8, 8, 1), Err(Error::InvalidOperation(_))));
            ctx.populate_shader_record(TableKind::RayGeneration, 0, "raygen", &locals)?;
            ctx.populate_shader_record(TableKind::Miss, 0, "miss", &locals)?;
            ctx.populate_shader_record(TableKind::HitGroup, 1, "hit", &locals)?;
            assert!(ctx.populate_shader_record(TableKind::HitGroup, 0, "raygen", &locals).is_err());
            assert!(ctx.populate_shader_record(TableKind::HitGroup, 2, "hit", &locals).is_err());
            ctx.dispatch_rays(8, 8, 1)
        }))
        .unwrap();
    scheduler.finish_frame().unwrap();

    let raytracing = pipeline.raytracing_pipeline().unwrap();
    let record = raytracing.table(TableKind::RayGeneration).record(0, 0).unwrap();
    assert_eq!(&record[..32], &device.imp().shader_identifier("raygen"));
    assert_eq!(record.len() as u64, pipeline.root_signature().record_stride());
    assert!(
        submitted_commands(&device)
            .iter()
            .any(|c| matches!(c, Command::DispatchRays { width: 8, height: 8, depth: 1, .. }))
    );

    scheduler.setup_frame(1).unwrap();
    let result = scheduler.enqueue(process(EngineKind::Compute, |ctx| {
        ctx.set_pipeline(&pipeline)?;
        ctx.dispatch_rays(8, 8, 1)
    }));
    assert!(matches!(result, Err(Error::InvalidOperation(message)) if message.contains("ray generation")));
    assert!(device.imp().removed_reason().is_none());
}

#[test]
fn port_presents_each_frame() {
    let descriptor = SchedulerDescriptor {
        threads: 2,
        frames: 2,
        ..Default::default()
    };
    let device = bind(&descriptor);
    let mut port = Port::new(device.clone(), descriptor, 32, 32).unwrap();
    assert!(port.end_frame().is_err());
    for expected in 0..5 {
        let frame = port.begin_frame().unwrap();
        assert_eq!(frame, expected);
        assert!(port.begin_frame().is_err());
        let back_buffer = port.back_buffer();
        assert_eq!(back_buffer.resource().state(), ResourceState::RENDER_TARGET);
        port.scheduler()
            .enqueue(process(EngineKind::Graphics, |ctx| {
                ctx.clear_render_target(back_buffer, Some([0.2, 0.3, 0.4, 1.0]))
            }))
            .unwrap();
        let info = port.end_frame().unwrap();
        assert_eq!(port.back_buffer().resource().state(), ResourceState::PRESENT);
        assert_eq!(info.frame, expected);
        assert!(info.signal.fence(EngineKind::Graphics) > 0);
    }
    assert_eq!(port.presented(), 5);
    let presents = device
        .imp()
        .events()
        .iter()
        .filter(|e| matches!(e, QueueEvent::Presented { .. }))
        .count();
    assert_eq!(presents, 5);

    let clears = submitted_commands(&device)
        .iter()
        .filter(|c| matches!(c, Command::ClearRenderTarget { .. }))
        .count();
    assert_eq!(clears, 5);

    device.imp().remove(DeviceRemovedReason::Reset);
    assert_eq!(
        port.begin_frame(),
        Err(Error::DeviceRemoved {
            reason: DeviceRemovedReason::Reset
        })
    );
}

