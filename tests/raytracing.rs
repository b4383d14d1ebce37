use fences_and_frames::bindings::resource::{CpuAccess, View};
use fences_and_frames::config::SchedulerDescriptor;
use fences_and_frames::error::Error;
use fences_and_frames::images::command_context::CommandContext;
use fences_and_frames::images::{BoundDevice, EngineKind, EngineMask, Scheduler, process};
use fences_and_frames::imp::{BuildFlags, BuildInputs, Command, Device, DeviceDescriptor, QueueEvent};
use fences_and_frames::raytracing::{
    BakeOutcome, BuildOptions, CollectionState, GeometryCollection, INSTANCE_DESC_SIZE, InstanceCollection,
    TransformRef, TriangleGeometry,
};
use std::sync::Arc;

fn setup() -> (Arc<BoundDevice>, Scheduler) {
    let descriptor = SchedulerDescriptor {
        threads: 2,
        ..Default::default()
    };
    let device = Device::new(DeviceDescriptor {
        record_events: true,
        ..Default::default()
    });
    let device = BoundDevice::bind(device, &descriptor).unwrap();
    let scheduler = Scheduler::new(device.clone(), descriptor).unwrap();
    (device, scheduler)
}

/// Runs `f` on the compute engine, then flushes and waits.
fn record<T: Send>(
    scheduler: &Scheduler,
    mut f: impl FnMut(&mut CommandContext<'_>) -> Result<T, Error> + Send,
) -> Result<T, Error> {
    let mut out = None;
    scheduler.enqueue(process(EngineKind::Compute, |ctx| {
        out = Some(f(ctx)?);
        Ok(())
    }))?;
    let signal = scheduler.flush_and_signal(EngineMask::all())?;
    scheduler.wait_for(&signal)?;
    Ok(out.expect("process ran"))
}

fn triangles(device: &BoundDevice, label: &str, triangles: u32) -> View {
    device.create_buffer(label, 12, triangles * 3, CpuAccess::None).unwrap()
}

fn mesh(device: &BoundDevice, count: u32) -> GeometryCollection {
    let mut geometry = GeometryCollection::new("mesh");
    geometry
        .add_triangles(TriangleGeometry::new(triangles(device, "vertices", count)))
        .unwrap();
    geometry
}

fn translate(x: f32) -> [[f32; 4]; 3] {
    [[1.0, 0.0, 0.0, x], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]]
}

#[test]
fn structural_change_after_fixed_bake_rebuilds() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 4);
    assert_eq!(geometry.state(), CollectionState::NotBuilt);
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    assert_eq!(outcome, BakeOutcome::Rebuilt { reallocated: true });
    assert_eq!(geometry.state(), CollectionState::UpToDate);

    geometry
        .add_triangles(TriangleGeometry::new(triangles(&device, "more", 2)))
        .unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsRebuild);
    record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();

    //data-only edits cannot be absorbed either
    geometry.set_vertex_buffer(0, triangles(&device, "swapped", 4)).unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsRebuild);
    assert!(device.imp().removed_reason().is_none());
}

#[test]
fn data_change_after_updatable_bake_updates() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 4);
    record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::updatable())).unwrap();
    let result = geometry.result_id();
    assert!(geometry.baked_flags().unwrap().contains(BuildFlags::ALLOW_UPDATE));

    geometry.set_vertex_buffer(0, triangles(&device, "swapped", 4)).unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsUpdate);
    let transforms = device.create_buffer("transforms", 48, 2, CpuAccess::WriteOnlyUpload).unwrap();
    geometry
        .set_transform(0, Some(TransformRef { buffer: transforms.clone(), index: 0 }))
        .unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsRebuild);
    record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::updatable())).unwrap();

    geometry
        .set_transform(0, Some(TransformRef { buffer: transforms, index: 1 }))
        .unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsUpdate);
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::updatable())).unwrap();
    assert_eq!(outcome, BakeOutcome::Updated);
    assert_eq!(geometry.state(), CollectionState::UpToDate);
    assert!(result.is_some());
    assert!(device.imp().removed_reason().is_none());
}

#[test]
fn second_bake_without_edits_is_skipped() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 2);
    record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    let result = geometry.result_id();
    device.imp().clear_events();
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    assert_eq!(outcome, BakeOutcome::Skipped);
    assert_eq!(geometry.state(), CollectionState::UpToDate);
    assert_eq!(geometry.result_id(), result);
    let builds = device
        .imp()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::Submitted { lists, .. } => Some(lists),
            _ => None,
        })
        .flatten()
        .flat_map(|list| list.commands.clone())
        .filter(|c| matches!(c, Command::BuildAccelerationStructure(_)))
        .count();
    assert_eq!(builds, 0);
}

#[test]
fn late_update_request_applies_from_next_rebuild() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 4);
    record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    geometry.set_vertex_buffer(0, triangles(&device, "swapped", 4)).unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsRebuild);
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::updatable())).unwrap();
    //updatable structures are larger than the first build's buffers
    assert_eq!(outcome, BakeOutcome::Rebuilt { reallocated: true });

    geometry.set_vertex_buffer(0, triangles(&device, "again", 4)).unwrap();
    assert_eq!(geometry.state(), CollectionState::NeedsUpdate);
    //update support, once requested, stays requested
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    assert_eq!(outcome, BakeOutcome::Updated);
}

#[test]
fn rebuild_reuses_large_enough_buffers() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 8);
    record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    let result = geometry.result_id();
    geometry.clear();
    geometry
        .add_triangles(TriangleGeometry::new(triangles(&device, "smaller", 2)))
        .unwrap();
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    assert_eq!(outcome, BakeOutcome::Rebuilt { reallocated: false });
    assert_eq!(geometry.result_id(), result);
}

#[test]
fn top_level_rebuild_then_update_reuses_result() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 4);
    let mut instances = InstanceCollection::new("scene");
    for i in 0..3 {
        instances.add(&geometry, translate(i as f32));
    }
    record(&scheduler, |ctx| {
        geometry.to_gpu(ctx, BuildOptions::default())?;
        instances.to_gpu(ctx, BuildOptions::updatable())
    })
    .unwrap();
    let result = instances.result_id().unwrap();
    assert_eq!(instances.state(), CollectionState::UpToDate);
    assert!(instances.handle().is_built());

    instances.set_transform(1, translate(10.0)).unwrap();
    assert_eq!(instances.state(), CollectionState::NeedsUpdate);
    device.imp().clear_events();
    let outcome = record(&scheduler, |ctx| instances.to_gpu(ctx, BuildOptions::updatable())).unwrap();
    assert_eq!(outcome, BakeOutcome::Updated);
    assert_eq!(instances.result_id(), Some(result));

    let builds: Vec<_> = device
        .imp()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::Submitted { lists, .. } => Some(lists),
            _ => None,
        })
        .flatten()
        .flat_map(|list| list.commands.clone())
        .filter_map(|c| match c {
            Command::BuildAccelerationStructure(build) => Some(build),
            _ => None,
        })
        .collect();
    assert_eq!(builds.len(), 1);
    assert!(builds[0].flags.contains(BuildFlags::PERFORM_UPDATE));
    assert_eq!(builds[0].dest.id(), result);
    assert!(matches!(builds[0].inputs, BuildInputs::TopLevel { instance_count: 3, .. }));

    //the whole instance array is rewritten on every bake
    let buffer = instances.instance_buffer().unwrap();
    let desc = buffer.read_mapped(INSTANCE_DESC_SIZE, INSTANCE_DESC_SIZE).unwrap();
    assert_eq!(&desc[12..16], &10.0f32.to_le_bytes());
    let first = buffer.read_mapped(0, INSTANCE_DESC_SIZE).unwrap();
    assert_eq!(&first[56..64], &geometry.handle().gpu_address().unwrap().to_le_bytes());
    assert!(device.imp().removed_reason().is_none());
}

#[test]
fn frames_in_flight_keep_their_instances() {
    let (device, mut scheduler) = setup();
    let mut geometry = mesh(&device, 2);
    let mut instances = InstanceCollection::new("scene");
    instances.add(&geometry, translate(1.0));
    let mut bake_frame = |scheduler: &mut Scheduler, frame: u64, instances: &mut InstanceCollection| {
        scheduler.setup_frame(frame).unwrap();
        scheduler
            .enqueue(process(EngineKind::Compute, |ctx| {
                geometry.to_gpu(ctx, BuildOptions::default())?;
                instances.to_gpu(ctx, BuildOptions::updatable())?;
                Ok(())
            }))
            .unwrap();
        scheduler.finish_frame().unwrap();
    };
    bake_frame(&mut scheduler, 0, &mut instances);
    assert_eq!(instances.instance_offset(), 0);

    instances.set_transform(0, translate(2.0)).unwrap();
    device.imp().clear_events();
    bake_frame(&mut scheduler, 1, &mut instances);
    assert_eq!(instances.instance_offset(), INSTANCE_DESC_SIZE);

    let buffer = instances.instance_buffer().unwrap();
    assert_eq!(buffer.size(), INSTANCE_DESC_SIZE * 3);
    let first = buffer.read_mapped(0, INSTANCE_DESC_SIZE).unwrap();
    let second = buffer.read_mapped(INSTANCE_DESC_SIZE, INSTANCE_DESC_SIZE).unwrap();
    assert_eq!(&first[12..16], &1.0f32.to_le_bytes());
    assert_eq!(&second[12..16], &2.0f32.to_le_bytes());

    let addresses: Vec<u64> = device
        .imp()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::Submitted { lists, .. } => Some(lists),
            _ => None,
        })
        .flatten()
        .flat_map(|list| list.commands.clone())
        .filter_map(|c| match c {
            Command::BuildAccelerationStructure(build) => match build.inputs {
                BuildInputs::TopLevel { instances, .. } => Some(instances),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(addresses, vec![buffer.gpu_address() + INSTANCE_DESC_SIZE]);
}

#[test]
fn instances_of_unbuilt_geometry_are_rejected() {
    let (device, scheduler) = setup();
    let geometry = mesh(&device, 1);
    let mut instances = InstanceCollection::new("scene");
    instances.add_identity(&geometry);
    let result = record(&scheduler, |ctx| instances.to_gpu(ctx, BuildOptions::default()));
    assert!(matches!(result, Err(Error::InvalidOperation(_))));
    assert_eq!(instances.state(), CollectionState::NotBuilt);
}

#[test]
fn rebuilt_geometry_stales_its_instances() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 2);
    let mut instances = InstanceCollection::new("scene");
    instances.add_identity(&geometry);
    record(&scheduler, |ctx| {
        geometry.to_gpu(ctx, BuildOptions::default())?;
        instances.to_gpu(ctx, BuildOptions::updatable())
    })
    .unwrap();

    geometry
        .add_triangles(TriangleGeometry::new(triangles(&device, "extra", 16)))
        .unwrap();
    let outcome = record(&scheduler, |ctx| geometry.to_gpu(ctx, BuildOptions::default())).unwrap();
    assert_eq!(outcome, BakeOutcome::Rebuilt { reallocated: true });
    assert_eq!(instances.state(), CollectionState::NeedsUpdate);
    let outcome = record(&scheduler, |ctx| instances.to_gpu(ctx, BuildOptions::updatable())).unwrap();
    assert_eq!(outcome, BakeOutcome::Updated);
    assert_eq!(instances.state(), CollectionState::UpToDate);
}

#[test]
fn instance_edits_version_correctly() {
    let (device, scheduler) = setup();
    let mut geometry = mesh(&device, 1);
    let mut instances = InstanceCollection::new("scene");
    instances.add_identity(&geometry);
    instances.add_identity(&geometry);
    record(&scheduler, |ctx| {
        geometry.to_gpu(ctx, BuildOptions::default())?;
        instances.to_gpu(ctx, BuildOptions::default())
    })
    .unwrap();
    instances.set_mask(0, 0x0f).unwrap();
    assert_eq!(instances.state(), CollectionState::NeedsRebuild);
    assert!(matches!(instances.set_instance_id(0, 1 << 24), Err(Error::InvalidOperation(_))));
    record(&scheduler, |ctx| instances.to_gpu(ctx, BuildOptions::updatable())).unwrap();
    instances.set_contribution(1, 2).unwrap();
    assert_eq!(instances.state(), CollectionState::NeedsUpdate);
    instances.remove(0).unwrap();
    assert_eq!(instances.state(), CollectionState::NeedsRebuild);
    assert_eq!(instances.len(), 1);
    assert!(instances.remove(3).is_err());
}
