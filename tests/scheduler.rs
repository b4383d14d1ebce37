use fences_and_frames::config::SchedulerDescriptor;
use fences_and_frames::error::{DeviceRemovedReason, Error};
use fences_and_frames::images::{BoundDevice, EngineKind, EngineMask, Scheduler, Signal, process};
use fences_and_frames::imp::{Device, DeviceDescriptor, QueueEvent};
use std::sync::Arc;
use std::time::Duration;

fn setup(descriptor: SchedulerDescriptor, delay: Duration) -> (Arc<BoundDevice>, Scheduler) {
    let device = Device::new(DeviceDescriptor {
        label: "scheduler test".to_string(),
        execution_delay: delay,
        record_events: true,
        ..Default::default()
    });
    let device = BoundDevice::bind(device, &descriptor).unwrap();
    let scheduler = Scheduler::new(device.clone(), descriptor).unwrap();
    (device, scheduler)
}

fn threads(threads: usize) -> SchedulerDescriptor {
    SchedulerDescriptor {
        threads,
        ..Default::default()
    }
}

/// Markers of every list submitted to `engine`, per list, with the recording thread.
fn submitted_markers(device: &BoundDevice, engine: EngineKind) -> Vec<(usize, Vec<String>)> {
    device
        .imp()
        .events()
        .into_iter()
        .filter_map(|event| match event {
            QueueEvent::Submitted { engine: e, lists, .. } if e == engine => Some(lists),
            _ => None,
        })
        .flatten()
        .map(|list| {
            let markers = list
                .commands
                .iter()
                .filter_map(|c| c.marker().map(str::to_string))
                .collect();
            (list.thread, markers)
        })
        .collect()
}

#[test]
fn synchronous_enqueue_records_on_caller_thread() {
    let (device, scheduler) = setup(threads(4), Duration::ZERO);
    let caller = std::thread::current().id();
    scheduler
        .enqueue(process(EngineKind::Graphics, |ctx| {
            assert_eq!(ctx.thread(), 0);
            assert_eq!(std::thread::current().id(), caller);
            ctx.marker("first");
            ctx.marker("second");
            Ok(())
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(EngineMask::all()).unwrap();
    assert!(signal.fence(EngineKind::Graphics) > 0);
    assert_eq!(signal.fence(EngineKind::Compute), 0);
    assert_eq!(signal.fence(EngineKind::Copy), 0);
    scheduler.wait_for(&signal).unwrap();
    assert!(scheduler.is_complete(&signal));

    let lists = submitted_markers(&device, EngineKind::Graphics);
    assert_eq!(lists, vec![(0, vec!["first".to_string(), "second".to_string()])]);
    assert!(submitted_markers(&device, EngineKind::Compute).is_empty());
}

#[test]
fn async_fan_out_reaches_one_batch() {
    let (device, scheduler) = setup(threads(3), Duration::ZERO);
    scheduler
        .enqueue(process(EngineKind::Compute, |ctx| {
            ctx.marker("warmup");
            Ok(())
        }))
        .unwrap();
    let before = scheduler.flush_and_signal(EngineMask::COMPUTE).unwrap();
    scheduler.wait_for(&before).unwrap();
    device.imp().clear_events();

    const JOBS: usize = 12;
    for job in 0..JOBS {
        scheduler
            .enqueue_async(process(EngineKind::Compute, move |ctx| {
                std::thread::sleep(Duration::from_millis(1));
                ctx.marker(&format!("job {job}"));
                Ok(())
            }))
            .unwrap();
    }
    assert!(scheduler.async_pending());
    let after = scheduler.flush_and_signal(EngineMask::COMPUTE).unwrap();
    assert!(after.fence(EngineKind::Compute) > before.fence(EngineKind::Compute));
    scheduler.wait_for(&after).unwrap();
    assert!(!scheduler.async_pending());

    let submissions = device
        .imp()
        .events()
        .iter()
        .filter(|e| matches!(e, QueueEvent::Submitted { .. }))
        .count();
    assert_eq!(submissions, 1);
    let mut markers: Vec<String> = submitted_markers(&device, EngineKind::Compute)
        .into_iter()
        .inspect(|(thread, _)| assert!((1..3).contains(thread)))
        .flat_map(|(_, markers)| markers)
        .collect();
    markers.sort();
    let mut expected: Vec<String> = (0..JOBS).map(|job| format!("job {job}")).collect();
    expected.sort();
    assert_eq!(markers, expected);
}

#[test]
fn lists_close_before_their_batch_is_submitted() {
    let (device, scheduler) = setup(threads(4), Duration::ZERO);
    for round in 0..4 {
        for job in 0..8 {
            let engine = if job % 2 == 0 { EngineKind::Compute } else { EngineKind::Graphics };
            scheduler
                .enqueue_async(process(engine, move |ctx| {
                    std::thread::sleep(Duration::from_micros(200 * (job as u64 % 3)));
                    ctx.marker(&format!("{round}/{job}"));
                    Ok(())
                }))
                .unwrap();
        }
        scheduler
            .enqueue(process(EngineKind::Copy, |ctx| {
                ctx.marker("sync");
                Ok(())
            }))
            .unwrap();
        let signal = scheduler.flush_and_signal(EngineMask::all()).unwrap();
        scheduler.wait_for(&signal).unwrap();
    }
    let events = device.imp().events();
    let mut batches = 0;
    for event in &events {
        if let QueueEvent::Submitted { stamp, lists, .. } = event {
            batches += 1;
            for list in lists {
                assert!(list.close_stamp < *stamp, "list closed at {} after submission at {stamp}", list.close_stamp);
            }
        }
    }
    assert_eq!(batches, 12);
}

#[test]
fn frame_ring_bounds_frames_in_flight() {
    let descriptor = SchedulerDescriptor {
        threads: 2,
        frames: 2,
        ..Default::default()
    };
    let (_device, mut scheduler) = setup(descriptor, Duration::from_millis(15));
    let mut signals: Vec<Signal> = Vec::new();
    for frame in 0..6u64 {
        scheduler.setup_frame(frame).unwrap();
        if frame >= 2 {
            assert!(scheduler.is_complete(&signals[frame as usize - 2]));
        }
        assert!(scheduler.frames_in_flight() <= 1);
        assert_eq!(scheduler.frame_slot(), frame as usize % 2);
        scheduler
            .enqueue(process(EngineKind::Graphics, move |ctx| {
                assert_eq!(ctx.frame(), frame);
                ctx.marker("draw");
                Ok(())
            }))
            .unwrap();
        signals.push(scheduler.finish_frame().unwrap());
        assert!(scheduler.frames_in_flight() <= 2);
    }
    scheduler.wait_idle().unwrap();
    assert_eq!(scheduler.frames_in_flight(), 0);
}

#[test]
fn unbuffered_frames_complete_before_returning() {
    let descriptor = SchedulerDescriptor {
        buffering: false,
        ..Default::default()
    };
    let (_device, mut scheduler) = setup(descriptor, Duration::from_millis(5));
    for frame in 0..3 {
        scheduler.setup_frame(frame).unwrap();
        scheduler
            .enqueue(process(EngineKind::Compute, |ctx| {
                ctx.marker("work");
                Ok(())
            }))
            .unwrap();
        let signal = scheduler.finish_frame().unwrap();
        assert!(scheduler.is_complete(&signal));
    }
}

fn broken() -> Error {
    Error::InvalidOperation("broken".to_string())
}

fn marked(engine: EngineKind, marker: &'static str) -> impl fences_and_frames::images::GpuProcess + 'static {
    process(engine, move |ctx| {
        ctx.marker(marker);
        Ok(())
    })
}

/// Every later entry point refuses work with the stored error.
fn assert_failed(scheduler: &mut Scheduler) {
    assert_eq!(scheduler.failure(), Some(broken()));
    assert_eq!(scheduler.enqueue(marked(EngineKind::Compute, "after")), Err(broken()));
    assert_eq!(scheduler.enqueue_async(marked(EngineKind::Compute, "after")), Err(broken()));
    assert_eq!(scheduler.flush_and_signal(EngineMask::all()).err(), Some(broken()));
    assert_eq!(scheduler.setup_frame(1), Err(broken()));
}

#[test]
fn asynchronous_errors_fail_the_scheduler() {
    let (device, mut scheduler) = setup(threads(2), Duration::ZERO);
    scheduler.enqueue(marked(EngineKind::Compute, "before")).unwrap();
    scheduler
        .enqueue_async(process(EngineKind::Compute, |ctx| {
            ctx.marker("partial");
            Err(broken())
        }))
        .unwrap();
    assert_eq!(scheduler.flush_and_signal(EngineMask::all()).err(), Some(broken()));

    assert_failed(&mut scheduler);
    assert!(submitted_markers(&device, EngineKind::Compute).is_empty());
    assert_eq!(scheduler.wait_idle(), Err(broken()));
}

#[test]
fn synchronous_errors_fail_the_scheduler() {
    let (device, mut scheduler) = setup(threads(2), Duration::ZERO);
    scheduler.enqueue(marked(EngineKind::Graphics, "before")).unwrap();
    let result = scheduler.enqueue(process(EngineKind::Graphics, |ctx| {
        ctx.marker("partial");
        Err(broken())
    }));
    assert_eq!(result, Err(broken()));

    assert_failed(&mut scheduler);
    assert!(submitted_markers(&device, EngineKind::Graphics).is_empty());
}

#[test]
fn single_thread_runs_async_work_inline() {
    let (_device, scheduler) = setup(threads(1), Duration::ZERO);
    let caller = std::thread::current().id();
    scheduler
        .enqueue_async(process(EngineKind::Copy, move |ctx| {
            assert_eq!(ctx.thread(), 0);
            assert_eq!(std::thread::current().id(), caller);
            Ok(())
        }))
        .unwrap();
    assert!(!scheduler.async_pending());
}

#[test]
fn device_removal_is_fatal() {
    let (device, scheduler) = setup(threads(2), Duration::ZERO);
    device.imp().remove(DeviceRemovedReason::Hung);
    let result = scheduler.enqueue(process(EngineKind::Graphics, |ctx| {
        ctx.marker("never");
        Ok(())
    }));
    assert_eq!(
        result,
        Err(Error::DeviceRemoved {
            reason: DeviceRemovedReason::Hung
        })
    );
}

#[test]
fn mismatched_ring_depth_is_rejected() {
    let device = BoundDevice::bind(Device::new(DeviceDescriptor::default()), &SchedulerDescriptor::default()).unwrap();
    let descriptor = SchedulerDescriptor {
        frames: 5,
        ..Default::default()
    };
    assert!(matches!(Scheduler::new(device, descriptor), Err(Error::InvalidOperation(_))));
}
