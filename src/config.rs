// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Scheduler configuration.

[SchedulerDescriptor::from_env] starts from the defaults and applies these environment variables:

* `FAF_THREADS` - scheduler threads, including the caller's thread 0
* `FAF_FRAMES` - frame ring depth
* `FAF_SYNC_FRAMES` - set to `1` to wait on every frame as it finishes
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerDescriptor {
    /// Threads that record command lists.  Thread 0 is the caller's thread.
    pub threads: usize,
    /// Frames that may be in flight at once.
    pub frames: usize,
    /// When false, every finished frame is waited on immediately.
    pub buffering: bool,
    /// Capacity of the asynchronous work queue.
    pub queue_capacity: usize,
    pub cpu_view_descriptors: u32,
    pub cpu_sampler_descriptors: u32,
    pub cpu_rtv_descriptors: u32,
    pub cpu_dsv_descriptors: u32,
    /// Shader-visible descriptors each frame slot may allocate.
    pub frame_descriptors: u32,
    /// Shader-visible descriptors for long-lived tables.
    pub persistent_descriptors: u32,
}

impl Default for SchedulerDescriptor {
    fn default() -> Self {
        SchedulerDescriptor {
            threads: 4,
            frames: 3,
            buffering: true,
            queue_capacity: 64,
            cpu_view_descriptors: 4096,
            cpu_sampler_descriptors: 256,
            cpu_rtv_descriptors: 256,
            cpu_dsv_descriptors: 64,
            frame_descriptors: 4096,
            persistent_descriptors: 4096,
        }
    }
}

fn parse_positive(name: &str, value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => Some(parsed),
        _ => {
            log::warn!("Ignoring {name}={value}: expected a positive integer");
            None
        }
    }
}

impl SchedulerDescriptor {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut descriptor = SchedulerDescriptor::default();
        if let Some(threads) = lookup("FAF_THREADS").and_then(|v| parse_positive("FAF_THREADS", &v)) {
            descriptor.threads = threads;
        }
        if let Some(frames) = lookup("FAF_FRAMES").and_then(|v| parse_positive("FAF_FRAMES", &v)) {
            descriptor.frames = frames;
        }
        if let Some(sync) = lookup("FAF_SYNC_FRAMES") {
            descriptor.buffering = !matches!(sync.trim(), "1" | "true");
        }
        descriptor
    }
}
