// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Implements 'image ports', which drive the frame loop for a single presentation surface.
//!
//! A [Port] owns the scheduler and one back buffer per frame slot.  The application calls
//! [Port::begin_frame], enqueues its work, then [Port::end_frame], once per displayed frame.

use crate::bindings::resource::{Dimension, View};
use crate::bindings::resource_tracking::ResourceState;
use crate::config::SchedulerDescriptor;
use crate::error::Error;
use crate::images::BoundDevice;
use crate::images::scheduler::{Scheduler, Signal};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bytes per back-buffer texel.
const BACK_BUFFER_TEXEL_SIZE: u32 = 4;

/// Timing information for a finished frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub frame: u64,
    /// Time between [Port::begin_frame] and the frame's submission.
    pub cpu_duration: Duration,
    pub signal: Signal,
}

#[derive(Debug)]
pub struct Port {
    scheduler: Scheduler,
    back_buffers: Vec<View>,
    next_frame: u64,
    frame_start: Option<Instant>,
    last_frame: Option<FrameInfo>,
    presented: u64,
}

impl Port {
    /// Creates a port with `width`×`height` back buffers, one per frame slot.
    pub fn new(device: Arc<BoundDevice>, descriptor: SchedulerDescriptor, width: u32, height: u32) -> Result<Self, Error> {
        let back_buffers = (0..descriptor.frames)
            .map(|i| {
                device
                    .texture(&format!("back buffer {i}"), Dimension::Texture2D, BACK_BUFFER_TEXEL_SIZE)
                    .with_size(width, height, 1)
                    .with_initial_state(ResourceState::PRESENT)
                    .with_clear_value([0.0, 0.0, 0.0, 1.0])
                    .build()
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let mut scheduler = Scheduler::new(device, descriptor)?;
        scheduler.set_render_targets(back_buffers.clone())?;
        log::info!("Port opened with {} {width}x{height} back buffers", back_buffers.len());
        Ok(Port {
            scheduler,
            back_buffers,
            next_frame: 0,
            frame_start: None,
            last_frame: None,
            presented: 0,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The back buffer of the current frame.
    pub fn back_buffer(&self) -> &View {
        &self.back_buffers[self.scheduler.frame_slot()]
    }

    /// Starts the next frame.  Blocks while the frame slot is still in flight.
    pub fn begin_frame(&mut self) -> Result<u64, Error> {
        if self.frame_start.is_some() {
            return Err(Error::invalid("begin_frame inside a frame"));
        }
        let frame = self.next_frame;
        self.scheduler.setup_frame(frame)?;
        self.frame_start = Some(Instant::now());
        Ok(frame)
    }

    /// Submits the current frame and presents its back buffer.
    pub fn end_frame(&mut self) -> Result<FrameInfo, Error> {
        let frame_start = self
            .frame_start
            .take()
            .ok_or_else(|| Error::invalid("end_frame outside a frame"))?;
        let signal = self.scheduler.finish_frame()?;
        let cpu_duration = frame_start.elapsed();
        let back_buffer = self.back_buffer().resource().id();
        self.scheduler.device().imp().present(back_buffer)?;
        self.presented += 1;
        let info = FrameInfo {
            frame: self.next_frame,
            cpu_duration,
            signal,
        };
        log::trace!("frame {} presented after {:?} on the CPU", info.frame, cpu_duration);
        self.next_frame += 1;
        self.last_frame = Some(info);
        Ok(info)
    }

    pub fn last_frame(&self) -> Option<FrameInfo> {
        self.last_frame
    }

    /// Frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }
}
