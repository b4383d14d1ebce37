// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! The submission side of fences_and_frames: engines, the scheduler, pipelines and the frame loop. */

pub mod command_context;
pub(crate) mod device;
pub mod engine;
pub mod pipeline;
pub mod port;
pub mod scheduler;
pub mod shader;

pub use device::BoundDevice;
pub use engine::{EngineKind, EngineMask};
pub use port::Port;
pub use scheduler::{GpuProcess, Scheduler, Signal, process};
