/*! fences_and_frames is the GPU submission core of a ray-tracing research renderer.

It sits between rendering techniques and an explicit, multi-engine GPU API, and takes care of
the parts every technique would otherwise get wrong on its own:

| Concern                  | What you write                        | What fences_and_frames does                                            |
|--------------------------|---------------------------------------|------------------------------------------------------------------------|
| Command recording        | a [images::GpuProcess] per unit of work | runs it on thread 0 or a worker, into that thread's own command list |
| Submission               | `flush_and_signal(mask)`              | waits for recording to finish, submits per engine, returns a [images::Signal] |
| Frame pacing             | `setup_frame` / `finish_frame`        | keeps at most D frames in flight, recycles allocators and descriptors  |
| Resource states          | nothing                               | each resource tracks its state and barriers are recorded on demand     |
| Descriptors              | a [bindings::BindStyle]               | CPU free lists, a per-frame shader-visible ring, persistent tables     |
| Acceleration structures  | edits to geometry/instance collections | decides rebuild vs. in-place update, sizes and reuses GPU buffers     |

# Threads and engines

There are three engines (graphics, compute, copy), each with its own queue and fence.  The
scheduler runs a fixed pool of threads: thread 0 is the caller's, the others are workers fed by
a bounded queue.  No two threads ever record into the same command list.  Everything enqueued
before a flush completes on the GPU before anything enqueued after it begins, once the caller
waits on the flush's signal.

# Backends

The crate drives a software device ([imp]) that models queues, fences, memory heaps,
descriptor heaps and acceleration-structure builds on CPU threads.  Its event log makes
submission order observable, which is what the integration tests assert against.

# Configuration

See [config::SchedulerDescriptor] for thread count, ring depth and descriptor capacities,
including the environment variables that override them.

# Errors

Every fallible operation returns [error::Error].  None of them are recoverable within a run:
callers are expected to tear down and restart rather than continue with GPU state an error left
invalid.
*/

pub mod bindings;
mod bittricks;
pub mod config;
pub mod error;
pub mod images;
pub mod imp;
mod multibuffer;
pub mod raytracing;
pub mod sync;

pub use error::Error;
