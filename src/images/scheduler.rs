// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The multi-engine frame scheduler.

The scheduler owns the three engines, a pool of worker threads and the per-frame completion
signals.  Work arrives as [GpuProcess]es, each naming the engine it records for.

# Threads

Thread 0 is whichever thread calls [Scheduler::enqueue]; it records synchronously, in program
order.  Threads `1..N` are background workers that pull processes queued by
[Scheduler::enqueue_async] off a bounded queue.  Each thread records only into its own command
list on each engine, so recording itself never contends.

# Flushing

[Scheduler::flush_and_signal] is a population barrier, not a GPU barrier.  It waits until every
queued process has finished *recording*, closes all active lists, performs the batched descriptor
copies, then submits each engine's lists in one batch and signals its fence.  The returned
[Signal] holds one fence value per engine, with 0 meaning nothing was submitted there.
[Scheduler::wait_for] blocks until the GPU reaches every non-zero value.

# Failure

A process that returns an error fails the scheduler, whether it recorded synchronously or on a
worker.  Recording has side effects the GPU never saw once the lists are dropped (tracked
resource states, baked acceleration structures), so nothing recorded after the last successful
flush is submitted.  The next flush discards every list and returns the error, and every later
enqueue, flush or frame setup returns it again.

# Frames

```text
setup_frame(n):  wait for slot n % D from its previous lap -> reset its allocators
                 -> rewind its descriptor ring region -> render target to RENDER_TARGET
  ... enqueue / enqueue_async ...
finish_frame():  flush and wait if async work is pending -> render target to PRESENT
                 -> flush_and_signal(all) -> remember the signal for slot n % D
                 -> wait for it right away when buffering is off
```

At most D frames are in flight.
*/

use crate::config::SchedulerDescriptor;
use crate::error::Error;
use crate::images::BoundDevice;
use crate::images::command_context::CommandContext;
use crate::images::engine::{Engine, EngineKind, EngineMask};
use crate::bindings::resource::View;
use crate::bindings::resource_tracking::ResourceState;
use crate::imp::FenceEvent;
use crate::multibuffer::Multibuffer;
use crate::sync::{BoundedQueue, CountEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// A snapshot of fence values, one per engine.  0 means no work was submitted to that engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Signal {
    fences: [u64; 3],
}

impl Signal {
    pub fn fence(&self, engine: EngineKind) -> u64 {
        self.fences[engine.index()]
    }

    /// Whether there is nothing to wait for.
    pub fn is_empty(&self) -> bool {
        self.fences.iter().all(|f| *f == 0)
    }

    /// Engines with work, and the fence value each must reach.
    pub fn pending(&self) -> impl Iterator<Item = (EngineKind, u64)> + '_ {
        EngineKind::ALL
            .into_iter()
            .map(|engine| (engine, self.fence(engine)))
            .filter(|(_, value)| *value != 0)
    }
}

/// A unit of GPU work.
///
/// `record` runs on the scheduler thread the process was assigned to and must not block.
pub trait GpuProcess: Send {
    fn engine(&self) -> EngineKind;
    fn record(&mut self, ctx: &mut CommandContext<'_>) -> Result<(), Error>;
}

/// A [GpuProcess] made from a closure.  See [process].
pub struct ClosureProcess<F> {
    engine: EngineKind,
    f: F,
}

impl<F> GpuProcess for ClosureProcess<F>
where
    F: FnMut(&mut CommandContext<'_>) -> Result<(), Error> + Send,
{
    fn engine(&self) -> EngineKind {
        self.engine
    }
    fn record(&mut self, ctx: &mut CommandContext<'_>) -> Result<(), Error> {
        (self.f)(ctx)
    }
}

/// Wraps a closure recording for `engine` as a process.
pub fn process<F>(engine: EngineKind, f: F) -> ClosureProcess<F>
where
    F: FnMut(&mut CommandContext<'_>) -> Result<(), Error> + Send,
{
    ClosureProcess { engine, f }
}

struct Shared {
    device: Arc<BoundDevice>,
    engines: Vec<Engine>,
    slot: AtomicUsize,
    frame: AtomicU64,
    population: CountEvent,
    work: BoundedQueue<Box<dyn GpuProcess>>,
    //first error any process raised; set once, never cleared
    failure: Mutex<Option<Error>>,
}

impl Shared {
    fn engine(&self, kind: EngineKind) -> &Engine {
        &self.engines[kind.index()]
    }

    fn populate(&self, thread: usize, process: &mut dyn GpuProcess) -> Result<(), Error> {
        let kind = process.engine();
        let engine = self.engine(kind);
        let slot = self.slot.load(Ordering::Acquire);
        let frame = self.frame.load(Ordering::Acquire);
        let mut list = engine.thread(thread);
        list.activate(engine.allocator(slot, thread))?;
        let mut ctx = CommandContext::new(&self.device, &mut list, kind, thread, slot, frame);
        process.record(&mut ctx)
    }

    fn fail(&self, error: Error) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    fn check_failure(&self) -> Result<(), Error> {
        match &*self.failure.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Signals the population barrier once, even if recording panics.
struct PopulationGuard<'a>(&'a CountEvent);

impl Drop for PopulationGuard<'_> {
    fn drop(&mut self) {
        self.0.signal();
    }
}

fn worker(shared: Arc<Shared>, thread: usize) {
    log::trace!("scheduler worker {thread} started");
    while let Ok(mut process) = shared.work.try_consume() {
        let _guard = PopulationGuard(&shared.population);
        if let Err(e) = shared.populate(thread, process.as_mut()) {
            log::error!("asynchronous process on thread {thread} failed: {e}");
            shared.fail(e);
        }
    }
    log::trace!("scheduler worker {thread} stopped");
}

pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    descriptor: SchedulerDescriptor,
    signals: Mutex<Multibuffer<Signal>>,
    async_pending: AtomicBool,
    render_targets: Vec<View>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("descriptor", &self.descriptor)
            .field("frame", &self.frame())
            .finish()
    }
}

impl Scheduler {
    pub fn new(device: Arc<BoundDevice>, descriptor: SchedulerDescriptor) -> Result<Self, Error> {
        if descriptor.threads == 0 || descriptor.frames == 0 || descriptor.queue_capacity == 0 {
            return Err(Error::invalid(format!("unusable scheduler configuration {descriptor:?}")));
        }
        if descriptor.frames != device.frames() {
            return Err(Error::invalid(format!(
                "scheduler ring of {} frames on a device bound for {}",
                descriptor.frames,
                device.frames()
            )));
        }
        let engines = EngineKind::ALL
            .into_iter()
            .map(|kind| Engine::new(device.imp(), kind, descriptor.threads, descriptor.frames))
            .collect::<Result<Vec<_>, Error>>()?;
        let shared = Arc::new(Shared {
            device,
            engines,
            slot: AtomicUsize::new(0),
            frame: AtomicU64::new(0),
            population: CountEvent::new(),
            work: BoundedQueue::new(descriptor.queue_capacity),
            failure: Mutex::new(None),
        });
        let workers = (1..descriptor.threads)
            .map(|thread| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("faf_worker_{thread}"))
                    .spawn(move || worker(shared, thread))
                    .map_err(|e| Error::invalid(format!("can't spawn scheduler worker: {e}")))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        log::info!(
            "Scheduler started with {} threads and a {}-frame ring (buffering {})",
            descriptor.threads,
            descriptor.frames,
            if descriptor.buffering { "on" } else { "off" }
        );
        Ok(Scheduler {
            shared,
            workers,
            signals: Mutex::new(Multibuffer::new(descriptor.frames, |_| Signal::default())),
            descriptor,
            async_pending: AtomicBool::new(false),
            render_targets: Vec::new(),
        })
    }

    pub fn device(&self) -> &Arc<BoundDevice> {
        &self.shared.device
    }

    pub fn descriptor(&self) -> &SchedulerDescriptor {
        &self.descriptor
    }

    /// Number of the current frame.
    pub fn frame(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    /// Ring slot of the current frame.
    pub fn frame_slot(&self) -> usize {
        self.shared.slot.load(Ordering::Acquire)
    }

    /// Render targets transitioned by the frame lifecycle, one per ring slot.
    pub fn set_render_targets(&mut self, targets: Vec<View>) -> Result<(), Error> {
        if !targets.is_empty() && targets.len() != self.descriptor.frames {
            return Err(Error::invalid(format!(
                "{} render targets for a {}-frame ring",
                targets.len(),
                self.descriptor.frames
            )));
        }
        self.render_targets = targets;
        Ok(())
    }

    /// Records `process` on the caller's thread (thread 0) before returning.
    ///
    /// An error from the process fails the scheduler.
    pub fn enqueue(&self, mut process: impl GpuProcess) -> Result<(), Error> {
        self.shared.check_failure()?;
        self.shared.populate(0, &mut process).inspect_err(|e| {
            log::error!("process on thread 0 failed: {e}");
            self.shared.fail(e.clone());
        })
    }

    /// Hands `process` to a background worker.
    ///
    /// Blocks while the work queue is full.  An error the process raises fails the scheduler and
    /// surfaces from the next [Scheduler::flush_and_signal].  With a single configured thread the
    /// process records inline.
    pub fn enqueue_async(&self, process: impl GpuProcess + 'static) -> Result<(), Error> {
        if self.workers.is_empty() {
            return self.enqueue(process);
        }
        self.shared.check_failure()?;
        self.shared.population.increment();
        self.async_pending.store(true, Ordering::Release);
        if let Err(e) = self.shared.work.try_produce(Box::new(process)) {
            self.shared.population.signal();
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether asynchronous work was queued since the last wait.
    pub fn async_pending(&self) -> bool {
        self.async_pending.load(Ordering::Acquire)
    }

    /// Submits everything recorded for the engines in `mask`.
    pub fn flush_and_signal(&self, mask: EngineMask) -> Result<Signal, Error> {
        let shared = &self.shared;
        shared.population.wait();
        if let Err(error) = shared.check_failure() {
            for engine in &shared.engines {
                engine.discard_all();
            }
            return Err(error);
        }
        let gpu_heap = shared.device.gpu_heap().raw();
        let mut signal = Signal::default();
        for kind in mask.engines() {
            let engine = shared.engine(kind);
            let lists = engine.close_all(gpu_heap)?;
            if lists.is_empty() {
                continue;
            }
            engine.commit(lists)?;
            signal.fences[kind.index()] = engine.signal()?;
        }
        log::trace!("flushed {mask:?}: {signal:?}");
        Ok(signal)
    }

    /// Whether the GPU has reached every fence in `signal`.
    pub fn is_complete(&self, signal: &Signal) -> bool {
        signal
            .pending()
            .all(|(engine, value)| self.shared.engine(engine).completed_value() >= value)
    }

    /// Blocks until the GPU reaches every fence in `signal`.
    pub fn wait_for(&self, signal: &Signal) -> Result<(), Error> {
        let events: Vec<FenceEvent> = signal
            .pending()
            .map(|(engine, value)| self.shared.engine(engine).trigger_event(value))
            .collect();
        FenceEvent::wait_all(&events);
        self.async_pending.store(false, Ordering::Release);
        self.shared.device.imp().check_removed()
    }

    /// Starts frame `frame`.
    pub fn setup_frame(&mut self, frame: u64) -> Result<(), Error> {
        self.shared.check_failure()?;
        let slot = (frame % self.descriptor.frames as u64) as usize;
        if self.descriptor.buffering {
            let previous = *self.signals.lock().slot(slot);
            self.wait_for(&previous)?;
        }
        for engine in &self.shared.engines {
            engine.reset_allocators(slot)?;
        }
        self.shared.device.gpu_heap().restart_allocator_for_frame(slot as u32);
        self.shared.slot.store(slot, Ordering::Release);
        self.shared.frame.store(frame, Ordering::Release);
        log::trace!("frame {frame} set up in slot {slot}");
        if let Some(target) = self.render_targets.get(slot) {
            self.enqueue(process(EngineKind::Graphics, |ctx| {
                ctx.barrier(target, ResourceState::RENDER_TARGET);
                Ok(())
            }))?;
        }
        Ok(())
    }

    /// Finishes the current frame and returns its signal.
    pub fn finish_frame(&mut self) -> Result<Signal, Error> {
        if self.async_pending() {
            let signal = self.flush_and_signal(EngineMask::all())?;
            self.wait_for(&signal)?;
        }
        let slot = self.frame_slot();
        if let Some(target) = self.render_targets.get(slot) {
            self.enqueue(process(EngineKind::Graphics, |ctx| {
                ctx.barrier(target, ResourceState::PRESENT);
                Ok(())
            }))?;
        }
        let signal = self.flush_and_signal(EngineMask::all())?;
        *self.signals.lock().slot_mut(slot) = signal;
        if !self.descriptor.buffering {
            self.wait_for(&signal)?;
        }
        Ok(signal)
    }

    /// Frames whose signal has not completed yet.
    pub fn frames_in_flight(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|signal| !self.is_complete(signal))
            .count()
    }

    /// Flushes everything and waits for the GPU to finish it.
    ///
    /// On a failed scheduler this still waits for every frame already submitted.
    pub fn wait_idle(&self) -> Result<(), Error> {
        let flushed = self.flush_and_signal(EngineMask::all());
        if let Ok(signal) = &flushed {
            self.wait_for(signal)?;
        }
        let signals: Vec<Signal> = self.signals.lock().iter().copied().collect();
        for signal in &signals {
            self.wait_for(signal)?;
        }
        flushed.map(|_| ())
    }

    /// The error that failed the scheduler, if any.
    pub fn failure(&self) -> Option<Error> {
        self.shared.failure.lock().clone()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.work.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("scheduler worker panicked");
            }
        }
        if let Err(e) = self.wait_idle() {
            log::warn!("scheduler dropped with unfinished work: {e}");
        }
    }
}
