// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::command::RecordedCommands;
use super::{Device, QueueEvent};
use crate::error::{DeviceRemovedReason, Error};
use crate::images::engine::EngineKind;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

enum QueueOp {
    Execute(Vec<Arc<RecordedCommands>>),
    Signal(u64),
}

#[derive(Debug)]
struct FenceShared {
    completed: Mutex<u64>,
    reached: Condvar,
}

#[derive(Debug)]
struct Submission {
    sender: Option<Sender<QueueOp>>,
    last_signaled: u64,
}

/// A hardware queue with its fence.
///
/// Submitted batches and fence signals are executed in order by a dedicated thread.
#[derive(Debug)]
pub struct Queue {
    engine: EngineKind,
    device: Device,
    fence: Arc<FenceShared>,
    submission: Mutex<Submission>,
    thread: Option<JoinHandle<()>>,
}

impl Queue {
    pub(super) fn new(device: Device, engine: EngineKind) -> Result<Self, Error> {
        let fence = Arc::new(FenceShared {
            completed: Mutex::new(0),
            reached: Condvar::new(),
        });
        let (sender, receiver) = mpsc::channel();
        let thread = {
            let device = device.clone();
            let fence = fence.clone();
            thread::Builder::new()
                .name(format!("faf_{}_queue", engine.name()))
                .spawn(move || queue_thread(device, engine, fence, receiver))
                .map_err(|e| Error::invalid(format!("can't spawn {} queue thread: {e}", engine.name())))?
        };
        Ok(Queue {
            engine,
            device,
            fence,
            submission: Mutex::new(Submission {
                sender: Some(sender),
                last_signaled: 0,
            }),
            thread: Some(thread),
        })
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Submits closed command lists as one batch.
    pub fn execute(&self, lists: Vec<RecordedCommands>) -> Result<(), Error> {
        self.device.check_removed()?;
        let lists: Vec<Arc<RecordedCommands>> = lists.into_iter().map(Arc::new).collect();
        let submission = self.submission.lock();
        self.device.log(QueueEvent::Submitted {
            engine: self.engine,
            stamp: self.device.next_stamp(),
            lists: lists.clone(),
        });
        send(&submission, QueueOp::Execute(lists))
    }

    /// Enqueues a fence signal after all prior submissions; returns its value.
    pub fn signal(&self) -> Result<u64, Error> {
        self.device.check_removed()?;
        let mut submission = self.submission.lock();
        let value = submission.last_signaled + 1;
        send(&submission, QueueOp::Signal(value))?;
        submission.last_signaled = value;
        Ok(value)
    }

    pub fn last_signaled(&self) -> u64 {
        self.submission.lock().last_signaled
    }

    pub fn completed_value(&self) -> u64 {
        *self.fence.completed.lock()
    }

    /// Returns an event that becomes signaled once the fence reaches `value`.
    pub fn trigger_event(&self, value: u64) -> FenceEvent {
        FenceEvent {
            engine: self.engine,
            value,
            fence: self.fence.clone(),
        }
    }
}

fn send(submission: &Submission, op: QueueOp) -> Result<(), Error> {
    match &submission.sender {
        Some(sender) => sender.send(op).map_err(|_| Error::DeviceRemoved {
            reason: DeviceRemovedReason::Hung,
        }),
        None => Err(Error::DeviceRemoved {
            reason: DeviceRemovedReason::Hung,
        }),
    }
}

fn queue_thread(device: Device, engine: EngineKind, fence: Arc<FenceShared>, receiver: Receiver<QueueOp>) {
    for op in receiver {
        match op {
            QueueOp::Execute(lists) => {
                let delay = device.execution_delay();
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if device.removed_reason().is_some() {
                    //removed devices drop work but keep advancing fences so waiters wake
                    continue;
                }
                'lists: for list in &lists {
                    for command in &list.commands {
                        if let Err(reason) = command.execute(&device) {
                            log::error!(
                                "{} queue faulted executing {:?} from thread {}",
                                engine.name(),
                                command,
                                list.thread
                            );
                            device.remove(reason);
                            break 'lists;
                        }
                    }
                }
            }
            QueueOp::Signal(value) => {
                {
                    let mut completed = fence.completed.lock();
                    *completed = value;
                }
                device.log(QueueEvent::Completed {
                    engine,
                    fence: value,
                    stamp: device.next_stamp(),
                });
                fence.reached.notify_all();
            }
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        //closing the channel lets the thread drain and exit
        self.submission.lock().sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Waitable handle for a fence value.
#[derive(Debug, Clone)]
pub struct FenceEvent {
    engine: EngineKind,
    value: u64,
    fence: Arc<FenceShared>,
}

impl FenceEvent {
    pub fn engine(&self) -> EngineKind {
        self.engine
    }
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_signaled(&self) -> bool {
        *self.fence.completed.lock() >= self.value
    }

    /// Blocks until the fence reaches the event's value.  There is no timeout.
    pub fn wait(&self) {
        let mut completed = self.fence.completed.lock();
        while *completed < self.value {
            self.fence.reached.wait(&mut completed);
        }
    }

    /// Blocks until every event is signaled.
    pub fn wait_all(events: &[FenceEvent]) {
        for event in events {
            event.wait();
        }
    }
}
