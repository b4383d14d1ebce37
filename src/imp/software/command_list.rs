// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::command::{Command, RecordedCommands};
use super::{Device, QueueEvent};
use crate::error::Error;
use crate::images::engine::EngineKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Backing memory for recorded commands.
///
/// Reset only once the GPU has finished every list recorded against it.
#[derive(Debug)]
pub struct CommandAllocator {
    engine: EngineKind,
    resets: AtomicU64,
    device: Device,
}

impl CommandAllocator {
    pub(super) fn new(device: Device, engine: EngineKind) -> Self {
        CommandAllocator {
            engine,
            resets: AtomicU64::new(0),
            device,
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn reset(&self) -> Result<(), Error> {
        self.device.check_removed()?;
        self.resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Initial,
    Recording,
    Closed,
}

#[derive(Debug)]
pub struct CommandList {
    engine: EngineKind,
    thread: usize,
    state: ListState,
    commands: Vec<Command>,
    close_stamp: u64,
    device: Device,
}

impl CommandList {
    pub(super) fn new(device: Device, engine: EngineKind, thread: usize) -> Self {
        CommandList {
            engine,
            thread,
            state: ListState::Initial,
            commands: Vec::new(),
            close_stamp: 0,
            device,
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }
    pub fn thread(&self) -> usize {
        self.thread
    }
    pub fn state(&self) -> ListState {
        self.state
    }
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Starts recording against `allocator`.
    pub fn reset(&mut self, allocator: &CommandAllocator) -> Result<(), Error> {
        self.device.check_removed()?;
        if allocator.engine() != self.engine {
            return Err(Error::invalid(format!(
                "{:?} command list reset against a {:?} allocator",
                self.engine,
                allocator.engine()
            )));
        }
        if self.state == ListState::Recording {
            return Err(Error::invalid("command list reset while recording"));
        }
        self.commands.clear();
        self.state = ListState::Recording;
        Ok(())
    }

    pub fn record(&mut self, command: Command) {
        debug_assert_eq!(self.state, ListState::Recording, "recording into an inactive list");
        self.commands.push(command);
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.device.check_removed()?;
        if self.state != ListState::Recording {
            return Err(Error::invalid("closing a command list that is not recording"));
        }
        self.close_stamp = self.device.next_stamp();
        self.state = ListState::Closed;
        self.device.log(QueueEvent::Closed {
            engine: self.engine,
            thread: self.thread,
            stamp: self.close_stamp,
        });
        Ok(())
    }

    /// Moves the recorded commands out of a closed list, returning it to the initial state.
    pub fn take_recorded(&mut self) -> Option<RecordedCommands> {
        if self.state != ListState::Closed {
            return None;
        }
        self.state = ListState::Initial;
        Some(RecordedCommands {
            engine: self.engine,
            thread: self.thread,
            close_stamp: self.close_stamp,
            commands: std::mem::take(&mut self.commands),
        })
    }
}
