// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Error types surfaced by the engine.
//!
//! Every kind here is fatal for the current run: the frame loop that receives one of
//! these has no recovery path, and no operation continues with GPU state that an
//! error left invalid.

/// Why the device stopped accepting work.
///
/// Mirrors the removal reasons an explicit GPU API reports after a failed
/// create/submit/present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum DeviceRemovedReason {
    /// The GPU stopped making progress and was reset by the driver.
    #[error("device hung")]
    Hung,
    /// The device was reset externally.
    #[error("device reset")]
    Reset,
    /// The driver hit an internal error.
    #[error("driver internal error")]
    DriverInternalError,
    /// The application submitted work the device could not execute.
    #[error("invalid call")]
    InvalidCall,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("out of device memory allocating {requested} bytes for {label}")]
    OutOfDeviceMemory { label: String, requested: u64 },
    #[error("out of descriptor memory in {heap} heap (capacity {capacity})")]
    OutOfDescriptors { heap: &'static str, capacity: u32 },
    #[error("device removed: {reason}")]
    DeviceRemoved { reason: DeviceRemovedReason },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("scheduler synchronization failed: {0}")]
    Sync(#[from] crate::sync::SyncError),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }
}
