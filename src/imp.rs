// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The explicit device the engine drives.  At the moment only the in-process software device exists.

mod software;

pub use software::*;
