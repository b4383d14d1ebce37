// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Defines resources, descriptors and binding types */

pub mod bind_style;
pub mod descriptor_heap;
pub mod dirty_tracking;
pub mod resource;
pub mod resource_tracking;
pub mod root_signature;
pub mod sampler;
pub mod shader_table;
pub mod texture_builder;

pub use bind_style::BindStyle;
pub use resource::{Resource, View};
