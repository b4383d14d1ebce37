// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Root signatures compiled from a [BindStyle].

Every declared binding becomes one descriptor-table parameter.  Global bindings come first, in
slot order, followed by local bindings.  For compute and graphics pipelines local parameters are
set per draw/dispatch; for ray-tracing pipelines they instead make up the local root signature
whose arguments live in shader records.

A shader record is laid out as

```text
| shader identifier (32 bytes) | table handle 0 (8 bytes) | table handle 1 | ... | padding to 32 |
```
*/

use crate::bindings::bind_style::{BindSlot, BindStyle, RangeType, SamplerInfo, Scope};
use crate::bittricks::align_up;
use crate::error::Error;
use crate::imp::SHADER_IDENTIFIER_SIZE;

pub const SHADER_RECORD_ALIGNMENT: u64 = 32;
/// Bytes one descriptor-table handle occupies in a shader record.
pub const TABLE_HANDLE_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootParameter {
    pub slot: BindSlot,
    pub range: RangeType,
    pub count: u32,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSignature {
    parameters: Vec<RootParameter>,
    globals: usize,
    samplers: Vec<SamplerInfo>,
}

impl RootSignature {
    pub fn compile(style: &BindStyle) -> Result<Self, Error> {
        let mut parameters: Vec<RootParameter> = Vec::with_capacity(style.len());
        for scope in [Scope::Global, Scope::Local] {
            for ((slot, range), info) in style.entries(scope) {
                if info.count == 0 {
                    return Err(Error::invalid(format!("empty range at {slot:?} {range:?}")));
                }
                let end = slot.register + info.count;
                if let Some(clash) = parameters.iter().find(|p| {
                    p.range == *range
                        && p.slot.space == slot.space
                        && p.slot.register < end
                        && slot.register < p.slot.register + p.count
                }) {
                    return Err(Error::invalid(format!(
                        "{range:?} registers {}..{end} in space {} overlap {:?}",
                        slot.register, slot.space, clash.slot
                    )));
                }
                parameters.push(RootParameter {
                    slot: *slot,
                    range: *range,
                    count: info.count,
                    scope,
                });
            }
        }
        let globals = parameters.iter().filter(|p| p.scope == Scope::Global).count();
        log::trace!(
            "compiled root signature: {globals} global and {} local parameters",
            parameters.len() - globals
        );
        Ok(RootSignature {
            parameters,
            globals,
            samplers: style.samplers.clone(),
        })
    }

    pub fn parameters(&self) -> &[RootParameter] {
        &self.parameters
    }

    pub fn global_parameters(&self) -> &[RootParameter] {
        &self.parameters[..self.globals]
    }

    pub fn local_parameters(&self) -> &[RootParameter] {
        &self.parameters[self.globals..]
    }

    pub fn static_samplers(&self) -> &[SamplerInfo] {
        &self.samplers
    }

    /// Root parameter index of a binding.
    pub fn parameter_index(&self, slot: BindSlot, range: RangeType) -> Option<u32> {
        self.parameters
            .iter()
            .position(|p| p.slot == slot && p.range == range)
            .map(|i| i as u32)
    }

    /// Position of a local binding among the local parameters.
    pub fn local_index(&self, slot: BindSlot, range: RangeType) -> Option<usize> {
        self.local_parameters()
            .iter()
            .position(|p| p.slot == slot && p.range == range)
    }

    /// Byte offset of local table `local` within a shader record.
    pub fn record_offset(&self, local: usize) -> u64 {
        SHADER_IDENTIFIER_SIZE as u64 + local as u64 * TABLE_HANDLE_SIZE
    }

    /// Size of one shader record, aligned.
    pub fn record_stride(&self) -> u64 {
        align_up(
            self.record_offset(self.local_parameters().len()),
            SHADER_RECORD_ALIGNMENT,
        )
    }
}
