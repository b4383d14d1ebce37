// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Pipelines.

A [Pipeline] pairs a compiled [RootSignature] with the shaders of one of three kinds, chosen at
construction:

* compute - one compute shader, usable on the compute and graphics engines
* graphics - vertex and pixel shaders, usable on the graphics engine
* ray tracing - a shader library with its exports and the three shader tables a ray dispatch
  consumes, usable on the compute and graphics engines
*/

use crate::bindings::bind_style::BindStyle;
use crate::bindings::root_signature::RootSignature;
use crate::bindings::shader_table::ShaderTable;
use crate::error::Error;
use crate::images::BoundDevice;
use crate::images::engine::EngineKind;
use crate::images::shader::ShaderBytecode;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroup {
    pub name: String,
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
    pub intersection: Option<String>,
}

impl HitGroup {
    pub fn triangles(name: &str, closest_hit: &str) -> Self {
        HitGroup {
            name: name.to_string(),
            closest_hit: Some(closest_hit.to_string()),
            any_hit: None,
            intersection: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaytracingDescriptor {
    pub library: ShaderBytecode,
    pub ray_generation: String,
    pub misses: Vec<String>,
    pub hit_groups: Vec<HitGroup>,
    /// Records in the hit-group table.  Instances index it through their hit-group contribution.
    pub hit_records: u32,
    pub max_recursion: u32,
}

/// Which shader table of a ray-tracing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    RayGeneration,
    Miss,
    HitGroup,
}

#[derive(Debug)]
pub struct RaytracingPipeline {
    descriptor: RaytracingDescriptor,
    ray_generation_table: ShaderTable,
    miss_table: ShaderTable,
    hit_group_table: ShaderTable,
}

impl RaytracingPipeline {
    pub fn descriptor(&self) -> &RaytracingDescriptor {
        &self.descriptor
    }

    pub fn table(&self, kind: TableKind) -> &ShaderTable {
        match kind {
            TableKind::RayGeneration => &self.ray_generation_table,
            TableKind::Miss => &self.miss_table,
            TableKind::HitGroup => &self.hit_group_table,
        }
    }

    /// Whether `export` may be written into a record of `kind`.
    pub(crate) fn exports(&self, kind: TableKind, export: &str) -> bool {
        match kind {
            TableKind::RayGeneration => self.descriptor.ray_generation == export,
            TableKind::Miss => self.descriptor.misses.iter().any(|m| m == export),
            TableKind::HitGroup => self.descriptor.hit_groups.iter().any(|h| h.name == export),
        }
    }
}

#[derive(Debug)]
pub enum PipelineKind {
    Compute { shader: ShaderBytecode },
    Graphics { vertex: ShaderBytecode, pixel: ShaderBytecode },
    Raytracing(RaytracingPipeline),
}

#[derive(Debug)]
pub struct Pipeline {
    label: String,
    bind_style: BindStyle,
    root_signature: RootSignature,
    kind: PipelineKind,
}

impl Pipeline {
    fn new(label: &str, bind_style: BindStyle, kind: impl FnOnce(&RootSignature) -> Result<PipelineKind, Error>) -> Result<Arc<Self>, Error> {
        let root_signature = RootSignature::compile(&bind_style)?;
        let kind = kind(&root_signature)?;
        log::info!("Compiled pipeline {label}");
        Ok(Arc::new(Pipeline {
            label: label.to_string(),
            bind_style,
            root_signature,
            kind,
        }))
    }

    pub fn compute(label: &str, shader: ShaderBytecode, bind_style: BindStyle) -> Result<Arc<Self>, Error> {
        Self::new(label, bind_style, |_| Ok(PipelineKind::Compute { shader }))
    }

    pub fn graphics(label: &str, vertex: ShaderBytecode, pixel: ShaderBytecode, bind_style: BindStyle) -> Result<Arc<Self>, Error> {
        Self::new(label, bind_style, |_| Ok(PipelineKind::Graphics { vertex, pixel }))
    }

    pub fn raytracing(
        device: &BoundDevice,
        label: &str,
        descriptor: RaytracingDescriptor,
        bind_style: BindStyle,
    ) -> Result<Arc<Self>, Error> {
        if descriptor.ray_generation.is_empty() {
            return Err(Error::invalid(format!("ray-tracing pipeline {label} has no ray generation shader")));
        }
        if descriptor.hit_records == 0 {
            return Err(Error::invalid(format!("ray-tracing pipeline {label} has an empty hit-group table")));
        }
        Self::new(label, bind_style, |root| {
            let stride = root.record_stride();
            let frames = device.frames();
            let imp = device.imp();
            Ok(PipelineKind::Raytracing(RaytracingPipeline {
                ray_generation_table: ShaderTable::new(imp, &format!("{label} ray generation"), 1, stride, frames)?,
                miss_table: ShaderTable::new(imp, &format!("{label} miss"), descriptor.misses.len() as u32, stride, frames)?,
                hit_group_table: ShaderTable::new(imp, &format!("{label} hit groups"), descriptor.hit_records, stride, frames)?,
                descriptor,
            }))
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bind_style(&self) -> &BindStyle {
        &self.bind_style
    }

    pub fn root_signature(&self) -> &RootSignature {
        &self.root_signature
    }

    pub fn kind(&self) -> &PipelineKind {
        &self.kind
    }

    pub fn raytracing_pipeline(&self) -> Option<&RaytracingPipeline> {
        match &self.kind {
            PipelineKind::Raytracing(pipeline) => Some(pipeline),
            _ => None,
        }
    }

    pub fn runs_on(&self, engine: EngineKind) -> bool {
        match self.kind {
            PipelineKind::Graphics { .. } => engine == EngineKind::Graphics,
            PipelineKind::Compute { .. } | PipelineKind::Raytracing(_) => engine != EngineKind::Copy,
        }
    }
}
