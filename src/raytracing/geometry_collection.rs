// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{AccelerationStructureHandle, BakeOutcome, BuildFlags, BuildOptions, CollectionState, Structure};
use crate::bindings::resource::View;
use crate::bindings::resource_tracking::ResourceState;
use crate::error::Error;
use crate::images::command_context::CommandContext;
use crate::imp::{BuildInputs, GeometryInputs};

/// Bytes of one 3×4 row-major transform.
const TRANSFORM_SIZE: u64 = 48;

/// A 3×4 transform stored in a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRef {
    pub buffer: View,
    /// Index of the transform within `buffer`.
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGeometry {
    /// Vertex positions; the buffer stride is the vertex stride.
    pub vertices: View,
    /// 32-bit indices, or `None` for a plain triangle list.
    pub indices: Option<View>,
    pub transform: Option<TransformRef>,
    pub opaque: bool,
}

impl TriangleGeometry {
    pub fn new(vertices: View) -> Self {
        TriangleGeometry {
            vertices,
            indices: None,
            transform: None,
            opaque: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Triangles(TriangleGeometry),
    /// Procedural primitives bounded by boxes of six floats each.
    Aabbs { aabbs: View, opaque: bool },
}

impl Geometry {
    fn inputs(&self) -> GeometryInputs {
        match self {
            Geometry::Triangles(t) => GeometryInputs::Triangles {
                vertex_buffer: t.vertices.gpu_address(),
                vertex_stride: t.vertices.resource().stride(),
                vertex_count: t.vertices.element_count(),
                index_buffer: t.indices.as_ref().map(View::gpu_address),
                index_count: t.indices.as_ref().map(View::element_count).unwrap_or_default(),
                transform: t
                    .transform
                    .as_ref()
                    .map(|r| r.buffer.gpu_address() + r.index as u64 * TRANSFORM_SIZE),
                opaque: t.opaque,
            },
            Geometry::Aabbs { aabbs, opaque } => GeometryInputs::Aabbs {
                address: aabbs.gpu_address(),
                count: aabbs.element_count(),
                opaque: *opaque,
            },
        }
    }

    fn views(&self) -> impl Iterator<Item = &View> {
        let (first, second, third) = match self {
            Geometry::Triangles(t) => (
                Some(&t.vertices),
                t.indices.as_ref(),
                t.transform.as_ref().map(|r| &r.buffer),
            ),
            Geometry::Aabbs { aabbs, .. } => (Some(aabbs), None, None),
        };
        first.into_iter().chain(second).chain(third)
    }
}

fn require_buffer(view: &View, what: &str) -> Result<(), Error> {
    if view.is_buffer() {
        Ok(())
    } else {
        Err(Error::invalid(format!("{what} {} is not a buffer", view.resource().label())))
    }
}

/// The geometry of one bottom-level acceleration structure.
#[derive(Debug)]
pub struct GeometryCollection {
    structure: Structure,
    geometries: Vec<Geometry>,
}

impl GeometryCollection {
    pub fn new(label: &str) -> Self {
        GeometryCollection {
            structure: Structure::new(label),
            geometries: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.structure.label
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    /// Adds triangles, returning their geometry index.
    pub fn add_triangles(&mut self, triangles: TriangleGeometry) -> Result<usize, Error> {
        require_buffer(&triangles.vertices, "vertex buffer")?;
        if let Some(indices) = &triangles.indices {
            require_buffer(indices, "index buffer")?;
        }
        if let Some(transform) = &triangles.transform {
            require_buffer(&transform.buffer, "transform buffer")?;
        }
        self.geometries.push(Geometry::Triangles(triangles));
        self.structure.versions.mark_structural();
        Ok(self.geometries.len() - 1)
    }

    /// Adds procedural primitives bounded by `aabbs`, returning their geometry index.
    pub fn add_aabbs(&mut self, aabbs: View, opaque: bool) -> Result<usize, Error> {
        require_buffer(&aabbs, "AABB buffer")?;
        self.geometries.push(Geometry::Aabbs { aabbs, opaque });
        self.structure.versions.mark_structural();
        Ok(self.geometries.len() - 1)
    }

    pub fn clear(&mut self) {
        self.geometries.clear();
        self.structure.versions.mark_structural();
    }

    fn triangles_mut(&mut self, index: usize) -> Result<&mut TriangleGeometry, Error> {
        match self.geometries.get_mut(index) {
            Some(Geometry::Triangles(t)) => Ok(t),
            Some(Geometry::Aabbs { .. }) => Err(Error::invalid(format!("geometry {index} is not triangles"))),
            None => Err(Error::invalid(format!("no geometry {index}"))),
        }
    }

    /// Swaps the vertex buffer of triangle geometry `index`.
    ///
    /// A buffer with a different vertex count changes the structure's shape.
    pub fn set_vertex_buffer(&mut self, index: usize, vertices: View) -> Result<(), Error> {
        require_buffer(&vertices, "vertex buffer")?;
        let triangles = self.triangles_mut(index)?;
        let reshaped = triangles.vertices.element_count() != vertices.element_count() && triangles.indices.is_none();
        triangles.vertices = vertices;
        if reshaped {
            self.structure.versions.mark_structural();
        } else {
            self.structure.versions.mark_updating();
        }
        Ok(())
    }

    /// Sets or removes the transform of triangle geometry `index`.
    ///
    /// Adding or removing a transform changes the structure's shape; moving one does not.
    pub fn set_transform(&mut self, index: usize, transform: Option<TransformRef>) -> Result<(), Error> {
        if let Some(transform) = &transform {
            require_buffer(&transform.buffer, "transform buffer")?;
        }
        let triangles = self.triangles_mut(index)?;
        let toggled = triangles.transform.is_some() != transform.is_some();
        triangles.transform = transform;
        if toggled {
            self.structure.versions.mark_structural();
        } else {
            self.structure.versions.mark_updating();
        }
        Ok(())
    }

    pub fn state(&self) -> CollectionState {
        self.structure.state()
    }

    /// Handle to the bottom-level structure, for instances.
    pub fn handle(&self) -> AccelerationStructureHandle {
        self.structure.handle.clone()
    }

    /// Allocation id of the baked result buffer.
    pub fn result_id(&self) -> Option<u64> {
        self.structure.result().map(|r| r.id())
    }

    pub fn baked_flags(&self) -> Option<BuildFlags> {
        self.structure.baked_flags()
    }

    /// Records whatever build brings the bottom-level structure up to date.
    pub fn to_gpu(&mut self, ctx: &mut CommandContext<'_>, options: BuildOptions) -> Result<BakeOutcome, Error> {
        let state = self.state();
        if state != CollectionState::UpToDate {
            for view in self.geometries.iter().flat_map(Geometry::views) {
                ctx.barrier(view, ResourceState::NON_PIXEL_SHADER_RESOURCE);
            }
        }
        let inputs = BuildInputs::BottomLevel(self.geometries.iter().map(Geometry::inputs).collect());
        self.structure.bake(ctx, options, state, inputs)
    }
}
