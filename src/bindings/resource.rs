// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU resources and the views that reference them.

A [Resource] owns one device allocation, a buffer or a 1D/2D/3D texture.  It is never handled
directly; every use goes through a [View], which holds one shared reference to the resource and
restricts it to a mip range and an array (or buffer element) range.  The resource lives as long
as its longest-lived view.

# Staging

CPU data reaches a GPU-only resource through an upload staging buffer, and comes back through a
readback staging buffer.  Both are created on first use and stay mapped for the resource's
lifetime.  Resources created CPU-accessible skip staging: writes land directly in upload memory
and reads come directly from readback memory.

Buffers copy linearly.  Textures copy per subresource: staging rows are pitched to 256 bytes and
each subresource starts on a 512 byte boundary, while the GPU side is tightly packed.
*/

use crate::bindings::descriptor_heap::CpuHeaps;
use crate::bindings::resource_tracking::{Barrier, ResourceState, StateTracker};
use crate::bittricks::align_up;
use crate::error::Error;
use crate::imp::{self, Allocation, CopyRegion, DescriptorContent, HeapKind, MemoryHeap};
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

pub const ROW_PITCH_ALIGNMENT: u64 = 256;
pub const PLACEMENT_ALIGNMENT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

/// How the CPU may touch a resource's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CpuAccess {
    #[default]
    None,
    /// Lives in upload memory, persistently mapped for writing.
    WriteOnlyUpload,
    /// Lives in readback memory, mapped for reading.
    ReadOnlyDownload,
}

/// Descriptor kinds a view can cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Srv,
    Uav,
    Cbv,
    Rtv,
    Dsv,
}

impl ViewKind {
    pub const ALL: [ViewKind; 5] = [ViewKind::Srv, ViewKind::Uav, ViewKind::Cbv, ViewKind::Rtv, ViewKind::Dsv];

    fn index(self) -> usize {
        self as usize
    }

    pub fn heap_kind(self) -> HeapKind {
        match self {
            ViewKind::Srv | ViewKind::Uav | ViewKind::Cbv => HeapKind::CbvSrvUav,
            ViewKind::Rtv => HeapKind::Rtv,
            ViewKind::Dsv => HeapKind::Dsv,
        }
    }
}

/// Everything needed to allocate a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub label: String,
    pub dimension: Dimension,
    /// Bytes per buffer element or per texel.
    pub stride: u32,
    /// Element count for buffers.
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array size otherwise.
    pub depth_or_array: u32,
    pub mips: u32,
    pub initial_state: ResourceState,
    pub clear_value: Option<[f32; 4]>,
    pub cpu_access: CpuAccess,
}

impl ResourceDescriptor {
    pub fn buffer(label: &str, stride: u32, count: u32) -> Self {
        ResourceDescriptor {
            label: label.to_string(),
            dimension: Dimension::Buffer,
            stride,
            width: count,
            height: 1,
            depth_or_array: 1,
            mips: 1,
            initial_state: ResourceState::COPY_DEST,
            clear_value: None,
            cpu_access: CpuAccess::None,
        }
    }
}

/// Placement of one subresource in both layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footprint {
    pub mip: u32,
    pub array: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_bytes: u64,
    pub row_pitch: u64,
    pub staging_offset: u64,
    pub packed_offset: u64,
}

impl Footprint {
    fn rows(&self) -> u64 {
        self.height as u64 * self.depth as u64
    }
    fn packed_size(&self) -> u64 {
        self.row_bytes * self.rows()
    }
    fn staging_size(&self) -> u64 {
        self.row_pitch * self.rows()
    }
}

fn footprints(descriptor: &ResourceDescriptor) -> Vec<Footprint> {
    if descriptor.dimension == Dimension::Buffer {
        let bytes = descriptor.stride as u64 * descriptor.width as u64;
        return vec![Footprint {
            mip: 0,
            array: 0,
            width: descriptor.width,
            height: 1,
            depth: 1,
            row_bytes: bytes,
            row_pitch: bytes,
            staging_offset: 0,
            packed_offset: 0,
        }];
    }
    let (arrays, depth) = match descriptor.dimension {
        Dimension::Texture3D => (1, descriptor.depth_or_array),
        _ => (descriptor.depth_or_array, 1),
    };
    let mut result = Vec::with_capacity((arrays * descriptor.mips) as usize);
    let mut staging_offset = 0;
    let mut packed_offset = 0;
    //subresource index = mip + array * mips
    for array in 0..arrays {
        for mip in 0..descriptor.mips {
            let width = (descriptor.width >> mip).max(1);
            let height = match descriptor.dimension {
                Dimension::Texture1D => 1,
                _ => (descriptor.height >> mip).max(1),
            };
            let row_bytes = width as u64 * descriptor.stride as u64;
            let footprint = Footprint {
                mip,
                array,
                width,
                height,
                depth: (depth >> mip).max(1),
                row_bytes,
                row_pitch: align_up(row_bytes, ROW_PITCH_ALIGNMENT),
                staging_offset: align_up(staging_offset, PLACEMENT_ALIGNMENT),
                packed_offset,
            };
            staging_offset = footprint.staging_offset + footprint.staging_size();
            packed_offset += footprint.packed_size();
            result.push(footprint);
        }
    }
    result
}

/// One GPU allocation and its tracked state.
pub struct Resource {
    descriptor: ResourceDescriptor,
    allocation: Arc<Allocation>,
    tracker: StateTracker,
    footprints: Vec<Footprint>,
    upload: OnceLock<Arc<Allocation>>,
    readback: OnceLock<Arc<Allocation>>,
    staging_init: Mutex<()>,
    device: imp::Device,
    heaps: Arc<CpuHeaps>,
}

impl Debug for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("label", &self.descriptor.label)
            .field("dimension", &self.descriptor.dimension)
            .field("state", &self.tracker.current())
            .finish()
    }
}

impl Resource {
    pub(crate) fn new(
        device: &imp::Device,
        heaps: Arc<CpuHeaps>,
        descriptor: ResourceDescriptor,
    ) -> Result<Arc<Self>, Error> {
        if descriptor.stride == 0 || descriptor.width == 0 || descriptor.height == 0 || descriptor.depth_or_array == 0 || descriptor.mips == 0 {
            return Err(Error::invalid(format!("resource {} has a zero extent", descriptor.label)));
        }
        if descriptor.dimension != Dimension::Buffer && descriptor.cpu_access != CpuAccess::None {
            return Err(Error::invalid(format!(
                "texture {} cannot live in CPU-accessible memory",
                descriptor.label
            )));
        }
        let footprints = footprints(&descriptor);
        let size = footprints.iter().map(Footprint::packed_size).sum();
        let (heap, tracker) = match descriptor.cpu_access {
            CpuAccess::None => (MemoryHeap::Default, StateTracker::new(descriptor.initial_state)),
            CpuAccess::WriteOnlyUpload => (MemoryHeap::Upload, StateTracker::pinned(ResourceState::GENERIC_READ)),
            CpuAccess::ReadOnlyDownload => (MemoryHeap::Readback, StateTracker::pinned(ResourceState::COPY_DEST)),
        };
        let allocation = device.create_allocation(&descriptor.label, size, heap)?;
        log::trace!("allocated {} ({size} bytes in {heap:?})", descriptor.label);
        Ok(Arc::new(Resource {
            descriptor,
            allocation,
            tracker,
            footprints,
            upload: OnceLock::new(),
            readback: OnceLock::new(),
            staging_init: Mutex::new(()),
            device: device.clone(),
            heaps,
        }))
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }
    pub fn label(&self) -> &str {
        &self.descriptor.label
    }
    pub fn dimension(&self) -> Dimension {
        self.descriptor.dimension
    }
    pub fn stride(&self) -> u32 {
        self.descriptor.stride
    }
    pub fn mips(&self) -> u32 {
        self.descriptor.mips
    }
    pub fn cpu_access(&self) -> CpuAccess {
        self.descriptor.cpu_access
    }
    pub fn clear_value(&self) -> Option<[f32; 4]> {
        self.descriptor.clear_value
    }
    /// Number of array slices, or elements for buffers.
    pub fn elements(&self) -> u32 {
        match self.descriptor.dimension {
            Dimension::Buffer => self.descriptor.width,
            Dimension::Texture3D => 1,
            _ => self.descriptor.depth_or_array,
        }
    }
    /// Last state the resource was transitioned to.
    pub fn state(&self) -> ResourceState {
        self.tracker.current()
    }
    /// Identifies the resource in recorded commands.
    pub fn id(&self) -> u64 {
        self.allocation.id()
    }
    pub fn size(&self) -> u64 {
        self.allocation.size()
    }
    pub fn gpu_address(&self) -> u64 {
        self.allocation.gpu_address()
    }

    pub(crate) fn allocation(&self) -> &Arc<Allocation> {
        &self.allocation
    }

    pub(crate) fn request_state(&self, target: ResourceState) -> Barrier {
        self.tracker.request(target)
    }

    pub(crate) fn is_state_pinned(&self) -> bool {
        self.tracker.is_pinned()
    }

    fn staging_size(&self) -> u64 {
        self.footprints
            .last()
            .map(|f| f.staging_offset + f.staging_size())
            .unwrap_or_default()
    }

    fn staging<'a>(&'a self, cell: &'a OnceLock<Arc<Allocation>>, heap: MemoryHeap) -> Result<&'a Arc<Allocation>, Error> {
        if let Some(staging) = cell.get() {
            return Ok(staging);
        }
        let _guard = self.staging_init.lock();
        if let Some(staging) = cell.get() {
            return Ok(staging);
        }
        let suffix = match heap {
            MemoryHeap::Readback => "readback",
            _ => "upload",
        };
        let staging = self.device.create_allocation(
            &format!("{} {suffix}", self.descriptor.label),
            self.staging_size(),
            heap,
        )?;
        Ok(cell.get_or_init(|| staging))
    }

    pub(crate) fn upload_staging(&self) -> Result<&Arc<Allocation>, Error> {
        self.staging(&self.upload, MemoryHeap::Upload)
    }

    pub(crate) fn existing_upload_staging(&self) -> Option<&Arc<Allocation>> {
        self.upload.get()
    }

    pub(crate) fn readback_staging(&self) -> Result<&Arc<Allocation>, Error> {
        self.staging(&self.readback, MemoryHeap::Readback)
    }

    pub(crate) fn existing_readback_staging(&self) -> Option<&Arc<Allocation>> {
        self.readback.get()
    }
}

/// A reference to a sub-range of a [Resource].
///
/// Cloning or slicing a view shares the resource but starts with an empty descriptor cache.
pub struct View {
    resource: Arc<Resource>,
    first_mip: u32,
    mip_count: u32,
    first_element: u32,
    element_count: u32,
    descriptors: [OnceLock<u32>; 5],
    valid: AtomicU8,
    descriptor_init: Mutex<()>,
}

impl Debug for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("resource", &self.resource.label())
            .field("mips", &(self.first_mip..self.first_mip + self.mip_count))
            .field("elements", &(self.first_element..self.first_element + self.element_count))
            .finish()
    }
}

impl Clone for View {
    fn clone(&self) -> Self {
        View::new(
            self.resource.clone(),
            self.first_mip,
            self.mip_count,
            self.first_element,
            self.element_count,
        )
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
            && self.first_mip == other.first_mip
            && self.mip_count == other.mip_count
            && self.first_element == other.first_element
            && self.element_count == other.element_count
    }
}

impl View {
    fn new(resource: Arc<Resource>, first_mip: u32, mip_count: u32, first_element: u32, element_count: u32) -> Self {
        View {
            resource,
            first_mip,
            mip_count,
            first_element,
            element_count,
            descriptors: Default::default(),
            valid: AtomicU8::new(0),
            descriptor_init: Mutex::new(()),
        }
    }

    /// A view of the whole resource.
    pub(crate) fn whole(resource: Arc<Resource>) -> Self {
        let mips = resource.mips();
        let elements = resource.elements();
        View::new(resource, 0, mips, 0, elements)
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }
    pub fn first_mip(&self) -> u32 {
        self.first_mip
    }
    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }
    pub fn first_element(&self) -> u32 {
        self.first_element
    }
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Narrows the view to `count` mips starting at `first`, relative to this view.
    pub fn slice_mips(&self, first: u32, count: u32) -> Result<View, Error> {
        if count == 0 || first.checked_add(count).is_none_or(|end| end > self.mip_count) {
            return Err(Error::invalid(format!(
                "mip slice {first}+{count} outside view of {} mips",
                self.mip_count
            )));
        }
        Ok(View::new(
            self.resource.clone(),
            self.first_mip + first,
            count,
            self.first_element,
            self.element_count,
        ))
    }

    /// Narrows the view to `count` array slices (buffer elements) starting at `first`, relative to this view.
    pub fn slice_array(&self, first: u32, count: u32) -> Result<View, Error> {
        if count == 0 || first.checked_add(count).is_none_or(|end| end > self.element_count) {
            return Err(Error::invalid(format!(
                "array slice {first}+{count} outside view of {} elements",
                self.element_count
            )));
        }
        Ok(View::new(
            self.resource.clone(),
            self.first_mip,
            self.mip_count,
            self.first_element + first,
            count,
        ))
    }

    pub fn is_buffer(&self) -> bool {
        self.resource.dimension() == Dimension::Buffer
    }

    /// GPU address of the view's first byte.  Buffers only.
    pub fn gpu_address(&self) -> u64 {
        self.resource.gpu_address() + self.buffer_offset()
    }

    fn buffer_offset(&self) -> u64 {
        self.first_element as u64 * self.resource.stride() as u64
    }

    fn view_footprints(&self) -> impl Iterator<Item = &Footprint> {
        let mips = self.first_mip..self.first_mip + self.mip_count;
        let elements = self.first_element..self.first_element + self.element_count;
        self.resource
            .footprints
            .iter()
            .filter(move |f| mips.contains(&f.mip) && elements.contains(&f.array))
    }

    /// Bytes of tightly packed data covering the view.
    pub fn byte_len(&self) -> u64 {
        if self.is_buffer() {
            self.element_count as u64 * self.resource.stride() as u64
        } else {
            self.view_footprints().map(Footprint::packed_size).sum()
        }
    }

    /// Whether the descriptor of `kind` has been created.
    pub fn has_descriptor(&self, kind: ViewKind) -> bool {
        self.valid.load(Ordering::Acquire) & (1 << kind.index()) != 0
    }

    /// The CPU descriptor slot of `kind` for this view, created on first use.
    pub fn descriptor(&self, kind: ViewKind) -> Result<u32, Error> {
        let cell = &self.descriptors[kind.index()];
        if let Some(index) = cell.get() {
            return Ok(*index);
        }
        let _guard = self.descriptor_init.lock();
        if let Some(index) = cell.get() {
            return Ok(*index);
        }
        match (kind, self.is_buffer()) {
            (ViewKind::Cbv, false) => {
                return Err(Error::invalid(format!("constant buffer view of texture {}", self.resource.label())));
            }
            (ViewKind::Rtv | ViewKind::Dsv, true) => {
                return Err(Error::invalid(format!("{kind:?} of buffer {}", self.resource.label())));
            }
            _ => {}
        }
        let heap = self.resource.heaps.for_kind(kind.heap_kind());
        let index = heap.allocate()?;
        heap.raw().write(
            index,
            DescriptorContent::View {
                resource: self.resource.id(),
                kind,
                first_mip: self.first_mip,
                mip_count: self.mip_count,
                first_element: self.first_element,
                element_count: self.element_count,
            },
        )?;
        let index = *cell.get_or_init(|| index);
        self.valid.fetch_or(1 << kind.index(), Ordering::AcqRel);
        Ok(index)
    }

    /// Writes tightly packed CPU data covering the view.
    ///
    /// The data lands in the upload staging buffer, or directly in the resource when it lives in
    /// upload memory.  `flip_rows` reverses the row order of each texture slice.
    pub fn write_data(&self, data: &[u8], flip_rows: bool) -> Result<(), Error> {
        let resource = &self.resource;
        if resource.cpu_access() == CpuAccess::ReadOnlyDownload {
            return Err(Error::invalid(format!("{} is read-only from the CPU", resource.label())));
        }
        if data.len() as u64 != self.byte_len() {
            return Err(Error::invalid(format!(
                "{} bytes written to a view of {} bytes",
                data.len(),
                self.byte_len()
            )));
        }
        let direct = resource.cpu_access() == CpuAccess::WriteOnlyUpload;
        let target = if direct { &resource.allocation } else { resource.upload_staging()? };
        if self.is_buffer() {
            return target.write_mapped(self.buffer_offset(), data);
        }
        let mut source = 0usize;
        for footprint in self.view_footprints() {
            for slice in 0..footprint.depth as u64 {
                for row in 0..footprint.height as u64 {
                    let dest_row = if flip_rows { footprint.height as u64 - 1 - row } else { row };
                    let line = slice * footprint.height as u64 + dest_row;
                    let offset = if direct {
                        footprint.packed_offset + line * footprint.row_bytes
                    } else {
                        footprint.staging_offset + line * footprint.row_pitch
                    };
                    let len = footprint.row_bytes as usize;
                    target.write_mapped(offset, &data[source..source + len])?;
                    source += len;
                }
            }
        }
        Ok(())
    }

    /// Reads the view back as tightly packed data.
    ///
    /// Valid after a download was recorded and a wait on its flush returned.
    pub fn read_data(&self, flip_rows: bool) -> Result<Vec<u8>, Error> {
        let resource = &self.resource;
        let direct = match resource.cpu_access() {
            CpuAccess::WriteOnlyUpload => {
                return Err(Error::invalid(format!("{} is write-only from the CPU", resource.label())));
            }
            CpuAccess::ReadOnlyDownload => true,
            CpuAccess::None => false,
        };
        let source = if direct {
            &resource.allocation
        } else {
            resource
                .existing_readback_staging()
                .ok_or_else(|| Error::invalid(format!("{} was never downloaded", resource.label())))?
        };
        if self.is_buffer() {
            return source.read_mapped(self.buffer_offset(), self.byte_len());
        }
        let mut data = Vec::with_capacity(self.byte_len() as usize);
        for footprint in self.view_footprints() {
            for slice in 0..footprint.depth as u64 {
                for row in 0..footprint.height as u64 {
                    let src_row = if flip_rows { footprint.height as u64 - 1 - row } else { row };
                    let line = slice * footprint.height as u64 + src_row;
                    let offset = if direct {
                        footprint.packed_offset + line * footprint.row_bytes
                    } else {
                        footprint.staging_offset + line * footprint.row_pitch
                    };
                    data.extend(source.read_mapped(offset, footprint.row_bytes)?);
                }
            }
        }
        Ok(data)
    }

    /// Copy regions from the staging layout into the resource, or back when `to_staging`.
    pub(crate) fn staging_regions(&self, to_staging: bool) -> Vec<CopyRegion> {
        let orient = |staging: u64, packed: u64, len: u64| {
            if to_staging {
                CopyRegion { src_offset: packed, dst_offset: staging, len }
            } else {
                CopyRegion { src_offset: staging, dst_offset: packed, len }
            }
        };
        if self.is_buffer() {
            let offset = self.buffer_offset();
            return vec![orient(offset, offset, self.byte_len())];
        }
        let mut regions = Vec::new();
        for footprint in self.view_footprints() {
            for line in 0..footprint.rows() {
                regions.push(orient(
                    footprint.staging_offset + line * footprint.row_pitch,
                    footprint.packed_offset + line * footprint.row_bytes,
                    footprint.row_bytes,
                ));
            }
        }
        regions
    }

    /// Regions copying this whole view onto the same range of another resource with identical layout.
    pub(crate) fn packed_regions(&self) -> Vec<CopyRegion> {
        if self.is_buffer() {
            let offset = self.buffer_offset();
            return vec![CopyRegion { src_offset: offset, dst_offset: offset, len: self.byte_len() }];
        }
        self.view_footprints()
            .map(|f| CopyRegion {
                src_offset: f.packed_offset,
                dst_offset: f.packed_offset,
                len: f.packed_size(),
            })
            .collect()
    }
}

impl Drop for View {
    fn drop(&mut self) {
        for kind in ViewKind::ALL {
            if let Some(index) = self.descriptors[kind.index()].get() {
                self.resource.heaps.for_kind(kind.heap_kind()).free(*index);
            }
        }
    }
}
