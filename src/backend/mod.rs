//! Narrow device interface used by the acceleration structure builders.
//!
//! Every build call blocks until the device finished it, so the builders never
//! have to track in-flight work.

mod host;
#[cfg(feature = "vulkan")]
mod vulkan;

pub use host::{BufferId, HostBackend, StructureId};
#[cfg(feature = "vulkan")]
pub use vulkan::VulkanBackend;

use crate::accel::TopLevelInstance;
use crate::error::BackendError;

/// Opaque device address of a built structure, as referenced from instance records.
pub type DeviceAddress = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Shader-visible storage, per-kind object records and the object index.
    Storage,
    /// Read by structure builds (AABBs and instance arrays).
    BuildInput,
    /// Scratch memory of a structure build.
    Scratch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    DeviceLocal,
    /// Writable from the host.
    HostVisible,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StructureLevel {
    Bottom,
    Top,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuildMode {
    /// Build from scratch.
    Build,
    /// Refit an already built structure in place. Primitive count and
    /// referenced structures must match the previous build.
    Update,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSizes {
    pub structure_size: u64,
    pub build_scratch_size: u64,
    pub update_scratch_size: u64,
}

/// Input of a structure build, referencing a buffer that was already filled.
#[derive(Debug)]
pub enum StructureGeometry<'a, Buffer> {
    /// `count` tightly packed `AabbPositions`.
    Aabbs { buffer: &'a Buffer, count: u32 },
    /// `count` tightly packed `TopLevelInstance` records.
    Instances { buffer: &'a Buffer, count: u32 },
}

impl<Buffer> StructureGeometry<'_, Buffer> {
    pub fn level(&self) -> StructureLevel {
        match self {
            StructureGeometry::Aabbs { .. } => StructureLevel::Bottom,
            StructureGeometry::Instances { .. } => StructureLevel::Top,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            StructureGeometry::Aabbs { count, .. } | StructureGeometry::Instances { count, .. } => {
                *count
            }
        }
    }

    pub fn buffer(&self) -> &Buffer {
        match self {
            StructureGeometry::Aabbs { buffer, .. }
            | StructureGeometry::Instances { buffer, .. } => buffer,
        }
    }
}

/// Device operations needed to build and refit procedural acceleration structures.
///
/// Resources are owned by the caller and handed back to `destroy_*` exactly once.
pub trait Backend {
    type Buffer;
    type Structure;

    fn create_buffer(
        &mut self,
        label: &str,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> Result<Self::Buffer, BackendError>;

    /// Copies `data` into a host visible buffer starting at byte `offset`.
    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    fn build_sizes(
        &self,
        geometry: &StructureGeometry<'_, Self::Buffer>,
    ) -> Result<BuildSizes, BackendError>;

    fn create_structure(
        &mut self,
        level: StructureLevel,
        size: u64,
    ) -> Result<Self::Structure, BackendError>;

    fn structure_reference(&self, structure: &Self::Structure) -> DeviceAddress;

    /// Records, submits and waits for a single structure build.
    fn build_structure(
        &mut self,
        structure: &Self::Structure,
        geometry: &StructureGeometry<'_, Self::Buffer>,
        mode: BuildMode,
        scratch: &Self::Buffer,
    ) -> Result<(), BackendError>;

    fn destroy_structure(&mut self, structure: Self::Structure);

    fn wait_idle(&mut self) -> Result<(), BackendError>;
}

/// Creates a host visible buffer of exactly `data.len()` bytes and fills it.
/// Nothing leaks if the write fails.
pub fn upload<B: Backend>(
    backend: &mut B,
    label: &str,
    usage: BufferUsage,
    data: &[u8],
) -> Result<B::Buffer, BackendError> {
    // Zero sized buffers are not allowed on real devices, and an empty record array
    // must still hold one whole record once viewed with the device stride
    let size = (data.len() as u64).max(MIN_BUFFER_SIZE);
    let buffer = backend.create_buffer(label, size, usage, MemoryLocation::HostVisible)?;
    match backend.write_buffer(&buffer, 0, data) {
        Ok(()) => Ok(buffer),
        Err(err) => {
            backend.destroy_buffer(buffer);
            Err(err)
        }
    }
}

const MIN_BUFFER_SIZE: u64 = size_of::<TopLevelInstance>() as u64;
