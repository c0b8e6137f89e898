use indexmap::IndexMap;

use super::{
    Backend, BufferUsage, BuildMode, BuildSizes, DeviceAddress, MemoryLocation, StructureGeometry,
    StructureLevel,
};
use crate::accel::{AabbPositions, TopLevelInstance};
use crate::error::BackendError;

/// Handle of a buffer owned by `HostBackend`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

/// Handle of a structure owned by `HostBackend`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct StructureId(u64);

#[derive(Debug)]
struct HostBuffer {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
enum BuiltContents {
    Bottom(Vec<AabbPositions>),
    Top(Vec<TopLevelInstance>),
}

#[derive(Debug)]
struct HostStructure {
    level: StructureLevel,
    size: u64,
    contents: Option<BuiltContents>,
}

/// In-memory emulation of a ray tracing device.
///
/// Structure builds only snapshot their inputs, which is enough to check the build
/// protocol (sizes, update validity, resource lifetimes) without a GPU.
/// Allocation failures can be injected with `fail_after`.
#[derive(Debug, Default)]
pub struct HostBackend {
    next_id: u64,
    buffers: IndexMap<u64, HostBuffer>,
    structures: IndexMap<u64, HostStructure>,

    /// Allocations left before every allocation fails.
    allocations_until_failure: Option<usize>,

    build_count: usize,
    update_count: usize,
    wait_count: usize,
}

const ADDRESS_BASE: DeviceAddress = 0x1000_0000;
const ADDRESS_STRIDE: DeviceAddress = 0x1_0000;

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `allocations` more buffer or structure allocations succeed, then fail all of them
    /// with `OutOfDeviceMemory`.
    pub fn fail_after(&mut self, allocations: usize) {
        self.allocations_until_failure = Some(allocations);
    }

    pub fn stop_failing(&mut self) {
        self.allocations_until_failure = None;
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_structure_count(&self) -> usize {
        self.structures.len()
    }

    /// Number of completed builds from scratch
    pub fn build_count(&self) -> usize {
        self.build_count
    }

    /// Number of completed update builds
    pub fn update_count(&self) -> usize {
        self.update_count
    }

    /// Number of `wait_idle` calls
    pub fn wait_count(&self) -> usize {
        self.wait_count
    }

    pub fn buffer_contents(&self, buffer: &BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_label(&self, buffer: &BufferId) -> Option<&str> {
        self.buffers.get(&buffer.0).map(|b| b.label.as_str())
    }

    /// Boxes captured by the last build of a bottom level structure.
    pub fn built_boxes(&self, structure: &StructureId) -> Option<&[AabbPositions]> {
        match self.structures.get(&structure.0)?.contents.as_ref()? {
            BuiltContents::Bottom(boxes) => Some(boxes),
            BuiltContents::Top(_) => None,
        }
    }

    /// Instances captured by the last build of a top level structure.
    pub fn built_instances(&self, structure: &StructureId) -> Option<&[TopLevelInstance]> {
        match self.structures.get(&structure.0)?.contents.as_ref()? {
            BuiltContents::Top(instances) => Some(instances),
            BuiltContents::Bottom(_) => None,
        }
    }

    fn allocate_id(&mut self, requested: u64) -> Result<u64, BackendError> {
        match &mut self.allocations_until_failure {
            Some(0) => return Err(BackendError::OutOfDeviceMemory { requested }),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn read_contents(
        &self,
        geometry: &StructureGeometry<'_, BufferId>,
    ) -> Result<BuiltContents, BackendError> {
        let buffer = self
            .buffers
            .get(&geometry.buffer().0)
            .ok_or(BackendError::InvalidHandle(geometry.buffer().0))?;
        if buffer.usage != BufferUsage::BuildInput {
            return Err(BackendError::Device(format!(
                "buffer `{}` is not a build input",
                buffer.label
            )));
        }

        let count = geometry.count() as usize;
        let stride = match geometry {
            StructureGeometry::Aabbs { .. } => size_of::<AabbPositions>(),
            StructureGeometry::Instances { .. } => size_of::<TopLevelInstance>(),
        };
        let bytes = buffer.data.get(..count * stride).ok_or_else(|| {
            BackendError::Device(format!(
                "buffer `{}` holds {} bytes, build reads {}",
                buffer.label,
                buffer.data.len(),
                count * stride
            ))
        })?;

        Ok(match geometry {
            StructureGeometry::Aabbs { .. } => {
                BuiltContents::Bottom(bytemuck::pod_collect_to_vec(bytes))
            }
            StructureGeometry::Instances { .. } => {
                let instances: Vec<TopLevelInstance> = bytemuck::pod_collect_to_vec(bytes);
                if let Some(dangling) = instances
                    .iter()
                    .find(|instance| self.structure_by_reference(instance.structure_reference).is_none())
                {
                    return Err(BackendError::InvalidHandle(dangling.structure_reference));
                }
                BuiltContents::Top(instances)
            }
        })
    }

    fn structure_by_reference(&self, reference: DeviceAddress) -> Option<&HostStructure> {
        let offset = reference.checked_sub(ADDRESS_BASE)?;
        if offset % ADDRESS_STRIDE != 0 {
            return None;
        }
        self.structures.get(&(offset / ADDRESS_STRIDE))
    }
}

fn check_update(previous: &BuiltContents, next: &BuiltContents) -> Result<(), BackendError> {
    match (previous, next) {
        (BuiltContents::Bottom(a), BuiltContents::Bottom(b)) if a.len() == b.len() => Ok(()),
        (BuiltContents::Top(a), BuiltContents::Top(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .position(|(a, b)| a.structure_reference != b.structure_reference)
            .map_or(Ok(()), |index| {
                Err(BackendError::InvalidUpdate(format!(
                    "instance {index} references a different structure"
                )))
            }),
        _ => Err(BackendError::InvalidUpdate(
            "primitive count or level changed".to_string(),
        )),
    }
}

impl Backend for HostBackend {
    type Buffer = BufferId;
    type Structure = StructureId;

    fn create_buffer(
        &mut self,
        label: &str,
        size: u64,
        usage: BufferUsage,
        _location: MemoryLocation,
    ) -> Result<BufferId, BackendError> {
        let id = self.allocate_id(size)?;
        log::trace!("Allocating host buffer `{label}`; size={size}");
        self.buffers.insert(
            id,
            HostBuffer {
                label: label.to_string(),
                usage,
                data: vec![0; size as usize],
            },
        );
        Ok(BufferId(id))
    }

    fn write_buffer(
        &mut self,
        buffer: &BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle(buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        let len = target.data.len();
        target
            .data
            .get_mut(start..end)
            .ok_or_else(|| {
                BackendError::Device(format!("write of {start}..{end} out of bounds ({len})"))
            })?
            .copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        let removed = self.buffers.shift_remove(&buffer.0);
        debug_assert!(removed.is_some(), "double free of buffer {}", buffer.0);
    }

    fn build_sizes(
        &self,
        geometry: &StructureGeometry<'_, BufferId>,
    ) -> Result<BuildSizes, BackendError> {
        let count = geometry.count() as u64;
        let node_size = match geometry.level() {
            StructureLevel::Bottom => 32,
            StructureLevel::Top => 128,
        };
        Ok(BuildSizes {
            structure_size: 256 + count * node_size,
            build_scratch_size: 64 + count * node_size,
            update_scratch_size: 64 + count * node_size / 2,
        })
    }

    fn create_structure(
        &mut self,
        level: StructureLevel,
        size: u64,
    ) -> Result<StructureId, BackendError> {
        let id = self.allocate_id(size)?;
        self.structures.insert(
            id,
            HostStructure {
                level,
                size,
                contents: None,
            },
        );
        Ok(StructureId(id))
    }

    fn structure_reference(&self, structure: &StructureId) -> DeviceAddress {
        ADDRESS_BASE + structure.0 * ADDRESS_STRIDE
    }

    fn build_structure(
        &mut self,
        structure: &StructureId,
        geometry: &StructureGeometry<'_, BufferId>,
        mode: BuildMode,
        scratch: &BufferId,
    ) -> Result<(), BackendError> {
        let contents = self.read_contents(geometry)?;
        let sizes = self.build_sizes(geometry)?;

        let scratch_size = self
            .buffers
            .get(&scratch.0)
            .ok_or(BackendError::InvalidHandle(scratch.0))?
            .data
            .len() as u64;
        let required_scratch = match mode {
            BuildMode::Build => sizes.build_scratch_size,
            BuildMode::Update => sizes.update_scratch_size,
        };
        if scratch_size < required_scratch {
            return Err(BackendError::Device(format!(
                "scratch buffer too small: {scratch_size} < {required_scratch}"
            )));
        }

        let target = self
            .structures
            .get_mut(&structure.0)
            .ok_or(BackendError::InvalidHandle(structure.0))?;
        if target.level != geometry.level() {
            return Err(BackendError::Device(format!(
                "{:?} geometry built into a {:?} structure",
                geometry.level(),
                target.level
            )));
        }
        if target.size < sizes.structure_size {
            return Err(BackendError::Device(format!(
                "structure too small: {} < {}",
                target.size, sizes.structure_size
            )));
        }

        match mode {
            BuildMode::Build => self.build_count += 1,
            BuildMode::Update => {
                let previous = target.contents.as_ref().ok_or_else(|| {
                    BackendError::InvalidUpdate("structure was never built".to_string())
                })?;
                check_update(previous, &contents)?;
                self.update_count += 1;
            }
        }
        target.contents = Some(contents);
        Ok(())
    }

    fn destroy_structure(&mut self, structure: StructureId) {
        let removed = self.structures.shift_remove(&structure.0);
        debug_assert!(removed.is_some(), "double free of structure {}", structure.0);
    }

    fn wait_idle(&mut self) -> Result<(), BackendError> {
        self.wait_count += 1;
        Ok(())
    }
}
