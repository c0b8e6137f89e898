use std::{fmt::Display, iter, sync::Arc};

use vulkano::{
    acceleration_structure::{
        AccelerationStructure, AccelerationStructureBuildGeometryInfo,
        AccelerationStructureBuildRangeInfo, AccelerationStructureBuildType,
        AccelerationStructureCreateInfo, AccelerationStructureGeometries,
        AccelerationStructureGeometryAabbsData, AccelerationStructureGeometryInstancesData,
        AccelerationStructureGeometryInstancesDataType, AccelerationStructureInstance,
        AccelerationStructureType, BuildAccelerationStructureFlags, BuildAccelerationStructureMode,
    },
    Validated,
    buffer::{AllocateBufferError, Buffer, BufferCreateInfo, Subbuffer},
    command_buffer::{
        AutoCommandBufferBuilder, CommandBufferUsage, PrimaryCommandBufferAbstract,
        allocator::CommandBufferAllocator,
    },
    device::{Device, Queue},
    memory::allocator::{AllocationCreateInfo, MemoryAllocator, MemoryTypeFilter},
    sync::GpuFuture,
};

use super::{
    Backend, BufferUsage, BuildMode, BuildSizes, DeviceAddress, MemoryLocation, StructureGeometry,
    StructureLevel,
};
use crate::accel::AabbPositions;
use crate::error::BackendError;

/// `Backend` on top of vulkano's `KHR_acceleration_structure` wrappers.
///
/// The device must have the `acceleration_structure` and `buffer_device_address` features
/// enabled. Every build is recorded into its own one time submit command buffer and waited for.
pub struct VulkanBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    memory_allocator: Arc<dyn MemoryAllocator>,
    command_buffer_allocator: Arc<dyn CommandBufferAllocator>,
}

impl VulkanBackend {
    pub fn new(
        device: Arc<Device>,
        queue: Arc<Queue>,
        memory_allocator: Arc<dyn MemoryAllocator>,
        command_buffer_allocator: Arc<dyn CommandBufferAllocator>,
    ) -> Self {
        VulkanBackend {
            device,
            queue,
            memory_allocator,
            command_buffer_allocator,
        }
    }

    fn geometry_info(
        &self,
        geometry: &StructureGeometry<'_, Subbuffer<[u8]>>,
    ) -> AccelerationStructureBuildGeometryInfo {
        let (geometries, flags) = match geometry {
            StructureGeometry::Aabbs { buffer, .. } => (
                AccelerationStructureGeometries::Aabbs(vec![AccelerationStructureGeometryAabbsData {
                    data: Some((*buffer).clone()),
                    stride: size_of::<AabbPositions>() as u32,
                    ..Default::default()
                }]),
                BuildAccelerationStructureFlags::PREFER_FAST_TRACE,
            ),
            StructureGeometry::Instances { buffer, .. } => (
                AccelerationStructureGeometries::Instances(
                    AccelerationStructureGeometryInstancesData::new(
                        AccelerationStructureGeometryInstancesDataType::Values(Some(
                            (*buffer).clone().reinterpret::<[AccelerationStructureInstance]>(),
                        )),
                    ),
                ),
                BuildAccelerationStructureFlags::PREFER_FAST_TRACE
                    | BuildAccelerationStructureFlags::ALLOW_UPDATE,
            ),
        };

        AccelerationStructureBuildGeometryInfo {
            flags,
            ..AccelerationStructureBuildGeometryInfo::new(geometries)
        }
    }
}

fn device_error(err: impl Display) -> BackendError {
    BackendError::Device(err.to_string())
}

impl Backend for VulkanBackend {
    type Buffer = Subbuffer<[u8]>;
    type Structure = Arc<AccelerationStructure>;

    fn create_buffer(
        &mut self,
        label: &str,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> Result<Self::Buffer, BackendError> {
        log::debug!("Allocating device buffer `{label}`; size={size}");

        let usage = match usage {
            BufferUsage::Storage => {
                vulkano::buffer::BufferUsage::STORAGE_BUFFER
                    | vulkano::buffer::BufferUsage::SHADER_DEVICE_ADDRESS
            }
            BufferUsage::BuildInput => {
                vulkano::buffer::BufferUsage::SHADER_DEVICE_ADDRESS
                    | vulkano::buffer::BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY
            }
            BufferUsage::Scratch => {
                vulkano::buffer::BufferUsage::SHADER_DEVICE_ADDRESS
                    | vulkano::buffer::BufferUsage::STORAGE_BUFFER
            }
        };
        let memory_type_filter = match location {
            MemoryLocation::DeviceLocal => MemoryTypeFilter::PREFER_DEVICE,
            MemoryLocation::HostVisible => {
                MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE
            }
        };

        Buffer::new_slice::<u8>(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter,
                ..Default::default()
            },
            size,
        )
        .map_err(|err| match err {
            Validated::Error(AllocateBufferError::AllocateMemory(_)) => {
                BackendError::OutOfDeviceMemory { requested: size }
            }
            other => device_error(other),
        })
    }

    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let end = offset + data.len() as u64;
        if end > buffer.len() {
            return Err(BackendError::Device(format!(
                "write of {offset}..{end} out of bounds ({})",
                buffer.len()
            )));
        }
        let target = buffer.clone().slice(offset..end);
        let mut guard = target.write().map_err(device_error)?;
        guard.copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        drop(buffer);
    }

    fn build_sizes(
        &self,
        geometry: &StructureGeometry<'_, Self::Buffer>,
    ) -> Result<BuildSizes, BackendError> {
        let info = self.geometry_info(geometry);
        let sizes = self
            .device
            .acceleration_structure_build_sizes(
                AccelerationStructureBuildType::Device,
                &info,
                &[geometry.count()],
            )
            .map_err(device_error)?;

        Ok(BuildSizes {
            structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        })
    }

    fn create_structure(
        &mut self,
        level: StructureLevel,
        size: u64,
    ) -> Result<Self::Structure, BackendError> {
        let storage = Buffer::new_slice::<u8>(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage: vulkano::buffer::BufferUsage::ACCELERATION_STRUCTURE_STORAGE
                    | vulkano::buffer::BufferUsage::SHADER_DEVICE_ADDRESS,
                ..Default::default()
            },
            AllocationCreateInfo::default(),
            size,
        )
        .map_err(|_| BackendError::OutOfDeviceMemory { requested: size })?;

        let ty = match level {
            StructureLevel::Bottom => AccelerationStructureType::BottomLevel,
            StructureLevel::Top => AccelerationStructureType::TopLevel,
        };
        let create_info = AccelerationStructureCreateInfo {
            ty,
            ..AccelerationStructureCreateInfo::new(storage)
        };

        unsafe { AccelerationStructure::new(self.device.clone(), create_info) }
            .map_err(device_error)
    }

    fn structure_reference(&self, structure: &Self::Structure) -> DeviceAddress {
        structure.device_address().get()
    }

    fn build_structure(
        &mut self,
        structure: &Self::Structure,
        geometry: &StructureGeometry<'_, Self::Buffer>,
        mode: BuildMode,
        scratch: &Self::Buffer,
    ) -> Result<(), BackendError> {
        let mut info = self.geometry_info(geometry);
        info.mode = match mode {
            BuildMode::Build => BuildAccelerationStructureMode::Build,
            BuildMode::Update => BuildAccelerationStructureMode::Update(structure.clone()),
        };
        info.dst_acceleration_structure = Some(structure.clone());
        info.scratch_data = Some(scratch.clone());

        let range_info = AccelerationStructureBuildRangeInfo {
            primitive_count: geometry.count(),
            ..Default::default()
        };

        let mut builder = AutoCommandBufferBuilder::primary(
            self.command_buffer_allocator.clone(),
            self.queue.queue_family_index(),
            CommandBufferUsage::OneTimeSubmit,
        )
        .map_err(device_error)?;

        // Safety: the input buffers and, for top level builds, the referenced bottom level
        // structures are owned by the caller and outlive this blocking call.
        unsafe { builder.build_acceleration_structure(info, iter::once(range_info).collect()) }
            .map_err(device_error)?;

        builder
            .build()
            .map_err(device_error)?
            .execute(self.queue.clone())
            .map_err(device_error)?
            .then_signal_fence_and_flush()
            .map_err(device_error)?
            .wait(None)
            .map_err(device_error)
    }

    fn destroy_structure(&mut self, structure: Self::Structure) {
        drop(structure);
    }

    fn wait_idle(&mut self) -> Result<(), BackendError> {
        unsafe { self.device.wait_idle() }.map_err(device_error)
    }
}
