use crate::backend::{
    Backend, BufferUsage, BuildMode, DeviceAddress, MemoryLocation, StructureGeometry,
    StructureLevel, upload,
};
use crate::error::BackendError;
use crate::geometry::{WorldBox, WorldTransform};
use crate::scene::StableIndex;

use super::AabbPositions;

/// Bottom level structure of a single object, with the data it was built from.
pub struct BottomLevelRecord<B: Backend> {
    aabb_buffer: B::Buffer,
    structure: B::Structure,
    reference: DeviceAddress,

    pub stable_index: StableIndex,
    /// Object to world transform at build time.
    pub transform: WorldTransform,
    /// The single local space primitive.
    pub local_box: WorldBox,
}

impl<B: Backend> BottomLevelRecord<B> {
    /// Builds a structure with one procedural AABB primitive and waits for it.
    /// On failure everything allocated so far is released again.
    pub fn build(
        backend: &mut B,
        local_box: &WorldBox,
        stable_index: StableIndex,
        transform: &WorldTransform,
    ) -> Result<Self, BackendError> {
        let positions = [AabbPositions::from(local_box)];
        let aabb_buffer = upload(
            backend,
            &format!("object {} aabb", stable_index.index()),
            BufferUsage::BuildInput,
            bytemuck::cast_slice(&positions),
        )?;

        match build_structure(backend, &aabb_buffer) {
            Ok(structure) => {
                let reference = backend.structure_reference(&structure);
                log::debug!(
                    "Built bottom level structure for object {}; reference={reference:#x}",
                    stable_index.index()
                );
                Ok(BottomLevelRecord {
                    aabb_buffer,
                    structure,
                    reference,
                    stable_index,
                    transform: *transform,
                    local_box: local_box.clone(),
                })
            }
            Err(err) => {
                backend.destroy_buffer(aabb_buffer);
                Err(err)
            }
        }
    }

    pub fn reference(&self) -> DeviceAddress {
        self.reference
    }

    pub fn structure(&self) -> &B::Structure {
        &self.structure
    }

    pub fn release(self, backend: &mut B) {
        backend.destroy_structure(self.structure);
        backend.destroy_buffer(self.aabb_buffer);
    }
}

fn build_structure<B: Backend>(
    backend: &mut B,
    aabb_buffer: &B::Buffer,
) -> Result<B::Structure, BackendError> {
    let geometry = StructureGeometry::Aabbs {
        buffer: aabb_buffer,
        count: 1,
    };
    let sizes = backend.build_sizes(&geometry)?;

    // A fresh scratch buffer per build, it is only needed until the build completes
    let scratch = backend.create_buffer(
        "bottom level scratch",
        sizes.build_scratch_size,
        BufferUsage::Scratch,
        MemoryLocation::DeviceLocal,
    )?;

    let result = backend
        .create_structure(StructureLevel::Bottom, sizes.structure_size)
        .and_then(|structure| {
            match backend.build_structure(&structure, &geometry, BuildMode::Build, &scratch) {
                Ok(()) => Ok(structure),
                Err(err) => {
                    backend.destroy_structure(structure);
                    Err(err)
                }
            }
        });

    backend.destroy_buffer(scratch);
    result
}
