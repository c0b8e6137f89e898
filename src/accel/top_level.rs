use crate::backend::{
    Backend, BufferUsage, BuildMode, BuildSizes, DeviceAddress, MemoryLocation,
    StructureGeometry, StructureLevel, upload,
};
use crate::error::{BackendError, Error, PreconditionViolation};

use super::TopLevelInstance;

/// Top level structure together with the resources needed to refit it.
pub struct TopLevelStructure<B: Backend> {
    instance_buffer: B::Buffer,
    structure: B::Structure,
    /// Kept alive between refits, sized for update builds.
    update_scratch: B::Buffer,

    /// Bottom level references of the last full build, in instance order.
    built_references: Vec<DeviceAddress>,
}

impl<B: Backend> TopLevelStructure<B> {
    /// Uploads the instances and builds the structure from scratch.
    /// On failure everything allocated so far is released again.
    pub fn build(backend: &mut B, instances: &[TopLevelInstance]) -> Result<Self, BackendError> {
        let instance_buffer = upload(
            backend,
            "top level instances",
            BufferUsage::BuildInput,
            bytemuck::cast_slice(instances),
        )?;

        match Self::build_with_buffer(backend, &instance_buffer, instances.len() as u32) {
            Ok((structure, update_scratch)) => {
                log::debug!(
                    "Built top level structure; instances={}",
                    instances.len()
                );
                Ok(TopLevelStructure {
                    instance_buffer,
                    structure,
                    update_scratch,
                    built_references: instances
                        .iter()
                        .map(|instance| instance.structure_reference)
                        .collect(),
                })
            }
            Err(err) => {
                backend.destroy_buffer(instance_buffer);
                Err(err)
            }
        }
    }

    fn build_with_buffer(
        backend: &mut B,
        instance_buffer: &B::Buffer,
        count: u32,
    ) -> Result<(B::Structure, B::Buffer), BackendError> {
        let geometry = StructureGeometry::Instances {
            buffer: instance_buffer,
            count,
        };
        let sizes = backend.build_sizes(&geometry)?;

        let scratch = create_scratch(backend, &sizes, BuildMode::Build)?;
        let update_scratch = match create_scratch(backend, &sizes, BuildMode::Update) {
            Ok(buffer) => buffer,
            Err(err) => {
                backend.destroy_buffer(scratch);
                return Err(err);
            }
        };

        let result = backend
            .create_structure(StructureLevel::Top, sizes.structure_size)
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

        match result {
            Ok(structure) => Ok((structure, update_scratch)),
            Err(err) => {
                backend.destroy_buffer(update_scratch);
                Err(err)
            }
        }
    }

    /// Rewrites the instance array and refits the structure in place.
    ///
    /// Only transforms may differ from the last full build: the instance count and the
    /// bottom level reference of every instance must be unchanged.
    pub fn update(&mut self, backend: &mut B, instances: &[TopLevelInstance]) -> Result<(), Error> {
        if instances.len() != self.built_references.len() {
            return Err(PreconditionViolation::PopulationMismatch {
                built: self.built_references.len(),
                current: instances.len(),
            }
            .into());
        }
        if let Some(index) = instances
            .iter()
            .zip(&self.built_references)
            .position(|(instance, reference)| instance.structure_reference != *reference)
        {
            return Err(PreconditionViolation::TopLevelMismatch { index }.into());
        }

        backend.write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(instances))?;
        let geometry = StructureGeometry::Instances {
            buffer: &self.instance_buffer,
            count: instances.len() as u32,
        };
        backend.build_structure(
            &self.structure,
            &geometry,
            BuildMode::Update,
            &self.update_scratch,
        )?;

        log::debug!("Refitted top level structure; instances={}", instances.len());
        Ok(())
    }

    pub fn instance_count(&self) -> usize {
        self.built_references.len()
    }

    pub fn structure(&self) -> &B::Structure {
        &self.structure
    }

    pub fn reference(&self, backend: &B) -> DeviceAddress {
        backend.structure_reference(&self.structure)
    }

    pub fn release(self, backend: &mut B) {
        backend.destroy_structure(self.structure);
        backend.destroy_buffer(self.update_scratch);
        backend.destroy_buffer(self.instance_buffer);
    }
}

fn create_scratch<B: Backend>(
    backend: &mut B,
    sizes: &BuildSizes,
    mode: BuildMode,
) -> Result<B::Buffer, BackendError> {
    let (label, size) = match mode {
        BuildMode::Build => ("top level scratch", sizes.build_scratch_size),
        BuildMode::Update => ("top level update scratch", sizes.update_scratch_size),
    };
    backend.create_buffer(label, size, BufferUsage::Scratch, MemoryLocation::DeviceLocal)
}
