use bytemuck::{Pod, Zeroable};
use index_vec::IndexVec;

use super::object::{ObjectHandle, ObjectKind, StableIndex};
use super::registry::ObjectRegistry;
use crate::accel::{BottomLevelRecord, TopLevelInstance, TopLevelStructure};
use crate::backend::{Backend, BufferUsage, upload};
use crate::error::{BackendError, Error, PreconditionViolation};
use crate::geometry::WorldTransform;

/// Entry of the flattened object index, one per ray traceable object in stable index order.
/// Tells the intersection routine which per-kind buffer and slot hold the object's record.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ObjectIndexEntry {
    pub kind: u32,
    pub slot: u32,
}

/// Per-kind object records and the flattened object index, as uploaded to the device.
pub struct SceneBuffers<B: Backend> {
    kind_buffers: Vec<(ObjectKind, B::Buffer)>,
    index_buffer: B::Buffer,
    object_count: usize,
    epoch: u64,
}

impl<B: Backend> SceneBuffers<B> {
    /// Serializes every ray traceable store and the object index.
    /// On failure the buffers created so far are released again.
    pub fn upload(backend: &mut B, registry: &ObjectRegistry) -> Result<Self, BackendError> {
        let mut kind_buffers = Vec::new();

        for kind in ObjectKind::ALL.iter().copied().filter(|kind| kind.is_ray_traceable()) {
            let bytes = registry.store(kind).gpu_bytes();
            match upload(backend, &format!("{kind:?} records"), BufferUsage::Storage, &bytes) {
                Ok(buffer) => kind_buffers.push((kind, buffer)),
                Err(err) => {
                    release_all(backend, kind_buffers);
                    return Err(err);
                }
            }
        }

        let entries: Vec<ObjectIndexEntry> = registry
            .ordered()
            .iter()
            .map(|handle| ObjectIndexEntry {
                kind: handle.kind.hit_group().unwrap_or_default(),
                slot: handle.local.raw(),
            })
            .collect();
        let index_buffer = match upload(
            backend,
            "object index",
            BufferUsage::Storage,
            bytemuck::cast_slice(&entries),
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                release_all(backend, kind_buffers);
                return Err(err);
            }
        };

        log::debug!("Uploaded object buffers; objects={}", entries.len());
        Ok(SceneBuffers {
            kind_buffers,
            index_buffer,
            object_count: entries.len(),
            epoch: registry.epoch(),
        })
    }

    /// Number of entries in the object index.
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn kind_buffer(&self, kind: ObjectKind) -> Option<&B::Buffer> {
        self.kind_buffers
            .iter()
            .find(|(buffer_kind, _)| *buffer_kind == kind)
            .map(|(_, buffer)| buffer)
    }

    pub fn index_buffer(&self) -> &B::Buffer {
        &self.index_buffer
    }

    pub fn release(self, backend: &mut B) {
        release_all(backend, self.kind_buffers);
        backend.destroy_buffer(self.index_buffer);
    }
}

fn release_all<B: Backend>(backend: &mut B, buffers: Vec<(ObjectKind, B::Buffer)>) {
    for (_, buffer) in buffers {
        backend.destroy_buffer(buffer);
    }
}

/// Everything one full rebuild produced. Released as a whole once a newer
/// generation is complete.
pub struct Generation<B: Backend> {
    id: u64,
    /// Registry epoch the bounding boxes were taken from.
    epoch: u64,
    handles: IndexVec<StableIndex, ObjectHandle>,
    bottom_levels: IndexVec<StableIndex, BottomLevelRecord<B>>,
    instances: Vec<TopLevelInstance>,
    top_level: TopLevelStructure<B>,
}

impl<B: Backend> Generation<B> {
    /// Builds one bottom level structure per ray traceable object, then the top level
    /// structure over all of them. Nothing is left allocated on failure.
    pub fn build(backend: &mut B, registry: &ObjectRegistry, id: u64) -> Result<Self, BackendError> {
        let mut handles = IndexVec::with_capacity(registry.traceable_count());
        let mut bottom_levels: IndexVec<StableIndex, BottomLevelRecord<B>> =
            IndexVec::with_capacity(registry.traceable_count());

        for (stable_index, handle, bounds, transform) in registry.placements() {
            match BottomLevelRecord::build(backend, bounds, stable_index, transform) {
                Ok(record) => {
                    handles.push(handle);
                    bottom_levels.push(record);
                }
                Err(err) => {
                    release_bottom_levels(backend, bottom_levels);
                    return Err(err);
                }
            }
        }

        let instances: Vec<TopLevelInstance> = bottom_levels
            .iter()
            .zip(&handles)
            .map(|(record, handle)| {
                TopLevelInstance::new(
                    &record.transform,
                    record.stable_index.raw(),
                    handle.kind.hit_group().unwrap_or_default(),
                    record.reference(),
                )
            })
            .collect();

        let top_level = match TopLevelStructure::build(backend, &instances) {
            Ok(top_level) => top_level,
            Err(err) => {
                release_bottom_levels(backend, bottom_levels);
                return Err(err);
            }
        };

        Ok(Generation {
            id,
            epoch: registry.epoch(),
            handles,
            bottom_levels,
            instances,
            top_level,
        })
    }

    /// Checks that the registry still has exactly the objects and boxes this
    /// generation was built from.
    pub fn validate(&self, registry: &ObjectRegistry) -> Result<(), PreconditionViolation> {
        if registry.traceable_count() != self.handles.len() {
            return Err(PreconditionViolation::PopulationMismatch {
                built: self.handles.len(),
                current: registry.traceable_count(),
            });
        }
        if let Some(index) = registry
            .ordered()
            .iter()
            .zip(&self.handles)
            .position(|(current, built)| current != built)
        {
            return Err(PreconditionViolation::TopLevelMismatch { index });
        }
        if registry.epoch() != self.epoch {
            return Err(PreconditionViolation::StaleGeneration {
                built: self.epoch,
                current: registry.epoch(),
            });
        }
        Ok(())
    }

    /// Copies the current object transforms into the instances and refits the top level
    /// structure. Bottom level structures are reused untouched.
    pub fn refit(&mut self, backend: &mut B, registry: &ObjectRegistry) -> Result<(), Error> {
        self.validate(registry)?;

        for (stable_index, _, _, transform) in registry.placements() {
            if let Some(instance) = self.instances.get_mut(stable_index.index()) {
                instance.set_transform(transform);
            }
        }
        self.top_level.update(backend, &self.instances)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn bottom_levels(&self) -> &IndexVec<StableIndex, BottomLevelRecord<B>> {
        &self.bottom_levels
    }

    pub fn instances(&self) -> &[TopLevelInstance] {
        &self.instances
    }

    /// Overwrites the transform of one instance. Reaches the device with the next refit.
    pub fn set_instance_transform(
        &mut self,
        index: StableIndex,
        transform: &WorldTransform,
    ) -> bool {
        match self.instances.get_mut(index.index()) {
            Some(instance) => {
                instance.set_transform(transform);
                true
            }
            None => false,
        }
    }

    pub fn top_level(&self) -> &TopLevelStructure<B> {
        &self.top_level
    }

    pub fn release(self, backend: &mut B) {
        self.top_level.release(backend);
        release_bottom_levels(backend, self.bottom_levels);
    }
}

fn release_bottom_levels<B: Backend>(
    backend: &mut B,
    bottom_levels: IndexVec<StableIndex, BottomLevelRecord<B>>,
) {
    for record in bottom_levels {
        record.release(backend);
    }
}
