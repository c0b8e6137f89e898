//! Scene objects and the device structures built from them.
//!
//! Edits only record which kind of rebuild they need; the frame loop calls
//! [`Scene::update`] to run it.

mod generation;
mod object;
mod registry;
mod scenes;

use std::time::{Duration, Instant};

pub use generation::{Generation, ObjectIndexEntry, SceneBuffers};
pub use object::{
    AnyStore, Geometry, KindTag, LocalHit, LocalIndex, LocalTrace, ObjectGeometry, ObjectHandle,
    ObjectKind, ObjectStore, ObjectStores, StableIndex, WorldObject,
};
pub use registry::{ObjectRegistry, SceneHit, SceneTrace};
pub use scenes::{SceneId, SceneSettings};

use crate::backend::Backend;
use crate::error::{BackendError, Error, PreconditionViolation, Result};
use crate::geometry::{
    BezierTriangle1, BezierTriangle2, BezierTriangle3, BezierTriangle4, BoxSpace, Sphere,
    Tetrahedron1, Tetrahedron2, Tetrahedron3, Tetrahedron4, WorldPoint, WorldTransform,
    WorldVector, translation,
};

/// Volume whose boundary is rendered as four triangle patches.
pub trait Solid: Into<Geometry> + Copy {
    type Face: Into<Geometry>;

    fn faces(&self) -> [Self::Face; 4];
}

macro_rules! impl_solid {
    ( $( $solid:ty => $face:ty ),* $(,)? ) => {
        $(
            impl Solid for $solid {
                type Face = $face;

                fn faces(&self) -> [$face; 4] {
                    self.boundary_faces()
                }
            }
        )*
    };
}

impl_solid! {
    Tetrahedron1 => BezierTriangle1,
    Tetrahedron2 => BezierTriangle2,
    Tetrahedron3 => BezierTriangle3,
    Tetrahedron4 => BezierTriangle4,
}

/// Strongest rebuild requested by edits since the last update.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RebuildRequest {
    #[default]
    None,
    /// Only transforms changed.
    Refit,
    /// Population or bounding boxes changed.
    Full,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RebuildKind {
    Full,
    Refit,
}

#[derive(Copy, Clone, Debug)]
pub struct RebuildReport {
    pub kind: RebuildKind,
    /// A refit was requested but the structures no longer matched the scene.
    pub escalated: bool,
    pub generation: u64,
    pub object_count: usize,
    pub elapsed: Duration,
}

/// Objects of a scene together with their device buffers and acceleration structures.
///
/// Device resources are only freed by [`Scene::release`]; dropping a scene
/// with live resources leaks them on the backend.
pub struct Scene<B: Backend> {
    registry: ObjectRegistry,
    buffers: Option<SceneBuffers<B>>,
    generation: Option<Generation<B>>,
    last_generation_id: u64,
    pending: RebuildRequest,
}

impl<B: Backend> Default for Scene<B> {
    fn default() -> Self {
        Scene {
            registry: ObjectRegistry::new(),
            buffers: None,
            generation: None,
            last_generation_id: 0,
            pending: RebuildRequest::None,
        }
    }
}

impl<B: Backend> Scene<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn buffers(&self) -> Option<&SceneBuffers<B>> {
        self.buffers.as_ref()
    }

    /// Structures of the last successful full rebuild.
    pub fn generation(&self) -> Option<&Generation<B>> {
        self.generation.as_ref()
    }

    pub fn pending(&self) -> RebuildRequest {
        self.pending
    }

    fn request(&mut self, request: RebuildRequest) {
        self.pending = self.pending.max(request);
    }

    /// Appends an object, its bounding box is computed right away.
    pub fn add_object(
        &mut self,
        geometry: impl Into<Geometry>,
        transform: WorldTransform,
    ) -> Result<ObjectHandle, PreconditionViolation> {
        let handle = self.registry.add_object(geometry, transform)?;
        self.request(RebuildRequest::Full);
        Ok(handle)
    }

    /// Adds a volume and its four boundary patches. Only the patches are ray traced.
    pub fn add_tetrahedron<S: Solid>(
        &mut self,
        solid: S,
        transform: WorldTransform,
    ) -> Result<(ObjectHandle, [ObjectHandle; 4]), PreconditionViolation> {
        let [a, b, c, d] = solid.faces();
        let volume = self.add_object(solid, transform)?;
        let faces = [
            self.add_object(a, transform)?,
            self.add_object(b, transform)?,
            self.add_object(c, transform)?,
            self.add_object(d, transform)?,
        ];
        Ok((volume, faces))
    }

    /// Adds a small sphere at every control point of an object.
    pub fn add_control_point_markers(
        &mut self,
        handle: ObjectHandle,
        radius: f32,
    ) -> Result<Vec<ObjectHandle>, PreconditionViolation> {
        self.registry
            .world_control_points(handle)
            .into_iter()
            .map(|point| self.add_object(Sphere::new(point, radius), WorldTransform::identity()))
            .collect()
    }

    /// Adds the light sphere. Its box is kept in local space, so moving it only
    /// needs a refit.
    pub fn add_light(&mut self, center: WorldPoint, radius: f32) -> Result<ObjectHandle, PreconditionViolation> {
        let handle = self.registry.add_object_in(
            Sphere::new(center, radius),
            translation(&center.coords),
            BoxSpace::Local,
        )?;
        self.request(RebuildRequest::Full);
        self.registry.set_light(handle);
        Ok(handle)
    }

    /// Moves the light and requests a refit. Returns false if the scene has no light.
    pub fn move_light(&mut self, offset: &WorldVector) -> bool {
        match self.registry.light() {
            Some(light) => self.translate_sphere(light, offset),
            None => false,
        }
    }

    /// Moves a sphere. Local space spheres only need a refit, others a full rebuild.
    pub fn translate_sphere(&mut self, handle: ObjectHandle, offset: &WorldVector) -> bool {
        let epoch = self.registry.epoch();
        if !self.registry.translate_sphere(handle, offset) {
            return false;
        }

        if self.registry.epoch() != epoch {
            self.request(RebuildRequest::Full);
        } else if let Some(transform) = self.registry.transform(handle).copied() {
            let stable_index = self.registry.stable_index(handle);
            if let (Some(generation), Some(index)) = (self.generation.as_mut(), stable_index) {
                generation.set_instance_transform(index, &transform);
            }
            self.request(RebuildRequest::Refit);
        }
        true
    }

    /// Removes every object. Device resources stay until the next rebuild replaces them.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.request(RebuildRequest::Full);
    }

    /// Uploads the per-kind object records and the object index, replacing the
    /// previous buffers only once all uploads succeeded.
    pub fn build_gpu_buffers(&mut self, backend: &mut B) -> Result<(), BackendError> {
        let buffers = SceneBuffers::upload(backend, &self.registry)?;
        if let Some(old) = self.buffers.replace(buffers) {
            old.release(backend);
        }
        Ok(())
    }

    /// Sets the transform of one instance and of the object behind it.
    /// The change reaches the device with the next refit.
    pub fn set_instance_transform(&mut self, index: usize, transform: WorldTransform) -> Result<()> {
        let count = self.registry.traceable_count();
        let stable_index = (index < count)
            .then(|| StableIndex::new(index))
            .ok_or(PreconditionViolation::IndexOutOfRange { index, count })?;
        let handle = self
            .registry
            .handle(stable_index)
            .ok_or(PreconditionViolation::IndexOutOfRange { index, count })?;

        self.registry.set_transform(handle, transform);
        if let Some(generation) = self.generation.as_mut() {
            generation.set_instance_transform(stable_index, &transform);
        }
        self.request(RebuildRequest::Refit);
        Ok(())
    }

    /// Full rebuild, or a refit of the top level structure when `full_rebuild` is false.
    ///
    /// A refit that no longer matches the scene (objects added or removed, boxes changed,
    /// nothing built yet) is turned into a full rebuild. A failing full rebuild
    /// keeps the previous structures installed.
    pub fn recreate_acceleration_structures(
        &mut self,
        backend: &mut B,
        full_rebuild: bool,
    ) -> Result<RebuildReport> {
        let start = Instant::now();

        let mut escalated = false;
        if !full_rebuild {
            match self.refit(backend) {
                Ok(()) => {
                    self.pending = RebuildRequest::None;
                    return Ok(self.report(RebuildKind::Refit, false, start));
                }
                Err(Error::Precondition(violation)) => {
                    log::warn!("Refit not possible, rebuilding from scratch: {violation}");
                    escalated = true;
                }
                Err(err) => return Err(err),
            }
        }

        self.full_rebuild(backend)?;
        self.pending = RebuildRequest::None;
        let report = self.report(RebuildKind::Full, escalated, start);
        log::info!(
            "Rebuilt acceleration structures; generation={}, objects={}, elapsed={:?}",
            report.generation,
            report.object_count,
            report.elapsed
        );
        Ok(report)
    }

    fn refit(&mut self, backend: &mut B) -> Result<()> {
        let Some(generation) = self.generation.as_mut() else {
            return Err(PreconditionViolation::PopulationMismatch {
                built: 0,
                current: self.registry.traceable_count(),
            }
            .into());
        };
        generation.validate(&self.registry)?;
        // The instance buffer and the top level structure are rewritten in place
        backend.wait_idle()?;
        generation.refit(backend, &self.registry)?;
        log::debug!("Refitted generation {}", generation.id());
        Ok(())
    }

    fn full_rebuild(&mut self, backend: &mut B) -> Result<(), BackendError> {
        // Frames in flight may still read the current structures
        backend.wait_idle()?;

        let buffers = SceneBuffers::upload(backend, &self.registry)?;
        let id = self.last_generation_id + 1;
        let generation = match Generation::build(backend, &self.registry, id) {
            Ok(generation) => generation,
            Err(err) => {
                buffers.release(backend);
                log::error!("Rebuild of generation {id} failed, keeping the previous one: {err}");
                return Err(err);
            }
        };
        self.last_generation_id = id;

        if let Some(old) = self.buffers.replace(buffers) {
            old.release(backend);
        }
        if let Some(old) = self.generation.replace(generation) {
            old.release(backend);
        }
        Ok(())
    }

    fn report(&self, kind: RebuildKind, escalated: bool, start: Instant) -> RebuildReport {
        RebuildReport {
            kind,
            escalated,
            generation: self.generation.as_ref().map_or(0, Generation::id),
            object_count: self.registry.traceable_count(),
            elapsed: start.elapsed(),
        }
    }

    /// Runs whatever rebuild the edits since the last call require.
    pub fn update(&mut self, backend: &mut B) -> Result<Option<RebuildReport>> {
        match self.pending {
            RebuildRequest::None => Ok(None),
            RebuildRequest::Refit => self.recreate_acceleration_structures(backend, false).map(Some),
            RebuildRequest::Full => self.recreate_acceleration_structures(backend, true).map(Some),
        }
    }

    /// Object index, instance array and ray traceable objects all have the same length.
    pub fn check_invariant(&self) -> Result<(), PreconditionViolation> {
        let current = self.registry.traceable_count();
        let built = [
            self.buffers.as_ref().map_or(0, SceneBuffers::object_count),
            self.generation.as_ref().map_or(0, |generation| generation.instances().len()),
        ];
        match built.into_iter().find(|built| *built != current) {
            Some(built) => Err(PreconditionViolation::PopulationMismatch { built, current }),
            None => Ok(()),
        }
    }

    /// Frees all device resources. Objects are kept.
    pub fn release(&mut self, backend: &mut B) {
        if let Some(buffers) = self.buffers.take() {
            buffers.release(backend);
        }
        if let Some(generation) = self.generation.take() {
            generation.release(backend);
        }
        if !self.registry.is_empty() {
            self.request(RebuildRequest::Full);
        }
    }
}
