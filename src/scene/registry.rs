use index_vec::IndexVec;
use nalgebra::Unit;
use ordered_float::OrderedFloat;

use super::object::{AnyStore, Geometry, ObjectHandle, ObjectKind, ObjectStores, StableIndex};
use crate::accel::TopLevelInstance;
use crate::error::PreconditionViolation;
use crate::geometry::{
    BoxSpace, FloatType, NewtonSettings, Ray, WorldBox, WorldPoint, WorldTransform, WorldVector,
    translation,
};

/// Closest hit of a ray with the registry's objects.
#[derive(Copy, Clone, Debug)]
pub struct SceneHit {
    pub t: FloatType,
    pub point: WorldPoint,
    pub normal: Unit<WorldVector>,
    pub handle: ObjectHandle,
    pub stable_index: StableIndex,
}

/// Result of tracing one ray, with the Newton work it took.
#[derive(Copy, Clone, Debug, Default)]
pub struct SceneTrace {
    pub hit: Option<SceneHit>,
    pub iterations: u32,
}

/// All objects of a scene, grouped by kind.
///
/// Ray traceable objects additionally get a stable index: their position in
/// the list of all traceable objects ordered by kind, then by insertion.
#[derive(Clone, Debug, Default)]
pub struct ObjectRegistry {
    stores: ObjectStores,
    ordered: IndexVec<StableIndex, ObjectHandle>,
    /// Bumped whenever the population or any bounding box changes.
    epoch: u64,
    light: Option<ObjectHandle>,
    /// Overrides the number of traceable objects that fit, for tests.
    traceable_limit: Option<usize>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn with_traceable_limit(limit: usize) -> Self {
        ObjectRegistry { traceable_limit: Some(limit), ..Self::default() }
    }

    /// Number of ray traceable objects that fit. Stable indices end up in the
    /// 24 bit custom index of the top level instances.
    pub fn traceable_limit(&self) -> usize {
        self.traceable_limit
            .unwrap_or(TopLevelInstance::MAX_CUSTOM_INDEX as usize + 1)
    }

    /// Appends an object with a world space bounding box.
    pub fn add_object(
        &mut self,
        geometry: impl Into<Geometry>,
        transform: WorldTransform,
    ) -> Result<ObjectHandle, PreconditionViolation> {
        self.add_object_in(geometry, transform, BoxSpace::World)
    }

    /// Fails without changing the registry if the object is malformed or
    /// does not get a stable index any more.
    pub fn add_object_in(
        &mut self,
        geometry: impl Into<Geometry>,
        transform: WorldTransform,
        space: BoxSpace,
    ) -> Result<ObjectHandle, PreconditionViolation> {
        let geometry = geometry.into();
        if let Geometry::Sphere(sphere) = &geometry {
            if !(sphere.radius.is_finite() && sphere.radius >= 0.0) {
                return Err(PreconditionViolation::InvalidRadius);
            }
        }
        let limit = self.traceable_limit();
        if geometry.kind().is_ray_traceable() && self.traceable_count() >= limit {
            return Err(PreconditionViolation::TooManyObjects { limit });
        }

        let handle = self.stores.push(geometry, transform, space);
        self.reindex();
        Ok(handle)
    }

    pub fn clear(&mut self) {
        for kind in ObjectKind::ALL {
            self.stores.get_mut(*kind).clear();
        }
        self.light = None;
        self.reindex();
    }

    /// Recomputes stable indices of all objects.
    fn reindex(&mut self) {
        self.ordered.clear();
        for kind in ObjectKind::ALL.iter().copied() {
            let store = self.stores.get_mut(kind);
            for local in (0..store.len()).map(Into::into) {
                let index = kind.is_ray_traceable().then(|| self.ordered.push(ObjectHandle { kind, local }));
                store.set_stable_index(local, index);
            }
        }
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of objects of all kinds.
    pub fn len(&self) -> usize {
        ObjectKind::ALL.iter().map(|kind| self.stores.get(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ray traceable objects.
    pub fn traceable_count(&self) -> usize {
        self.ordered.len()
    }

    /// Ray traceable objects in stable index order.
    pub fn ordered(&self) -> &IndexVec<StableIndex, ObjectHandle> {
        &self.ordered
    }

    /// Local bounding box and transform of every ray traceable object, in stable index order.
    pub fn placements(
        &self,
    ) -> impl Iterator<Item = (StableIndex, ObjectHandle, &WorldBox, &WorldTransform)> + '_ {
        self.ordered.iter_enumerated().filter_map(|(index, handle)| {
            let store = self.stores.get(handle.kind);
            Some((index, *handle, store.bounds(handle.local)?, store.transform(handle.local)?))
        })
    }

    pub fn handle(&self, index: StableIndex) -> Option<ObjectHandle> {
        self.ordered.get(index).copied()
    }

    pub fn stable_index(&self, handle: ObjectHandle) -> Option<StableIndex> {
        self.stores.get(handle.kind).stable_index(handle.local)
    }

    pub fn store(&self, kind: ObjectKind) -> &dyn AnyStore {
        self.stores.get(kind)
    }

    pub fn stores(&self) -> &ObjectStores {
        &self.stores
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.stores.get(kind).len()
    }

    /// Bounding box in the object's local frame.
    pub fn bounds(&self, handle: ObjectHandle) -> Option<&WorldBox> {
        self.stores.get(handle.kind).bounds(handle.local)
    }

    pub fn transform(&self, handle: ObjectHandle) -> Option<&WorldTransform> {
        self.stores.get(handle.kind).transform(handle.local)
    }

    /// Moves an object without changing its geometry.
    pub fn set_transform(&mut self, handle: ObjectHandle, transform: WorldTransform) -> bool {
        self.stores.get_mut(handle.kind).set_transform(handle.local, transform)
    }

    pub fn geometry(&self, handle: ObjectHandle) -> Option<Geometry> {
        self.stores.geometry(handle)
    }

    /// Moves the center of a sphere.
    ///
    /// World space spheres change their bounding box, so a full rebuild is
    /// needed afterwards. Local space spheres are moved by their transform and
    /// only need a refit.
    pub fn translate_sphere(&mut self, handle: ObjectHandle, offset: &WorldVector) -> bool {
        if handle.kind != ObjectKind::Sphere {
            return false;
        }
        let Some(object) = self.stores.spheres.get_mut(handle.local) else {
            return false;
        };

        let mut sphere = object.geometry;
        sphere.translate(offset);
        object.set_geometry(sphere);
        match object.space {
            BoxSpace::World => self.epoch += 1,
            BoxSpace::Local => {
                let moved = translation(offset) * object.transform();
                object.set_transform(moved);
            }
        }
        true
    }

    pub fn light(&self) -> Option<ObjectHandle> {
        self.light
    }

    pub fn set_light(&mut self, handle: ObjectHandle) {
        self.light = Some(handle);
    }

    /// Control points of an object in world space.
    pub fn world_control_points(&self, handle: ObjectHandle) -> Vec<WorldPoint> {
        self.stores.get(handle.kind).world_control_points(handle.local)
    }

    /// Closest hit over all ray traceable objects.
    ///
    /// Brute force over every object; each one is culled by its local box first.
    pub fn trace(&self, ray: &Ray, settings: &NewtonSettings) -> SceneTrace {
        let mut iterations = 0;
        let hit = self
            .ordered
            .iter_enumerated()
            .filter_map(|(stable_index, handle)| {
                let (t, hit, spent) = self.stores.get(handle.kind).trace(handle.local, ray, settings)?;
                iterations += spent;
                Some(SceneHit {
                    t,
                    point: hit.point,
                    normal: hit.normal,
                    handle: *handle,
                    stable_index,
                })
            })
            .min_by_key(|hit| OrderedFloat(hit.t));

        SceneTrace { hit, iterations }
    }

    pub fn intersect(&self, ray: &Ray, settings: &NewtonSettings) -> Option<SceneHit> {
        self.trace(ray, settings).hit
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{BezierTriangle2, BicubicPatch, Sphere, Tetrahedron1};
    use assert2::{assert, let_assert};
    use nalgebra::Translation3;
    use test_case::test_case;

    fn sphere(x: f32) -> Sphere {
        Sphere::new(WorldPoint::new(x, 0.0, 0.0), 0.5)
    }

    fn triangle() -> BezierTriangle2 {
        BezierTriangle2::from_multi_index_fn(|[_, j, k]| WorldPoint::new(j as f32, k as f32, -3.0))
    }

    #[test]
    fn stable_indices_follow_kind_order() {
        let mut registry = ObjectRegistry::new();
        let patch = registry.add_object(triangle(), WorldTransform::identity()).unwrap();
        let first = registry.add_object(sphere(0.0), WorldTransform::identity()).unwrap();
        let tetrahedron = registry.add_object(
            Tetrahedron1::from_corners([WorldPoint::origin(); 4]),
            WorldTransform::identity(),
        ).unwrap();
        let second = registry.add_object(sphere(2.0), WorldTransform::identity()).unwrap();

        assert!(registry.len() == 4);
        assert!(registry.traceable_count() == 3);
        assert!(registry.stable_index(first) == Some(StableIndex::new(0)));
        assert!(registry.stable_index(second) == Some(StableIndex::new(1)));
        assert!(registry.stable_index(patch) == Some(StableIndex::new(2)));
        assert!(registry.stable_index(tetrahedron).is_none());
        assert!(registry.handle(StableIndex::new(2)) == Some(patch));
    }

    #[test]
    fn epoch_tracks_population() {
        let mut registry = ObjectRegistry::new();
        let start = registry.epoch();
        let handle = registry.add_object(sphere(0.0), WorldTransform::identity()).unwrap();
        assert!(registry.epoch() > start);

        let before = registry.epoch();
        registry.set_transform(
            handle,
            WorldTransform::from_matrix_unchecked(Translation3::new(1.0, 0.0, 0.0).to_homogeneous()),
        );
        assert!(registry.epoch() == before);

        registry.translate_sphere(handle, &WorldVector::new(0.0, 1.0, 0.0));
        assert!(registry.epoch() > before);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.traceable_count() == 0);
        assert!(registry.light().is_none());
    }

    #[test]
    fn local_sphere_moves_by_transform() {
        let mut registry = ObjectRegistry::new();
        let center = WorldPoint::new(1.0, 2.0, 3.0);
        let handle = registry.add_object_in(
            Sphere::new(center, 0.25),
            translation(&center.coords),
            BoxSpace::Local,
        ).unwrap();
        let epoch = registry.epoch();
        let bounds = registry.bounds(handle).unwrap().clone();

        assert!(registry.translate_sphere(handle, &WorldVector::new(0.0, 1.0, 0.0)));
        assert!(registry.epoch() == epoch);
        assert!(registry.bounds(handle) == Some(&bounds));
        let_assert!(Some(transform) = registry.transform(handle));
        assert!(transform * WorldPoint::origin() == WorldPoint::new(1.0, 3.0, 3.0));
        assert!(registry.world_control_points(handle) == vec![WorldPoint::new(1.0, 3.0, 3.0)]);
    }

    #[test]
    fn translate_sphere_rejects_other_kinds() {
        let mut registry = ObjectRegistry::new();
        registry.add_object(sphere(0.0), WorldTransform::identity()).unwrap();
        let patch = registry.add_object(triangle(), WorldTransform::identity()).unwrap();
        assert!(!registry.translate_sphere(patch, &WorldVector::x()));
    }

    #[test]
    fn full_registry_rejects_traceable_objects() {
        let mut registry = ObjectRegistry::with_traceable_limit(2);
        registry.add_object(sphere(0.0), WorldTransform::identity()).unwrap();
        registry.add_object(triangle(), WorldTransform::identity()).unwrap();
        let epoch = registry.epoch();

        let_assert!(Err(err) = registry.add_object(sphere(1.0), WorldTransform::identity()));
        assert!(err == PreconditionViolation::TooManyObjects { limit: 2 });
        assert!(registry.len() == 2);
        assert!(registry.epoch() == epoch);

        // Volumes get no stable index and still fit
        let volume = registry.add_object(
            Tetrahedron1::from_corners([WorldPoint::origin(); 4]),
            WorldTransform::identity(),
        );
        let_assert!(Ok(volume) = volume);
        assert!(registry.stable_index(volume).is_none());
        assert!(registry.traceable_count() == 2);
    }

    #[test]
    fn default_limit_fits_custom_index() {
        let registry = ObjectRegistry::new();
        assert!(registry.traceable_limit() == StableIndex::MAX_INDEX + 1);
        assert!(registry.traceable_limit() - 1 == TopLevelInstance::MAX_CUSTOM_INDEX as usize);
    }

    #[test_case(-0.5 ; "negative")]
    #[test_case(FloatType::NAN ; "nan")]
    #[test_case(FloatType::INFINITY ; "infinite")]
    fn malformed_sphere_is_rejected(radius: FloatType) {
        let mut registry = ObjectRegistry::new();
        let sphere = Sphere::new(WorldPoint::origin(), radius);

        let_assert!(Err(err) = registry.add_object_in(sphere, WorldTransform::identity(), BoxSpace::Local));
        assert!(err == PreconditionViolation::InvalidRadius);
        assert!(registry.is_empty());
    }

    #[test]
    fn closest_hit_wins() {
        let mut registry = ObjectRegistry::new();
        let far = registry.add_object(
            BicubicPatch::from_fn(|i, j| WorldPoint::new(i as f32 - 1.5, j as f32 - 1.5, -10.0)),
            WorldTransform::identity(),
        ).unwrap();
        let near = registry.add_object(Sphere::new(WorldPoint::new(0.0, 0.0, -5.0), 1.0), WorldTransform::identity()).unwrap();

        let ray = Ray::new(WorldPoint::origin(), WorldVector::new(0.0, 0.0, -1.0));
        let trace = registry.trace(&ray, &NewtonSettings::default());
        let_assert!(Some(hit) = trace.hit);
        assert!(hit.handle == near);
        assert!((hit.t - 4.0).abs() < 1e-5);
        // The patch behind the sphere was still solved for
        assert!(trace.iterations > 0);

        let side = Ray::new(WorldPoint::new(1.2, 1.2, 0.0), WorldVector::new(0.0, 0.0, -1.0));
        let_assert!(Some(hit) = registry.intersect(&side, &NewtonSettings::default()));
        assert!(hit.handle == far);
        assert!((hit.point.z + 10.0).abs() < 1e-4);
    }

    #[test]
    fn empty_registry_misses() {
        let registry = ObjectRegistry::new();
        let ray = Ray::new(WorldPoint::origin(), WorldVector::x());
        assert!(registry.intersect(&ray, &NewtonSettings::default()).is_none());
    }
}
