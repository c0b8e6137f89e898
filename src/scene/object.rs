use std::fmt::Debug;

use bytemuck::Pod;
use index_vec::IndexVec;
use nalgebra::Unit;

use crate::accel::TopLevelInstance;
use crate::geometry::{
    BezierTriangle, BezierTriangle1, BezierTriangle2, BezierTriangle3, BezierTriangle4,
    BicubicPatch, Bounded, BoxSpace, FloatType, NewtonSettings, ParametricSurface, Ray,
    RayIntersectionExt, Sphere, Tetrahedron, Tetrahedron1, Tetrahedron2, Tetrahedron3,
    Tetrahedron4, WorldBox, WorldPoint, WorldTransform, WorldVector, newton,
};

index_vec::define_index_type! {
    /// Position of a ray traceable object in the flattened object list.
    /// Used as the instance custom index on the device.
    pub struct StableIndex = u32;
    MAX_INDEX = TopLevelInstance::MAX_CUSTOM_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    /// Position of an object inside its per-kind store.
    pub struct LocalIndex = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub kind: ObjectKind,
    pub local: LocalIndex,
}

/// Compile time kind of a geometry type.
pub trait KindTag {
    const KIND: ObjectKind;
}

/// Geometry that can live in the scene.
///
/// `space` selects the frame the geometry is expressed in, see `BoxSpace`.
pub trait ObjectGeometry: KindTag + Bounded + Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Record uploaded to the per-kind device buffer.
    type Gpu: Pod;

    fn to_gpu(&self, space: BoxSpace) -> Self::Gpu;

    fn control_points(&self, space: BoxSpace) -> Vec<WorldPoint>;

    /// Intersection with a ray given in the object's local frame.
    fn intersect_local(&self, space: BoxSpace, ray: &Ray, settings: &NewtonSettings) -> LocalTrace;
}

#[derive(Copy, Clone, Debug)]
pub struct LocalHit {
    pub point: WorldPoint,
    pub normal: Unit<WorldVector>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct LocalTrace {
    pub hit: Option<LocalHit>,
    /// Newton iterations spent, zero for analytic intersections.
    pub iterations: u32,
}

fn homogeneous(point: &WorldPoint) -> [f32; 4] {
    [point.x, point.y, point.z, 1.0]
}

fn patch_trace<S: ParametricSurface>(surface: &S, ray: &Ray, settings: &NewtonSettings) -> LocalTrace {
    let trace = newton::trace(surface, ray, settings);
    LocalTrace {
        hit: trace.hit.map(|hit| LocalHit {
            point: hit.point,
            normal: hit.normal,
        }),
        iterations: trace.iterations,
    }
}

impl Sphere {
    fn in_space(&self, space: BoxSpace) -> Sphere {
        match space {
            BoxSpace::World => *self,
            BoxSpace::Local => Sphere::new(WorldPoint::origin(), self.radius),
        }
    }
}

impl ObjectGeometry for Sphere {
    type Gpu = [f32; 4];

    fn to_gpu(&self, space: BoxSpace) -> Self::Gpu {
        let sphere = self.in_space(space);
        [sphere.center.x, sphere.center.y, sphere.center.z, sphere.radius]
    }

    fn control_points(&self, space: BoxSpace) -> Vec<WorldPoint> {
        vec![self.in_space(space).center]
    }

    fn intersect_local(&self, space: BoxSpace, ray: &Ray, _settings: &NewtonSettings) -> LocalTrace {
        LocalTrace {
            hit: self.in_space(space).intersect(ray).map(|hit| LocalHit {
                point: hit.point,
                normal: hit.normal,
            }),
            iterations: 0,
        }
    }
}

impl<const P: usize> ObjectGeometry for BezierTriangle<P>
where
    BezierTriangle<P>: KindTag,
{
    type Gpu = [[f32; 4]; P];

    fn to_gpu(&self, _space: BoxSpace) -> Self::Gpu {
        self.control_points.map(|p| homogeneous(&p))
    }

    fn control_points(&self, _space: BoxSpace) -> Vec<WorldPoint> {
        self.control_points.to_vec()
    }

    fn intersect_local(&self, _space: BoxSpace, ray: &Ray, settings: &NewtonSettings) -> LocalTrace {
        patch_trace(self, ray, settings)
    }
}

impl ObjectGeometry for BicubicPatch {
    type Gpu = [[f32; 4]; 16];

    fn to_gpu(&self, _space: BoxSpace) -> Self::Gpu {
        std::array::from_fn(|i| homogeneous(&self.points()[i]))
    }

    fn control_points(&self, _space: BoxSpace) -> Vec<WorldPoint> {
        self.points().to_vec()
    }

    fn intersect_local(&self, _space: BoxSpace, ray: &Ray, settings: &NewtonSettings) -> LocalTrace {
        patch_trace(self, ray, settings)
    }
}

/// Tetrahedra are only rendered through their boundary patches.
impl<const P: usize> ObjectGeometry for Tetrahedron<P>
where
    Tetrahedron<P>: KindTag,
{
    type Gpu = [[f32; 4]; P];

    fn to_gpu(&self, _space: BoxSpace) -> Self::Gpu {
        self.control_points.map(|p| homogeneous(&p))
    }

    fn control_points(&self, _space: BoxSpace) -> Vec<WorldPoint> {
        self.control_points.to_vec()
    }

    fn intersect_local(&self, _space: BoxSpace, _ray: &Ray, _settings: &NewtonSettings) -> LocalTrace {
        LocalTrace::default()
    }
}

#[derive(Clone, Debug)]
pub struct WorldObject<G> {
    pub geometry: G,
    /// Object to world transform
    transform: WorldTransform,
    /// World to object transform, `None` for singular transforms
    inverse: Option<WorldTransform>,
    pub space: BoxSpace,
    /// Bounding box in the object's local frame
    pub bounds: WorldBox,
    pub stable_index: Option<StableIndex>,
}

impl<G: ObjectGeometry> WorldObject<G> {
    pub fn new(geometry: G, transform: WorldTransform, space: BoxSpace) -> Self {
        let bounds = geometry.bounding_box(space);
        WorldObject {
            geometry,
            transform,
            inverse: transform.try_inverse(),
            space,
            bounds,
            stable_index: None,
        }
    }

    pub fn transform(&self) -> &WorldTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: WorldTransform) {
        self.transform = transform;
        self.inverse = transform.try_inverse();
    }

    /// Replaces the geometry, the bounding box follows.
    pub fn set_geometry(&mut self, geometry: G) {
        self.bounds = geometry.bounding_box(self.space);
        self.geometry = geometry;
    }

    /// Bounding box of the local box placed by the transform.
    pub fn world_bounds(&self) -> WorldBox {
        self.bounds.transformed(&self.transform)
    }

    /// Closest intersection with a world space ray.
    pub fn trace(&self, ray: &Ray, settings: &NewtonSettings) -> Option<(FloatType, LocalHit, u32)> {
        let inverse = self.inverse.as_ref()?;
        let local_ray = ray.transformed(inverse);

        match self.bounds.intersect(&local_ray) {
            Some((_, t_max)) if t_max >= 0.0 => {}
            _ => return None,
        }

        let trace = self.geometry.intersect_local(self.space, &local_ray, settings);
        let local = trace.hit?;

        let point = self.transform * local.point;
        let normal_matrix = inverse.matrix().fixed_view::<3, 3>(0, 0).transpose();
        let normal = Unit::try_new(normal_matrix * local.normal.into_inner(), 1e-12)?;
        let t = ray.distance_to(&point);

        (t > 0.0).then_some((t, LocalHit { point, normal }, trace.iterations))
    }
}

/// Insertion ordered collection of objects of one kind.
#[derive(Clone, Debug)]
pub struct ObjectStore<G> {
    objects: IndexVec<LocalIndex, WorldObject<G>>,
}

impl<G> Default for ObjectStore<G> {
    fn default() -> Self {
        ObjectStore {
            objects: IndexVec::new(),
        }
    }
}

impl<G: ObjectGeometry> ObjectStore<G> {
    pub fn push(&mut self, geometry: G, transform: WorldTransform, space: BoxSpace) -> LocalIndex {
        self.objects.push(WorldObject::new(geometry, transform, space))
    }

    pub fn get(&self, local: LocalIndex) -> Option<&WorldObject<G>> {
        self.objects.get(local)
    }

    pub fn get_mut(&mut self, local: LocalIndex) -> Option<&mut WorldObject<G>> {
        self.objects.get_mut(local)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldObject<G>> {
        self.objects.iter()
    }

    /// Device records of all objects, in local index order.
    pub fn gpu_records(&self) -> Vec<G::Gpu> {
        self.objects
            .iter()
            .map(|object| object.geometry.to_gpu(object.space))
            .collect()
    }
}

/// Kind erased access to an `ObjectStore`.
pub trait AnyStore {
    fn kind(&self) -> ObjectKind;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);

    fn bounds(&self, local: LocalIndex) -> Option<&WorldBox>;
    fn world_bounds(&self, local: LocalIndex) -> Option<WorldBox>;
    fn transform(&self, local: LocalIndex) -> Option<&WorldTransform>;
    /// Returns false if there is no such object.
    fn set_transform(&mut self, local: LocalIndex, transform: WorldTransform) -> bool;
    fn stable_index(&self, local: LocalIndex) -> Option<StableIndex>;
    fn set_stable_index(&mut self, local: LocalIndex, index: Option<StableIndex>);

    /// Control points in world space.
    fn world_control_points(&self, local: LocalIndex) -> Vec<WorldPoint>;
    /// All device records of the store, tightly packed.
    fn gpu_bytes(&self) -> Vec<u8>;
    fn trace(
        &self,
        local: LocalIndex,
        ray: &Ray,
        settings: &NewtonSettings,
    ) -> Option<(FloatType, LocalHit, u32)>;
}

impl<G: ObjectGeometry> AnyStore for ObjectStore<G> {
    fn kind(&self) -> ObjectKind {
        G::KIND
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn clear(&mut self) {
        self.objects.clear();
    }

    fn bounds(&self, local: LocalIndex) -> Option<&WorldBox> {
        Some(&self.objects.get(local)?.bounds)
    }

    fn world_bounds(&self, local: LocalIndex) -> Option<WorldBox> {
        Some(self.objects.get(local)?.world_bounds())
    }

    fn transform(&self, local: LocalIndex) -> Option<&WorldTransform> {
        Some(self.objects.get(local)?.transform())
    }

    fn set_transform(&mut self, local: LocalIndex, transform: WorldTransform) -> bool {
        match self.objects.get_mut(local) {
            Some(object) => {
                object.set_transform(transform);
                true
            }
            None => false,
        }
    }

    fn stable_index(&self, local: LocalIndex) -> Option<StableIndex> {
        self.objects.get(local)?.stable_index
    }

    fn set_stable_index(&mut self, local: LocalIndex, index: Option<StableIndex>) {
        if let Some(object) = self.objects.get_mut(local) {
            object.stable_index = index;
        }
    }

    fn world_control_points(&self, local: LocalIndex) -> Vec<WorldPoint> {
        self.objects
            .get(local)
            .map(|object| {
                object
                    .geometry
                    .control_points(object.space)
                    .iter()
                    .map(|p| object.transform() * p)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn gpu_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.gpu_records()).to_vec()
    }

    fn trace(
        &self,
        local: LocalIndex,
        ray: &Ray,
        settings: &NewtonSettings,
    ) -> Option<(FloatType, LocalHit, u32)> {
        self.objects.get(local)?.trace(ray, settings)
    }
}

/// Declares the object kinds, the tagged `Geometry` union over them and the
/// per-kind store table with its dispatch.
macro_rules! object_kinds {
    ( $( $variant:ident ( $geometry:ty ) => $field:ident, traceable: $traceable:literal; )* ) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ObjectKind {
            $( $variant, )*
        }

        impl ObjectKind {
            /// All kinds, in the order their objects appear in the flattened object list.
            pub const ALL: &'static [ObjectKind] = &[ $( ObjectKind::$variant, )* ];

            pub fn is_ray_traceable(self) -> bool {
                match self {
                    $( ObjectKind::$variant => $traceable, )*
                }
            }
        }

        $(
            impl KindTag for $geometry {
                const KIND: ObjectKind = ObjectKind::$variant;
            }

            impl From<$geometry> for Geometry {
                fn from(value: $geometry) -> Self {
                    Geometry::$variant(value)
                }
            }
        )*

        /// Geometry of any kind.
        #[derive(Clone, Debug, PartialEq)]
        pub enum Geometry {
            $( $variant($geometry), )*
        }

        impl Geometry {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $( Geometry::$variant(_) => ObjectKind::$variant, )*
                }
            }
        }

        /// One store per object kind.
        #[derive(Clone, Debug, Default)]
        pub struct ObjectStores {
            $( pub $field: ObjectStore<$geometry>, )*
        }

        impl ObjectStores {
            pub fn get(&self, kind: ObjectKind) -> &dyn AnyStore {
                match kind {
                    $( ObjectKind::$variant => &self.$field, )*
                }
            }

            pub fn get_mut(&mut self, kind: ObjectKind) -> &mut dyn AnyStore {
                match kind {
                    $( ObjectKind::$variant => &mut self.$field, )*
                }
            }

            pub fn push(
                &mut self,
                geometry: Geometry,
                transform: WorldTransform,
                space: BoxSpace,
            ) -> ObjectHandle {
                match geometry {
                    $(
                        Geometry::$variant(geometry) => ObjectHandle {
                            kind: ObjectKind::$variant,
                            local: self.$field.push(geometry, transform, space),
                        },
                    )*
                }
            }

            pub fn geometry(&self, handle: ObjectHandle) -> Option<Geometry> {
                match handle.kind {
                    $(
                        ObjectKind::$variant => self
                            .$field
                            .get(handle.local)
                            .map(|object| Geometry::$variant(object.geometry.clone())),
                    )*
                }
            }

            /// Replaces the geometry of an existing object. Fails if the kinds differ.
            pub fn replace_geometry(&mut self, handle: ObjectHandle, geometry: Geometry) -> bool {
                match geometry {
                    $(
                        Geometry::$variant(geometry) if handle.kind == ObjectKind::$variant => {
                            match self.$field.get_mut(handle.local) {
                                Some(object) => {
                                    object.set_geometry(geometry);
                                    true
                                }
                                None => false,
                            }
                        }
                    )*
                    _ => false,
                }
            }
        }
    };
}

object_kinds! {
    Sphere(Sphere) => spheres, traceable: true;
    Triangle1(BezierTriangle1) => triangles1, traceable: true;
    Triangle2(BezierTriangle2) => triangles2, traceable: true;
    Triangle3(BezierTriangle3) => triangles3, traceable: true;
    Triangle4(BezierTriangle4) => triangles4, traceable: true;
    Bicubic(BicubicPatch) => bicubics, traceable: true;
    Tetrahedron1(Tetrahedron1) => tetrahedra1, traceable: false;
    Tetrahedron2(Tetrahedron2) => tetrahedra2, traceable: false;
    Tetrahedron3(Tetrahedron3) => tetrahedra3, traceable: false;
    Tetrahedron4(Tetrahedron4) => tetrahedra4, traceable: false;
}

impl ObjectKind {
    /// Shader binding table offset of the intersection routine for this kind,
    /// `None` for kinds that are never traced.
    pub fn hit_group(self) -> Option<u32> {
        ObjectKind::ALL
            .iter()
            .filter(|kind| kind.is_ray_traceable())
            .position(|kind| *kind == self)
            .map(|position| position as u32)
    }
}
