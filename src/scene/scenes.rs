use std::f32::consts::PI;

use bon::bon;
use itertools::iproduct;

use super::{ObjectHandle, Scene, Solid};
use crate::backend::Backend;
use crate::error::PreconditionViolation;
use crate::geometry::{
    BezierTriangle, BezierTriangle1, BezierTriangle2, BezierTriangle3, BezierTriangle4,
    BicubicPatch, FloatType, Tetrahedron, WorldPoint, WorldTransform, WorldVector,
    bernstein::MAX_DEGREE,
};

/// Built-in procedural scenes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SceneId {
    /// One tetrahedron of the configured degree.
    SingleTetrahedron = 1,
    /// Two quadratic tetrahedra sharing a face.
    GluedTetrahedra = 2,
    /// Wavy grid of bicubic patches and one triangle patch of every degree.
    PatchArrangement = 3,
    /// Cubic tetrahedron cut by flat bicubic planes.
    SlicingPlanes = 4,
}

impl SceneId {
    pub const ALL: [SceneId; 4] = [
        SceneId::SingleTetrahedron,
        SceneId::GluedTetrahedra,
        SceneId::PatchArrangement,
        SceneId::SlicingPlanes,
    ];
}

impl TryFrom<u32> for SceneId {
    type Error = PreconditionViolation;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        SceneId::ALL
            .into_iter()
            .find(|id| *id as u32 == value)
            .ok_or(PreconditionViolation::UnknownScene(value))
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SceneSettings {
    /// Degree of the tetrahedron in the single tetrahedron scene.
    pub degree: usize,
    /// Patch subdivision levels, only 0 is supported.
    pub subdivision_depth: u32,
    pub light_center: WorldPoint,
    pub light_radius: FloatType,
    /// How far curved faces bulge out of their flat counterparts.
    pub bulge: FloatType,
}

#[bon]
impl SceneSettings {
    #[builder]
    pub fn new(
        #[builder(default = 2)] degree: usize,
        #[builder(default = 0)] subdivision_depth: u32,
        #[builder(default = WorldPoint::new(2.0, 3.0, 2.0))] light_center: WorldPoint,
        #[builder(default = 0.25)] light_radius: FloatType,
        #[builder(default = 0.15)] bulge: FloatType,
    ) -> Self {
        SceneSettings {
            degree,
            subdivision_depth,
            light_center,
            light_radius,
            bulge,
        }
    }

    fn validate(&self) -> Result<(), PreconditionViolation> {
        if self.subdivision_depth > 0 {
            return Err(PreconditionViolation::SubdivisionUnsupported {
                depth: self.subdivision_depth,
            });
        }
        if !(1..=MAX_DEGREE).contains(&self.degree) {
            return Err(PreconditionViolation::InvalidDegree(self.degree));
        }
        if !(self.light_radius.is_finite() && self.light_radius >= 0.0) {
            return Err(PreconditionViolation::InvalidRadius);
        }
        Ok(())
    }
}

impl Default for SceneSettings {
    fn default() -> Self {
        SceneSettings::builder().build()
    }
}

impl<B: Backend> Scene<B> {
    /// Replaces all objects with one of the built-in scenes and requests a full rebuild.
    /// The scene is left untouched if the settings are rejected.
    pub fn load(&mut self, id: SceneId, settings: &SceneSettings) -> Result<(), PreconditionViolation> {
        settings.validate()?;

        self.clear();
        let center = WorldPoint::origin();
        match id {
            SceneId::SingleTetrahedron => {
                let corners = regular_tetrahedron(&center, 1.0);
                self.add_bulged_tetrahedron(settings.degree, corners, &center, settings.bulge)?;
            }
            SceneId::GluedTetrahedra => {
                let [a, b, c, d] = regular_tetrahedron(&center, 1.0);
                // Mirror `d` through the shared face
                let face_center = WorldPoint::from((a.coords + b.coords + c.coords) / 3.0);
                let e = face_center + (face_center - d);
                let bulge = settings.bulge;
                self.add_tetrahedron(bulged::<10>([a, b, c, d], &center, bulge), WorldTransform::identity())?;
                self.add_tetrahedron(bulged::<10>([a, b, c, e], &center, bulge), WorldTransform::identity())?;
            }
            SceneId::PatchArrangement => {
                self.add_wavy_grid(3, 1.0, 0.2)?;
                self.add_object(bumped_triangle::<3>(-2.0, settings.bulge), WorldTransform::identity())?;
                self.add_object(bumped_triangle::<6>(-1.0, settings.bulge), WorldTransform::identity())?;
                self.add_object(bumped_triangle::<10>(0.0, settings.bulge), WorldTransform::identity())?;
                self.add_object(bumped_triangle::<15>(1.0, settings.bulge), WorldTransform::identity())?;
            }
            SceneId::SlicingPlanes => {
                let corners = regular_tetrahedron(&center, 1.2);
                self.add_tetrahedron(bulged::<20>(corners, &center, settings.bulge), WorldTransform::identity())?;
                for height in [-0.4, 0.0, 0.4] {
                    self.add_object(flat_plane(height, 2.0), WorldTransform::identity())?;
                }
            }
        }
        self.add_light(settings.light_center, settings.light_radius)?;

        log::info!(
            "Loaded scene {id:?}; objects={}, traceable={}",
            self.registry().len(),
            self.registry().traceable_count()
        );
        Ok(())
    }

    fn add_bulged_tetrahedron(
        &mut self,
        degree: usize,
        corners: [WorldPoint; 4],
        center: &WorldPoint,
        bulge: FloatType,
    ) -> Result<ObjectHandle, PreconditionViolation> {
        fn add<B: Backend, S: Solid>(scene: &mut Scene<B>, solid: S) -> Result<ObjectHandle, PreconditionViolation> {
            Ok(scene.add_tetrahedron(solid, WorldTransform::identity())?.0)
        }

        match degree {
            1 => add(self, bulged::<4>(corners, center, bulge)),
            2 => add(self, bulged::<10>(corners, center, bulge)),
            3 => add(self, bulged::<20>(corners, center, bulge)),
            4 => add(self, bulged::<35>(corners, center, bulge)),
            _ => Err(PreconditionViolation::InvalidDegree(degree)),
        }
    }

    /// `count` x `count` bicubic patches of size `size` in the y = 0 plane, displaced by
    /// a height field so that neighbors share their boundary control points.
    fn add_wavy_grid(&mut self, count: usize, size: FloatType, amplitude: FloatType) -> Result<(), PreconditionViolation> {
        let origin = -(count as FloatType) * size / 2.0;
        let height = |x: FloatType, z: FloatType| amplitude * (x * PI).sin() * (z * PI).cos();

        for (row, column) in iproduct!(0..count, 0..count) {
            let patch = BicubicPatch::from_fn(|i, j| {
                let x = origin + (row as FloatType + i as FloatType / 3.0) * size;
                let z = origin + (column as FloatType + j as FloatType / 3.0) * size;
                WorldPoint::new(x, height(x, z) - 1.0, z)
            });
            self.add_object(patch, WorldTransform::identity())?;
        }
        Ok(())
    }
}

/// Corners of a regular tetrahedron around `center`, with one corner straight up.
fn regular_tetrahedron(center: &WorldPoint, radius: FloatType) -> [WorldPoint; 4] {
    let directions = [
        WorldVector::new(0.0, 1.0, 0.0),
        WorldVector::new((8.0 as FloatType).sqrt() / 3.0, -1.0 / 3.0, 0.0),
        WorldVector::new(-(2.0 as FloatType).sqrt() / 3.0, -1.0 / 3.0, (6.0 as FloatType).sqrt() / 3.0),
        WorldVector::new(-(2.0 as FloatType).sqrt() / 3.0, -1.0 / 3.0, -(6.0 as FloatType).sqrt() / 3.0),
    ];
    directions.map(|direction| center + direction * radius)
}

/// Tetrahedron with control points pushed away from `center`.
///
/// The offset depends only on the world position of the straight-sided control point and
/// on its largest multi-index component, so corners stay put and two volumes sharing a face
/// get identical boundary patches there.
fn bulged<const P: usize>(corners: [WorldPoint; 4], center: &WorldPoint, bulge: FloatType) -> Tetrahedron<P> {
    let n = Tetrahedron::<P>::DEGREE;
    Tetrahedron::from_multi_index_fn(|index| {
        let point = WorldPoint::from(
            corners
                .iter()
                .zip(index)
                .map(|(corner, weight)| corner.coords * (weight as FloatType / n as FloatType))
                .sum::<WorldVector>(),
        );
        let largest = index.iter().copied().max().unwrap_or(n);
        let scale = 1.0 - largest as FloatType / n as FloatType;
        let outward = (point - center).try_normalize(1e-6).unwrap_or_else(WorldVector::zeros);
        point + outward * (bulge * scale)
    })
}

/// Upright triangle patch at horizontal offset `x`, its interior bumped towards +z.
fn bumped_triangle<const P: usize>(x: FloatType, bump: FloatType) -> BezierTriangle<P> {
    let corners = [
        WorldPoint::new(x, 0.8, 1.5),
        WorldPoint::new(x + 0.8, 0.8, 1.5),
        WorldPoint::new(x + 0.4, 1.5, 1.5),
    ];
    let n = BezierTriangle::<P>::DEGREE;
    BezierTriangle::from_multi_index_fn(|index| {
        let point = corners
            .iter()
            .zip(index)
            .map(|(corner, weight)| corner.coords * (weight as FloatType / n as FloatType))
            .sum::<WorldVector>();
        let largest = index.iter().copied().max().unwrap_or(n);
        let scale = 1.0 - largest as FloatType / n as FloatType;
        WorldPoint::from(point + WorldVector::z() * (bump * scale))
    })
}

/// Square bicubic patch of side `size` in the plane y = `height`, centered on the y axis.
fn flat_plane(height: FloatType, size: FloatType) -> BicubicPatch {
    BicubicPatch::from_fn(|i, j| {
        WorldPoint::new(
            (i as FloatType / 3.0 - 0.5) * size,
            height,
            (j as FloatType / 3.0 - 0.5) * size,
        )
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::HostBackend;
    use crate::geometry::{Bounded, BoxSpace};
    use crate::scene::{Geometry, ObjectKind, RebuildRequest};
    use assert2::{assert, let_assert};
    use test_case::test_case;

    #[test_case(SceneId::SingleTetrahedron, &[(ObjectKind::Tetrahedron2, 1), (ObjectKind::Triangle2, 4)])]
    #[test_case(SceneId::GluedTetrahedra, &[(ObjectKind::Tetrahedron2, 2), (ObjectKind::Triangle2, 8)])]
    #[test_case(SceneId::PatchArrangement, &[(ObjectKind::Bicubic, 9), (ObjectKind::Triangle1, 1), (ObjectKind::Triangle4, 1)])]
    #[test_case(SceneId::SlicingPlanes, &[(ObjectKind::Tetrahedron3, 1), (ObjectKind::Triangle3, 4), (ObjectKind::Bicubic, 3)])]
    fn scene_contents(id: SceneId, expected: &[(ObjectKind, usize)]) {
        let mut scene = Scene::<HostBackend>::new();
        scene.load(id, &SceneSettings::default()).unwrap();

        for (kind, count) in expected {
            assert!(scene.registry().count(*kind) == *count, "{kind:?}");
        }
        assert!(scene.registry().count(ObjectKind::Sphere) == 1);
        assert!(scene.registry().light().is_some());
        assert!(scene.pending() == RebuildRequest::Full);
    }

    #[test_case(1, ObjectKind::Triangle1)]
    #[test_case(3, ObjectKind::Triangle3)]
    #[test_case(4, ObjectKind::Triangle4)]
    fn single_tetrahedron_degree(degree: usize, face_kind: ObjectKind) {
        let mut scene = Scene::<HostBackend>::new();
        let settings = SceneSettings::builder().degree(degree).build();
        scene.load(SceneId::SingleTetrahedron, &settings).unwrap();
        assert!(scene.registry().count(face_kind) == 4);
    }

    #[test_case(SceneSettings::builder().subdivision_depth(1).build() => PreconditionViolation::SubdivisionUnsupported { depth: 1 })]
    #[test_case(SceneSettings::builder().degree(0).build() => PreconditionViolation::InvalidDegree(0))]
    #[test_case(SceneSettings::builder().degree(5).build() => PreconditionViolation::InvalidDegree(5))]
    #[test_case(SceneSettings::builder().light_radius(-0.25).build() => PreconditionViolation::InvalidRadius)]
    #[test_case(SceneSettings::builder().light_radius(FloatType::NAN).build() => PreconditionViolation::InvalidRadius)]
    fn rejected_settings_leave_scene_alone(settings: SceneSettings) -> PreconditionViolation {
        let mut scene = Scene::<HostBackend>::new();
        scene.load(SceneId::GluedTetrahedra, &SceneSettings::default()).unwrap();
        let count = scene.registry().len();

        let_assert!(Err(err) = scene.load(SceneId::SingleTetrahedron, &settings));
        assert!(scene.registry().len() == count);
        err
    }

    #[test_case(0 => Err(PreconditionViolation::UnknownScene(0)))]
    #[test_case(2 => Ok(SceneId::GluedTetrahedra))]
    #[test_case(4 => Ok(SceneId::SlicingPlanes))]
    #[test_case(5 => Err(PreconditionViolation::UnknownScene(5)))]
    fn scene_id_from_number(value: u32) -> Result<SceneId, PreconditionViolation> {
        SceneId::try_from(value)
    }

    #[test]
    fn glued_tetrahedra_share_a_face() {
        let mut scene = Scene::<HostBackend>::new();
        scene.load(SceneId::GluedTetrahedra, &SceneSettings::default()).unwrap();

        let faces: Vec<_> = scene
            .registry()
            .stores()
            .triangles2
            .iter()
            .map(|object| object.geometry)
            .collect();
        // Face 3 lies opposite to the fourth corner, the one that differs between the two
        let mut first = faces[3].control_points.to_vec();
        let mut second = faces[7].control_points.to_vec();
        let key = |p: &WorldPoint| (p.x.to_bits(), p.y.to_bits(), p.z.to_bits());
        first.sort_by_key(key);
        second.sort_by_key(key);
        assert!(first == second);

        // Curved, not flat
        let corners = faces[3].corners();
        let normal = (corners[1] - corners[0]).cross(&(corners[2] - corners[0])).normalize();
        let offsets = faces[3]
            .control_points
            .iter()
            .map(|p| (p - corners[0]).dot(&normal).abs());
        assert!(offsets.fold(0.0, FloatType::max) > 0.01);
    }

    #[test]
    fn light_box_is_local() {
        let mut scene = Scene::<HostBackend>::new();
        let settings = SceneSettings::default();
        scene.load(SceneId::PatchArrangement, &settings).unwrap();

        let_assert!(Some(light) = scene.registry().light());
        let_assert!(Some(Geometry::Sphere(sphere)) = scene.registry().geometry(light));
        assert!(sphere.center == settings.light_center);
        let_assert!(Some(bounds) = scene.registry().bounds(light));
        assert!(*bounds == sphere.bounding_box(BoxSpace::Local));
        assert!(bounds.center() == WorldPoint::origin());
    }

    #[test]
    fn grid_patches_are_continuous() {
        let mut scene = Scene::<HostBackend>::new();
        scene.load(SceneId::PatchArrangement, &SceneSettings::default()).unwrap();
        let patches: Vec<_> = scene.registry().stores().bicubics.iter().map(|o| o.geometry).collect();

        // Last row of control points of a patch is the first row of its neighbor
        for j in 0..4 {
            assert!(patches[0].control_points[3][j] == patches[3].control_points[0][j]);
        }
        for i in 0..4 {
            assert!(patches[0].control_points[i][3] == patches[1].control_points[i][0]);
        }
    }

    #[test]
    fn bulge_keeps_corners() {
        let corners = regular_tetrahedron(&WorldPoint::origin(), 1.0);
        let flat = Tetrahedron::<20>::from_corners(corners);
        let curved = bulged::<20>(corners, &WorldPoint::origin(), 0.3);
        assert!(curved.corners() == flat.corners());
        assert!(curved != flat);

        let linear = bulged::<4>(corners, &WorldPoint::origin(), 0.3);
        assert!(linear.control_points == corners);
    }

    #[test]
    fn triangle_degrees_in_arrangement() {
        assert!(BezierTriangle1::DEGREE == 1);
        assert!(BezierTriangle2::DEGREE == 2);
        assert!(BezierTriangle3::DEGREE == 3);
        assert!(BezierTriangle4::DEGREE == 4);
        let triangle = bumped_triangle::<6>(0.0, 0.2);
        assert!(triangle.corners()[0] == WorldPoint::new(0.0, 0.8, 1.5));
        assert!(triangle.control_points.iter().any(|p| p.z > 1.5));
    }
}
