use std::cmp::Ordering;

use nalgebra::Unit;

use super::bernstein::{
    self, ParamDomain, ParametricSurface, SurfaceSample, tetrahedron_degree, tetrahedron_index,
    tetrahedron_multi_indices, triangle_degree, triangle_index, triangle_multi_indices,
};
use super::{FloatType, ParamPoint, Ray, WorldPoint, WorldVector};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sphere {
    pub center: WorldPoint,
    pub radius: FloatType,
}

#[derive(Copy, Clone, Debug)]
pub struct SphereHit {
    pub t: FloatType,
    pub point: WorldPoint,
    pub normal: Unit<WorldVector>,
}

impl Sphere {
    /// The radius is validated when the sphere is added to a scene.
    pub fn new(center: WorldPoint, radius: FloatType) -> Self {
        Sphere { center, radius }
    }

    pub fn translate(&mut self, offset: &WorldVector) {
        self.center += offset;
    }

    /// Nearest intersection in front of the ray origin.
    pub fn intersect(&self, ray: &Ray) -> Option<SphereHit> {
        let oc = ray.origin - self.center;
        let b = oc.dot(&ray.direction);
        let c = oc.dot(&oc) - self.radius * self.radius;
        let discriminant = b * b - c;

        if discriminant < 0.0 {
            return None;
        }

        let sqrt_disc = discriminant.sqrt();
        let t1 = -b - sqrt_disc;
        let t2 = -b + sqrt_disc;
        let t = if t1 > 0.0 {
            t1
        } else if t2 > 0.0 {
            t2
        } else {
            return None;
        };

        let point = ray.point_at(t);
        let normal = Unit::new_normalize(point - self.center);

        Some(SphereHit { t, point, normal })
    }
}

/// Triangular Bezier patch with `P` control points, see `bernstein::triangle_index` for ordering.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BezierTriangle<const P: usize> {
    pub control_points: [WorldPoint; P],
}

pub type BezierTriangle1 = BezierTriangle<3>;
pub type BezierTriangle2 = BezierTriangle<6>;
pub type BezierTriangle3 = BezierTriangle<10>;
pub type BezierTriangle4 = BezierTriangle<15>;

impl<const P: usize> BezierTriangle<P> {
    pub const DEGREE: usize = triangle_degree(P);

    pub fn new(control_points: [WorldPoint; P]) -> Self {
        let _ = Self::DEGREE;
        BezierTriangle { control_points }
    }

    /// Builds the patch from a function of the (i, j, k) multi-index.
    pub fn from_multi_index_fn(mut f: impl FnMut([usize; 3]) -> WorldPoint) -> Self {
        let mut indices = triangle_multi_indices(Self::DEGREE);
        Self::new(std::array::from_fn(|_| {
            f(indices
                .next()
                .unwrap_or_else(|| unreachable!("index count matches the point count")))
        }))
    }

    /// Flat patch spanning three corners, with control points evenly spread.
    pub fn flat(corners: [WorldPoint; 3]) -> Self {
        let n = Self::DEGREE as FloatType;
        Self::from_multi_index_fn(|index| {
            WorldPoint::from(
                corners
                    .iter()
                    .zip(index)
                    .map(|(corner, weight)| corner.coords * (weight as FloatType / n))
                    .sum::<WorldVector>(),
            )
        })
    }

    /// Corner control points: (n, 0, 0), (0, n, 0), (0, 0, n).
    pub fn corners(&self) -> [WorldPoint; 3] {
        let n = Self::DEGREE;
        [
            self.control_points[0],
            self.control_points[triangle_index(n, 0)],
            self.control_points[triangle_index(0, n)],
        ]
    }
}

impl<const P: usize> ParametricSurface for BezierTriangle<P> {
    fn domain(&self) -> ParamDomain {
        ParamDomain::Triangle
    }

    fn sample(&self, uv: &ParamPoint) -> SurfaceSample {
        bernstein::triangle_sample(&self.control_points, Self::DEGREE, uv)
    }
}

/// Tetrahedral Bezier volume with `P` control points, see `bernstein::tetrahedron_index`.
/// Only its boundary is ever rendered.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tetrahedron<const P: usize> {
    pub control_points: [WorldPoint; P],
}

pub type Tetrahedron1 = Tetrahedron<4>;
pub type Tetrahedron2 = Tetrahedron<10>;
pub type Tetrahedron3 = Tetrahedron<20>;
pub type Tetrahedron4 = Tetrahedron<35>;

impl<const P: usize> Tetrahedron<P> {
    pub const DEGREE: usize = tetrahedron_degree(P);

    pub fn new(control_points: [WorldPoint; P]) -> Self {
        let _ = Self::DEGREE;
        Tetrahedron { control_points }
    }

    /// Builds the volume from a function of the (i, j, k, l) multi-index.
    pub fn from_multi_index_fn(mut f: impl FnMut([usize; 4]) -> WorldPoint) -> Self {
        let mut indices = tetrahedron_multi_indices(Self::DEGREE);
        Self::new(std::array::from_fn(|_| {
            f(indices
                .next()
                .unwrap_or_else(|| unreachable!("index count matches the point count")))
        }))
    }

    /// Straight-sided tetrahedron with evenly spread control points.
    pub fn from_corners(corners: [WorldPoint; 4]) -> Self {
        let n = Self::DEGREE as FloatType;
        Self::from_multi_index_fn(|index| {
            WorldPoint::from(
                corners
                    .iter()
                    .zip(index)
                    .map(|(corner, weight)| corner.coords * (weight as FloatType / n))
                    .sum::<WorldVector>(),
            )
        })
    }

    pub fn corners(&self) -> [WorldPoint; 4] {
        let n = Self::DEGREE;
        [
            self.control_points[0],
            self.control_points[tetrahedron_index(n, 0, 0)],
            self.control_points[tetrahedron_index(0, n, 0)],
            self.control_points[tetrahedron_index(0, 0, n)],
        ]
    }

    /// Face opposite to corner `opposite`, as a triangle patch of the same degree.
    /// The face keeps the remaining three multi-index components in order.
    fn boundary_face<const F: usize>(&self, opposite: usize) -> BezierTriangle<F> {
        debug_assert!(BezierTriangle::<F>::DEGREE == Self::DEGREE);
        BezierTriangle::from_multi_index_fn(|face_index| {
            let [_, j, k, l]: [usize; 4] = std::array::from_fn(|pos| match pos.cmp(&opposite) {
                Ordering::Less => face_index[pos],
                Ordering::Equal => 0,
                Ordering::Greater => face_index[pos - 1],
            });
            self.control_points[tetrahedron_index(j, k, l)]
        })
    }
}

macro_rules! impl_boundary_faces {
    ( $( $tetrahedron:ty => $triangle:ty ),* $(,)? ) => {
        $(
            impl $tetrahedron {
                /// The four boundary faces, face `f` lies opposite to corner `f`.
                pub fn boundary_faces(&self) -> [$triangle; 4] {
                    std::array::from_fn(|opposite| self.boundary_face(opposite))
                }
            }
        )*
    };
}

impl_boundary_faces! {
    Tetrahedron1 => BezierTriangle1,
    Tetrahedron2 => BezierTriangle2,
    Tetrahedron3 => BezierTriangle3,
    Tetrahedron4 => BezierTriangle4,
}

/// Tensor product Bezier patch with control points indexed `[u][v]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RectangularPatch<const U: usize, const V: usize> {
    pub control_points: [[WorldPoint; V]; U],
}

pub type BicubicPatch = RectangularPatch<4, 4>;

impl<const U: usize, const V: usize> RectangularPatch<U, V> {
    pub fn new(control_points: [[WorldPoint; V]; U]) -> Self {
        assert!(U >= 2 && V >= 2);
        RectangularPatch { control_points }
    }

    pub fn from_fn(mut f: impl FnMut(usize, usize) -> WorldPoint) -> Self {
        Self::new(std::array::from_fn(|i| std::array::from_fn(|j| f(i, j))))
    }

    /// All control points, row by row.
    pub fn points(&self) -> &[WorldPoint] {
        self.control_points.as_flattened()
    }
}

impl<const U: usize, const V: usize> ParametricSurface for RectangularPatch<U, V> {
    fn domain(&self) -> ParamDomain {
        ParamDomain::UnitSquare
    }

    fn sample(&self, uv: &ParamPoint) -> SurfaceSample {
        bernstein::rectangle_sample(&self.control_points, uv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    fn unit_corners() -> [WorldPoint; 4] {
        [
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
            WorldPoint::new(0.0, 0.0, 1.0),
            WorldPoint::new(0.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn sphere_direct_hit_through_center() {
        let sphere = Sphere::new([1.0, 2.0, 3.0].into(), 1.0);
        let ray = Ray::new([1.0, 2.0, 0.0].into(), [0.0, 0.0, 1.0].into());

        let h = sphere.intersect(&ray).expect("We should have a hit!");
        assert!((h.t - 2.0).abs() < 1e-6);
        assert!((h.normal.z + 1.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_grazing_hit() {
        let sphere = Sphere::new([1.0, 2.0, 3.0].into(), 1.0);
        let ray = Ray::new([2.0, 2.0, 0.0].into(), [0.0, 0.0, 1.0].into());

        let h = sphere.intersect(&ray).expect("We should have a hit!");
        assert!((h.t - 3.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_narrow_miss() {
        let sphere = Sphere::new([1.0, 2.0, 3.0].into(), 1.0);
        let ray = Ray::new([2.0, 2.01, 0.0].into(), [0.0, 0.0, 1.0].into());
        assert!(sphere.intersect(&ray).is_none());
    }

    #[test]
    fn sphere_behind_origin() {
        let sphere = Sphere::new([0.0, 0.0, -5.0].into(), 1.0);
        let ray = Ray::new([0.0, 0.0, 0.0].into(), [0.0, 0.0, 1.0].into());
        assert!(sphere.intersect(&ray).is_none());
    }

    #[test]
    fn sphere_translate() {
        let mut sphere = Sphere::new([0.0, 0.0, 0.0].into(), 0.5);
        sphere.translate(&WorldVector::new(1.0, -1.0, 2.0));
        assert!(sphere.center == WorldPoint::new(1.0, -1.0, 2.0));
        assert!(sphere.radius == 0.5);
    }

    #[test]
    fn degrees() {
        assert!(BezierTriangle1::DEGREE == 1);
        assert!(BezierTriangle4::DEGREE == 4);
        assert!(Tetrahedron2::DEGREE == 2);
        assert!(Tetrahedron4::DEGREE == 4);
    }

    #[test]
    fn tetrahedron_corners_roundtrip() {
        let corners = unit_corners();
        assert!(Tetrahedron3::from_corners(corners).corners() == corners);
    }

    #[test]
    fn faces_of_linear_tetrahedron() {
        let corners = unit_corners();
        let faces = Tetrahedron1::from_corners(corners).boundary_faces();

        assert!(faces[0].corners() == [corners[1], corners[2], corners[3]]);
        assert!(faces[1].corners() == [corners[0], corners[2], corners[3]]);
        assert!(faces[2].corners() == [corners[0], corners[1], corners[3]]);
        assert!(faces[3].corners() == [corners[0], corners[1], corners[2]]);
    }

    #[test]
    fn faces_contain_only_boundary_points() {
        let tetrahedron = Tetrahedron3::from_multi_index_fn(|[i, j, k, l]| {
            WorldPoint::new(i as f32, j as f32, (k * 10 + l) as f32)
        });
        for (opposite, face) in tetrahedron.boundary_faces().iter().enumerate() {
            for point in &face.control_points {
                let multi_index = [
                    point.x as usize,
                    point.y as usize,
                    point.z as usize / 10,
                    point.z as usize % 10,
                ];
                assert!(multi_index[opposite] == 0);
                assert!(multi_index.iter().sum::<usize>() == 3);
            }
        }
    }

    #[test]
    fn face_surface_matches_flat_triangle() {
        let corners = unit_corners();
        let faces = Tetrahedron2::from_corners(corners).boundary_faces();
        let flat = BezierTriangle2::flat([corners[0], corners[1], corners[2]]);

        let uv = ParamPoint::new(0.3, 0.4);
        let a = faces[3].surface_point(&uv);
        let b = flat.surface_point(&uv);
        assert!((a - b).norm() < 1e-6);
    }

    #[test]
    fn rectangular_points_are_row_major() {
        let patch = BicubicPatch::from_fn(|i, j| WorldPoint::new(i as f32, j as f32, 0.0));
        let points = patch.points();
        assert!(points.len() == 16);
        assert!(points[1] == WorldPoint::new(0.0, 1.0, 0.0));
        assert!(points[4] == WorldPoint::new(1.0, 0.0, 0.0));
    }
}
