mod aabb;
pub mod bernstein;
mod bounds;
pub mod newton;
mod patch;
mod ray_box_intersection;

use nalgebra::{Affine3, Point2, Point3, Translation3, Unit, Vector2, Vector3};

pub use aabb::AABB;
pub use bernstein::{ParamDomain, ParametricSurface, SurfaceSample};
pub use bounds::{BoxSpace, Bounded};
pub use newton::{NewtonOutcome, NewtonSettings, PatchHit};
pub use patch::{
    BezierTriangle, BezierTriangle1, BezierTriangle2, BezierTriangle3, BezierTriangle4,
    BicubicPatch, RectangularPatch, Sphere, SphereHit, Tetrahedron, Tetrahedron1, Tetrahedron2,
    Tetrahedron3, Tetrahedron4,
};
pub use ray_box_intersection::RayIntersectionExt;

pub type FloatType = f32;
pub const EPSILON: FloatType = 1e-6;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type WorldTransform = Affine3<FloatType>;

/// Parametric (u, v) coordinates on a patch. Kept in double precision.
pub type ParamPoint = Point2<f64>;
pub type ParamVector = Vector2<f64>;

pub type ScreenPoint = Point2<u32>;
pub type ScreenSize = Vector2<u32>;
pub type ScreenBlock = AABB<ScreenPoint>;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    pub direction: Unit<WorldVector>,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        let direction = Unit::new_normalize(direction);
        let inv_direction = direction.map(|x| if x == 0.0 { FloatType::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction.as_ref() * distance
    }

    /// Maps the ray through an affine transform.
    /// The direction is renormalized, so distances along the result are not the
    /// distances along `self`.
    pub fn transformed(&self, transform: &WorldTransform) -> Ray {
        Ray::new(
            transform * self.origin,
            transform * self.direction.into_inner(),
        )
    }

    /// Signed distance along the ray of the orthogonal projection of `point`.
    pub fn distance_to(&self, point: &WorldPoint) -> FloatType {
        (point - self.origin).dot(&self.direction)
    }
}

pub fn translation(offset: &WorldVector) -> WorldTransform {
    WorldTransform::from_matrix_unchecked(Translation3::from(*offset).to_homogeneous())
}

/// Row-major 3x4 matrix of an affine transform, the layout used by GPU instance records.
pub fn transform_rows(transform: &WorldTransform) -> [[f32; 4]; 3] {
    let m = transform.matrix();
    std::array::from_fn(|row| std::array::from_fn(|col| m[(row, col)]))
}

#[cfg(test)]
pub mod test {
    use super::*;
    use proptest::prelude::*;

    /// Helper macro that creates a wrapper around a type that implements Deref and Arbitrary
    macro_rules! arbitrary_wrapper {
        ( $wrapper_name:ident ( $type:ty ) -> $block:block ) => {
            #[derive(Copy, Clone, Debug)]
            pub struct $wrapper_name(pub $type);

            impl std::ops::Deref for $wrapper_name {
                type Target = $type;
                fn deref(&self) -> &$type {
                    &self.0
                }
            }

            impl Arbitrary for $wrapper_name {
                type Parameters = ();
                type Strategy = proptest::strategy::BoxedStrategy<Self>;
                fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                    $block.prop_map(|x| $wrapper_name(x)).boxed()
                }
            }
        };
    }

    pub fn simple_float() -> BoxedStrategy<f32> {
        (-100_000_000i64..100_000_000i64)
            .prop_map(|n| n as f32 * 1e-6)
            .boxed()
    }

    pub fn simple_positive_float() -> BoxedStrategy<f32> {
        (1u64..100_000_000u64)
            .prop_map(|n| n as f32 * 1e-6)
            .boxed()
    }

    /// Parametric coordinate strictly inside (0, 1)
    pub fn interior_parameter() -> BoxedStrategy<f64> {
        (100u32..=900u32).prop_map(|n| n as f64 * 1e-3).boxed()
    }

    arbitrary_wrapper! {
        WorldPointWrapper(WorldPoint) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_map(|coords| {
                    WorldPoint::new(coords.0, coords.1, coords.2)
                })
        }
    }

    arbitrary_wrapper! {
        NonzeroWorldVectorWrapper(WorldVector) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_filter_map(
                    "vector is zero",
                    |coords| {
                        let vector = WorldVector::new(coords.0, coords.1, coords.2);
                        if vector.norm() < 1e-3 {
                            None
                        } else {
                            Some(vector)
                        }
                    })
        }
    }

    pub fn world_points(count: usize) -> BoxedStrategy<Vec<WorldPoint>> {
        proptest::collection::vec(any::<WorldPointWrapper>(), count)
            .prop_map(|points| points.into_iter().map(|p| *p).collect())
            .boxed()
    }

    use assert2::assert;

    #[test]
    fn transform_rows_of_translation() {
        let transform = WorldTransform::from_matrix_unchecked(
            nalgebra::Translation3::new(1.0, 2.0, 3.0).to_homogeneous(),
        );
        let rows = transform_rows(&transform);
        assert!(rows[0] == [1.0, 0.0, 0.0, 1.0]);
        assert!(rows[1] == [0.0, 1.0, 0.0, 2.0]);
        assert!(rows[2] == [0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn transformed_ray_keeps_hit_point() {
        let transform = WorldTransform::from_matrix_unchecked(
            nalgebra::Translation3::new(-5.0, 0.0, 0.0).to_homogeneous(),
        );
        let ray = Ray::new(WorldPoint::new(5.0, 0.0, -1.0), WorldVector::new(0.0, 0.0, 2.0));
        let local = ray.transformed(&transform);
        assert!(local.origin == WorldPoint::new(0.0, 0.0, -1.0));
        assert!(local.direction.into_inner() == WorldVector::new(0.0, 0.0, 1.0));
        assert!(ray.distance_to(&WorldPoint::new(5.0, 0.0, 3.0)) == 4.0);
    }
}
