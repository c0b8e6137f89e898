use super::{
    BezierTriangle, RectangularPatch, Sphere, Tetrahedron, WorldBox, WorldPoint, WorldVector,
};

/// Which coordinate frame a bounding box is expressed in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoxSpace {
    /// Geometry coordinates as stored.
    World,
    /// Coordinates relative to the object's own origin, to be placed by the instance transform.
    /// Only spheres have a distinct local frame (centered on the origin),
    /// control point geometry is its own local frame.
    Local,
}

/// Geometry that has a conservative axis aligned bounding box.
pub trait Bounded {
    fn bounding_box(&self, space: BoxSpace) -> WorldBox;
}

/// Box of a non-empty control point set.
/// By the convex hull property the surface never leaves it.
fn control_point_box(points: &[WorldPoint]) -> WorldBox {
    WorldBox::from_points(points)
        .unwrap_or_else(|| unreachable!("patches always have control points"))
}

/// The local box is exactly `2 * radius` wide. In world space the extent is rounded
/// along with the center, so it may differ from `2 * radius` by a few ulps of the center.
impl Bounded for Sphere {
    fn bounding_box(&self, space: BoxSpace) -> WorldBox {
        let r_vec = WorldVector::repeat(self.radius);
        let center = match space {
            BoxSpace::World => self.center,
            BoxSpace::Local => WorldPoint::origin(),
        };
        WorldBox::new(center - r_vec, center + r_vec)
    }
}

impl<const P: usize> Bounded for BezierTriangle<P> {
    fn bounding_box(&self, _space: BoxSpace) -> WorldBox {
        control_point_box(&self.control_points)
    }
}

impl<const P: usize> Bounded for Tetrahedron<P> {
    fn bounding_box(&self, _space: BoxSpace) -> WorldBox {
        control_point_box(&self.control_points)
    }
}

impl<const U: usize, const V: usize> Bounded for RectangularPatch<U, V> {
    fn bounding_box(&self, _space: BoxSpace) -> WorldBox {
        control_point_box(self.points())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::test::{WorldPointWrapper, simple_positive_float, world_points};
    use crate::geometry::{
        BezierTriangle1, BezierTriangle2, BezierTriangle3, BezierTriangle4, BicubicPatch,
        FloatType, ParamPoint, ParametricSurface, Tetrahedron1, Tetrahedron2, Tetrahedron3,
        Tetrahedron4,
    };

    use assert2::assert;
    use test_strategy::proptest;

    fn assert_contains_all(b: &WorldBox, points: &[WorldPoint]) {
        assert!(b.is_valid());
        for p in points {
            assert!(b.contains(p, 0.0), "{p:?} must be in {b:?}");
        }
    }

    fn to_array<const N: usize>(points: Vec<WorldPoint>) -> [WorldPoint; N] {
        points.try_into().unwrap()
    }

    #[proptest]
    fn triangle_box_contains_control_points(
        #[strategy(world_points(3))] p1: Vec<WorldPoint>,
        #[strategy(world_points(6))] p2: Vec<WorldPoint>,
        #[strategy(world_points(10))] p3: Vec<WorldPoint>,
        #[strategy(world_points(15))] p4: Vec<WorldPoint>,
    ) {
        let b = BezierTriangle1::new(to_array(p1.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p1);
        let b = BezierTriangle2::new(to_array(p2.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p2);
        let b = BezierTriangle3::new(to_array(p3.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p3);
        let b = BezierTriangle4::new(to_array(p4.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p4);
    }

    #[proptest]
    fn tetrahedron_box_contains_control_points(
        #[strategy(world_points(4))] p1: Vec<WorldPoint>,
        #[strategy(world_points(10))] p2: Vec<WorldPoint>,
        #[strategy(world_points(20))] p3: Vec<WorldPoint>,
        #[strategy(world_points(35))] p4: Vec<WorldPoint>,
    ) {
        let b = Tetrahedron1::new(to_array(p1.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p1);
        let b = Tetrahedron2::new(to_array(p2.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p2);
        let b = Tetrahedron3::new(to_array(p3.clone())).bounding_box(BoxSpace::World);
        assert_contains_all(&b, &p3);
        let b = Tetrahedron4::new(to_array(p4.clone())).bounding_box(BoxSpace::Local);
        assert_contains_all(&b, &p4);
    }

    #[proptest]
    fn bicubic_box_contains_control_points_and_surface(
        #[strategy(world_points(16))] points: Vec<WorldPoint>,
    ) {
        let patch = BicubicPatch::from_fn(|i, j| points[4 * i + j]);
        let b = patch.bounding_box(BoxSpace::World);
        assert_contains_all(&b, &points);

        for (u, v) in [(0.0, 0.0), (0.5, 0.5), (0.25, 0.9), (1.0, 0.3)] {
            let p = patch.surface_point(&ParamPoint::new(u, v));
            assert!(b.contains(&p, 1e-3), "{p:?} must be in {b:?}");
        }
    }

    #[proptest]
    fn sphere_box_is_exact(
        center: WorldPointWrapper,
        #[strategy(simple_positive_float())] radius: FloatType,
    ) {
        let sphere = Sphere::new(*center, radius);

        let local = sphere.bounding_box(BoxSpace::Local);
        assert!(local.size() == WorldVector::repeat(2.0 * radius));

        let world = sphere.bounding_box(BoxSpace::World);
        let tolerance = 4.0 * FloatType::EPSILON * (center.coords.amax() + radius);
        for extent in world.size().iter() {
            assert!((extent - 2.0 * radius).abs() <= tolerance, "{extent} vs {}", 2.0 * radius);
        }
        assert!(world.contains(&*center, 0.0));
    }

    #[proptest]
    fn sphere_local_box_ignores_center(
        a: WorldPointWrapper,
        b: WorldPointWrapper,
        #[strategy(simple_positive_float())] radius: FloatType,
    ) {
        let box_a = Sphere::new(*a, radius).bounding_box(BoxSpace::Local);
        let box_b = Sphere::new(*b, radius).bounding_box(BoxSpace::Local);
        assert!(box_a == box_b);
        assert!(box_a.center() == WorldPoint::origin());
    }

    #[test]
    fn degenerate_sphere_box() {
        let sphere = Sphere::new(WorldPoint::new(1.0, 2.0, 3.0), 0.0);
        let b = sphere.bounding_box(BoxSpace::World);
        assert!(b.is_valid());
        assert!(b.min == b.max);
    }
}
