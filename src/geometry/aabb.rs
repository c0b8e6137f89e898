use std::ops::{Add, Sub};

use nalgebra::{ClosedAddAssign, ClosedDivAssign, Point, Point2, Point3, Scalar};
use num_traits::One;

use super::{FloatType, WorldTransform};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }

    pub fn with_size<S>(min: Point, size: &S) -> AABB<Point>
    where
        for<'a> &'a Point: Add<&'a S, Output = Point>,
    {
        let max = &min + size;
        AABB { min, max }
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> AABB<Point2> {
        AABB {
            min: f(&self.min),
            max: f(&self.max),
        }
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<T: Scalar + Copy + Sub> AABB<Point2<T>> {
    pub fn width(&self) -> T::Output {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> T::Output {
        self.max[1] - self.min[1]
    }
}

impl<T: Scalar + ClosedAddAssign + ClosedDivAssign + One, const D: usize> AABB<Point<T, D>> {
    pub fn center(&self) -> Point<T, D> {
        let two = T::one() + T::one();
        let avg_coords = (&self.min.coords + &self.max.coords) / two;
        Point::from(avg_coords)
    }
}

impl AABB<Point3<FloatType>> {
    /// Smallest box containing all the points, `None` if the iterator is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<FloatType>>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(AABB::new(*first, *first), |acc, p| acc.extended(p)))
    }

    /// Grows the box to contain `point`.
    pub fn extended(&self, point: &Point3<FloatType>) -> Self {
        AABB {
            min: self.min.inf(point),
            max: self.max.sup(point),
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        AABB {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// True if min <= max in every coordinate
    pub fn is_valid(&self) -> bool {
        self.min
            .coords
            .iter()
            .zip(self.max.coords.iter())
            .all(|(min, max)| min <= max)
    }

    /// Inclusive containment test, with a tolerance on every face.
    pub fn contains(&self, point: &Point3<FloatType>, tolerance: FloatType) -> bool {
        (0..3).all(|i| {
            point[i] >= self.min[i] - tolerance && point[i] <= self.max[i] + tolerance
        })
    }

    pub fn corners(&self) -> [Point3<FloatType>; 8] {
        std::array::from_fn(|i| {
            Point3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Conservative box of the transformed corners.
    pub fn transformed(&self, transform: &WorldTransform) -> Self {
        let corners = self.corners().map(|corner| transform * corner);
        AABB::from_points(&corners).unwrap_or_else(|| unreachable!("a box always has corners"))
    }
}

impl<Point> From<[Point; 2]> for AABB<Point> {
    fn from(value: [Point; 2]) -> Self {
        let [min, max] = value;
        AABB { min, max }
    }
}

impl<Point> From<(Point, Point)> for AABB<Point> {
    fn from(value: (Point, Point)) -> Self {
        let (min, max) = value;
        AABB { min, max }
    }
}
