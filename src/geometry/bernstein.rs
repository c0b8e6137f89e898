//! Bernstein basis evaluation for triangular and tensor-product Bezier patches.
//!
//! All evaluation runs in double precision, control points and outputs stay `f32`.

use arrayvec::ArrayVec;
use nalgebra::{Point3, Unit, Vector3};

use super::{ParamPoint, WorldPoint, WorldVector};

/// Highest patch degree supported by the patch types.
pub const MAX_DEGREE: usize = 4;

/// Upper limit on initial guesses of the Newton solver per patch.
pub const MAX_GUESSES: usize = 64;

pub fn factorial(n: usize) -> f64 {
    (1..=n).map(|x| x as f64).product()
}

pub fn binomial(n: usize, k: usize) -> f64 {
    debug_assert!(k <= n);
    factorial(n) / (factorial(k) * factorial(n - k))
}

/// Univariate Bernstein polynomial B(i, n, t).
pub fn bernstein(n: usize, i: usize, t: f64) -> f64 {
    binomial(n, i) * t.powi(i as i32) * (1.0 - t).powi((n - i) as i32)
}

fn multinomial(n: usize, i: usize, j: usize, k: usize) -> f64 {
    debug_assert!(i + j + k == n);
    factorial(n) / (factorial(i) * factorial(j) * factorial(k))
}

pub const fn triangle_point_count(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

pub const fn tetrahedron_point_count(degree: usize) -> usize {
    (degree + 1) * (degree + 2) * (degree + 3) / 6
}

/// Degree of a triangle patch with `point_count` control points.
/// Panics (at compile time when used in a const context) on counts that don't belong to degree 1..=4.
pub const fn triangle_degree(point_count: usize) -> usize {
    let mut degree = 1;
    while degree <= MAX_DEGREE {
        if triangle_point_count(degree) == point_count {
            return degree;
        }
        degree += 1;
    }
    panic!("point count is not a supported triangle patch size");
}

/// Degree of a tetrahedron with `point_count` control points, see `triangle_degree`.
pub const fn tetrahedron_degree(point_count: usize) -> usize {
    let mut degree = 1;
    while degree <= MAX_DEGREE {
        if tetrahedron_point_count(degree) == point_count {
            return degree;
        }
        degree += 1;
    }
    panic!("point count is not a supported tetrahedron size");
}

/// Control point index of the triangle multi-index (i, j, k).
/// `i` is implied by the degree and doesn't participate.
pub const fn triangle_index(j: usize, k: usize) -> usize {
    let d = j + k;
    d * (d + 1) / 2 + k
}

/// Control point index of the tetrahedron multi-index (i, j, k, l).
pub const fn tetrahedron_index(j: usize, k: usize, l: usize) -> usize {
    let d = j + k + l;
    d * (d + 1) * (d + 2) / 6 + triangle_index(k, l)
}

/// All (i, j, k) with i + j + k = degree, in control point index order.
pub fn triangle_multi_indices(degree: usize) -> impl Iterator<Item = [usize; 3]> + Clone {
    (0..=degree).flat_map(move |e| (0..=e).map(move |c| [degree - e, e - c, c]))
}

/// All (i, j, k, l) with i + j + k + l = degree, in control point index order.
pub fn tetrahedron_multi_indices(degree: usize) -> impl Iterator<Item = [usize; 4]> + Clone {
    (0..=degree).flat_map(move |d| {
        triangle_multi_indices(d).map(move |[j, k, l]| [degree - d, j, k, l])
    })
}

/// Position and first derivatives of a surface at one parameter point.
#[derive(Copy, Clone, Debug)]
pub struct SurfaceSample {
    pub point: Point3<f64>,
    pub du: Vector3<f64>,
    pub dv: Vector3<f64>,
}

impl SurfaceSample {
    /// Geometric normal, `None` where the parameterization degenerates.
    pub fn normal(&self) -> Option<Unit<Vector3<f64>>> {
        Unit::try_new(self.du.cross(&self.dv), 1e-12)
    }
}

/// Parameter domain of a surface
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamDomain {
    /// u >= 0, v >= 0, u + v <= 1
    Triangle,
    /// [0, 1] x [0, 1]
    UnitSquare,
}

impl ParamDomain {
    pub fn contains(&self, uv: &ParamPoint, tolerance: f64) -> bool {
        match self {
            ParamDomain::Triangle => {
                uv.x >= -tolerance && uv.y >= -tolerance && uv.x + uv.y <= 1.0 + tolerance
            }
            ParamDomain::UnitSquare => {
                (-tolerance..=1.0 + tolerance).contains(&uv.x)
                    && (-tolerance..=1.0 + tolerance).contains(&uv.y)
            }
        }
    }

    /// Stratified starting points for the Newton solver.
    /// The domain is split into s * s cells (squares or sub-triangles) with s = ceil(sqrt(count))
    /// and the first `count` cell centers are returned. Count is clamped to 1..=MAX_GUESSES.
    pub fn initial_guesses(&self, count: usize) -> ArrayVec<ParamPoint, MAX_GUESSES> {
        let count = count.clamp(1, MAX_GUESSES);
        let side = (count as f64).sqrt().ceil() as usize;
        let scale = 1.0 / side as f64;

        let mut guesses = ArrayVec::new();
        match self {
            ParamDomain::UnitSquare => {
                for a in 0..side {
                    for b in 0..side {
                        guesses.push(ParamPoint::new(
                            (a as f64 + 0.5) * scale,
                            (b as f64 + 0.5) * scale,
                        ));
                    }
                }
            }
            ParamDomain::Triangle => {
                for a in 0..side {
                    for b in 0..(side - a) {
                        guesses.push(ParamPoint::new(
                            (a as f64 + 1.0 / 3.0) * scale,
                            (b as f64 + 1.0 / 3.0) * scale,
                        ));
                        if b + 1 < side - a {
                            guesses.push(ParamPoint::new(
                                (a as f64 + 2.0 / 3.0) * scale,
                                (b as f64 + 2.0 / 3.0) * scale,
                            ));
                        }
                    }
                }
            }
        }
        guesses.truncate(count);
        guesses
    }
}

/// A surface patch that can be evaluated at (u, v) parameters.
pub trait ParametricSurface {
    fn domain(&self) -> ParamDomain;

    /// Position and both partial derivatives, in double precision.
    fn sample(&self, uv: &ParamPoint) -> SurfaceSample;

    fn surface_point(&self, uv: &ParamPoint) -> WorldPoint {
        self.sample(uv).point.cast()
    }

    fn partial_u(&self, uv: &ParamPoint) -> WorldVector {
        self.sample(uv).du.cast()
    }

    fn partial_v(&self, uv: &ParamPoint) -> WorldVector {
        self.sample(uv).dv.cast()
    }
}

fn widen(point: &WorldPoint) -> Vector3<f64> {
    point.coords.cast()
}

/// Sums `term(i, j, k)` weighted by the barycentric Bernstein basis of the given degree.
fn triangle_basis_sum(
    degree: usize,
    uv: &ParamPoint,
    mut term: impl FnMut(usize, usize, usize) -> Vector3<f64>,
) -> Vector3<f64> {
    let w = 1.0 - uv.x - uv.y;
    triangle_multi_indices(degree).fold(Vector3::zeros(), |acc, [i, j, k]| {
        let weight = multinomial(degree, i, j, k)
            * uv.x.powi(i as i32)
            * uv.y.powi(j as i32)
            * w.powi(k as i32);
        acc + term(i, j, k) * weight
    })
}

/// Evaluates a triangular patch of `degree` with barycentric coordinates (u, v, 1 - u - v).
pub fn triangle_sample(points: &[WorldPoint], degree: usize, uv: &ParamPoint) -> SurfaceSample {
    debug_assert!(degree >= 1);
    debug_assert!(points.len() == triangle_point_count(degree));

    let p = |j: usize, k: usize| widen(&points[triangle_index(j, k)]);
    let n = degree as f64;

    let point = triangle_basis_sum(degree, uv, |_, j, k| p(j, k));
    let du = triangle_basis_sum(degree - 1, uv, |_, j, k| p(j, k) - p(j, k + 1)) * n;
    let dv = triangle_basis_sum(degree - 1, uv, |_, j, k| p(j + 1, k) - p(j, k + 1)) * n;

    SurfaceSample {
        point: Point3::from(point),
        du,
        dv,
    }
}

/// Evaluates a tensor product patch with control points indexed `[u][v]`.
pub fn rectangle_sample<const U: usize, const V: usize>(
    points: &[[WorldPoint; V]; U],
    uv: &ParamPoint,
) -> SurfaceSample {
    debug_assert!(U >= 2 && V >= 2);
    let n = U - 1;
    let m = V - 1;

    let mut point = Vector3::zeros();
    let mut du = Vector3::zeros();
    let mut dv = Vector3::zeros();

    for i in 0..=n {
        for j in 0..=m {
            let p = widen(&points[i][j]);
            point += p * (bernstein(n, i, uv.x) * bernstein(m, j, uv.y));
            if i < n {
                let diff = widen(&points[i + 1][j]) - p;
                du += diff * (bernstein(n - 1, i, uv.x) * bernstein(m, j, uv.y));
            }
            if j < m {
                let diff = widen(&points[i][j + 1]) - p;
                dv += diff * (bernstein(n, i, uv.x) * bernstein(m - 1, j, uv.y));
            }
        }
    }

    SurfaceSample {
        point: Point3::from(point),
        du: du * n as f64,
        dv: dv * m as f64,
    }
}
