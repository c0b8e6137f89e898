//! Newton iteration for ray / parametric patch intersections.
//!
//! The ray is represented as the intersection of two planes that contain it.
//! A surface point S(u, v) lies on the ray exactly when its signed distance to both
//! planes is zero, which gives a 2x2 root finding problem in (u, v).

use bon::bon;
use nalgebra::{Matrix2, Point3, Unit, Vector2, Vector3};
use ordered_float::OrderedFloat;

use super::{
    FloatType, ParamPoint, ParametricSurface, Ray, SurfaceSample, WorldPoint, WorldVector,
};

/// Iteration count can never go above this, regardless of settings.
pub const MAX_ITERATIONS_CAP: u32 = 30;

/// Jacobians with smaller determinant are treated as singular.
pub const SINGULAR_DETERMINANT: f64 = 1e-5;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NewtonSettings {
    pub max_iterations: u32,
    /// Convergence threshold for the distance to each of the two ray planes.
    pub tolerance: [f64; 2],
    /// Number of starting points spread over the parameter domain.
    pub initial_guess_count: usize,
    /// How far outside the parameter domain a root may be and still count as a hit.
    pub domain_tolerance: f64,
}

#[bon]
impl NewtonSettings {
    #[builder]
    pub fn new(
        #[builder(default = 20)] max_iterations: u32,
        #[builder(default = [1e-6; 2])] tolerance: [f64; 2],
        #[builder(default = 4)] initial_guess_count: usize,
        #[builder(default = 1e-6)] domain_tolerance: f64,
    ) -> Self {
        NewtonSettings {
            max_iterations: max_iterations.min(MAX_ITERATIONS_CAP),
            tolerance,
            initial_guess_count,
            domain_tolerance,
        }
    }
}

impl Default for NewtonSettings {
    fn default() -> Self {
        NewtonSettings::builder().build()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PatchHit {
    pub uv: ParamPoint,
    pub t: FloatType,
    pub point: WorldPoint,
    pub normal: Unit<WorldVector>,
    /// Newton steps taken by the converging guess
    pub iterations: u32,
}

/// Result of a single Newton run from one starting point.
#[derive(Copy, Clone, Debug)]
pub enum NewtonOutcome {
    Hit(PatchHit),
    /// Converged, but outside the parameter domain or behind the ray origin.
    OutsideDomain { uv: ParamPoint },
    /// Residual grew between two iterations.
    Diverged,
    /// Ran out of iterations.
    Exhausted,
    Singular,
}

impl NewtonOutcome {
    pub fn hit(&self) -> Option<&PatchHit> {
        match self {
            NewtonOutcome::Hit(hit) => Some(hit),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct NewtonRun {
    pub outcome: NewtonOutcome,
    pub iterations: u32,
}

/// Two planes whose intersection is the ray line.
#[derive(Copy, Clone, Debug)]
pub struct RayPlanes {
    n1: Vector3<f64>,
    n2: Vector3<f64>,
    d1: f64,
    d2: f64,
    origin: Point3<f64>,
    direction: Vector3<f64>,
}

impl RayPlanes {
    pub fn new(ray: &Ray) -> Self {
        let origin: Point3<f64> = ray.origin.cast();
        let direction: Vector3<f64> = ray.direction.into_inner().cast::<f64>().normalize();

        let n1 = if direction.x.abs() > direction.y.abs() && direction.x.abs() > direction.z.abs()
        {
            Vector3::new(direction.y, -direction.x, 0.0)
        } else {
            Vector3::new(0.0, direction.z, -direction.y)
        }
        .normalize();
        let n2 = n1.cross(&direction);

        RayPlanes {
            n1,
            n2,
            d1: -n1.dot(&origin.coords),
            d2: -n2.dot(&origin.coords),
            origin,
            direction,
        }
    }

    /// Signed distances of `point` to the two planes.
    pub fn residual(&self, point: &Point3<f64>) -> Vector2<f64> {
        Vector2::new(
            self.n1.dot(&point.coords) + self.d1,
            self.n2.dot(&point.coords) + self.d2,
        )
    }

    pub fn jacobian(&self, sample: &SurfaceSample) -> Matrix2<f64> {
        Matrix2::new(
            self.n1.dot(&sample.du),
            self.n1.dot(&sample.dv),
            self.n2.dot(&sample.du),
            self.n2.dot(&sample.dv),
        )
    }

    /// Distance along the ray to the projection of `point`.
    pub fn distance(&self, point: &Point3<f64>) -> f64 {
        (point - self.origin).dot(&self.direction)
    }
}

/// Runs Newton iteration from a single starting point.
pub fn solve<S: ParametricSurface + ?Sized>(
    surface: &S,
    planes: &RayPlanes,
    initial: ParamPoint,
    settings: &NewtonSettings,
) -> NewtonRun {
    let max_iterations = settings.max_iterations.min(MAX_ITERATIONS_CAP);
    let mut uv = initial;
    let mut previous_norm = f64::INFINITY;

    for iteration in 0..max_iterations {
        let sample = surface.sample(&uv);
        let f = planes.residual(&sample.point);

        if f.x.abs() < settings.tolerance[0] && f.y.abs() < settings.tolerance[1] {
            return NewtonRun {
                outcome: converged(surface, planes, uv, &sample, iteration, settings),
                iterations: iteration,
            };
        }

        let norm = f.norm();
        if norm > previous_norm {
            return NewtonRun {
                outcome: NewtonOutcome::Diverged,
                iterations: iteration,
            };
        }
        previous_norm = norm;

        let j = planes.jacobian(&sample);
        let det = j.determinant();
        if det.abs() < SINGULAR_DETERMINANT {
            return NewtonRun {
                outcome: NewtonOutcome::Singular,
                iterations: iteration,
            };
        }

        // Explicit 2x2 inverse, the determinant is already known to be non-zero
        let inverse = Matrix2::new(j.m22, -j.m12, -j.m21, j.m11) / det;
        uv -= inverse * f;
    }

    NewtonRun {
        outcome: NewtonOutcome::Exhausted,
        iterations: max_iterations,
    }
}

fn converged<S: ParametricSurface + ?Sized>(
    surface: &S,
    planes: &RayPlanes,
    uv: ParamPoint,
    sample: &SurfaceSample,
    iterations: u32,
    settings: &NewtonSettings,
) -> NewtonOutcome {
    let t = planes.distance(&sample.point);
    if t <= 0.0 || !surface.domain().contains(&uv, settings.domain_tolerance) {
        return NewtonOutcome::OutsideDomain { uv };
    }

    let normal = sample
        .normal()
        .map(|n| Unit::new_unchecked(n.into_inner().cast::<FloatType>()))
        .unwrap_or_else(|| Unit::new_unchecked((-planes.direction).cast::<FloatType>()));

    NewtonOutcome::Hit(PatchHit {
        uv,
        t: t as FloatType,
        point: sample.point.cast(),
        normal,
        iterations,
    })
}

/// Closest hit over all starting points, together with the total Newton work spent.
#[derive(Copy, Clone, Debug)]
pub struct Trace {
    pub hit: Option<PatchHit>,
    pub iterations: u32,
}

pub fn trace<S: ParametricSurface + ?Sized>(
    surface: &S,
    ray: &Ray,
    settings: &NewtonSettings,
) -> Trace {
    let planes = RayPlanes::new(ray);
    let mut iterations = 0;

    let hit = surface
        .domain()
        .initial_guesses(settings.initial_guess_count)
        .into_iter()
        .filter_map(|guess| {
            let run = solve(surface, &planes, guess, settings);
            iterations += run.iterations;
            run.outcome.hit().copied()
        })
        .min_by_key(|hit| OrderedFloat(hit.t));

    Trace { hit, iterations }
}

/// Closest intersection of the ray with the patch.
pub fn intersect<S: ParametricSurface + ?Sized>(
    surface: &S,
    ray: &Ray,
    settings: &NewtonSettings,
) -> Option<PatchHit> {
    trace(surface, ray, settings).hit
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::test::interior_parameter;
    use crate::geometry::{BezierTriangle2, BicubicPatch};

    use assert2::{assert, let_assert};
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn heights(count: usize) -> BoxedStrategy<Vec<f32>> {
        proptest::collection::vec((-200i32..=200).prop_map(|h| h as f32 * 1e-3), count).boxed()
    }

    fn height_field(heights: &[f32]) -> BicubicPatch {
        BicubicPatch::from_fn(|i, j| {
            WorldPoint::new(i as f32 / 3.0, j as f32 / 3.0, heights[4 * i + j])
        })
    }

    fn flat_square() -> BicubicPatch {
        height_field(&[0.0; 16])
    }

    fn test_settings() -> NewtonSettings {
        NewtonSettings::builder().initial_guess_count(16).build()
    }

    /// Ray aimed at the given surface point from a few units away.
    fn ray_towards(target: &WorldPoint) -> Ray {
        let direction = WorldVector::new(0.1, -0.2, -1.0);
        Ray::new(target - direction.normalize() * 5.0, direction)
    }

    #[proptest]
    fn bicubic_roundtrip(
        #[strategy(heights(16))] heights: Vec<f32>,
        #[strategy(interior_parameter())] u: f64,
        #[strategy(interior_parameter())] v: f64,
    ) {
        let patch = height_field(&heights);
        let seed = ParamPoint::new(u, v);
        let target = patch.surface_point(&seed);

        let ray = ray_towards(&target);
        let_assert!(Some(hit) = intersect(&patch, &ray, &test_settings()));

        assert!((hit.uv - seed).norm() < 1e-4, "{:?} vs {seed:?}", hit.uv);
        assert!((hit.point - target).norm() < 1e-3);
        assert!((hit.t - 5.0).abs() < 1e-3);
        assert!(hit.iterations <= MAX_ITERATIONS_CAP);
    }

    #[proptest]
    fn triangle_roundtrip(
        #[strategy(heights(6))] heights: Vec<f32>,
        #[strategy(interior_parameter())] a: f64,
        #[strategy(interior_parameter())] b: f64,
    ) {
        let flat = BezierTriangle2::flat([
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
            WorldPoint::new(0.0, 0.0, 0.0),
        ]);
        let mut patch = flat;
        for (point, height) in patch.control_points.iter_mut().zip(&heights) {
            point.z = *height;
        }

        let seed = ParamPoint::new(a * 0.5, b * 0.5);
        let target = patch.surface_point(&seed);

        let ray = ray_towards(&target);
        let_assert!(Some(hit) = intersect(&patch, &ray, &test_settings()));

        assert!((hit.uv - seed).norm() < 1e-4, "{:?} vs {seed:?}", hit.uv);
        assert!((hit.point - target).norm() < 1e-3);
    }

    #[test]
    fn parallel_ray_is_singular() {
        let patch = flat_square();
        let ray = Ray::new(WorldPoint::new(-1.0, 0.5, 1.0), WorldVector::new(1.0, 0.0, 0.0));
        let planes = RayPlanes::new(&ray);

        let run = solve(&patch, &planes, ParamPoint::new(0.5, 0.5), &NewtonSettings::default());
        let_assert!(NewtonOutcome::Singular = run.outcome);
        assert!(intersect(&patch, &ray, &test_settings()).is_none());
    }

    #[test]
    fn ray_beside_patch_misses() {
        let patch = flat_square();
        let ray = Ray::new(WorldPoint::new(5.0, 5.0, 1.0), WorldVector::new(0.0, 0.0, -1.0));
        let planes = RayPlanes::new(&ray);

        let run = solve(&patch, &planes, ParamPoint::new(0.5, 0.5), &NewtonSettings::default());
        let_assert!(NewtonOutcome::OutsideDomain { uv } = run.outcome);
        assert!((uv - ParamPoint::new(5.0, 5.0)).norm() < 1e-5);
        assert!(intersect(&patch, &ray, &test_settings()).is_none());
    }

    #[test]
    fn patch_behind_origin_misses() {
        let patch = flat_square();
        let ray = Ray::new(WorldPoint::new(0.5, 0.5, 1.0), WorldVector::new(0.0, 0.0, 1.0));
        assert!(intersect(&patch, &ray, &test_settings()).is_none());
    }

    #[test]
    fn flat_hit_converges_fast() {
        let patch = flat_square();
        let ray = Ray::new(WorldPoint::new(0.25, 0.5, 2.0), WorldVector::new(0.0, 0.0, -1.0));

        let result = trace(&patch, &ray, &NewtonSettings::default());
        let_assert!(Some(hit) = result.hit);
        assert!((hit.uv - ParamPoint::new(0.25, 0.5)).norm() < 1e-5);
        assert!((hit.t - 2.0).abs() < 1e-6);
        assert!(hit.normal.z.abs() > 0.999);
        assert!(hit.iterations <= 1);
        assert!(result.iterations >= hit.iterations);
    }

    #[test]
    fn zero_iterations_exhaust() {
        let patch = flat_square();
        let ray = Ray::new(WorldPoint::new(0.25, 0.5, 2.0), WorldVector::new(0.0, 0.0, -1.0));
        let settings = NewtonSettings::builder().max_iterations(0).build();

        let run = solve(&patch, &RayPlanes::new(&ray), ParamPoint::new(0.5, 0.5), &settings);
        let_assert!(NewtonOutcome::Exhausted = run.outcome);
    }

    #[test]
    fn iteration_count_is_capped() {
        let settings = NewtonSettings::builder().max_iterations(100).build();
        assert!(settings.max_iterations == MAX_ITERATIONS_CAP);
        assert!(NewtonSettings::default().max_iterations == 20);
        assert!(NewtonSettings::default().initial_guess_count == 4);
    }
}
