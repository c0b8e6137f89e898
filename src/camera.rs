use assert2::assert;
use bon::bon;
use nalgebra::{Unit, Vector2};
use rand_distr::Distribution as _;

use crate::geometry::{EPSILON, FloatType, Ray, ScreenPoint, ScreenSize, WorldPoint, WorldVector};

/// Thin lens camera. Pixel (0, 0) is the top left corner of the image.
#[derive(Copy, Clone, Debug)]
pub struct Camera {
    center: WorldPoint,
    resolution: ScreenSize,

    /// Unit vectors of the film plane, scaled to one pixel.
    pixel_right: WorldVector,
    pixel_down: WorldVector,
    /// From the lens center to the middle of the top left pixel, behind the lens.
    film_corner: WorldVector,

    lens_right: WorldVector,
    lens_up: WorldVector,
    lens_weight: FloatType,
}

#[bon]
impl Camera {
    /// Panics on a degenerate orientation or a non-positive optical parameter.
    #[builder]
    pub fn new(
        center: WorldPoint,
        forward: WorldVector,
        up: WorldVector,
        resolution: ScreenSize,
        /// Meters
        film_width: FloatType,
        /// Meters
        focal_length: FloatType,
        /// Infinity gives a pinhole.
        f_number: FloatType,
        focus_distance: FloatType,
    ) -> Self {
        assert!(resolution.x > 0 && resolution.y > 0);
        assert!(film_width > 0.0);
        assert!(focal_length > 0.0);
        assert!(f_number > 0.0);
        assert!(focus_distance > 0.0);

        let forward = Unit::try_new(forward, EPSILON);
        let right = forward.and_then(|forward| Unit::try_new(forward.cross(&up), EPSILON));
        let (Some(forward), Some(right)) = (forward, right) else {
            panic!("`forward` and `up` must be non-zero and not parallel");
        };
        let up = right.cross(&forward);

        let pixel_pitch = film_width / resolution.x as FloatType;
        let half_film = (resolution - ScreenSize::repeat(1)).cast::<FloatType>() * (pixel_pitch / 2.0);
        let lens_radius = focal_length / (2.0 * f_number);

        Camera {
            center,
            resolution,
            // The image is flipped behind the lens
            pixel_right: -right.into_inner() * pixel_pitch,
            pixel_down: up * pixel_pitch,
            film_corner: -forward.into_inner() * focal_length + right.into_inner() * half_film.x
                - up * half_film.y,
            lens_right: right.into_inner() * lens_radius,
            lens_up: up * lens_radius,
            lens_weight: focal_length / focus_distance,
        }
    }
}

impl Camera {
    /// Pinhole camera at `center` aimed at `target`, with +y up and a 40 degree
    /// horizontal field of view.
    ///
    /// Panics if `center` and `target` coincide.
    pub fn looking_at(center: WorldPoint, target: WorldPoint, resolution: ScreenSize) -> Self {
        let forward = target - center;
        // Looking straight up or down, pick any other up vector
        let up = if forward.cross(&WorldVector::y()).norm() > EPSILON * forward.norm() {
            WorldVector::y()
        } else {
            WorldVector::z()
        };
        Camera::builder()
            .center(center)
            .forward(forward)
            .up(up)
            .resolution(resolution)
            .film_width(36e-3)
            .focal_length(49.5e-3)
            .f_number(FloatType::INFINITY)
            .focus_distance(forward.norm().max(EPSILON))
            .build()
    }

    pub fn resolution(&self) -> ScreenSize {
        self.resolution
    }

    /// Ray through a random point of the pixel and a random point of the lens.
    pub fn sample_ray(&self, point: &ScreenPoint, rng: &mut impl rand::Rng) -> Ray {
        let jitter = Vector2::new(rng.random_range(-0.5..=0.5), rng.random_range(-0.5..=0.5));
        let lens: [FloatType; 2] = rand_distr::UnitDisc.sample(rng);
        self.ray_through(point, jitter, lens)
    }

    /// `jitter` is the offset from the pixel center in pixels, `lens` a point of the
    /// unit disc.
    fn ray_through(&self, point: &ScreenPoint, jitter: Vector2<FloatType>, lens: [FloatType; 2]) -> Ray {
        let film = point.coords.cast::<FloatType>() + jitter;
        let film_point = self.film_corner + self.pixel_right * film.x + self.pixel_down * film.y;
        let lens_point = self.lens_right * lens[0] + self.lens_up * lens[1];

        // All rays from one film point meet again on the focus plane
        Ray::new(self.center + lens_point, -lens_point * self.lens_weight - film_point)
    }
}
