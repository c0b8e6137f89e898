use image::RgbaImage;
use rand::{SeedableRng, rngs::SmallRng};

use crate::{
    camera::Camera,
    geometry::{ScreenBlock, ScreenPoint},
    renderer::RenderSettings,
    scene::ObjectRegistry,
    screen_block::ScreenBlockExt,
    util::{Rgba, Stats},
};

pub struct Worker {
    rng: SmallRng,
    /// Newton iterations per camera ray
    stats: Stats,
}

impl Worker {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_os_rng(),
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn render_tile(
        &mut self,
        registry: &ObjectRegistry,
        camera: &Camera,
        settings: &RenderSettings,
        tile: &ScreenBlock,
        buffer: &mut RgbaImage,
    ) {
        for point in tile.internal_points() {
            let mut pixel_sum = Rgba::new(0.0, 0.0, 0.0, 0.0);
            for _i in 0..settings.sample_count.get() {
                pixel_sum += self.render_sample(registry, camera, settings, &point);
            }
            let pixel = pixel_sum * (1.0 / settings.sample_count.get() as f32);

            let buffer_position = point - tile.min;
            buffer.put_pixel(buffer_position.x, buffer_position.y, color_to_image(pixel));
        }
    }

    fn render_sample(
        &mut self,
        registry: &ObjectRegistry,
        camera: &Camera,
        settings: &RenderSettings,
        point: &ScreenPoint,
    ) -> Rgba {
        let ray = camera.sample_ray(point, &mut self.rng);
        let trace = registry.trace(&ray, &settings.newton);
        self.stats.add_sample(trace.iterations as usize);

        match trace.hit {
            Some(hit) if Some(hit.handle) == registry.light() => Rgba::new(1.0, 0.9, 0.6, 1.0),
            Some(hit) => {
                let dot = ray.direction.dot(&hit.normal).abs();
                Rgba::new(dot, dot, dot, 1.0)
            }
            None => Rgba::new(0.0, 0.0, 0.0, 0.0),
        }
    }
}

/// Maps a 0-1 f32 rgba pixel to pixel type compatible with module image.
pub fn color_to_image(color: Rgba) -> image::Rgba<u8> {
    image::Rgba([
        (color.r * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.g * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.b * 255.0).round().clamp(0.0, 255.0) as u8,
        (color.a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{ScreenSize, WorldPoint};
    use assert2::assert;
    use nalgebra::Vector2;

    #[test]
    fn fresh_worker_counts_every_sample() {
        let camera = Camera::looking_at(WorldPoint::new(0.0, 0.0, 5.0), WorldPoint::origin(), ScreenSize::new(16, 16));
        let settings = RenderSettings::builder().sample_count(3.try_into().unwrap()).build();
        let tile = ScreenBlock::with_size(ScreenPoint::new(4, 8), &Vector2::new(5, 2));
        let mut buffer = RgbaImage::new(5, 2);

        let mut worker = Worker::new();
        assert!(worker.stats().count == 0);
        worker.render_tile(&ObjectRegistry::new(), &camera, &settings, &tile, &mut buffer);

        assert!(worker.stats().count == 5 * 2 * 3);
        assert!(worker.stats().max == 0);
        assert!(buffer.pixels().all(|pixel| pixel[3] == 0));
    }

    #[test]
    fn color_conversion_clamps() {
        assert!(color_to_image(Rgba::new(0.0, 0.5, 1.0, 1.0)) == image::Rgba([0, 128, 255, 255]));
        assert!(color_to_image(Rgba::new(-1.0, 2.0, 0.25, 0.0)) == image::Rgba([0, 255, 64, 0]));
    }
}
