use std::{
    ops::Deref as _,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use image::{GenericImage, GenericImageView, RgbaImage};

use crate::{
    camera::Camera,
    geometry::ScreenBlock,
    renderer::{RenderSettings, worker::Worker},
    scene::ObjectRegistry,
    screen_block::ScreenBlockExt,
    util::Stats,
};

/// Starts rendering on one thread per CPU and returns immediately.
///
/// Callbacks get every tile when a worker starts it and when its pixels are in the image.
pub fn render<F1, F2>(
    registry: Arc<ObjectRegistry>,
    camera: Camera,
    settings: RenderSettings,
    started_tile_callback: F1,
    finished_tile_callback: F2,
) -> anyhow::Result<RenderProgress>
where
    F1: Fn(&ScreenBlock) + Send + Sync + 'static,
    F2: Fn(&ScreenBlock, TileProgress) + Send + Sync + 'static,
{
    let resolution = camera.resolution();
    let state = Arc::new(RenderState {
        registry,
        camera,
        settings,

        image: Mutex::new(RgbaImage::new(resolution.x, resolution.y)),
        iterations: Mutex::new(Stats::default()),

        tile_ordering: ScreenBlock::from_size(resolution).tile_ordering(settings.tile_size),
        next_tile_index: AtomicUsize::new(0),
        finished_tiles: AtomicUsize::new(0),
    });
    let started_tile_callback = Arc::new(started_tile_callback);
    let finished_tile_callback = Arc::new(finished_tile_callback);

    let thread_count = num_cpus::get().clamp(1, state.tile_ordering.len().max(1));
    log::debug!(
        "Rendering {}x{} in {} tiles on {thread_count} threads",
        resolution.x,
        resolution.y,
        state.tile_ordering.len()
    );

    let threads = (0..thread_count)
        .map(|worker_id| {
            let state = Arc::clone(&state);
            let started_tile_callback = Arc::clone(&started_tile_callback);
            let finished_tile_callback = Arc::clone(&finished_tile_callback);

            thread::Builder::new()
                .name(format!("worker{worker_id}"))
                .spawn(move || {
                    let mut worker = Worker::new();
                    let tile_size = settings.tile_size.get();
                    let mut buffer = RgbaImage::new(tile_size, tile_size);

                    while let Some(tile) = state.get_next_tile() {
                        (started_tile_callback)(tile);

                        worker.render_tile(&state.registry, &state.camera, &state.settings, tile, &mut buffer);
                        state.store_tile(tile, &buffer);

                        let finished = state.finished_tiles.fetch_add(1, Ordering::AcqRel) + 1;
                        (finished_tile_callback)(
                            tile,
                            TileProgress {
                                finished,
                                total: state.tile_ordering.len(),
                            },
                        );
                    }

                    state.merge_stats(worker.stats());
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RenderProgress {
        render_state: state,
        threads,
    })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileProgress {
    pub finished: usize,
    pub total: usize,
}

pub struct RenderProgress {
    render_state: Arc<RenderState>,
    threads: Vec<JoinHandle<()>>,
}

impl RenderProgress {
    /// Number of finished and total tiles.
    pub fn progress(&self) -> TileProgress {
        TileProgress {
            finished: self.render_state.finished_tiles.load(Ordering::Acquire),
            total: self.render_state.tile_ordering.len(),
        }
    }

    pub fn progress_percent(&self) -> f32 {
        let progress = self.progress();
        if progress.total == 0 {
            100.0
        } else {
            100.0 * (progress.finished as f32) / (progress.total as f32)
        }
    }

    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|handle| handle.is_finished())
    }

    /// Signal the workers to abort.
    /// Any running workers will still finish their tiles, but no new ones will be started.
    pub fn abort(&self) {
        self.render_state
            .next_tile_index
            .store(self.render_state.tile_ordering.len(), Ordering::Release);
    }

    /// Blocks until all workers are done.
    pub fn wait(&mut self) -> anyhow::Result<()> {
        for handle in self.threads.drain(..) {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("Render worker panicked"))?;
        }
        Ok(())
    }

    pub fn image(&self) -> &Mutex<RgbaImage> {
        &self.render_state.image
    }

    /// Newton iterations per camera ray, over all finished workers.
    pub fn iteration_stats(&self) -> Stats {
        self.render_state
            .iterations
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

struct RenderState {
    registry: Arc<ObjectRegistry>,
    camera: Camera,
    settings: RenderSettings,

    image: Mutex<RgbaImage>,
    iterations: Mutex<Stats>,

    tile_ordering: Vec<ScreenBlock>,
    next_tile_index: AtomicUsize,
    finished_tiles: AtomicUsize,
}

impl RenderState {
    fn get_next_tile(&self) -> Option<&ScreenBlock> {
        let id = self.next_tile_index.fetch_add(1, Ordering::AcqRel);
        self.tile_ordering.get(id)
    }

    fn store_tile(&self, tile: &ScreenBlock, buffer: &RgbaImage) {
        // A poisoned lock means another worker panicked, its join reports that
        if let Ok(mut image) = self.image.lock() {
            image
                .copy_from(
                    buffer.view(0, 0, tile.width(), tile.height()).deref(),
                    tile.min.x,
                    tile.min.y,
                )
                .unwrap_or_else(|_| unreachable!("The buffer should always fit into the output"));
        }
    }

    fn merge_stats(&self, stats: &Stats) {
        if let Ok(mut iterations) = self.iterations.lock() {
            *iterations = iterations.merge(stats);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{ScreenSize, Sphere, WorldPoint, WorldTransform, WorldVector};
    use assert2::assert;

    fn camera(resolution: ScreenSize) -> Camera {
        Camera::builder()
            .center(WorldPoint::new(0.0, 0.0, 5.0))
            .forward(WorldVector::new(0.0, 0.0, -1.0))
            .up(WorldVector::new(0.0, 1.0, 0.0))
            .resolution(resolution)
            .film_width(36e-3)
            .focal_length(50e-3)
            .f_number(f32::INFINITY)
            .focus_distance(5.0)
            .build()
    }

    #[test]
    fn renders_sphere_in_the_middle() {
        let mut registry = ObjectRegistry::new();
        registry.add_object(Sphere::new(WorldPoint::origin(), 1.0), WorldTransform::identity()).unwrap();
        let settings = RenderSettings::builder().tile_size(8.try_into().unwrap()).build();

        let mut progress = render(
            Arc::new(registry),
            camera(ScreenSize::new(40, 30)),
            settings,
            |_| {},
            |_, _| {},
        )
        .unwrap();
        progress.wait().unwrap();

        assert!(progress.is_finished());
        assert!(progress.progress() == TileProgress { finished: 20, total: 20 });
        assert!(progress.progress_percent() == 100.0);

        let image = progress.image().lock().unwrap();
        let center = image.get_pixel(20, 15);
        let corner = image.get_pixel(0, 0);
        assert!(center[3] == 255);
        assert!(center[0] > 200);
        assert!(corner[3] == 0);

        let stats = progress.iteration_stats();
        assert!(stats.count == 40 * 30);
        assert!(stats.max == 0);
    }

    #[test]
    fn abort_stops_handing_out_tiles() {
        let mut progress = render(
            Arc::new(ObjectRegistry::new()),
            camera(ScreenSize::new(128, 128)),
            RenderSettings::builder().tile_size(1.try_into().unwrap()).build(),
            |_| thread::sleep(std::time::Duration::from_millis(1)),
            |_, _| {},
        )
        .unwrap();
        progress.abort();
        progress.wait().unwrap();
        assert!(progress.progress().finished < 128 * 128);
    }
}
