use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use indicatif::ProgressBar;
use patchtracer::{
    Camera, RenderSettings, Scene,
    backend::HostBackend,
    geometry::{NewtonSettings, ScreenSize, WorldPoint, WorldVector},
    render,
    scene::{ObjectKind, RebuildReport, SceneId, SceneSettings},
};

/// Builds one of the procedural scenes and renders a debug image of it.
#[derive(Parser)]
#[command(name = "patchtracer", about, long_about = None)]
struct Cli {
    /// Scene to load (1: single tetrahedron, 2: glued tetrahedra, 3: patch grid, 4: slicing planes)
    #[arg(short, long, default_value_t = 1)]
    scene: u32,

    /// Degree of the tetrahedron in scene 1
    #[arg(short, long, default_value_t = 2)]
    degree: usize,

    /// Move the light by this offset after the first build and refit
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    move_light: Option<Vec<f32>>,

    /// Output image width and height
    #[arg(long, num_args = 2, value_names = ["W", "H"], default_values_t = [640, 480])]
    resolution: Vec<u32>,

    #[arg(long, default_value_t = 4)]
    samples: u32,

    /// Where to save the debug image
    #[arg(short, long, default_value = "patchtracer.png")]
    output: PathBuf,

    /// More logging, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let scene_id = SceneId::try_from(cli.scene)?;
    let settings = SceneSettings::builder().degree(cli.degree).build();

    let mut backend = HostBackend::new();
    let mut scene = Scene::new();
    scene.load(scene_id, &settings)?;
    let report = scene
        .update(&mut backend)?
        .context("Loading a scene should request a rebuild")?;
    print_report(&report);

    if let Some(offset) = &cli.move_light {
        let offset = WorldVector::new(offset[0], offset[1], offset[2]);
        if !scene.move_light(&offset) {
            anyhow::bail!("Scene {scene_id:?} has no light");
        }
        if let Some(report) = scene.update(&mut backend)? {
            print_report(&report);
        }
    }

    print_statistics(&scene, &backend);

    let resolution = ScreenSize::new(cli.resolution[0], cli.resolution[1]);
    let camera = Camera::looking_at(WorldPoint::new(3.0, 2.5, 4.5), WorldPoint::origin(), resolution);
    let render_settings = RenderSettings::builder()
        .sample_count(cli.samples.try_into().context("At least one sample per pixel is needed")?)
        .newton(NewtonSettings::default())
        .build();

    let bar = ProgressBar::no_length();
    let mut render_progress = render(
        Arc::new(scene.registry().clone()),
        camera,
        render_settings,
        |_| {},
        {
            let bar = bar.clone();
            move |_, progress| {
                bar.update(|ps| {
                    ps.set_len(progress.total as u64);
                    ps.set_pos(progress.finished as u64)
                })
            }
        },
    )?;
    bar.set_length(render_progress.progress().total as u64);
    render_progress.wait()?;
    bar.finish_and_clear();

    println!("Newton iterations per ray: {}", render_progress.iteration_stats());

    render_progress
        .image()
        .lock()
        .map_err(|_| anyhow::anyhow!("Render worker panicked"))?
        .save(&cli.output)
        .with_context(|| format!("Saving {}", cli.output.display()))?;
    println!("Saved {}", cli.output.display());

    scene.release(&mut backend);
    Ok(())
}

fn print_report(report: &RebuildReport) {
    println!(
        "{:?} rebuild{} of generation {}: {} objects in {:.2?}",
        report.kind,
        if report.escalated { " (escalated from refit)" } else { "" },
        report.generation,
        report.object_count,
        report.elapsed
    );
}

fn print_statistics(scene: &Scene<HostBackend>, backend: &HostBackend) {
    let registry = scene.registry();
    println!("Objects: {} ({} ray traceable)", registry.len(), registry.traceable_count());
    for kind in ObjectKind::ALL {
        let count = registry.count(*kind);
        if count > 0 {
            println!("  {kind:?}: {count}");
        }
    }
    println!(
        "Device: {} buffers, {} structures, {} builds, {} updates",
        backend.live_buffer_count(),
        backend.live_structure_count(),
        backend.build_count(),
        backend.update_count()
    );
}
