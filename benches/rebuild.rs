use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use patchtracer::{
    Scene,
    backend::HostBackend,
    geometry::WorldVector,
    scene::{SceneId, SceneSettings},
};

fn loaded_scene(id: SceneId, backend: &mut HostBackend) -> Scene<HostBackend> {
    let mut scene = Scene::new();
    scene.load(id, &SceneSettings::default()).unwrap();
    scene.update(backend).unwrap();
    scene
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    for id in SceneId::ALL {
        let mut backend = HostBackend::new();
        let mut scene = loaded_scene(id, &mut backend);

        group.bench_function(BenchmarkId::new("full", format!("{id:?}")), |b| {
            b.iter(|| scene.recreate_acceleration_structures(&mut backend, true).unwrap())
        });

        let mut direction = 1.0;
        group.bench_function(BenchmarkId::new("refit", format!("{id:?}")), |b| {
            b.iter(|| {
                direction = -direction;
                scene.move_light(&WorldVector::new(0.0, 0.1 * direction, 0.0));
                scene.recreate_acceleration_structures(&mut backend, false).unwrap()
            })
        });

        scene.release(&mut backend);
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
