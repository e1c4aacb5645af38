//! Criterion benchmarks for one exchange round.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cloop::prelude::*;

fn make_config(population_size: usize, joint_count: usize) -> LoopConfig {
    let mut cfg = LoopConfig::default();
    cfg.brain.population_size = population_size;
    cfg.brain.joint_count = joint_count;
    cfg.plant.links = vec![Default::default(); joint_count];
    cfg.experiment.init_joint_angle_deg = vec![0.0; joint_count];
    cfg.experiment.tgt_joint_angle_deg = vec![90.0; joint_count];
    cfg
}

/// Plant-side step in the movement window, varying population size.
fn bench_synchronizer_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronizer_step");

    for size in [10usize, 50, 200, 1000].iter() {
        let cfg = make_config(*size, 1);
        let map = cfg.channel_map().expect("valid config");
        group.throughput(Throughput::Elements(map.total_channels() as u64));

        group.bench_with_input(BenchmarkId::new("move", size), size, |b, _| {
            let mut plant = cfg.build_plant();
            let mut sync = StepSynchronizer::new(
                map.clone(),
                cfg.timings(),
                cfg.simulation.resolution_ms,
                cfg.brain.sensory,
                cfg.plant.scale_torque,
            );
            let motor = RateFrame::new(1000, map.fan_out(&[encode(0.1, 500.0, 0.0)]));
            // 100 ms is inside the movement window
            b.iter(|| black_box(sync.step(&mut plant, &motor, 100.0, 1000).is_ok()));
        });
    }

    group.finish();
}

/// Neural-side response of the reference controller.
fn bench_controller_respond(c: &mut Criterion) {
    let mut group = c.benchmark_group("controller_respond");

    for joints in [1usize, 2, 4].iter() {
        let cfg = make_config(50, *joints);
        let ctx = cfg.neural_context().expect("valid config");
        let feedback = RateFrame::silent(0, ctx.map.total_channels());

        group.bench_with_input(BenchmarkId::new("joints", joints), joints, |b, _| {
            let mut params = cfg.controller_params();
            params.record_spikes = false;
            let mut controller = RateController::new(params);
            controller.prepare(&ctx).expect("prepare");
            let mut step = 0u64;
            b.iter(|| {
                step += 1;
                black_box(controller.respond(step, 100.0, &feedback).is_ok())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_synchronizer_step, bench_controller_respond);
criterion_main!(benches);
