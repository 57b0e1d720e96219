//! Criterion benchmarks for lattice construction and engine ticks.
//!
//! Run with:
//! ```bash
//! cargo bench -p arnold-core
//! ```

use std::hint::black_box;

use arnold_core::{Coupling, DiffusionEngine, EngineConfig, GridLattice, Rational};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

fn bench_lattice(c: &mut Criterion) {
    let mut group = c.benchmark_group("lattice");
    for &radius in &[4.0f64, 8.0, 12.0] {
        group.bench_with_input(BenchmarkId::new("rational_ball", radius), &radius, |b, &r| {
            b.iter(|| Rational::ball(black_box(r)))
        });
        group.bench_with_input(BenchmarkId::new("grid_ball", radius), &radius, |b, &r| {
            b.iter(|| GridLattice::ball(black_box(r)))
        });
    }
    group.finish();
}

fn bench_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("advance");
    let configs = [
        ("rhythm_r12", EngineConfig::rhythm(12.0)),
        ("pitch_r16", EngineConfig::default_pitch()),
        ("split_independent", EngineConfig::split(5.0, 4.0, Coupling::Independent)),
        ("split_default", EngineConfig::default_split()),
        ("split_simultaneous", EngineConfig::split(5.0, 4.0, Coupling::Simultaneous)),
    ];
    for (name, config) in configs {
        let Ok(mut engine) = DiffusionEngine::new(config) else {
            continue;
        };
        group.bench_function(name, |b| {
            b.iter(|| {
                let _ = engine.add_impulse(0, 0.01);
                engine.advance(black_box(10.0)).map(|m| m.total())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lattice, bench_advance);
criterion_main!(benches);
