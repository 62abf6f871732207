//! Performance benchmarks for trail-network-lib
//!
//! Run with: cargo bench

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use trail_network_lib::{Config, PathId, Polyline3, TopologyKind, TrailNetwork};

/// Build a network of `rows` parallel horizontal paths with `verts`
/// vertices each, plus a line topology on every path.
fn generate_network(rows: usize, verts: usize) -> (TrailNetwork, Vec<PathId>) {
    let mut net = TrailNetwork::new(Config::default());
    let mut ids = Vec::with_capacity(rows);
    for r in 0..rows {
        let y = r as f64 * 10.0;
        let points: Vec<(f64, f64)> = (0..verts)
            .map(|i| {
                let x = i as f64;
                (x, y + (x * 0.7).sin() * 0.5)
            })
            .collect();
        let geometry = Polyline3::from_xy(&points).unwrap();
        let id = net.add_path(geometry, None, None).unwrap()[0];
        net.create_line_topology(TopologyKind::Trek, &[(id, 0.1, 0.9)], 0.0)
            .unwrap();
        ids.push(id);
    }
    (net, ids)
}

fn bench_snap(c: &mut Criterion) {
    let mut group = c.benchmark_group("snap");

    let (net, _) = generate_network(500, 50);
    group.throughput(Throughput::Elements(500));
    group.bench_function("500_paths", |b| {
        b.iter(|| net.snap(25.3, 1234.5).unwrap());
    });

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");
    group.sample_size(30);

    let (net, ids) = generate_network(100, 50);
    let target = ids[50];
    group.bench_function("split_100_paths", |b| {
        b.iter_batched(
            || net.clone(),
            |mut net| net.split_path(target, &[0.3, 0.6]).unwrap(),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_add_crossing_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_path");
    group.sample_size(20);

    // A vertical path crossing all 100 horizontal paths
    let (net, _) = generate_network(100, 50);
    let crossing = Polyline3::from_xy(&[(25.0, -5.0), (25.0, 1000.0)]).unwrap();
    group.bench_function("crossing_100_paths", |b| {
        b.iter_batched(
            || (net.clone(), crossing.clone()),
            |(mut net, geometry)| net.add_path(geometry, None, None).unwrap(),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_info(c: &mut Criterion) {
    let mut group = c.benchmark_group("info");

    let (net, _) = generate_network(500, 50);
    group.bench_function("get_info", |b| {
        b.iter(|| net.info());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_snap,
    bench_split,
    bench_add_crossing_path,
    bench_info,
);

criterion_main!(benches);
