use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use storm_cv::association::{CostMatrix, greedy_assignment, solve_assignment};

fn scattered_costs(n: usize) -> CostMatrix {
    // deterministic pseudo-random spread without pulling in rand
    CostMatrix::from_fn(n, n, |i, j| ((i * 7919 + j * 104_729) % 997) as f64 / 10.0)
}

fn bench_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("assignment");
    for n in [4usize, 16, 64] {
        let cost = scattered_costs(n);
        group.bench_with_input(BenchmarkId::new("hungarian", n), &cost, |b, cost| {
            b.iter(|| solve_assignment(black_box(cost)))
        });
        group.bench_with_input(BenchmarkId::new("greedy", n), &cost, |b, cost| {
            b.iter(|| greedy_assignment(black_box(cost)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assignment);
criterion_main!(benches);
