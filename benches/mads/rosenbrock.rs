use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mads::{Mads, Parameters};

fn rosenbrock(x: &[f64]) -> Vec<f64> {
    vec![(1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)]
}

fn bench_rosenbrock(c: &mut Criterion) {
    let mut group = c.benchmark_group("rosenbrock");
    for threads in [1usize, 4] {
        group.bench_with_input(BenchmarkId::new("nb_threads", threads), &threads, |b, &k| {
            b.iter(|| {
                let params = Parameters::new(2)
                    .lower_bound(&[-1.5, -0.5])
                    .upper_bound(&[1.5, 2.5])
                    .x0(&[0.1, 0.1])
                    .max_bb_eval(200)
                    .nb_threads(k)
                    .check()
                    .unwrap();
                black_box(Mads::new(params, rosenbrock).run().unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rosenbrock);
criterion_main!(benches);
