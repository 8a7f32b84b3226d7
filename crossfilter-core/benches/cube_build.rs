use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossfilter_core::{
    AggregationBackend, ColumnarBackend, ColumnarTable, Dimension, FilterContext, Interval, View,
    ViewId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn create_table(rows: usize) -> ColumnarTable {
    let mut rng = StdRng::seed_from_u64(42);
    let arr: Vec<f64> = (0..rows).map(|_| rng.gen_range(-10.0..100.0)).collect();
    let dist: Vec<f64> = (0..rows).map(|_| rng.gen_range(50.0..2000.0)).collect();
    let dep: Vec<f64> = (0..rows).map(|_| rng.gen_range(-20.0..60.0)).collect();
    ColumnarTable::builder()
        .column("ARR_DELAY", arr)
        .column("DISTANCE", dist)
        .column("DEP_DELAY", dep)
        .build()
        .unwrap()
}

fn bench_cube_build(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let active = Dimension::new("ARR_DELAY", [-10.0, 100.0], 22, None).unwrap();
    let distance = View::Univariate {
        id: ViewId(1),
        title: "Distance".to_string(),
        dimension: Arc::new(Dimension::new("DISTANCE", [50.0, 2000.0], 25, None).unwrap()),
        width: 400,
    };
    let filter = FilterContext::new().with("DEP_DELAY", Interval::new(0.0, 30.0));

    let mut group = c.benchmark_group("cumulative_cube");
    for rows in [10_000usize, 100_000, 1_000_000] {
        let backend = ColumnarBackend::new(create_table(rows));
        group.bench_with_input(BenchmarkId::new("univariate_r500", rows), &rows, |b, _| {
            b.to_async(&runtime).iter(|| async {
                let cube = backend
                    .cumulative_cube(&active, &distance, &filter, 500)
                    .await
                    .unwrap();
                black_box(cube)
            })
        });
    }
    group.finish();
}

fn bench_cube_query(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backend = ColumnarBackend::new(create_table(200_000));
    let active = Dimension::new("ARR_DELAY", [-10.0, 100.0], 22, None).unwrap();
    let distance = View::Univariate {
        id: ViewId(1),
        title: "Distance".to_string(),
        dimension: Arc::new(Dimension::new("DISTANCE", [50.0, 2000.0], 25, None).unwrap()),
        width: 400,
    };
    let cube = runtime
        .block_on(backend.cumulative_cube(&active, &distance, &FilterContext::new(), 500))
        .unwrap();

    c.bench_function("cube_query_snapped_diff", |b| {
        b.iter(|| black_box(cube.query(Some(&Interval::new(10.0, 50.0))).unwrap()))
    });

    let brush = FilterContext::new().with("ARR_DELAY", Interval::new(10.0, 50.0));
    c.bench_function("baseline_histogram_scan", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                backend
                    .histogram(
                        &Dimension::new("DISTANCE", [50.0, 2000.0], 25, None).unwrap(),
                        &brush,
                    )
                    .await
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_cube_build, bench_cube_query);
criterion_main!(benches);
