use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use goe_core::LogDensityModel;
use goe_inference::{GoeData, GoeModel, NutsConfig, Posterior, sample_nuts};
use std::hint::black_box;
use std::time::Duration;

fn load_fixture_model() -> GoeModel {
    let json = include_str!("../../../tests/fixtures/goe_data.json");
    let data = GoeData::from_json_str(json).unwrap();
    GoeModel::new(data).unwrap()
}

fn bench_log_density(c: &mut Criterion) {
    let model = GoeModel::new(GoeData::synthetic(2025)).unwrap();
    let posterior = Posterior::new(&model);
    let z = posterior.to_unconstrained(&model.parameter_init());

    let mut group = c.benchmark_group("goe_log_density");
    group.bench_function("logpdf_unconstrained", |b| {
        b.iter(|| black_box(posterior.logpdf_unconstrained(black_box(&z)).unwrap()))
    });
    group.bench_function("grad_unconstrained", |b| {
        b.iter(|| black_box(posterior.grad_unconstrained(black_box(&z)).unwrap()))
    });
    group.finish();
}

fn bench_nuts_sampling(c: &mut Criterion) {
    let synthetic = GoeModel::new(GoeData::synthetic(2025)).unwrap();
    let fixture = load_fixture_model();

    let config = NutsConfig { max_treedepth: 8, target_accept: 0.8, ..Default::default() };

    let mut group = c.benchmark_group("nuts_sample");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for (w, s) in [(50usize, 50usize), (100, 100)] {
        group.bench_with_input(BenchmarkId::new("goe_synthetic", format!("w{}_s{}", w, s)), &(w, s), |b, &(w, s)| {
            b.iter(|| {
                let chain = sample_nuts(black_box(&synthetic), w, s, 42, config.clone()).unwrap();
                black_box(chain.draws_constrained.len())
            })
        });
    }

    group.bench_with_input(BenchmarkId::new("goe_fixture", "w50_s50"), &(50usize, 50usize), |b, &(w, s)| {
        b.iter(|| {
            let chain = sample_nuts(black_box(&fixture), w, s, 42, config.clone()).unwrap();
            black_box(chain.draws_constrained.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_log_density, bench_nuts_sampling);
criterion_main!(benches);
