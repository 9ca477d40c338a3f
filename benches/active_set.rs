use std::hint::black_box;

use chrono::Duration;
use chrono::NaiveDate;
use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use minvar_rs::quant::portfolio::AssetSeries;
use minvar_rs::quant::portfolio::BoundMode;
use minvar_rs::quant::portfolio::MarketEstimate;
use minvar_rs::quant::portfolio::PortfolioEngine;
use minvar_rs::quant::portfolio::PortfolioEngineConfig;
use minvar_rs::quant::portfolio::achievable_return_range;
use minvar_rs::quant::portfolio::efficient_frontier;
use minvar_rs::quant::portfolio::optimize_min_variance;
use minvar_rs::quant::qp::SolverConfig;

// deterministic pseudo-returns with a shared market factor
fn universe(n_assets: usize, len: usize) -> Vec<AssetSeries> {
  let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
  (0..n_assets)
    .map(|j| {
      let beta = 0.5 + 0.1 * j as f64;
      AssetSeries::from_pairs(
        format!("A{j:03}"),
        (0..len).map(|t| {
          let market = 0.01 * (t as f64 * 0.37).sin();
          let idio = 0.004 * ((t * (j + 3)) as f64 * 0.61).cos();
          (start + Duration::days(t as i64), 0.0002 * (j + 1) as f64 + beta * market + idio)
        }),
      )
    })
    .collect()
}

fn estimate(n_assets: usize) -> (PortfolioEngine, MarketEstimate) {
  let engine = PortfolioEngine::new(PortfolioEngineConfig::default());
  let estimate = engine.estimate(&universe(n_assets, 500)).unwrap();
  (engine, estimate)
}

fn mid_target(engine: &PortfolioEngine, estimate: &MarketEstimate) -> f64 {
  let problem = engine.problem(estimate).unwrap();
  let mu = problem.expected_returns().to_vec();
  let (lo, hi) = achievable_return_range(&mu, BoundMode::LongOnly).unwrap();
  0.5 * (lo + hi)
}

fn bench_solve_by_size(c: &mut Criterion) {
  let mut group = c.benchmark_group("min_variance_by_assets");
  let config = SolverConfig::default();

  for &n in &[5, 20, 50, 100] {
    let (engine, estimate) = estimate(n);
    let problem = engine
      .problem(&estimate)
      .unwrap()
      .with_target(mid_target(&engine, &estimate));

    group.bench_with_input(BenchmarkId::new("active_set", n), &problem, |b, problem| {
      b.iter(|| black_box(optimize_min_variance(problem, &config)))
    });
  }

  group.finish();
}

fn bench_frontier(c: &mut Criterion) {
  let mut group = c.benchmark_group("efficient_frontier");
  let config = SolverConfig::default();
  let (engine, estimate) = estimate(30);
  let problem = engine.problem(&estimate).unwrap();
  let mu = problem.expected_returns().to_vec();
  let (lo, hi) = achievable_return_range(&mu, BoundMode::LongOnly).unwrap();

  for &points in &[10, 50] {
    let targets: Vec<f64> = (0..points)
      .map(|k| lo + (hi - lo) * k as f64 / (points - 1) as f64)
      .collect();
    group.bench_with_input(BenchmarkId::new("par", points), &targets, |b, targets| {
      b.iter(|| black_box(efficient_frontier(&problem, targets, &config)))
    });
  }

  group.finish();
}

criterion_group!(benches, bench_solve_by_size, bench_frontier);
criterion_main!(benches);
