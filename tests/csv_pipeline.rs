use std::fs;
use std::path::Path;

use approx::assert_abs_diff_eq;
use chrono::Duration;
use chrono::NaiveDate;
use minvar_rs::PortfolioError;
use minvar_rs::quant::portfolio::CsvSourceConfig;
use minvar_rs::quant::portfolio::PortfolioEngine;
use minvar_rs::quant::portfolio::PortfolioEngineConfig;
use minvar_rs::quant::portfolio::load_directory;
use tempfile::tempdir;

fn write_asset(dir: &Path, id: &str, rows: usize, drift: f64, swing: f64, phase: f64) {
  let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
  let mut body = String::from("w782,close,tor (3)\n");
  // newest first, the way exported quote files are usually ordered
  for t in (0..rows).rev() {
    let date = start + Duration::days(t as i64);
    let pct = 100.0 * (drift + swing * (t as f64 * 0.9 + phase).sin());
    body.push_str(&format!("{date},100.0,{pct:.4}%\n"));
  }
  fs::write(dir.join(format!("{id}.csv")), body).unwrap();
}

#[test]
fn directory_to_allocation() {
  let dir = tempdir().unwrap();
  write_asset(dir.path(), "BOND", 600, 0.0002, 0.001, 0.0);
  write_asset(dir.path(), "EQUITY", 600, 0.0008, 0.012, 1.3);
  write_asset(dir.path(), "GOLD", 550, 0.0004, 0.008, 2.1);
  fs::write(dir.path().join("README.md"), "ignored").unwrap();

  let series = load_directory(dir.path(), &CsvSourceConfig::default()).unwrap();
  assert_eq!(series.len(), 3);

  let engine = PortfolioEngine::new(PortfolioEngineConfig {
    target_return: 0.10,
    total_capital: Some(800_000.0),
    ..Default::default()
  });
  let report = engine.run(&series).unwrap();

  // window 500 caps every asset, including the shorter GOLD history
  assert!(report.statistics.iter().all(|s| s.observations == 500));
  assert_eq!(report.covariance.asset_ids(), ["BOND", "EQUITY", "GOLD"]);

  let result = &report.result;
  assert_abs_diff_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-7);
  assert_abs_diff_eq!(result.expected_return, 0.10, epsilon = 1e-7);
  assert!(result.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));

  let total: f64 = report.allocations.iter().map(|a| a.amount.unwrap()).sum();
  assert_abs_diff_eq!(total, 800_000.0, epsilon = 1e-2);
}

#[test]
fn short_history_is_reported_per_asset() {
  let dir = tempdir().unwrap();
  write_asset(dir.path(), "A", 30, 0.001, 0.01, 0.0);
  write_asset(dir.path(), "B", 1, 0.001, 0.01, 0.5);

  let series = load_directory(dir.path(), &CsvSourceConfig::default()).unwrap();
  let err = PortfolioEngine::default().run(&series).unwrap_err();

  match err {
    PortfolioError::InsufficientData {
      subject, available, ..
    } => {
      assert_eq!(subject, "asset B");
      assert_eq!(available, 1);
    }
    other => panic!("unexpected error {other:?}"),
  }
}
