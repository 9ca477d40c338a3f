use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use minvar_rs::logging::init_tracing;
use minvar_rs::quant::portfolio::BoundMode;
use minvar_rs::quant::portfolio::CsvSourceConfig;
use minvar_rs::quant::portfolio::PortfolioEngine;
use minvar_rs::quant::portfolio::PortfolioEngineConfig;
use minvar_rs::quant::portfolio::PortfolioReport;
use minvar_rs::quant::portfolio::load_directory;
use prettytable::Table;
use prettytable::row;

const DEFAULT_CAPITAL: f64 = 800_000.0;

/// Minimum-variance allocation for a directory of daily return files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Directory with one `<asset>.csv` file per asset.
  dir: PathBuf,

  /// JSON engine configuration; flags below override it.
  #[arg(long)]
  config: Option<PathBuf>,

  /// Annualized target return (0.10 for 10%).
  #[arg(long)]
  target_return: Option<f64>,

  /// Capital to split across assets [default: config value, else 800000].
  #[arg(long)]
  capital: Option<f64>,

  /// Most recent observations kept per asset.
  #[arg(long)]
  window: Option<usize>,

  #[arg(long)]
  periods_per_year: Option<f64>,

  /// Allow weights in [-1, 1] instead of [0, 1].
  #[arg(long)]
  allow_short: bool,

  #[arg(long, default_value = "w782")]
  date_column: String,

  #[arg(long, default_value = "tor (3)")]
  return_column: String,

  /// Also print this many efficient-frontier points.
  #[arg(long)]
  frontier: Option<usize>,

  #[arg(long, default_value = "info")]
  log_level: String,
}

fn engine_config(cli: &Cli) -> Result<PortfolioEngineConfig> {
  let mut config = match &cli.config {
    Some(path) => PortfolioEngineConfig::from_json_file(path)
      .with_context(|| format!("reading config {}", path.display()))?,
    None => PortfolioEngineConfig::default(),
  };

  if let Some(target) = cli.target_return {
    config.target_return = target;
  }
  if let Some(window) = cli.window {
    config.window = window;
  }
  if let Some(ppy) = cli.periods_per_year {
    config.periods_per_year = ppy;
  }
  if cli.allow_short {
    config.bound_mode = BoundMode::LongShort;
  }
  config.total_capital = cli.capital.or(config.total_capital).or(Some(DEFAULT_CAPITAL));

  Ok(config)
}

fn print_report(report: &PortfolioReport) {
  let mut stats = Table::new();
  stats.set_titles(row!["asset", "annual return", "annual volatility", "observations"]);
  for s in &report.statistics {
    stats.add_row(row![
      s.asset_id,
      format!("{:.2}%", 100.0 * s.annualized_return),
      format!("{:.2}%", 100.0 * s.annualized_volatility),
      s.observations
    ]);
  }
  stats.printstd();

  let mut allocation = Table::new();
  allocation.set_titles(row!["asset", "weight", "amount"]);
  for a in &report.allocations {
    allocation.add_row(row![
      a.asset_id,
      format!("{:.2}%", 100.0 * a.weight),
      a.amount.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
    ]);
  }
  allocation.printstd();

  let result = &report.result;
  println!(
    "expected return {:.2}%  volatility {:.2}%  ({} iterations)",
    100.0 * result.expected_return,
    100.0 * result.volatility,
    result.iterations
  );
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(&cli.log_level);

  let config = engine_config(&cli)?;
  let source = CsvSourceConfig {
    date_column: cli.date_column.clone(),
    return_column: cli.return_column.clone(),
  };

  let series = load_directory(&cli.dir, &source)
    .with_context(|| format!("loading return files from {}", cli.dir.display()))?;
  let engine = PortfolioEngine::new(config);
  let report = engine.run(&series).context("optimizing portfolio")?;
  print_report(&report);

  if let Some(points) = cli.frontier {
    let estimate = engine.estimate(&series)?;
    let mut table = Table::new();
    table.set_titles(row!["target", "volatility", "status"]);
    for (target, result) in engine.frontier(&estimate, points)? {
      match result {
        Ok(r) => table.add_row(row![
          format!("{:.2}%", 100.0 * target),
          format!("{:.2}%", 100.0 * r.volatility),
          "ok"
        ]),
        Err(err) => table.add_row(row![format!("{:.2}%", 100.0 * target), "-", err]),
      };
    }
    table.printstd();
  }

  Ok(())
}
