//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{MinVar}\big(\hat{\boldsymbol\mu}, \hat\Sigma, r^\*\big),\qquad
//! (\hat{\boldsymbol\mu}, \hat\Sigma) = \operatorname{Estimate}\big(\operatorname{Align}(R, N)\big)
//! $$
//!
//! End-to-end pipeline: align the return series, estimate statistics and
//! covariance, then solve the minimum-variance problem for the configured
//! target.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use super::data::MIN_OBSERVATIONS;
use super::data::align_series;
use super::optimizers::build_problem;
use super::optimizers::efficient_frontier;
use super::optimizers::frontier_targets;
use super::optimizers::optimize_min_variance;
use super::stats::covariance_matrix;
use super::stats::estimate_statistics;
use super::types::AlignedPanel;
use super::types::AssetSeries;
use super::types::AssetStatistics;
use super::types::BoundMode;
use super::types::CovarianceMatrix;
use super::types::OptimizationProblem;
use super::types::OptimizationResult;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::qp::SolverConfig;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioEngineConfig {
  /// Most recent observations kept per asset.
  pub window: usize,
  /// Fewest aligned observations accepted per asset.
  pub min_observations: usize,
  /// Annualization factor (trading periods per year).
  pub periods_per_year: f64,
  /// Annualized target return.
  pub target_return: f64,
  pub bound_mode: BoundMode,
  /// Capital split across assets in the report, if any.
  pub total_capital: Option<f64>,
  pub solver: SolverConfig,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      window: 500,
      min_observations: MIN_OBSERVATIONS,
      periods_per_year: 250.0,
      target_return: 0.10,
      bound_mode: BoundMode::LongOnly,
      total_capital: None,
      solver: SolverConfig::default(),
    }
  }
}

impl PortfolioEngineConfig {
  /// Parse a JSON document; missing fields take their defaults.
  pub fn from_json_str(json: &str) -> Result<Self> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
    Self::from_json_str(&fs::read_to_string(path)?)
  }
}

/// Aligned data and the statistics estimated from it.
#[derive(Clone, Debug)]
pub struct MarketEstimate {
  pub panel: AlignedPanel,
  pub statistics: Vec<AssetStatistics>,
  pub covariance: CovarianceMatrix,
}

/// Capital assigned to one asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Allocation {
  pub asset_id: String,
  pub weight: f64,
  /// `weight × total_capital`, when a capital was configured.
  pub amount: Option<f64>,
}

/// Output of [`PortfolioEngine::run`].
#[derive(Clone, Debug)]
pub struct PortfolioReport {
  pub statistics: Vec<AssetStatistics>,
  pub covariance: CovarianceMatrix,
  pub result: OptimizationResult,
  pub allocations: Vec<Allocation>,
}

/// Single entry point for the estimate-then-optimize workflow.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Align `series` and estimate per-asset statistics and the covariance.
  pub fn estimate(&self, series: &[AssetSeries]) -> Result<MarketEstimate> {
    let cfg = &self.config;
    let panel = align_series(series, cfg.window, cfg.min_observations)?;
    let statistics = estimate_statistics(&panel, cfg.periods_per_year)?;
    let covariance = covariance_matrix(&panel, cfg.periods_per_year)?;

    Ok(MarketEstimate {
      panel,
      statistics,
      covariance,
    })
  }

  /// Problem for the configured target and bound mode.
  pub fn problem(&self, estimate: &MarketEstimate) -> Result<OptimizationProblem> {
    build_problem(
      &estimate.statistics,
      &estimate.covariance,
      self.config.target_return,
      self.config.bound_mode,
    )
  }

  pub fn optimize(&self, problem: &OptimizationProblem) -> Result<OptimizationResult> {
    optimize_min_variance(problem, &self.config.solver)
  }

  /// Align, estimate and optimize in one pass.
  pub fn run(&self, series: &[AssetSeries]) -> Result<PortfolioReport> {
    let estimate = self.estimate(series)?;
    let problem = self.problem(&estimate)?;
    let result = self.optimize(&problem)?;
    let allocations = self.allocate(&result)?;

    info!(
      assets = result.asset_ids.len(),
      observations = estimate.panel.len(),
      expected_return = result.expected_return,
      volatility = result.volatility,
      "portfolio optimized"
    );

    Ok(PortfolioReport {
      statistics: estimate.statistics,
      covariance: estimate.covariance,
      result,
      allocations,
    })
  }

  /// Split the configured capital by weight.
  pub fn allocate(&self, result: &OptimizationResult) -> Result<Vec<Allocation>> {
    if let Some(capital) = self.config.total_capital {
      if !capital.is_finite() || capital < 0.0 {
        return Err(PortfolioError::InvalidInput(format!(
          "total capital must be a non-negative amount, got {capital}"
        )));
      }
    }

    Ok(
      result
        .weights_by_asset()
        .map(|(id, weight)| Allocation {
          asset_id: id.to_string(),
          weight,
          amount: self.config.total_capital.map(|c| c * weight),
        })
        .collect(),
    )
  }

  /// `points` frontier portfolios spanning the achievable return range.
  pub fn frontier(
    &self,
    estimate: &MarketEstimate,
    points: usize,
  ) -> Result<Vec<(f64, Result<OptimizationResult>)>> {
    let problem = self.problem(estimate)?;
    let targets = frontier_targets(&problem, points);
    Ok(efficient_frontier(&problem, &targets, &self.config.solver))
  }
}
