//! # Portfolio Optimizers
//!
//! $$
//! \min_{\mathbf{w}} \ \mathbf{w}^\top \Sigma \mathbf{w}
//! \quad \text{s.t.} \quad \mathbf{1}^\top\mathbf{w} = 1,\ \boldsymbol{\mu}^\top\mathbf{w} = r^\*,\ l \le w_i \le u
//! $$
//!
//! Minimum-variance allocation for a target return, built on the active-set
//! QP solver. Solver failures are propagated unchanged.

use nalgebra::DMatrix;
use nalgebra::DVector;
use rayon::prelude::*;
use tracing::debug;

use super::types::AssetStatistics;
use super::types::BoundMode;
use super::types::CovarianceMatrix;
use super::types::OptimizationProblem;
use super::types::OptimizationResult;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::qp::ActiveSetSolver;
use crate::quant::qp::QuadraticProgram;
use crate::quant::qp::SolverConfig;

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// every weight starts at `lo`; the remaining budget goes to assets in `order`
fn greedy_fill(expected_returns: &[f64], lo: f64, hi: f64, order: impl Iterator<Item = usize>) -> f64 {
  let mut remaining = 1.0 - expected_returns.len() as f64 * lo;
  let mut value = lo * expected_returns.iter().sum::<f64>();
  for i in order {
    if remaining <= 0.0 {
      break;
    }
    let add = (hi - lo).min(remaining);
    value += add * expected_returns[i];
    remaining -= add;
  }
  value
}

/// Exact `(min, max)` of `wᵀμ` over fully invested weights within the bound
/// mode, or `None` when no such weights exist.
pub fn achievable_return_range(expected_returns: &[f64], bound_mode: BoundMode) -> Option<(f64, f64)> {
  let n = expected_returns.len();
  let (lo, hi) = bound_mode.bounds();
  if n == 0 || n as f64 * lo > 1.0 || (n as f64) * hi < 1.0 {
    return None;
  }

  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&a, &b| expected_returns[a].total_cmp(&expected_returns[b]));

  let min = greedy_fill(expected_returns, lo, hi, order.iter().copied());
  let max = greedy_fill(expected_returns, lo, hi, order.iter().rev().copied());
  Some((min, max))
}

/// Build a problem in covariance order from per-asset statistics.
pub fn build_problem(
  statistics: &[AssetStatistics],
  covariance: &CovarianceMatrix,
  target_return: f64,
  bound_mode: BoundMode,
) -> Result<OptimizationProblem> {
  if statistics.len() != covariance.dim() {
    return Err(PortfolioError::InvalidInput(format!(
      "{} asset statistics for a {}-asset covariance",
      statistics.len(),
      covariance.dim()
    )));
  }

  let expected_returns = covariance
    .asset_ids()
    .iter()
    .map(|id| {
      statistics
        .iter()
        .find(|s| &s.asset_id == id)
        .map(|s| s.annualized_return)
        .ok_or_else(|| PortfolioError::InvalidInput(format!("no statistics for asset {id}")))
    })
    .collect::<Result<Vec<_>>>()?;

  OptimizationProblem::new(
    covariance.asset_ids().to_vec(),
    expected_returns,
    covariance.clone(),
    target_return,
    bound_mode,
  )
}

/// Minimum-variance weights for `problem`, starting from equal weights.
pub fn optimize_min_variance(
  problem: &OptimizationProblem,
  config: &SolverConfig,
) -> Result<OptimizationResult> {
  let n = problem.n_assets();
  let mu = problem.expected_returns().to_vec();
  let target = problem.target_return();

  let (min_ret, max_ret) = achievable_return_range(&mu, problem.bound_mode()).ok_or_else(|| {
    PortfolioError::InfeasibleProblem(format!(
      "{n} assets cannot be fully invested under {:?} bounds",
      problem.bound_mode()
    ))
  })?;
  if target < min_ret - config.feasibility_tolerance || target > max_ret + config.feasibility_tolerance
  {
    return Err(PortfolioError::InfeasibleProblem(format!(
      "target return {target} outside achievable range [{min_ret}, {max_ret}]"
    )));
  }

  let (lo, hi) = problem.bound_mode().bounds();
  let mut eq_matrix = DMatrix::from_element(2, n, 1.0);
  for (j, &r) in mu.iter().enumerate() {
    eq_matrix[(1, j)] = r;
  }

  let qp = QuadraticProgram::new(
    problem.covariance().to_dmatrix() * 2.0,
    eq_matrix,
    DVector::from_row_slice(&[1.0, target]),
    DVector::from_element(n, lo),
    DVector::from_element(n, hi),
  )?;

  let start = DVector::from_element(n, 1.0 / n as f64);
  let solution = ActiveSetSolver::new(config.clone()).solve_from(&qp, &start)?;

  let weights: Vec<f64> = solution.x.iter().copied().collect();
  let variance = problem.covariance().quadratic_form(&weights);
  let expected_return = dot(&weights, &mu);

  debug!(
    target,
    expected_return,
    variance,
    iterations = solution.iterations,
    "minimum-variance allocation"
  );

  Ok(OptimizationResult {
    asset_ids: problem.asset_ids().to_vec(),
    active_bounds: solution
      .active_bounds
      .iter()
      .map(|&i| problem.asset_ids()[i].clone())
      .collect(),
    weights,
    expected_return,
    variance,
    volatility: variance.max(0.0).sqrt(),
    iterations: solution.iterations,
    kkt_residual: solution.kkt_residual,
    constraint_violation: solution.constraint_violation,
  })
}

/// Solve one problem per target concurrently; results keep the order of
/// `targets` and fail independently.
pub fn efficient_frontier(
  problem: &OptimizationProblem,
  targets: &[f64],
  config: &SolverConfig,
) -> Vec<(f64, Result<OptimizationResult>)> {
  targets
    .par_iter()
    .map(|&target| {
      let result = optimize_min_variance(&problem.with_target(target), config);
      (target, result)
    })
    .collect()
}

/// `points` evenly spaced targets spanning the achievable return range.
pub fn frontier_targets(problem: &OptimizationProblem, points: usize) -> Vec<f64> {
  let mu = problem.expected_returns().to_vec();
  let Some((min, max)) = achievable_return_range(&mu, problem.bound_mode()) else {
    return Vec::new();
  };

  match points {
    0 => Vec::new(),
    1 => vec![0.5 * (min + max)],
    _ => (0..points)
      .map(|k| min + (max - min) * k as f64 / (points - 1) as f64)
      .collect(),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn two_asset_problem(target: f64) -> OptimizationProblem {
    let cov = CovarianceMatrix::new(
      vec!["A".into(), "B".into()],
      array![[0.04, 0.0], [0.0, 0.09]],
    )
    .unwrap();
    OptimizationProblem::new(
      vec!["A".into(), "B".into()],
      vec![0.10, 0.20],
      cov,
      target,
      BoundMode::LongOnly,
    )
    .unwrap()
  }

  #[test]
  fn achievable_range_long_only_is_min_max_return() {
    let (lo, hi) = achievable_return_range(&[0.05, 0.12, -0.02], BoundMode::LongOnly).unwrap();
    assert_abs_diff_eq!(lo, -0.02, epsilon = 1e-15);
    assert_abs_diff_eq!(hi, 0.12, epsilon = 1e-15);
  }

  #[test]
  fn achievable_range_long_short_allows_leverage_through_shorts() {
    // max: +1 on 0.12, +1 on 0.05, -1 on -0.02
    let (lo, hi) = achievable_return_range(&[0.05, 0.12, -0.02], BoundMode::LongShort).unwrap();
    assert_abs_diff_eq!(hi, 0.19, epsilon = 1e-12);
    assert_abs_diff_eq!(lo, -0.02 + 0.05 - 0.12, epsilon = 1e-12);
  }

  #[test]
  fn single_asset_cannot_short_out_of_budget() {
    assert_eq!(achievable_return_range(&[0.1], BoundMode::LongShort), Some((0.1, 0.1)));
    assert_eq!(achievable_return_range(&[], BoundMode::LongOnly), None);
  }

  #[test]
  fn two_asset_midpoint() {
    let result = optimize_min_variance(&two_asset_problem(0.15), &SolverConfig::default()).unwrap();
    assert_abs_diff_eq!(result.weight("A").unwrap(), 0.5, epsilon = 1e-8);
    assert_abs_diff_eq!(result.weight("B").unwrap(), 0.5, epsilon = 1e-8);
    assert_abs_diff_eq!(result.variance, 0.0325, epsilon = 1e-9);
  }

  #[test]
  fn target_above_band_is_infeasible() {
    let err = optimize_min_variance(&two_asset_problem(0.25), &SolverConfig::default()).unwrap_err();
    assert!(matches!(err, PortfolioError::InfeasibleProblem(_)));
  }

  #[test]
  fn indefinite_covariance_is_ill_conditioned() {
    // |ρ| > 1: symmetric but not positive semidefinite
    let cov = CovarianceMatrix::new(
      vec!["A".into(), "B".into()],
      array![[0.04, 0.2], [0.2, 0.09]],
    )
    .unwrap();
    let problem = OptimizationProblem::new(
      vec!["A".into(), "B".into()],
      vec![0.10, 0.20],
      cov,
      0.15,
      BoundMode::LongOnly,
    )
    .unwrap();

    match optimize_min_variance(&problem, &SolverConfig::default()).unwrap_err() {
      PortfolioError::IllConditionedCovariance { min_eigenvalue } => {
        // smallest eigenvalue of 2Σ
        let expected = 2.0 * (0.065 - 0.040625_f64.sqrt());
        assert_abs_diff_eq!(min_eigenvalue, expected, epsilon = 1e-9);
      }
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn target_at_band_edge_picks_the_vertex() {
    let result = optimize_min_variance(&two_asset_problem(0.20), &SolverConfig::default()).unwrap();
    assert_abs_diff_eq!(result.weight("A").unwrap(), 0.0, epsilon = 1e-7);
    assert_abs_diff_eq!(result.weight("B").unwrap(), 1.0, epsilon = 1e-7);
    assert!(result.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
  }

  #[test]
  fn build_problem_follows_covariance_order() {
    let cov = CovarianceMatrix::new(
      vec!["A".into(), "B".into()],
      array![[0.04, 0.0], [0.0, 0.09]],
    )
    .unwrap();
    let stats = vec![
      AssetStatistics {
        asset_id: "B".into(),
        annualized_return: 0.2,
        annualized_volatility: 0.3,
        observations: 10,
      },
      AssetStatistics {
        asset_id: "A".into(),
        annualized_return: 0.1,
        annualized_volatility: 0.2,
        observations: 10,
      },
    ];

    let problem = build_problem(&stats, &cov, 0.15, BoundMode::LongOnly).unwrap();
    assert_eq!(problem.expected_returns().to_vec(), vec![0.1, 0.2]);

    let missing = build_problem(&stats[..1], &cov, 0.15, BoundMode::LongOnly).unwrap_err();
    assert!(matches!(missing, PortfolioError::InvalidInput(_)));
  }

  #[test]
  fn frontier_preserves_target_order() {
    let problem = two_asset_problem(0.15);
    let targets = frontier_targets(&problem, 5);
    assert_eq!(targets.len(), 5);
    assert_abs_diff_eq!(targets[0], 0.10, epsilon = 1e-12);
    assert_abs_diff_eq!(targets[4], 0.20, epsilon = 1e-12);

    let frontier = efficient_frontier(&problem, &[0.12, 0.25, 0.18], &SolverConfig::default());
    assert_eq!(frontier.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![0.12, 0.25, 0.18]);
    assert!(frontier[0].1.is_ok());
    assert!(matches!(frontier[1].1, Err(PortfolioError::InfeasibleProblem(_))));
    assert!(frontier[2].1.is_ok());
  }
}
