//! # Errors
//!
//! Typed failures surfaced by the estimator and the solver. Nothing in the
//! core catches these; remediation (relaxing the target, widening bounds,
//! raising the iteration budget) is a caller decision.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PortfolioError>;

#[derive(Error, Debug)]
pub enum PortfolioError {
  /// Too few aligned observations to estimate a variance.
  #[error("insufficient data for {subject}: {available} observations, at least {required} required")]
  InsufficientData {
    subject: String,
    available: usize,
    required: usize,
  },

  /// Equality constraints and bounds admit no feasible point.
  #[error("infeasible problem: {0}")]
  InfeasibleProblem(String),

  /// Iteration budget exhausted on a (seemingly) feasible problem.
  #[error(
    "solver did not converge after {iterations} iterations (kkt residual {kkt_residual:.3e}, constraint violation {constraint_violation:.3e})"
  )]
  NonConvergence {
    iterations: usize,
    kkt_residual: f64,
    constraint_violation: f64,
  },

  /// Covariance is not positive semidefinite beyond tolerance.
  #[error("ill-conditioned covariance matrix: minimum eigenvalue {min_eigenvalue:.3e}")]
  IllConditionedCovariance { min_eigenvalue: f64 },

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("could not parse {0:?} as a return")]
  Parse(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("CSV error: {0}")]
  Csv(#[from] csv::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

impl PortfolioError {
  /// `true` for the failures a caller may remediate by relaxing inputs.
  pub fn is_solver_failure(&self) -> bool {
    matches!(
      self,
      PortfolioError::InfeasibleProblem(_) | PortfolioError::NonConvergence { .. }
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insufficient_data_message_names_the_asset() {
    let err = PortfolioError::InsufficientData {
      subject: "asset BOND".to_string(),
      available: 1,
      required: 2,
    };

    let msg = err.to_string();
    assert!(msg.contains("asset BOND"));
    assert!(msg.contains("1 observations"));
    assert!(!err.is_solver_failure());
  }

  #[test]
  fn solver_failures_are_distinguishable() {
    let infeasible = PortfolioError::InfeasibleProblem("target above band".into());
    let stalled = PortfolioError::NonConvergence {
      iterations: 10,
      kkt_residual: 1e-3,
      constraint_violation: 0.0,
    };

    assert!(infeasible.is_solver_failure());
    assert!(stalled.is_solver_failure());
    assert!(matches!(infeasible, PortfolioError::InfeasibleProblem(_)));
    assert!(matches!(stalled, PortfolioError::NonConvergence { iterations: 10, .. }));
  }
}
