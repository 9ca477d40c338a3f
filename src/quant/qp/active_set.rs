//! # Active-Set Solver
//!
//! $$
//! \nabla f(\mathbf{x}^\*) = A^\top \boldsymbol{\nu} + \boldsymbol{\mu},\quad
//! \mu_i \ge 0 \ (x_i = l_i),\quad \mu_i \le 0 \ (x_i = u_i),\quad \mu_i = 0 \ \text{otherwise}
//! $$
//!
//! Primal active-set method over bound constraints. Equalities are always in
//! the working set; bounds enter when they block a step and leave when their
//! multiplier has the wrong sign.
//!
//! Phase 1 finds a feasible start by minimizing `½‖s‖² + ½ε‖x - x₀‖²` subject
//! to `Ax + s = b` and the original bounds, which is trivially feasible at
//! `(x₀, b - Ax₀)`. A slack that stops shrinking proves infeasibility.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;
use tracing::info;

use super::kkt::solve_kkt;
use super::problem::QuadraticProgram;
use super::problem::SolverConfig;
use super::problem::norm_inf;
use super::problem::reduce_equalities;
use crate::error::PortfolioError;
use crate::error::Result;

/// Steps smaller than this (per component) do not trigger the ratio test.
const STEP_EPS: f64 = 1e-15;

/// Proximal re-anchoring rounds allowed in phase 1.
const PHASE_ONE_ROUNDS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
  Lower,
  Upper,
}

/// Optimal point of a [`QuadraticProgram`].
#[derive(Clone, Debug)]
pub struct QpSolution {
  pub x: DVector<f64>,
  /// `½xᵀHx + cᵀx` at `x`.
  pub objective: f64,
  /// Phase 1 plus phase 2 iterations.
  pub iterations: usize,
  /// Multipliers of the (reduced) equality system, `∇f = Aᵀν + μ`.
  pub multipliers: DVector<f64>,
  /// Indices pinned to a bound at the optimum.
  pub active_bounds: Vec<usize>,
  pub kkt_residual: f64,
  pub constraint_violation: f64,
}

enum Outcome {
  Converged {
    x: DVector<f64>,
    y: DVector<f64>,
    active: Vec<usize>,
    iterations: usize,
    kkt_residual: f64,
  },
  LimitReached {
    x: DVector<f64>,
    iterations: usize,
    kkt_residual: f64,
  },
}

/// Deterministic active-set QP solver.
#[derive(Clone, Debug, Default)]
pub struct ActiveSetSolver {
  config: SolverConfig,
}

impl ActiveSetSolver {
  pub fn new(config: SolverConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &SolverConfig {
    &self.config
  }

  /// Solve from [`QuadraticProgram::default_start`].
  pub fn solve(&self, qp: &QuadraticProgram) -> Result<QpSolution> {
    self.solve_from(qp, &qp.default_start())
  }

  /// Solve starting from `x0` (projected onto the box first).
  pub fn solve_from(&self, qp: &QuadraticProgram, x0: &DVector<f64>) -> Result<QpSolution> {
    qp.validate()?;
    if x0.len() != qp.dim() {
      return Err(PortfolioError::InvalidInput(format!(
        "starting point has length {}, expected {}",
        x0.len(),
        qp.dim()
      )));
    }
    qp.check_positive_semidefinite(self.config.psd_tolerance)?;

    let cfg = &self.config;
    let (eq_matrix, eq_rhs) =
      reduce_equalities(&qp.eq_matrix, &qp.eq_rhs, cfg.feasibility_tolerance)?;
    let reduced = QuadraticProgram {
      hessian: qp.hessian.clone(),
      linear: qp.linear.clone(),
      eq_matrix,
      eq_rhs,
      lower: qp.lower.clone(),
      upper: qp.upper.clone(),
    };

    let mut x = reduced.clamp(x0);
    let mut phase_one_iterations = 0;

    if norm_inf(&reduced.equality_residual(&x)) > cfg.feasibility_tolerance {
      let (feasible, iterations) = self.phase_one(&reduced, &x)?;
      phase_one_iterations = iterations;
      x = feasible;
    }

    let budget = cfg.max_iterations.saturating_sub(phase_one_iterations);
    match self.iterate(&reduced, x, budget)? {
      Outcome::Converged {
        x,
        y,
        active,
        iterations,
        kkt_residual,
      } => {
        let x = reduced.clamp(&x);
        let objective = qp.objective(&x);
        let constraint_violation = norm_inf(&qp.equality_residual(&x));
        let iterations = phase_one_iterations + iterations;

        info!(
          iterations,
          objective, kkt_residual, constraint_violation, "active-set solve converged"
        );

        Ok(QpSolution {
          x,
          objective,
          iterations,
          multipliers: -y,
          active_bounds: active,
          kkt_residual,
          constraint_violation,
        })
      }
      Outcome::LimitReached {
        x,
        iterations,
        kkt_residual,
      } => {
        let constraint_violation = norm_inf(&reduced.equality_residual(&x));
        let iterations = phase_one_iterations + iterations;
        if constraint_violation > cfg.feasibility_tolerance {
          Err(PortfolioError::InfeasibleProblem(format!(
            "constraint violation {constraint_violation:.3e} after {iterations} iterations"
          )))
        } else {
          Err(PortfolioError::NonConvergence {
            iterations,
            kkt_residual,
            constraint_violation,
          })
        }
      }
    }
  }

  /// Returns a point satisfying the equalities within tolerance, or proves
  /// that none exists inside the box.
  ///
  /// Each round re-anchors the proximal term at the previous round's point,
  /// so the `O(ε)` slack left by the proximal term shrinks geometrically on
  /// feasible problems and stalls at the true minimum on infeasible ones.
  fn phase_one(&self, qp: &QuadraticProgram, x0: &DVector<f64>) -> Result<(DVector<f64>, usize)> {
    let tol = self.config.feasibility_tolerance;
    let mut x = x0.clone();
    let mut violation = norm_inf(&qp.equality_residual(&x));
    let mut total = 0;

    for round in 1..=PHASE_ONE_ROUNDS {
      let budget = self.config.max_iterations.saturating_sub(total);
      let (next, iterations) = self.phase_one_round(qp, &x, budget)?;
      total += iterations;

      let next_violation = norm_inf(&qp.equality_residual(&next));
      debug!(round, iterations, violation = next_violation, "phase one round");
      x = next;

      if next_violation <= tol {
        return Ok((x, total));
      }
      if next_violation > 0.5 * violation || total >= self.config.max_iterations {
        violation = next_violation;
        break;
      }
      violation = next_violation;
    }

    Err(PortfolioError::InfeasibleProblem(format!(
      "equality constraints cannot be met within bounds (minimum violation {violation:.3e})"
    )))
  }

  fn phase_one_round(
    &self,
    qp: &QuadraticProgram,
    anchor: &DVector<f64>,
    budget: usize,
  ) -> Result<(DVector<f64>, usize)> {
    let n = qp.dim();
    let m = qp.n_equalities();
    let eps = self.config.regularization.max(f64::EPSILON);

    let mut hessian = DMatrix::zeros(n + m, n + m);
    let mut linear = DVector::zeros(n + m);
    for i in 0..n {
      hessian[(i, i)] = eps;
      linear[i] = -eps * anchor[i];
    }
    for k in 0..m {
      hessian[(n + k, n + k)] = 1.0;
    }

    let mut eq_matrix = DMatrix::zeros(m, n + m);
    eq_matrix.view_mut((0, 0), (m, n)).copy_from(&qp.eq_matrix);
    for k in 0..m {
      eq_matrix[(k, n + k)] = 1.0;
    }

    let mut lower = DVector::from_element(n + m, f64::NEG_INFINITY);
    let mut upper = DVector::from_element(n + m, f64::INFINITY);
    lower.rows_mut(0, n).copy_from(&qp.lower);
    upper.rows_mut(0, n).copy_from(&qp.upper);

    let auxiliary = QuadraticProgram {
      hessian,
      linear,
      eq_matrix,
      eq_rhs: qp.eq_rhs.clone(),
      lower,
      upper,
    };

    let mut z0 = DVector::zeros(n + m);
    z0.rows_mut(0, n).copy_from(anchor);
    z0.rows_mut(n, m).copy_from(&qp.equality_residual(anchor));

    let (z, iterations) = match self.iterate(&auxiliary, z0, budget)? {
      Outcome::Converged { x, iterations, .. } => (x, iterations),
      Outcome::LimitReached { x, iterations, .. } => (x, iterations),
    };

    Ok((qp.clamp(&z.rows(0, n).into_owned()), iterations))
  }

  fn iterate(&self, qp: &QuadraticProgram, mut x: DVector<f64>, budget: usize) -> Result<Outcome> {
    let cfg = &self.config;
    let n = qp.dim();
    let m = qp.n_equalities();

    // Variables with l == u can never leave their bound.
    let pinned: Vec<bool> = (0..n).map(|i| qp.lower[i] == qp.upper[i]).collect();
    let mut fixed: Vec<Option<Side>> = pinned
      .iter()
      .map(|&p| if p { Some(Side::Lower) } else { None })
      .collect();
    for i in 0..n {
      if pinned[i] {
        x[i] = qp.lower[i];
      }
    }

    let mut kkt_residual = f64::INFINITY;

    for iteration in 1..=budget {
      let free: Vec<usize> = (0..n).filter(|&i| fixed[i].is_none()).collect();
      let g = qp.gradient(&x);
      let mut r = qp.equality_residual(&x);
      if norm_inf(&r) <= cfg.feasibility_tolerance {
        r.fill(0.0);
      }

      let h_ff = qp.hessian.select_rows(&free).select_columns(&free);
      let a_f = if m > 0 {
        qp.eq_matrix.select_columns(&free)
      } else {
        DMatrix::zeros(0, free.len())
      };
      let g_f = g.select_rows(&free);

      let kkt = solve_kkt(&h_ff, &a_f, &g_f, &r, cfg).map_err(|err| match err {
        PortfolioError::NonConvergence {
          kkt_residual,
          constraint_violation,
          ..
        } => PortfolioError::NonConvergence {
          iterations: iteration,
          kkt_residual,
          constraint_violation,
        },
        other => other,
      })?;
      if kkt.shift > 0.0 {
        debug!(iteration, shift = kkt.shift, free = free.len(), "regularized KKT step");
      }

      // ratio test
      let mut alpha = 1.0;
      let mut blocking: Option<(usize, Side)> = None;
      for (k, &i) in free.iter().enumerate() {
        let p = kkt.step[k];
        let (limit, side) = if p < -STEP_EPS && qp.lower[i].is_finite() {
          ((qp.lower[i] - x[i]) / p, Side::Lower)
        } else if p > STEP_EPS && qp.upper[i].is_finite() {
          ((qp.upper[i] - x[i]) / p, Side::Upper)
        } else {
          continue;
        };
        let limit = limit.max(0.0);
        if limit < alpha {
          alpha = limit;
          blocking = Some((i, side));
        }
      }

      for (k, &i) in free.iter().enumerate() {
        x[i] += alpha * kkt.step[k];
      }
      x = qp.clamp(&x);

      if let Some((i, side)) = blocking {
        x[i] = match side {
          Side::Lower => qp.lower[i],
          Side::Upper => qp.upper[i],
        };
        // a vertex of the equality system cannot lose another free variable
        if free.len() > m {
          fixed[i] = Some(side);
          debug!(iteration, index = i, ?side, alpha, "bound entered working set");
        }
        continue;
      }

      // Full step: x minimizes over the current working set.
      let g_new = qp.gradient(&x);
      let a_ty = if m > 0 {
        qp.eq_matrix.transpose() * &kkt.y
      } else {
        DVector::zeros(n)
      };
      let scale = 1.0 + norm_inf(&g_new);

      kkt_residual = free
        .iter()
        .map(|&i| (g_new[i] + a_ty[i]).abs())
        .fold(0.0, f64::max)
        / scale;

      let mut release: Option<(usize, f64)> = None;
      for i in 0..n {
        if pinned[i] {
          continue;
        }
        let mu = g_new[i] + a_ty[i];
        let wrong_sign = match fixed[i] {
          Some(Side::Lower) => -mu,
          Some(Side::Upper) => mu,
          None => continue,
        };
        if wrong_sign > cfg.stationarity_tolerance * scale
          && release.map_or(true, |(_, worst)| wrong_sign > worst)
        {
          release = Some((i, wrong_sign));
        }
      }

      if let Some((i, violation)) = release {
        debug!(iteration, index = i, violation, "bound left working set");
        fixed[i] = None;
        continue;
      }

      let constraint_violation = norm_inf(&qp.equality_residual(&x));
      if constraint_violation <= cfg.feasibility_tolerance
        && kkt_residual <= cfg.stationarity_tolerance
      {
        let active = (0..n).filter(|&i| fixed[i].is_some()).collect();
        return Ok(Outcome::Converged {
          x,
          y: kkt.y,
          active,
          iterations: iteration,
          kkt_residual,
        });
      }
    }

    Ok(Outcome::LimitReached {
      x,
      iterations: budget,
      kkt_residual,
    })
  }
}
