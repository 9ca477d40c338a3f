//! # QP Problem Data
//!
//! $$
//! \lambda_{\min}(H) \ge -\varepsilon_{\text{psd}} \max(1, \lVert H \rVert_2)
//! $$
//!
//! Problem container, input validation and equality-system reduction.

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Tolerances and budgets for [`super::ActiveSetSolver`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  /// Hard cap on active-set iterations (phase 1 and phase 2 combined).
  pub max_iterations: usize,
  /// Max-norm tolerance on `b - Ax`.
  pub feasibility_tolerance: f64,
  /// Tolerance on the KKT stationarity residual and on multiplier signs.
  pub stationarity_tolerance: f64,
  /// Initial diagonal shift applied when a KKT system is singular.
  pub regularization: f64,
  /// Largest diagonal shift tried before giving up.
  pub max_regularization: f64,
  /// Relative tolerance for negative eigenvalues of the Hessian.
  pub psd_tolerance: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iterations: 500,
      feasibility_tolerance: 1e-8,
      stationarity_tolerance: 1e-6,
      regularization: 1e-10,
      max_regularization: 1e-4,
      psd_tolerance: 1e-10,
    }
  }
}

/// `min ½xᵀHx + cᵀx` subject to `Ax = b` and `l ≤ x ≤ u`.
///
/// Bounds may be infinite; `H` must be symmetric positive semidefinite.
#[derive(Clone, Debug)]
pub struct QuadraticProgram {
  pub hessian: DMatrix<f64>,
  pub linear: DVector<f64>,
  pub eq_matrix: DMatrix<f64>,
  pub eq_rhs: DVector<f64>,
  pub lower: DVector<f64>,
  pub upper: DVector<f64>,
}

impl QuadraticProgram {
  /// Build a pure quadratic program (`c = 0`) and validate its shapes.
  pub fn new(
    hessian: DMatrix<f64>,
    eq_matrix: DMatrix<f64>,
    eq_rhs: DVector<f64>,
    lower: DVector<f64>,
    upper: DVector<f64>,
  ) -> Result<Self> {
    let n = hessian.nrows();
    let qp = Self {
      hessian,
      linear: DVector::zeros(n),
      eq_matrix,
      eq_rhs,
      lower,
      upper,
    };
    qp.validate()?;
    Ok(qp)
  }

  /// Attach a linear term `c`.
  pub fn with_linear(mut self, linear: DVector<f64>) -> Result<Self> {
    self.linear = linear;
    self.validate()?;
    Ok(self)
  }

  pub fn dim(&self) -> usize {
    self.hessian.nrows()
  }

  pub fn n_equalities(&self) -> usize {
    self.eq_matrix.nrows()
  }

  pub fn objective(&self, x: &DVector<f64>) -> f64 {
    0.5 * x.dot(&(&self.hessian * x)) + self.linear.dot(x)
  }

  pub fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
    &self.hessian * x + &self.linear
  }

  /// `b - Ax`.
  pub fn equality_residual(&self, x: &DVector<f64>) -> DVector<f64> {
    &self.eq_rhs - &self.eq_matrix * x
  }

  /// Largest amount by which `x` leaves its box.
  pub fn bound_violation(&self, x: &DVector<f64>) -> f64 {
    x.iter()
      .zip(self.lower.iter().zip(self.upper.iter()))
      .map(|(&xi, (&lo, &hi))| (lo - xi).max(xi - hi).max(0.0))
      .fold(0.0, f64::max)
  }

  /// Project `x` onto the box.
  pub fn clamp(&self, x: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
      x.len(),
      x.iter()
        .zip(self.lower.iter().zip(self.upper.iter()))
        .map(|(&xi, (&lo, &hi))| xi.max(lo).min(hi)),
    )
  }

  /// Default starting point: box midpoint where both bounds are finite,
  /// otherwise the finite bound, otherwise zero.
  pub fn default_start(&self) -> DVector<f64> {
    DVector::from_iterator(
      self.dim(),
      self.lower.iter().zip(self.upper.iter()).map(|(&lo, &hi)| {
        match (lo.is_finite(), hi.is_finite()) {
          (true, true) => 0.5 * (lo + hi),
          (true, false) => lo.max(0.0),
          (false, true) => hi.min(0.0),
          (false, false) => 0.0,
        }
      }),
    )
  }

  pub(crate) fn validate(&self) -> Result<()> {
    let n = self.dim();
    if self.hessian.ncols() != n {
      return Err(PortfolioError::InvalidInput(format!(
        "hessian must be square, got {}x{}",
        n,
        self.hessian.ncols()
      )));
    }
    if self.linear.len() != n || self.lower.len() != n || self.upper.len() != n {
      return Err(PortfolioError::InvalidInput(format!(
        "linear term and bounds must have length {n}"
      )));
    }
    if self.eq_matrix.ncols() != n && self.eq_matrix.nrows() > 0 {
      return Err(PortfolioError::InvalidInput(format!(
        "equality matrix has {} columns, expected {n}",
        self.eq_matrix.ncols()
      )));
    }
    if self.eq_rhs.len() != self.eq_matrix.nrows() {
      return Err(PortfolioError::InvalidInput(format!(
        "equality rhs has length {}, expected {}",
        self.eq_rhs.len(),
        self.eq_matrix.nrows()
      )));
    }
    if !self.hessian.iter().all(|v| v.is_finite())
      || !self.linear.iter().all(|v| v.is_finite())
      || !self.eq_matrix.iter().all(|v| v.is_finite())
      || !self.eq_rhs.iter().all(|v| v.is_finite())
    {
      return Err(PortfolioError::InvalidInput(
        "problem data contains non-finite values".into(),
      ));
    }
    for i in 0..n {
      let (lo, hi) = (self.lower[i], self.upper[i]);
      if lo.is_nan() || hi.is_nan() || lo > hi {
        return Err(PortfolioError::InfeasibleProblem(format!(
          "bound {i} is empty: [{lo}, {hi}]"
        )));
      }
    }

    let scale = self.hessian.amax().max(1.0);
    for i in 0..n {
      for j in (i + 1)..n {
        if (self.hessian[(i, j)] - self.hessian[(j, i)]).abs() > 1e-9 * scale {
          return Err(PortfolioError::InvalidInput(format!(
            "hessian is not symmetric at ({i}, {j})"
          )));
        }
      }
    }

    Ok(())
  }

  /// Reject Hessians with eigenvalues below `-tol · max(1, |λ|max)`.
  pub fn check_positive_semidefinite(&self, tol: f64) -> Result<()> {
    if self.dim() == 0 {
      return Ok(());
    }

    let sym = (&self.hessian + self.hessian.transpose()) * 0.5;
    let eigenvalues = sym.symmetric_eigenvalues();
    let min_eigenvalue = eigenvalues.min();
    let spectral = eigenvalues.amax().max(1.0);

    if min_eigenvalue < -tol * spectral {
      return Err(PortfolioError::IllConditionedCovariance { min_eigenvalue });
    }

    Ok(())
  }
}

/// Max-norm that is zero for empty vectors.
pub(crate) fn norm_inf(v: &DVector<f64>) -> f64 {
  v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Reduce `[A | b]` to an equivalent system with full row rank.
///
/// Rows are returned untouched when `A` already has full row rank. Otherwise
/// the row-echelon form is returned with dependent rows dropped; a dependent
/// row whose right-hand side does not vanish makes the system inconsistent.
pub(crate) fn reduce_equalities(
  a: &DMatrix<f64>,
  b: &DVector<f64>,
  feasibility_tolerance: f64,
) -> Result<(DMatrix<f64>, DVector<f64>)> {
  let (m, n) = a.shape();
  if m == 0 {
    return Ok((a.clone(), b.clone()));
  }

  let mut aug = DMatrix::zeros(m, n + 1);
  aug.view_mut((0, 0), (m, n)).copy_from(a);
  aug.set_column(n, b);

  let pivot_tol = 1e-12 * a.amax().max(1.0);
  let mut rank = 0;

  for col in 0..n {
    if rank == m {
      break;
    }

    let (offset, pivot) = aug
      .view((rank, col), (m - rank, 1))
      .iter()
      .enumerate()
      .map(|(k, v)| (k, v.abs()))
      .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if pivot <= pivot_tol {
      continue;
    }

    aug.swap_rows(rank, rank + offset);
    for r in (rank + 1)..m {
      let factor = aug[(r, col)] / aug[(rank, col)];
      if factor != 0.0 {
        for c in col..=n {
          aug[(r, c)] -= factor * aug[(rank, c)];
        }
      }
    }
    rank += 1;
  }

  for r in rank..m {
    if aug[(r, n)].abs() > feasibility_tolerance {
      return Err(PortfolioError::InfeasibleProblem(format!(
        "equality constraints are inconsistent (dependent row residual {:.3e})",
        aug[(r, n)]
      )));
    }
  }

  if rank == m {
    return Ok((a.clone(), b.clone()));
  }

  let reduced_a = aug.view((0, 0), (rank, n)).into_owned();
  let reduced_b = DVector::from_iterator(rank, (0..rank).map(|r| aug[(r, n)]));
  Ok((reduced_a, reduced_b))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn box_qp(hessian: DMatrix<f64>) -> Result<QuadraticProgram> {
    let n = hessian.nrows();
    QuadraticProgram::new(
      hessian,
      DMatrix::from_element(1, n, 1.0),
      DVector::from_element(1, 1.0),
      DVector::zeros(n),
      DVector::from_element(n, 1.0),
    )
  }

  #[test]
  fn rejects_mismatched_shapes() {
    let err = QuadraticProgram::new(
      DMatrix::identity(2, 2),
      DMatrix::from_element(1, 3, 1.0),
      DVector::from_element(1, 1.0),
      DVector::zeros(2),
      DVector::from_element(2, 1.0),
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput(_)));
  }

  #[test]
  fn rejects_empty_box() {
    let err = QuadraticProgram::new(
      DMatrix::identity(1, 1),
      DMatrix::zeros(0, 1),
      DVector::zeros(0),
      DVector::from_element(1, 1.0),
      DVector::from_element(1, 0.0),
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::InfeasibleProblem(_)));
  }

  #[test]
  fn psd_check_accepts_singular_and_rejects_indefinite() {
    let singular = box_qp(DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 0.09])).unwrap();
    assert!(singular.check_positive_semidefinite(1e-10).is_ok());

    let indefinite = box_qp(DMatrix::from_row_slice(2, 2, &[0.04, 0.2, 0.2, 0.09])).unwrap();
    let err = indefinite.check_positive_semidefinite(1e-10).unwrap_err();
    match err {
      PortfolioError::IllConditionedCovariance { min_eigenvalue } => assert!(min_eigenvalue < 0.0),
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn reduce_keeps_independent_rows() {
    let a = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 0.1, 0.2, 0.3]);
    let b = DVector::from_row_slice(&[1.0, 0.2]);
    let (ra, rb) = reduce_equalities(&a, &b, 1e-8).unwrap();
    assert_eq!(ra, a);
    assert_eq!(rb, b);
  }

  #[test]
  fn reduce_drops_consistent_duplicate_row() {
    // equal expected returns make the return row a multiple of the budget row
    let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.1, 0.1]);
    let b = DVector::from_row_slice(&[1.0, 0.1]);
    let (ra, rb) = reduce_equalities(&a, &b, 1e-8).unwrap();
    assert_eq!(ra.nrows(), 1);
    assert_abs_diff_eq!(rb[0] / ra[(0, 0)], 1.0, epsilon = 1e-12);
  }

  #[test]
  fn reduce_flags_inconsistent_duplicate_row() {
    let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.1, 0.1]);
    let b = DVector::from_row_slice(&[1.0, 0.2]);
    let err = reduce_equalities(&a, &b, 1e-8).unwrap_err();
    assert!(matches!(err, PortfolioError::InfeasibleProblem(_)));
  }

  #[test]
  fn default_start_handles_infinite_bounds() {
    let qp = QuadraticProgram::new(
      DMatrix::identity(3, 3),
      DMatrix::zeros(0, 3),
      DVector::zeros(0),
      DVector::from_row_slice(&[-1.0, 0.5, f64::NEG_INFINITY]),
      DVector::from_row_slice(&[1.0, f64::INFINITY, f64::INFINITY]),
    )
    .unwrap();
    let x0 = qp.default_start();
    assert_eq!(x0.as_slice(), &[0.0, 0.5, 0.0]);
    assert_abs_diff_eq!(qp.bound_violation(&DVector::from_row_slice(&[2.0, 0.0, 5.0])), 1.0);
  }
}
