//! # KKT Systems
//!
//! $$
//! \begin{bmatrix} H_{FF} + \delta I & A_F^\top \\ A_F & -\delta I \end{bmatrix}
//! \begin{bmatrix} \mathbf{p}_F \\ \mathbf{y} \end{bmatrix}
//! =
//! \begin{bmatrix} -\mathbf{g}_F \\ \mathbf{r} \end{bmatrix}
//! $$
//!
//! Equality-constrained subproblem on the free variables. The shift `δ` is
//! zero unless the unshifted system is numerically singular, in which case it
//! is escalated geometrically up to the configured cap.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::warn;

use super::problem::SolverConfig;
use super::problem::norm_inf;
use crate::error::PortfolioError;
use crate::error::Result;

/// Smallest accepted ratio between the extreme pivots of the LU factor.
const PIVOT_RATIO: f64 = 1e-13;

#[derive(Clone, Debug)]
pub(crate) struct KktStep {
  /// Step on the free variables.
  pub step: DVector<f64>,
  /// `y`, with `∇f(x + p) = -Aᵀy` on the free set.
  pub y: DVector<f64>,
  /// Diagonal shift that was needed, zero when none.
  pub shift: f64,
}

/// Solve the KKT system for free-variable step `p` and multipliers `y`.
pub(crate) fn solve_kkt(
  h_ff: &DMatrix<f64>,
  a_f: &DMatrix<f64>,
  g_f: &DVector<f64>,
  r: &DVector<f64>,
  config: &SolverConfig,
) -> Result<KktStep> {
  let nf = h_ff.nrows();
  let m = r.len();
  let dim = nf + m;

  if dim == 0 {
    return Ok(KktStep {
      step: DVector::zeros(0),
      y: DVector::zeros(0),
      shift: 0.0,
    });
  }

  let mut rhs = DVector::zeros(dim);
  rhs.rows_mut(0, nf).copy_from(&(-g_f));
  rhs.rows_mut(nf, m).copy_from(r);

  let mut shift = 0.0;
  loop {
    let kkt = assemble(h_ff, a_f, shift);
    if let Some(sol) = try_solve(&kkt, &rhs) {
      if shift > config.regularization {
        warn!(shift, "KKT system required escalated regularization");
      }
      return Ok(KktStep {
        step: sol.rows(0, nf).into_owned(),
        y: sol.rows(nf, m).into_owned(),
        shift,
      });
    }

    shift = if shift == 0.0 {
      config.regularization
    } else {
      shift * 100.0
    };
    if shift > config.max_regularization {
      return Err(PortfolioError::NonConvergence {
        iterations: 0,
        kkt_residual: f64::INFINITY,
        constraint_violation: norm_inf(r),
      });
    }
  }
}

fn assemble(h_ff: &DMatrix<f64>, a_f: &DMatrix<f64>, shift: f64) -> DMatrix<f64> {
  let nf = h_ff.nrows();
  let m = a_f.nrows();
  let mut kkt = DMatrix::zeros(nf + m, nf + m);

  kkt.view_mut((0, 0), (nf, nf)).copy_from(h_ff);
  if m > 0 && nf > 0 {
    kkt.view_mut((0, nf), (nf, m)).copy_from(&a_f.transpose());
    kkt.view_mut((nf, 0), (m, nf)).copy_from(a_f);
  }
  for i in 0..nf {
    kkt[(i, i)] += shift;
  }
  for i in nf..(nf + m) {
    kkt[(i, i)] -= shift;
  }

  kkt
}

fn try_solve(kkt: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
  let lu = kkt.clone().lu();

  let u = lu.u();
  let diag = u.diagonal();
  let largest = diag.amax();
  let smallest = diag.iter().fold(f64::INFINITY, |acc, v| acc.min(v.abs()));
  if largest == 0.0 || smallest < PIVOT_RATIO * largest {
    return None;
  }

  let sol = lu.solve(rhs)?;
  if !sol.iter().all(|v| v.is_finite()) {
    return None;
  }

  let residual = (kkt * &sol - rhs).amax();
  if residual > 1e-9 * (1.0 + norm_inf(rhs)) {
    return None;
  }

  Some(sol)
}
