//! # Portfolio Types
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w},\qquad \mu_p = \mathbf{w}^\top \boldsymbol{\mu}
//! $$
//!
//! Shared data model: raw series, the aligned panel, estimated statistics,
//! the optimization problem and its result.

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// One dated fractional return (`0.05` for 5%).
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub date: NaiveDate,
  pub value: f64,
}

/// Return history of a single asset, in any order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
  /// Asset identifier, unique within a universe.
  pub id: String,
  pub observations: Vec<Observation>,
}

impl AssetSeries {
  pub fn new(id: impl Into<String>, observations: Vec<Observation>) -> Self {
    Self {
      id: id.into(),
      observations,
    }
  }

  pub fn from_pairs<I>(id: impl Into<String>, pairs: I) -> Self
  where
    I: IntoIterator<Item = (NaiveDate, f64)>,
  {
    Self::new(
      id,
      pairs
        .into_iter()
        .map(|(date, value)| Observation::new(date, value))
        .collect(),
    )
  }

  pub fn len(&self) -> usize {
    self.observations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.observations.is_empty()
  }
}

/// Equal-length return window shared by every asset.
///
/// Row `t` holds the `t`-th most recent observation of each asset; columns
/// follow [`AlignedPanel::asset_ids`]. Positions are aligned after independent
/// truncation, not by calendar date.
#[derive(Clone, Debug)]
pub struct AlignedPanel {
  pub(crate) asset_ids: Vec<String>,
  pub(crate) returns: Array2<f64>,
  /// `(newest, oldest)` date of the window, per asset.
  pub(crate) date_ranges: Vec<(NaiveDate, NaiveDate)>,
}

impl AlignedPanel {
  pub fn asset_ids(&self) -> &[String] {
    &self.asset_ids
  }

  /// `(observations, assets)` matrix, newest first.
  pub fn returns(&self) -> &Array2<f64> {
    &self.returns
  }

  /// Number of aligned observations per asset.
  pub fn len(&self) -> usize {
    self.returns.nrows()
  }

  pub fn is_empty(&self) -> bool {
    self.returns.nrows() == 0
  }

  pub fn n_assets(&self) -> usize {
    self.asset_ids.len()
  }

  pub fn index_of(&self, asset_id: &str) -> Option<usize> {
    self.asset_ids.iter().position(|id| id == asset_id)
  }

  pub fn column(&self, asset_id: &str) -> Option<ArrayView1<'_, f64>> {
    self.index_of(asset_id).map(|j| self.returns.column(j))
  }

  pub fn date_range(&self, asset_id: &str) -> Option<(NaiveDate, NaiveDate)> {
    self.index_of(asset_id).map(|j| self.date_ranges[j])
  }

  /// Assets whose window starts or ends on a different date than the first
  /// asset's window.
  pub fn calendar_mismatches(&self) -> Vec<&str> {
    let Some(reference) = self.date_ranges.first() else {
      return Vec::new();
    };

    self
      .asset_ids
      .iter()
      .zip(self.date_ranges.iter())
      .filter(|(_, range)| *range != reference)
      .map(|(id, _)| id.as_str())
      .collect()
  }
}

/// Long-only `[0, 1]` or long/short `[-1, 1]` weight bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundMode {
  #[default]
  LongOnly,
  LongShort,
}

impl BoundMode {
  pub fn from_allow_short(allow_short: bool) -> Self {
    if allow_short {
      Self::LongShort
    } else {
      Self::LongOnly
    }
  }

  /// Per-asset `(lower, upper)` weight bound.
  pub fn bounds(&self) -> (f64, f64) {
    match self {
      Self::LongOnly => (0.0, 1.0),
      Self::LongShort => (-1.0, 1.0),
    }
  }
}

/// Annualized per-asset statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetStatistics {
  pub asset_id: String,
  pub annualized_return: f64,
  pub annualized_volatility: f64,
  /// Aligned observations the estimate is based on.
  pub observations: usize,
}

/// Annualized covariance matrix indexed by asset id.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  asset_ids: Vec<String>,
  matrix: Array2<f64>,
}

impl CovarianceMatrix {
  /// Validates shape, finiteness and symmetry; the stored matrix is exactly
  /// symmetrized.
  pub fn new(asset_ids: Vec<String>, matrix: Array2<f64>) -> Result<Self> {
    let n = asset_ids.len();
    if matrix.dim() != (n, n) {
      return Err(PortfolioError::InvalidInput(format!(
        "covariance must be {n}x{n}, got {:?}",
        matrix.dim()
      )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "covariance contains non-finite entries".into(),
      ));
    }

    let scale = matrix.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    for i in 0..n {
      for j in (i + 1)..n {
        if (matrix[[i, j]] - matrix[[j, i]]).abs() > 1e-9 * scale {
          return Err(PortfolioError::InvalidInput(format!(
            "covariance is not symmetric for ({}, {})",
            asset_ids[i], asset_ids[j]
          )));
        }
      }
    }

    let matrix = (&matrix + &matrix.t()) * 0.5;
    Ok(Self { asset_ids, matrix })
  }

  pub fn asset_ids(&self) -> &[String] {
    &self.asset_ids
  }

  pub fn matrix(&self) -> &Array2<f64> {
    &self.matrix
  }

  pub fn dim(&self) -> usize {
    self.asset_ids.len()
  }

  pub fn index_of(&self, asset_id: &str) -> Option<usize> {
    self.asset_ids.iter().position(|id| id == asset_id)
  }

  pub fn get(&self, a: &str, b: &str) -> Option<f64> {
    Some(self.matrix[[self.index_of(a)?, self.index_of(b)?]])
  }

  pub fn variance(&self, asset_id: &str) -> Option<f64> {
    self.get(asset_id, asset_id)
  }

  pub fn volatility(&self, asset_id: &str) -> Option<f64> {
    self.variance(asset_id).map(|v| v.max(0.0).sqrt())
  }

  /// Correlation matrix; zero-variance assets get zero off-diagonal entries.
  pub fn correlation(&self) -> Array2<f64> {
    let n = self.dim();
    let sigmas: Vec<f64> = (0..n).map(|i| self.matrix[[i, i]].max(0.0).sqrt()).collect();

    Array2::from_shape_fn((n, n), |(i, j)| {
      let denom = sigmas[i] * sigmas[j];
      if i == j {
        1.0
      } else if denom > 1e-15 {
        (self.matrix[[i, j]] / denom).clamp(-1.0, 1.0)
      } else {
        0.0
      }
    })
  }

  /// Same matrix with rows and columns permuted into `order`.
  pub fn reordered(&self, order: &[String]) -> Result<Self> {
    if order.len() != self.dim() {
      return Err(PortfolioError::InvalidInput(format!(
        "cannot reorder {} assets into {} positions",
        self.dim(),
        order.len()
      )));
    }

    let idx = order
      .iter()
      .map(|id| {
        self
          .index_of(id)
          .ok_or_else(|| PortfolioError::InvalidInput(format!("asset {id} missing from covariance")))
      })
      .collect::<Result<Vec<_>>>()?;

    let matrix = Array2::from_shape_fn((idx.len(), idx.len()), |(i, j)| self.matrix[[idx[i], idx[j]]]);
    Ok(Self {
      asset_ids: order.to_vec(),
      matrix,
    })
  }

  pub fn to_dmatrix(&self) -> DMatrix<f64> {
    let n = self.dim();
    DMatrix::from_fn(n, n, |i, j| self.matrix[[i, j]])
  }

  /// `wᵀΣw`.
  pub fn quadratic_form(&self, weights: &[f64]) -> f64 {
    let w = ArrayView1::from(weights);
    w.dot(&self.matrix.dot(&w))
  }
}

/// Minimum-variance problem for one target return.
#[derive(Clone, Debug)]
pub struct OptimizationProblem {
  asset_ids: Vec<String>,
  expected_returns: Array1<f64>,
  covariance: CovarianceMatrix,
  target_return: f64,
  bound_mode: BoundMode,
}

impl OptimizationProblem {
  /// The covariance is permuted into `asset_ids` order if needed.
  pub fn new(
    asset_ids: Vec<String>,
    expected_returns: Vec<f64>,
    covariance: CovarianceMatrix,
    target_return: f64,
    bound_mode: BoundMode,
  ) -> Result<Self> {
    if asset_ids.is_empty() {
      return Err(PortfolioError::InvalidInput("empty asset universe".into()));
    }
    if expected_returns.len() != asset_ids.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} expected returns for {} assets",
        expected_returns.len(),
        asset_ids.len()
      )));
    }
    if expected_returns.iter().any(|r| !r.is_finite()) || !target_return.is_finite() {
      return Err(PortfolioError::InvalidInput(
        "expected returns and target must be finite".into(),
      ));
    }

    let covariance = if covariance.asset_ids() == asset_ids.as_slice() {
      covariance
    } else {
      covariance.reordered(&asset_ids)?
    };

    Ok(Self {
      asset_ids,
      expected_returns: Array1::from(expected_returns),
      covariance,
      target_return,
      bound_mode,
    })
  }

  pub fn asset_ids(&self) -> &[String] {
    &self.asset_ids
  }

  pub fn expected_returns(&self) -> &Array1<f64> {
    &self.expected_returns
  }

  pub fn covariance(&self) -> &CovarianceMatrix {
    &self.covariance
  }

  pub fn target_return(&self) -> f64 {
    self.target_return
  }

  pub fn bound_mode(&self) -> BoundMode {
    self.bound_mode
  }

  pub fn n_assets(&self) -> usize {
    self.asset_ids.len()
  }

  /// Same universe, different target.
  pub fn with_target(&self, target_return: f64) -> Self {
    Self {
      target_return,
      ..self.clone()
    }
  }
}

/// Optimal weights for an [`OptimizationProblem`].
#[derive(Clone, Debug, Serialize)]
pub struct OptimizationResult {
  pub asset_ids: Vec<String>,
  pub weights: Vec<f64>,
  /// `wᵀμ`.
  pub expected_return: f64,
  /// `wᵀΣw`, the minimized objective.
  pub variance: f64,
  pub volatility: f64,
  pub iterations: usize,
  /// Assets pinned to a weight bound.
  pub active_bounds: Vec<String>,
  pub kkt_residual: f64,
  pub constraint_violation: f64,
}

impl OptimizationResult {
  pub fn weight(&self, asset_id: &str) -> Option<f64> {
    self
      .asset_ids
      .iter()
      .position(|id| id == asset_id)
      .map(|i| self.weights[i])
  }

  pub fn weights_by_asset(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
    self
      .asset_ids
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }
}
