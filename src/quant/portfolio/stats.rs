//! # Return Statistics
//!
//! $$
//! \hat\mu = P\,\bar r,\qquad
//! \hat\sigma = \sqrt{P}\,\sqrt{\tfrac{1}{L-1}\textstyle\sum_t (r_t-\bar r)^2},\qquad
//! \hat\Sigma = P\,\tfrac{1}{L-1} (R-\bar R)^\top (R-\bar R)
//! $$
//!
//! Annualized arithmetic mean, sample volatility and sample covariance with
//! `P` periods per year.

use ndarray::ArrayView1;
use ndarray_stats::CorrelationExt;
use rayon::prelude::*;

use super::data::MIN_OBSERVATIONS;
use super::types::AlignedPanel;
use super::types::AssetStatistics;
use super::types::CovarianceMatrix;
use crate::error::PortfolioError;
use crate::error::Result;

fn check_periods(periods_per_year: f64) -> Result<()> {
  if periods_per_year.is_finite() && periods_per_year > 0.0 {
    Ok(())
  } else {
    Err(PortfolioError::InvalidInput(format!(
      "periods_per_year must be positive, got {periods_per_year}"
    )))
  }
}

/// Arithmetic mean of per-period returns times `periods_per_year`.
pub fn annualized_return(series: &[f64], periods_per_year: f64) -> Result<f64> {
  check_periods(periods_per_year)?;
  let mean = ArrayView1::from(series)
    .mean()
    .ok_or_else(|| PortfolioError::InsufficientData {
      subject: "return series".into(),
      available: 0,
      required: 1,
    })?;

  Ok(mean * periods_per_year)
}

/// Sample standard deviation (`L - 1` denominator) times `√periods_per_year`.
pub fn annualized_volatility(series: &[f64], periods_per_year: f64) -> Result<f64> {
  check_periods(periods_per_year)?;
  if series.len() < MIN_OBSERVATIONS {
    return Err(PortfolioError::InsufficientData {
      subject: "return series".into(),
      available: series.len(),
      required: MIN_OBSERVATIONS,
    });
  }

  Ok(ArrayView1::from(series).std(1.0) * periods_per_year.sqrt())
}

/// Annualized sample covariance of the panel's columns.
pub fn covariance_matrix(panel: &AlignedPanel, periods_per_year: f64) -> Result<CovarianceMatrix> {
  check_periods(periods_per_year)?;
  if panel.len() < MIN_OBSERVATIONS {
    return Err(PortfolioError::InsufficientData {
      subject: "aligned panel".into(),
      available: panel.len(),
      required: MIN_OBSERVATIONS,
    });
  }

  // rows of the transposed panel are the assets
  let sample = panel
    .returns()
    .t()
    .cov(1.0)
    .map_err(|_| PortfolioError::InvalidInput("empty return panel".into()))?;

  CovarianceMatrix::new(panel.asset_ids().to_vec(), sample * periods_per_year)
}

/// Per-asset annualized return and volatility, one independent task per asset.
pub fn estimate_statistics(
  panel: &AlignedPanel,
  periods_per_year: f64,
) -> Result<Vec<AssetStatistics>> {
  check_periods(periods_per_year)?;

  panel
    .asset_ids()
    .par_iter()
    .enumerate()
    .map(|(j, id)| {
      let column = panel.returns().column(j).to_vec();
      let annualized_return = annualized_return(&column, periods_per_year)?;
      let annualized_volatility =
        annualized_volatility(&column, periods_per_year).map_err(|err| match err {
          PortfolioError::InsufficientData {
            available,
            required,
            ..
          } => PortfolioError::InsufficientData {
            subject: format!("asset {id}"),
            available,
            required,
          },
          other => other,
        })?;

      Ok(AssetStatistics {
        asset_id: id.clone(),
        annualized_return,
        annualized_volatility,
        observations: column.len(),
      })
    })
    .collect()
}
