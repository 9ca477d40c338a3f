//! # Portfolio Data Utilities
//!
//! $$
//! R^{(j)}_{t},\quad t = 0,\dots,L-1,\qquad L = \min_j \min(N, n_j)
//! $$
//!
//! Return normalization and the series aligner. Each series is sorted newest
//! first and truncated to the `N` most recent observations independently;
//! the panel then keeps the common most recent length `L`. Positions are not
//! re-indexed by date, so sources must share a trading calendar. Assets whose
//! window dates differ from the first asset's are reported with a warning.

use std::collections::BTreeSet;

use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use super::types::AlignedPanel;
use super::types::AssetSeries;
use super::types::Observation;
use crate::error::PortfolioError;
use crate::error::Result;

/// Fewest observations from which a sample variance is defined.
pub const MIN_OBSERVATIONS: usize = 2;

/// Parse `"5%"` as `0.05`; plain numbers are taken as fractions already.
pub fn parse_return(raw: &str) -> Result<f64> {
  let trimmed = raw.trim();
  let (number, scale) = match trimmed.strip_suffix('%') {
    Some(pct) => (pct.trim(), 0.01),
    None => (trimmed, 1.0),
  };

  let value = number
    .parse::<f64>()
    .map_err(|_| PortfolioError::Parse(raw.to_string()))?;
  if !value.is_finite() {
    return Err(PortfolioError::Parse(raw.to_string()));
  }

  Ok(value * scale)
}

/// Sort newest first, rejecting duplicate dates and non-finite returns.
pub fn normalize_series(series: &AssetSeries) -> Result<Vec<Observation>> {
  if let Some(bad) = series.observations.iter().find(|o| !o.value.is_finite()) {
    return Err(PortfolioError::InvalidInput(format!(
      "asset {} has a non-finite return on {}",
      series.id, bad.date
    )));
  }

  let mut observations = series.observations.clone();
  observations.sort_by(|a, b| b.date.cmp(&a.date));

  if let Some(pair) = observations.windows(2).find(|w| w[0].date == w[1].date) {
    return Err(PortfolioError::InvalidInput(format!(
      "asset {} has duplicate observations on {}",
      series.id, pair[0].date
    )));
  }

  Ok(observations)
}

/// Align a universe of series into an [`AlignedPanel`] ordered by asset id.
pub fn align_series(
  series: &[AssetSeries],
  window: usize,
  min_observations: usize,
) -> Result<AlignedPanel> {
  if series.is_empty() {
    return Err(PortfolioError::InvalidInput("empty asset universe".into()));
  }
  if window == 0 {
    return Err(PortfolioError::InvalidInput("window must be positive".into()));
  }
  if min_observations < MIN_OBSERVATIONS {
    return Err(PortfolioError::InvalidInput(format!(
      "min_observations must be at least {MIN_OBSERVATIONS}, got {min_observations}"
    )));
  }

  let mut seen = BTreeSet::new();
  if let Some(dup) = series.iter().find(|s| !seen.insert(s.id.as_str())) {
    return Err(PortfolioError::InvalidInput(format!(
      "asset {} appears more than once",
      dup.id
    )));
  }

  let mut ordered: Vec<&AssetSeries> = series.iter().collect();
  ordered.sort_by(|a, b| a.id.cmp(&b.id));

  let mut truncated = Vec::with_capacity(ordered.len());
  for s in &ordered {
    let mut obs = normalize_series(s)?;
    obs.truncate(window);
    if obs.len() < min_observations {
      return Err(PortfolioError::InsufficientData {
        subject: format!("asset {}", s.id),
        available: obs.len(),
        required: min_observations,
      });
    }
    truncated.push(obs);
  }

  let len = truncated.iter().map(Vec::len).min().unwrap_or(0);
  let n = truncated.len();
  let returns = Array2::from_shape_fn((len, n), |(t, j)| truncated[j][t].value);
  let date_ranges = truncated
    .iter()
    .map(|obs| (obs[0].date, obs[len - 1].date))
    .collect();

  let panel = AlignedPanel {
    asset_ids: ordered.iter().map(|s| s.id.clone()).collect(),
    returns,
    date_ranges,
  };

  let mismatched = panel.calendar_mismatches();
  if !mismatched.is_empty() {
    warn!(
      assets = ?mismatched,
      "aligned windows cover different dates; series are aligned by position"
    );
  }
  debug!(assets = n, observations = len, window, "aligned return panel");

  Ok(panel)
}
