//! # CSV Loader
//!
//! $$
//! \texttt{dir}/\langle id\rangle\texttt{.csv} \mapsto \big(id, \{(t_k, r_k)\}\big)
//! $$
//!
//! Reads one asset per CSV file from a directory. The asset id is the file
//! stem; returns may be fractions or percentage strings.

use std::fs;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::data::parse_return;
use super::types::AssetSeries;
use super::types::Observation;
use crate::error::PortfolioError;
use crate::error::Result;

/// Column names of the return files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSourceConfig {
  pub date_column: String,
  pub return_column: String,
}

impl Default for CsvSourceConfig {
  fn default() -> Self {
    Self {
      date_column: "w782".into(),
      return_column: "tor (3)".into(),
    }
  }
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY-MM-DD HH:MM:SS` and RFC 3339.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
  let raw = raw.trim();
  for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
    if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
      return Ok(date);
    }
  }
  if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
    return Ok(ts.date());
  }
  if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
    return Ok(ts.date_naive());
  }

  Err(PortfolioError::Parse(format!("unrecognized date {raw:?}")))
}

fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
  headers
    .iter()
    .position(|h| h.trim() == name)
    .ok_or_else(|| {
      PortfolioError::InvalidInput(format!("{} has no column {name:?}", path.display()))
    })
}

/// Load one asset from `path`. Rows with an empty return cell are skipped.
pub fn load_file(path: &Path, config: &CsvSourceConfig) -> Result<AssetSeries> {
  let id = path
    .file_stem()
    .and_then(|s| s.to_str())
    .ok_or_else(|| PortfolioError::InvalidInput(format!("bad file name {}", path.display())))?
    .to_string();

  let mut reader = ReaderBuilder::new()
    .has_headers(true)
    .flexible(true)
    .from_reader(File::open(path)?);

  let headers = reader.headers()?.clone();
  let date_idx = column_index(&headers, &config.date_column, path)?;
  let return_idx = column_index(&headers, &config.return_column, path)?;

  let mut observations = Vec::new();
  for record in reader.records() {
    let record = record?;
    let raw_return = record.get(return_idx).unwrap_or("").trim();
    if raw_return.is_empty() {
      continue;
    }
    let date = parse_date(record.get(date_idx).unwrap_or(""))?;
    observations.push(Observation::new(date, parse_return(raw_return)?));
  }

  debug!(asset = %id, rows = observations.len(), "loaded return file");
  Ok(AssetSeries::new(id, observations))
}

/// Load every `*.csv` file in `dir`, in file-name order.
pub fn load_directory(dir: &Path, config: &CsvSourceConfig) -> Result<Vec<AssetSeries>> {
  let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
    .map(|entry| entry.map(|e| e.path()))
    .collect::<std::io::Result<Vec<_>>>()?
    .into_iter()
    .filter(|p| {
      p.is_file()
        && p
          .extension()
          .and_then(|e| e.to_str())
          .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
    })
    .collect();
  paths.sort();

  if paths.is_empty() {
    return Err(PortfolioError::InvalidInput(format!(
      "no CSV files in {}",
      dir.display()
    )));
  }

  paths.iter().map(|p| load_file(p, config)).collect()
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use approx::assert_abs_diff_eq;
  use tempfile::tempdir;

  use super::*;

  fn write(dir: &Path, name: &str, body: &str) {
    let mut file = File::create(dir.join(name)).unwrap();
    write!(file, "{body}").unwrap();
  }

  #[test]
  fn parses_supported_date_formats() {
    let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    assert_eq!(parse_date("2024-02-29").unwrap(), d);
    assert_eq!(parse_date("2024/02/29").unwrap(), d);
    assert_eq!(parse_date("2024-02-29 15:00:00").unwrap(), d);
    assert_eq!(parse_date("2024-02-29T09:30:00+08:00").unwrap(), d);
    assert!(matches!(parse_date("29.02.2024"), Err(PortfolioError::Parse(_))));
  }

  #[test]
  fn loads_directory_of_percentage_files() {
    let dir = tempdir().unwrap();
    write(
      dir.path(),
      "GOLD.csv",
      "w782,close,tor (3)\n2024-01-03,1.0,0.5%\n2024-01-02,1.0,-1.25%\n2024-01-04,1.0,\n",
    );
    write(dir.path(), "BOND.csv", "w782,tor (3)\n2024/01/02,0.0001\n2024/01/03,0.0002\n");
    write(dir.path(), "notes.txt", "not a return file");

    let series = load_directory(dir.path(), &CsvSourceConfig::default()).unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].id, "BOND");
    assert_eq!(series[1].id, "GOLD");
    assert_eq!(series[1].len(), 2);
    assert_abs_diff_eq!(series[1].observations[0].value, 0.005, epsilon = 1e-15);
    assert_abs_diff_eq!(series[1].observations[1].value, -0.0125, epsilon = 1e-15);
  }

  #[test]
  fn custom_columns_and_missing_columns() {
    let dir = tempdir().unwrap();
    write(dir.path(), "A.csv", "date,ret\n2024-01-02,0.01\n");

    let cfg = CsvSourceConfig {
      date_column: "date".into(),
      return_column: "ret".into(),
    };
    let series = load_file(&dir.path().join("A.csv"), &cfg).unwrap();
    assert_eq!(series.observations[0].value, 0.01);

    let err = load_file(&dir.path().join("A.csv"), &CsvSourceConfig::default()).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput(_)));
  }

  #[test]
  fn empty_directory_is_rejected() {
    let dir = tempdir().unwrap();
    assert!(matches!(
      load_directory(dir.path(), &CsvSourceConfig::default()),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn bad_return_cell_is_a_parse_error() {
    let dir = tempdir().unwrap();
    write(dir.path(), "X.csv", "w782,tor (3)\n2024-01-02,abc\n");
    assert!(matches!(
      load_directory(dir.path(), &CsvSourceConfig::default()),
      Err(PortfolioError::Parse(_))
    ));
  }
}
