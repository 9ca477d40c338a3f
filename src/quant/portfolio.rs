//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Return alignment, statistics estimation and minimum-variance allocation.

pub mod data;
pub mod engine;
pub mod loader;
pub mod optimizers;
pub mod stats;
pub mod types;

pub use data::align_series;
pub use data::parse_return;
pub use engine::Allocation;
pub use engine::MarketEstimate;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use engine::PortfolioReport;
pub use loader::CsvSourceConfig;
pub use loader::load_directory;
pub use optimizers::achievable_return_range;
pub use optimizers::build_problem;
pub use optimizers::efficient_frontier;
pub use optimizers::optimize_min_variance;
pub use stats::covariance_matrix;
pub use stats::estimate_statistics;
pub use types::AlignedPanel;
pub use types::AssetSeries;
pub use types::AssetStatistics;
pub use types::BoundMode;
pub use types::CovarianceMatrix;
pub use types::Observation;
pub use types::OptimizationProblem;
pub use types::OptimizationResult;
