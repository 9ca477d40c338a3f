//! # minvar-rs
//!
//! $$
//! \min_{\mathbf{w}} \ \mathbf{w}^\top \Sigma \mathbf{w}
//! \quad \text{s.t.} \quad \mathbf{1}^\top \mathbf{w} = 1,\ \boldsymbol{\mu}^\top \mathbf{w} = r^\*,\ \mathbf{l} \le \mathbf{w} \le \mathbf{u}
//! $$
//!
//! Annualized risk/return statistics from daily return series and constrained
//! minimum-variance allocation via an active-set quadratic program solver.

pub mod error;
pub mod logging;
pub mod quant;

pub use error::PortfolioError;
pub use error::Result;
