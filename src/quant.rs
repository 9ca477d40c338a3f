//! # Quant
//!
//! $$
//! \Sigma_{ij} = \operatorname{Cov}(R_i, R_j)
//! $$
//!
//! Portfolio statistics and the quadratic programming they feed.

pub mod portfolio;
pub mod qp;
