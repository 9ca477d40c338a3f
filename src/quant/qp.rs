//! # Quadratic Programming
//!
//! $$
//! \min_{\mathbf{x}} \ \tfrac12 \mathbf{x}^\top H \mathbf{x} + \mathbf{c}^\top \mathbf{x}
//! \quad \text{s.t.} \quad A\mathbf{x} = \mathbf{b},\ \mathbf{l} \le \mathbf{x} \le \mathbf{u}
//! $$
//!
//! Convex QP with linear equalities and box bounds, solved by a two-phase
//! primal active-set method over bound constraints.

pub mod active_set;
pub mod kkt;
pub mod problem;

pub use active_set::ActiveSetSolver;
pub use active_set::QpSolution;
pub use problem::QuadraticProgram;
pub use problem::SolverConfig;
