//! Windowed Gaussian-with-bias curve fitting
//!
//! Each of the nine channels of a window is fitted independently by
//! Levenberg–Marquardt least squares. Windows shorter than the model's
//! parameter count are passed through unfitted.

pub mod engine;
pub mod model;
pub mod solver;
pub mod stats;

pub use engine::{channel_matrix, ChannelFit, FitConfig, FitEngine, FitParams, ModelKind, WindowFit};
pub use model::{g1b, g2b, residual_g1b, residual_g2b, FitModel, Gauss1, Gauss2};
pub use solver::{levenberg_marquardt, SolverOptions, SolverOutcome};
