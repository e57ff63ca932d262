//! Fixed-size parameter types for the curve-fitting models
//!
//! Parameter vectors and normal-equation matrices are sized at compile time
//! so the solver can use stack-allocated nalgebra types.

use nalgebra::{SMatrix, SVector};

// ===== Parameter Counts =====
pub const G1B_PARAMS: usize = 4; // bias, amp, center, width
pub const G2B_PARAMS: usize = 7; // bias, (amp, center, width) x 2

// ===== Parameter Vectors =====
pub type G1bPar = SVector<f64, G1B_PARAMS>;
pub type G2bPar = SVector<f64, G2B_PARAMS>;

// ===== Solver Types =====
pub type ParamVec<const P: usize> = SVector<f64, P>;
pub type NormalMat<const P: usize> = SMatrix<f64, P, P>;

// Parameter indices shared by both models
pub const IDX_BIAS: usize = 0;
pub const IDX_AMP: usize = 1;
pub const IDX_CENTER: usize = 2;
pub const IDX_WIDTH: usize = 3;
