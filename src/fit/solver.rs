//! Levenberg–Marquardt nonlinear least squares on fixed-size parameter vectors
//!
//! Minimises `sum_i (y_i - f(x_i; p))^2` using the model's analytic gradient.
//! Damping follows Marquardt: `(J^T J + lambda * diag(J^T J)) dp = J^T r`.

use serde::{Deserialize, Serialize};

use crate::fit::model::FitModel;
use crate::types::{NormalMat, ParamVec};

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

const INITIAL_LAMBDA: f64 = 1e-3;
const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e12;
const LAMBDA_FACTOR: f64 = 10.0;
// Keeps columns with zero sensitivity (e.g. center while amp == 0) solvable
const MIN_DIAGONAL: f64 = 1e-12;
// Relative to the signal energy; below this the fit is exact to rounding
const ZERO_OBJECTIVE: f64 = 1e-24;
// Small improvements must repeat this many times before stopping
const STALL_STEPS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Stop once an accepted step improves the objective by less than this fraction
    pub tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SolverOutcome<const P: usize> {
    pub params: ParamVec<P>,
    pub objective: f64,
    pub iterations: usize,
    /// False when the iteration cap was hit; params are still the best iterate
    pub converged: bool,
}

/// Sum of squared residuals
pub fn objective<M: FitModel<P>, const P: usize>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    p: &ParamVec<P>,
) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(x, y)| {
            let r = y - model.value(*x, p);
            r * r
        })
        .sum()
}

fn normal_equations<M: FitModel<P>, const P: usize>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    p: &ParamVec<P>,
) -> (NormalMat<P>, ParamVec<P>) {
    let mut jtj = NormalMat::<P>::zeros();
    let mut jtr = ParamVec::<P>::zeros();
    for (x, y) in xs.iter().zip(ys) {
        let g = model.gradient(*x, p);
        let r = y - model.value(*x, p);
        jtj += g * g.transpose();
        jtr += g * r;
    }
    (jtj, jtr)
}

/// Fit `model` to `(xs, ys)` starting from `initial`
pub fn levenberg_marquardt<M: FitModel<P>, const P: usize>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    initial: ParamVec<P>,
    options: &SolverOptions,
) -> SolverOutcome<P> {
    let mut params = initial;
    let mut cost = objective(model, xs, ys, &params);
    let zero_cost = ZERO_OBJECTIVE * (1.0 + ys.iter().map(|y| y * y).sum::<f64>());
    let mut lambda = INITIAL_LAMBDA;
    let mut iterations = 0;
    let mut stalled = 0;
    let mut converged = false;

    if !cost.is_finite() {
        return SolverOutcome {
            params,
            objective: cost,
            iterations,
            converged,
        };
    }

    while iterations < options.max_iterations {
        if cost <= zero_cost {
            converged = true;
            break;
        }
        iterations += 1;

        let (jtj, jtr) = normal_equations(model, xs, ys, &params);
        let mut accepted = false;

        while lambda <= MAX_LAMBDA {
            let mut damped = jtj;
            for i in 0..P {
                damped[(i, i)] += lambda * jtj[(i, i)].max(MIN_DIAGONAL);
            }
            let Some(cholesky) = damped.cholesky() else {
                lambda *= LAMBDA_FACTOR;
                continue;
            };
            let candidate = params + cholesky.solve(&jtr);
            let candidate_cost = objective(model, xs, ys, &candidate);

            if candidate_cost.is_finite() && candidate_cost < cost {
                let improvement = cost - candidate_cost;
                if improvement <= options.tolerance * cost {
                    stalled += 1;
                } else {
                    stalled = 0;
                }
                params = candidate;
                cost = candidate_cost;
                lambda = (lambda / LAMBDA_FACTOR).max(MIN_LAMBDA);
                accepted = true;
                break;
            }
            lambda *= LAMBDA_FACTOR;
        }

        // No damping level improves the objective: local minimum
        if !accepted || stalled >= STALL_STEPS {
            converged = true;
            break;
        }
    }

    if !converged && cost <= zero_cost {
        converged = true;
    }

    SolverOutcome {
        params,
        objective: cost,
        iterations,
        converged,
    }
}
