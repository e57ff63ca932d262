//! Gaussian-with-bias models and their analytic gradients
//!
//! G1b: `p0 + p1 * exp(-(x - p2)^2 / (2 * p3^2))`
//! G2b: `p0 + p1 * exp(-(x - p2)^2 / (2 * p3^2)) + p4 * exp(-(x - p5)^2 / (2 * p6^2))`

use crate::fit::stats::{abs_values, idx_of, max_value, mean, median, min_value, sub_offset};
use crate::types::{
    G1bPar, G2bPar, ParamVec, G1B_PARAMS, G2B_PARAMS, IDX_AMP, IDX_BIAS, IDX_CENTER, IDX_WIDTH,
};

/// FWHM = 2 * sqrt(2 ln 2) * sigma
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// A parametric model the least-squares solver can fit
pub trait FitModel<const P: usize> {
    const NAME: &'static str;
    /// Indices of center parameters (shifted with the abscissa)
    const CENTERS: &'static [usize];
    /// Indices of width parameters (sign is irrelevant to the model)
    const WIDTHS: &'static [usize];

    fn value(&self, x: f64, p: &ParamVec<P>) -> f64;

    /// Partial derivatives of the model value with respect to each parameter
    fn gradient(&self, x: f64, p: &ParamVec<P>) -> ParamVec<P>;

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> ParamVec<P>;

    /// Starting points to fit independently; the lowest objective wins
    fn initial_guesses(&self, xs: &[f64], ys: &[f64]) -> Vec<ParamVec<P>> {
        vec![self.initial_guess(xs, ys)]
    }

    /// Undo an abscissa shift and report widths as positive
    fn to_absolute(&self, mut p: ParamVec<P>, x_offset: f64) -> ParamVec<P> {
        for &i in Self::CENTERS {
            p[i] += x_offset;
        }
        for &i in Self::WIDTHS {
            p[i] = p[i].abs();
        }
        p
    }
}

/// Single hump with bias
#[derive(Clone, Copy, Debug, Default)]
pub struct Gauss1;

/// Two humps sharing one bias
#[derive(Clone, Copy, Debug, Default)]
pub struct Gauss2;

#[inline]
fn hump(x: f64, amp: f64, center: f64, width: f64) -> f64 {
    let d = x - center;
    amp * (-(d * d) / (2.0 * width * width)).exp()
}

/// (d/d amp, d/d center, d/d width) of one hump
#[inline]
fn hump_gradient(x: f64, amp: f64, center: f64, width: f64) -> (f64, f64, f64) {
    let d = x - center;
    let w2 = width * width;
    let e = (-(d * d) / (2.0 * w2)).exp();
    (e, amp * e * d / w2, amp * e * d * d / (w2 * width))
}

pub fn g1b(x: f64, p: &G1bPar) -> f64 {
    p[IDX_BIAS] + hump(x, p[IDX_AMP], p[IDX_CENTER], p[IDX_WIDTH])
}

pub fn g2b(x: f64, p: &G2bPar) -> f64 {
    p[0] + hump(x, p[1], p[2], p[3]) + hump(x, p[4], p[5], p[6])
}

/// Observed minus predicted for one `(x, y)` sample
pub fn residual_g1b(data: (f64, f64), p: &G1bPar) -> f64 {
    data.1 - g1b(data.0, p)
}

pub fn residual_g2b(data: (f64, f64), p: &G2bPar) -> f64 {
    data.1 - g2b(data.0, p)
}

/// Bias hypotheses: median, mean of the window edges, minimum and maximum.
/// The extremes seed an upward and a downward hump respectively.
fn bias_candidates(ys: &[f64]) -> Vec<f64> {
    let mut candidates = vec![median(ys)];
    if let (Some(first), Some(last)) = (ys.first(), ys.last()) {
        candidates.push(mean(&[*first, *last]));
    }
    candidates.extend(min_value(ys));
    candidates.extend(max_value(ys));

    let mut unique: Vec<f64> = Vec::with_capacity(candidates.len());
    for bias in candidates {
        if !unique.contains(&bias) {
            unique.push(bias);
        }
    }
    unique
}

/// Amplitude, center and width of the dominant hump in `dev`
fn hump_guess(xs: &[f64], dev: &[f64]) -> (f64, f64, f64) {
    let abs = abs_values(dev);
    let peak = max_value(&abs).unwrap_or(0.0);
    let k = idx_of(&abs, peak);
    let width = half_max_width(xs, &abs, k, peak).unwrap_or_else(|| fallback_width(xs));
    (dev[k], xs[k], width)
}

/// Sigma estimated from the contiguous region above half of the peak
fn half_max_width(xs: &[f64], abs: &[f64], k: usize, peak: f64) -> Option<f64> {
    if peak <= 0.0 {
        return None;
    }
    let half = 0.5 * peak;
    let mut lo = k;
    while lo > 0 && abs[lo - 1] >= half {
        lo -= 1;
    }
    let mut hi = k;
    while hi + 1 < abs.len() && abs[hi + 1] >= half {
        hi += 1;
    }
    let fwhm = xs[hi] - xs[lo];
    (fwhm > 0.0).then(|| fwhm / FWHM_PER_SIGMA)
}

fn fallback_width(xs: &[f64]) -> f64 {
    let span = match (xs.first(), xs.last()) {
        (Some(first), Some(last)) => (last - first).abs(),
        _ => 0.0,
    };
    if span > 0.0 {
        span / 4.0
    } else {
        1.0
    }
}

impl FitModel<G1B_PARAMS> for Gauss1 {
    const NAME: &'static str = "G1b";
    const CENTERS: &'static [usize] = &[IDX_CENTER];
    const WIDTHS: &'static [usize] = &[IDX_WIDTH];

    fn value(&self, x: f64, p: &G1bPar) -> f64 {
        g1b(x, p)
    }

    fn gradient(&self, x: f64, p: &G1bPar) -> G1bPar {
        let (da, dc, dw) = hump_gradient(x, p[IDX_AMP], p[IDX_CENTER], p[IDX_WIDTH]);
        G1bPar::new(1.0, da, dc, dw)
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> G1bPar {
        if xs.is_empty() {
            return G1bPar::new(0.0, 0.0, 0.0, 1.0);
        }
        seed_g1b(xs, ys, median(ys))
    }

    fn initial_guesses(&self, xs: &[f64], ys: &[f64]) -> Vec<G1bPar> {
        if xs.is_empty() {
            return vec![self.initial_guess(xs, ys)];
        }
        bias_candidates(ys)
            .into_iter()
            .map(|bias| seed_g1b(xs, ys, bias))
            .collect()
    }
}

impl FitModel<G2B_PARAMS> for Gauss2 {
    const NAME: &'static str = "G2b";
    const CENTERS: &'static [usize] = &[2, 5];
    const WIDTHS: &'static [usize] = &[3, 6];

    fn value(&self, x: f64, p: &G2bPar) -> f64 {
        g2b(x, p)
    }

    fn gradient(&self, x: f64, p: &G2bPar) -> G2bPar {
        let (da1, dc1, dw1) = hump_gradient(x, p[1], p[2], p[3]);
        let (da2, dc2, dw2) = hump_gradient(x, p[4], p[5], p[6]);
        G2bPar::from_column_slice(&[1.0, da1, dc1, dw1, da2, dc2, dw2])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> G2bPar {
        if xs.is_empty() {
            return G2bPar::from_column_slice(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        }
        seed_g2b(xs, ys, median(ys))
    }

    fn initial_guesses(&self, xs: &[f64], ys: &[f64]) -> Vec<G2bPar> {
        if xs.is_empty() {
            return vec![self.initial_guess(xs, ys)];
        }
        bias_candidates(ys)
            .into_iter()
            .map(|bias| seed_g2b(xs, ys, bias))
            .collect()
    }
}

fn seed_g1b(xs: &[f64], ys: &[f64], bias: f64) -> G1bPar {
    let (amp, center, width) = hump_guess(xs, &sub_offset(ys, bias));
    G1bPar::new(bias, amp, center, width)
}

fn seed_g2b(xs: &[f64], ys: &[f64], bias: f64) -> G2bPar {
    let dev = sub_offset(ys, bias);
    let (amp1, center1, width1) = hump_guess(xs, &dev);

    // Second hump seeded from what the first one leaves unexplained
    let rest: Vec<f64> = xs
        .iter()
        .zip(dev.iter())
        .map(|(x, d)| d - hump(*x, amp1, center1, width1))
        .collect();
    let (amp2, center2, width2) = hump_guess(xs, &rest);

    G2bPar::from_column_slice(&[bias, amp1, center1, width1, amp2, center2, width2])
}
