use ndarray::{Array2, ShapeBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::buffer::FittedBuffer;
use crate::fit::model::{FitModel, Gauss1, Gauss2};
use crate::fit::solver::{levenberg_marquardt, SolverOptions, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::types::{Channel, G1bPar, G2bPar, ParamVec, SensorPacket, G1B_PARAMS, G2B_PARAMS};

/// Which Gaussian-with-bias model every channel is fitted with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    G1b,
    G2b,
}

impl ModelKind {
    pub fn param_count(&self) -> usize {
        match self {
            ModelKind::G1b => G1B_PARAMS,
            ModelKind::G2b => G2B_PARAMS,
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "g1b" | "gauss1" => Ok(ModelKind::G1b),
            "g2b" | "gauss2" => Ok(ModelKind::G2b),
            other => Err(format!("unknown fit model '{}' (expected g1b or g2b)", other)),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::G1b => f.write_str("g1b"),
            ModelKind::G2b => f.write_str("g2b"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub model: ModelKind,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::G1b,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl FitConfig {
    fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

/// Fitted parameters of one channel, centers in absolute timestamps
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FitParams {
    G1b(G1bPar),
    G2b(G2bPar),
    /// Too few samples or an unusable result; raw values were kept
    Passthrough,
}

impl FitParams {
    pub fn evaluate(&self, x: f64) -> Option<f64> {
        match self {
            FitParams::G1b(p) => Some(Gauss1.value(x, p)),
            FitParams::G2b(p) => Some(Gauss2.value(x, p)),
            FitParams::Passthrough => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FitParams::Passthrough)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChannelFit {
    pub channel: Channel,
    pub params: FitParams,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl ChannelFit {
    fn passthrough(channel: Channel) -> Self {
        Self {
            channel,
            params: FitParams::Passthrough,
            objective: 0.0,
            iterations: 0,
            converged: false,
        }
    }
}

/// Result of fitting every channel of one window
#[derive(Clone, Debug)]
pub struct WindowFit {
    pub fitted: FittedBuffer,
    pub channels: Vec<ChannelFit>,
}

impl WindowFit {
    pub fn converged_count(&self) -> usize {
        self.channels.iter().filter(|c| c.converged).count()
    }

    pub fn passthrough_count(&self) -> usize {
        self.channels.iter().filter(|c| c.params.is_passthrough()).count()
    }
}

/// Window samples as an `(n, 9)` matrix, one column per channel.
/// Column-major, so every channel column is a contiguous slice.
pub fn channel_matrix(window: &[SensorPacket]) -> Array2<f64> {
    Array2::from_shape_fn((window.len(), Channel::COUNT).f(), |(row, col)| {
        window[row].channel(Channel::ALL[col])
    })
}

/// Fits the nine channels of a window independently
#[derive(Clone, Debug, Default)]
pub struct FitEngine {
    config: FitConfig,
}

impl FitEngine {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit every channel of `window`; the output has the window's length
    pub fn fit_window(&self, window: &[SensorPacket]) -> WindowFit {
        let mut fitted = FittedBuffer::from_window(window);
        let Some(first) = window.first() else {
            return WindowFit {
                fitted,
                channels: Channel::ALL.iter().map(|c| ChannelFit::passthrough(*c)).collect(),
            };
        };

        // Device timestamps are large; fit on offsets from the first sample
        let x0 = first.timestamp;
        let xs: Vec<f64> = window.iter().map(|p| p.timestamp - x0).collect();
        let data = channel_matrix(window);

        let mut channels = Vec::with_capacity(Channel::COUNT);
        for channel in Channel::ALL {
            let column = data.column(channel.index());
            let gathered;
            let ys = match column.as_slice() {
                Some(ys) => ys,
                None => {
                    gathered = column.to_vec();
                    &gathered
                }
            };
            let (fit, values) = self.fit_channel(channel, &xs, ys, x0);
            fitted.set_channel(channel, &values);
            channels.push(fit);
        }

        WindowFit { fitted, channels }
    }

    /// Fit one channel; `xs` are offsets from `x0`. Returns the fit and the values to plot
    pub fn fit_channel(
        &self,
        channel: Channel,
        xs: &[f64],
        ys: &[f64],
        x0: f64,
    ) -> (ChannelFit, Vec<f64>) {
        if ys.len() < self.config.model.param_count() {
            return (ChannelFit::passthrough(channel), ys.to_vec());
        }

        let options = self.config.solver_options();
        let (fit, values) = match self.config.model {
            ModelKind::G1b => {
                let (fit, values) = solve(&Gauss1, channel, xs, ys, x0, &options);
                (fit.map_params(FitParams::G1b), values)
            }
            ModelKind::G2b => {
                let (fit, values) = solve(&Gauss2, channel, xs, ys, x0, &options);
                (fit.map_params(FitParams::G2b), values)
            }
        };

        if values.iter().all(|v| v.is_finite()) {
            (fit, values)
        } else {
            log::debug!("{} fit produced non-finite values, keeping raw", channel);
            (ChannelFit::passthrough(channel), ys.to_vec())
        }
    }
}

struct SolvedChannel<const P: usize> {
    channel: Channel,
    params: ParamVec<P>,
    objective: f64,
    iterations: usize,
    converged: bool,
}

impl<const P: usize> SolvedChannel<P> {
    fn map_params(self, wrap: impl FnOnce(ParamVec<P>) -> FitParams) -> ChannelFit {
        ChannelFit {
            channel: self.channel,
            params: wrap(self.params),
            objective: self.objective,
            iterations: self.iterations,
            converged: self.converged,
        }
    }
}

fn solve<M: FitModel<P>, const P: usize>(
    model: &M,
    channel: Channel,
    xs: &[f64],
    ys: &[f64],
    x0: f64,
    options: &SolverOptions,
) -> (SolvedChannel<P>, Vec<f64>) {
    let ranked = |objective: f64| if objective.is_finite() { objective } else { f64::INFINITY };
    let outcome = model
        .initial_guesses(xs, ys)
        .into_iter()
        .map(|guess| levenberg_marquardt(model, xs, ys, guess, options))
        .min_by(|a, b| ranked(a.objective).total_cmp(&ranked(b.objective)))
        .unwrap_or_else(|| {
            levenberg_marquardt(model, xs, ys, model.initial_guess(xs, ys), options)
        });
    let values = xs.iter().map(|x| model.value(*x, &outcome.params)).collect();

    if !outcome.converged {
        log::trace!(
            "{} {} fit stopped at iteration cap (objective {:.3e})",
            channel,
            M::NAME,
            outcome.objective
        );
    }

    let solved = SolvedChannel {
        channel,
        params: model.to_absolute(outcome.params, x0),
        objective: outcome.objective,
        iterations: outcome.iterations,
        converged: outcome.converged,
    };
    (solved, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::model::g1b;
    use crate::types::{Vector3, IDX_AMP, IDX_CENTER};

    fn window_from<F: Fn(f64) -> f64>(n: usize, t0: f64, dt: f64, f: F) -> Vec<SensorPacket> {
        (0..n)
            .map(|i| {
                let t = t0 + i as f64 * dt;
                let v = f(t);
                SensorPacket::new(
                    t,
                    Vector3::new(v, 0.5, 9.81),
                    Vector3::new(0.0, 0.0, 0.0),
                    Vector3::new(16.0, 12.0, -34.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_degenerate_window_passes_raw_through() {
        let window = window_from(3, 10.0, 0.01, |t| t * 2.0);
        let result = FitEngine::default().fit_window(&window);
        assert_eq!(result.fitted.as_slice(), window.as_slice());
        assert_eq!(result.passthrough_count(), Channel::COUNT);
    }

    #[test]
    fn test_degenerate_depends_on_model() {
        let window = window_from(5, 0.0, 0.1, |t| t);
        let g1 = FitEngine::default().fit_window(&window);
        assert_eq!(g1.passthrough_count(), 0);

        let g2 = FitEngine::new(FitConfig {
            model: ModelKind::G2b,
            ..FitConfig::default()
        })
        .fit_window(&window);
        assert_eq!(g2.passthrough_count(), Channel::COUNT);
        assert_eq!(g2.fitted.as_slice(), window.as_slice());
    }

    #[test]
    fn test_empty_window() {
        let result = FitEngine::default().fit_window(&[]);
        assert!(result.fitted.is_empty());
        assert_eq!(result.channels.len(), Channel::COUNT);
    }

    #[test]
    fn test_constant_channels_with_device_timestamps() {
        let window = window_from(100, 90594.75079, 0.01, |_| -0.059);
        let result = FitEngine::default().fit_window(&window);
        assert_eq!(result.fitted.len(), 100);
        for (raw, fit) in window.iter().zip(result.fitted.as_slice()) {
            assert_eq!(fit.timestamp, raw.timestamp);
            assert!((fit.acc.x - -0.059).abs() < 1e-3);
            assert!((fit.acc.z - 9.81).abs() < 1e-3);
            assert!((fit.mag.z - -34.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_swing_recovered_in_absolute_time() {
        let truth = G1bPar::new(0.2, 4.0, 1000.5, 0.12);
        let window = window_from(100, 1000.0, 0.01, |t| g1b(t, &truth));
        let result = FitEngine::default().fit_window(&window);

        let acc_x = result.channels[Channel::AccX.index()];
        match acc_x.params {
            FitParams::G1b(p) => assert!((p[IDX_CENTER] - 1000.5).abs() < 1e-3),
            other => panic!("unexpected params {:?}", other),
        }
        for (raw, fit) in window.iter().zip(result.fitted.as_slice()) {
            assert!((raw.acc.x - fit.acc.x).abs() < 1e-3);
        }
    }

    #[test]
    fn test_hump_over_most_of_window_is_not_a_dip() {
        let t0 = 90594.0;
        let truth = G1bPar::new(-3.0, 0.5, t0 + 0.2, 0.3);
        let window = window_from(100, t0, 0.01, |t| g1b(t, &truth));
        let result = FitEngine::default().fit_window(&window);

        let acc_x = result.channels[Channel::AccX.index()];
        assert!(acc_x.objective < 1e-8, "objective {}", acc_x.objective);
        match acc_x.params {
            FitParams::G1b(p) => {
                assert!(p[IDX_AMP] > 0.0);
                assert!((p[IDX_CENTER] - (t0 + 0.2)).abs() < 1e-3);
            }
            other => panic!("unexpected params {:?}", other),
        }
        for (raw, fit) in window.iter().zip(result.fitted.as_slice()) {
            assert!((raw.acc.x - fit.acc.x).abs() < 1e-3);
        }
    }

    #[test]
    fn test_channel_matrix_layout() {
        let window = window_from(2, 0.0, 1.0, |t| t + 1.0);
        let m = channel_matrix(&window);
        assert_eq!(m.dim(), (2, 9));
        assert_eq!(m[[1, Channel::AccX.index()]], 2.0);
        assert_eq!(m[[0, Channel::MagZ.index()]], -34.0);
        assert_eq!(
            m.column(Channel::AccX.index()).as_slice(),
            Some(&[1.0, 2.0][..])
        );
    }

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!("G2B".parse::<ModelKind>(), Ok(ModelKind::G2b));
        assert_eq!("gauss1".parse::<ModelKind>(), Ok(ModelKind::G1b));
        assert!("spline".parse::<ModelKind>().is_err());
    }
}
