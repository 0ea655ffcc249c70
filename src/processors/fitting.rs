//! Weighted nonlinear least-squares pulse fitting.
//!
//! Every channel waveform is fitted independently against the
//! [`pulse_shape`] model with a bounded Levenberg-Marquardt iteration:
//! normal equations over the five free parameters (the mix weight and
//! second decay constant stay pinned), a numeric central-difference
//! Jacobian, and multiplicative damping. The fitter is a pure function of
//! its inputs and returns a fresh result per call, so fits can run
//! concurrently across channels with no shared state.
//!
//! Per-sample uncertainty is 10% of the raw ADC value with a configurable
//! floor, so zero-valued samples never collapse to infinite weight.

use std::fmt;

use nalgebra::{SMatrix, SVector};

use crate::config::FitConfig;
use crate::core::loaders::ChannelWaveform;
use crate::core::model::{pulse_shape, FitParameters};

/// Parameters varied by the optimizer (the trailing two are pinned).
const NUM_FREE: usize = 5;

/// Relative per-sample uncertainty on raw ADC values.
const RELATIVE_SIGMA: f64 = 0.1;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;

type Matrix = SMatrix<f64, NUM_FREE, NUM_FREE>;
type Vector = SVector<f64, NUM_FREE>;

/// Outcome quality of a single pulse fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// The solver met the convergence tolerance.
    Converged,
    /// Iteration cap or damping limit reached without convergence.
    NotConverged,
    /// The solver produced non-finite parameters or chi-square.
    NonFinite,
}

impl FitStatus {
    /// Whether the fitted parameters are usable downstream.
    #[inline]
    pub fn is_valid(self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FitStatus::Converged => "converged",
            FitStatus::NotConverged => "not_converged",
            FitStatus::NonFinite => "non_finite",
        };
        f.write_str(label)
    }
}

/// Fit of one channel waveform, produced exactly once per event.
#[derive(Debug, Clone)]
pub struct PulseFitResult {
    pub channel: usize,
    pub step: usize,
    pub event_in_step: usize,
    pub params: FitParameters,
    pub status: FitStatus,
    /// Weighted sum of squared residuals at the returned parameters.
    pub chi2: f64,
}

/// Box constraints on the first two parameters; the rest float freely.
struct Bounds {
    lower: [f64; 2],
    upper: [f64; 2],
}

impl Bounds {
    fn apply(&self, p: &mut FitParameters) {
        for k in 0..2 {
            p.0[k] = p.0[k].clamp(self.lower[k], self.upper[k]);
        }
    }
}

/// Derive starting parameters and bounds from the raw waveform.
///
/// The amplitude guess is 70% of the baseline-subtracted maximum, the
/// onset guess one rise time before the maximum sample. `amp_raw` is
/// never negative because the baseline sample participates in the
/// maximum, so the amplitude bounds are ordered.
fn initial_guess(waveform: &ChannelWaveform, rise: f64) -> (FitParameters, Bounds) {
    let (max_pos, max_val) = waveform.max_sample();
    let max_pos = max_pos as f64;
    let baseline = waveform.baseline() as f64;
    let amp_raw = max_val as f64 - baseline;

    let params = FitParameters([
        0.7 * amp_raw,
        max_pos - rise,
        5.0,
        rise,
        baseline,
        0.0,
        rise,
    ]);

    let bounds = Bounds {
        lower: [-1.5 * amp_raw, max_pos - 3.0 * rise],
        upper: [1.5 * amp_raw, max_pos + rise],
    };

    (params, bounds)
}

fn chi_square(samples: &[u16], sigmas: &[f64], p: &FitParameters) -> f64 {
    samples
        .iter()
        .zip(sigmas)
        .enumerate()
        .map(|(i, (&y, &sigma))| {
            let r = (y as f64 - pulse_shape(i as f64, p)) / sigma;
            r * r
        })
        .sum()
}

/// Central-difference partial derivative of the model in parameter `k`.
fn partial(t: f64, p: &FitParameters, k: usize) -> f64 {
    let h = 1e-6 * p.0[k].abs().max(1.0);
    let mut lo = *p;
    let mut hi = *p;
    lo.0[k] -= h;
    hi.0[k] += h;
    (pulse_shape(t, &hi) - pulse_shape(t, &lo)) / (2.0 * h)
}

/// Accumulate the weighted normal equations `J^T J` and `J^T r`.
fn normal_equations(samples: &[u16], sigmas: &[f64], p: &FitParameters) -> (Matrix, Vector) {
    let mut jtj = Matrix::zeros();
    let mut jtr = Vector::zeros();

    for (i, (&y, &sigma)) in samples.iter().zip(sigmas).enumerate() {
        let t = i as f64;
        let residual = (y as f64 - pulse_shape(t, p)) / sigma;

        let mut grad = [0.0; NUM_FREE];
        for (k, g) in grad.iter_mut().enumerate() {
            *g = partial(t, p, k) / sigma;
        }

        for a in 0..NUM_FREE {
            jtr[a] += grad[a] * residual;
            for b in a..NUM_FREE {
                jtj[(a, b)] += grad[a] * grad[b];
            }
        }
    }

    for a in 0..NUM_FREE {
        for b in 0..a {
            jtj[(a, b)] = jtj[(b, a)];
        }
    }

    (jtj, jtr)
}

/// Fit the pulse-shape model to one channel waveform.
///
/// Returns the converged parameters, or the best parameters seen together
/// with a failure status when the solver exhausts its iteration cap,
/// dead-ends in damping escalation, or produces non-finite values. Failed
/// fits must not contribute peak estimates downstream.
pub fn fit_waveform(waveform: &ChannelWaveform, cfg: &FitConfig) -> PulseFitResult {
    let samples = &waveform.samples;
    let sigmas: Vec<f64> = samples
        .iter()
        .map(|&v| (RELATIVE_SIGMA * v as f64).max(cfg.sigma_floor))
        .collect();

    let (mut params, bounds) = initial_guess(waveform, cfg.rise_time);
    bounds.apply(&mut params);

    let mut chi2 = chi_square(samples, &sigmas, &params);
    let mut lambda = LAMBDA_INIT;
    let mut status = FitStatus::NotConverged;

    if chi2 == 0.0 {
        // The starting point already reproduces the data exactly
        // (e.g. a flat waveform matching the pedestal guess).
        status = FitStatus::Converged;
    } else {
        'outer: for _ in 0..cfg.max_iterations {
            let (jtj, jtr) = normal_equations(samples, &sigmas, &params);

            loop {
                let mut damped = jtj;
                for k in 0..NUM_FREE {
                    let d = jtj[(k, k)];
                    damped[(k, k)] = d + lambda * d.max(1e-12);
                }

                let step = match damped.cholesky() {
                    Some(chol) => chol.solve(&jtr),
                    None => {
                        lambda *= LAMBDA_UP;
                        if lambda > LAMBDA_MAX {
                            break 'outer;
                        }
                        continue;
                    }
                };

                let mut trial = params;
                for k in 0..NUM_FREE {
                    trial.0[k] += step[k];
                }
                bounds.apply(&mut trial);

                let trial_chi2 = chi_square(samples, &sigmas, &trial);
                if trial_chi2.is_finite() && trial_chi2 <= chi2 {
                    let improvement = (chi2 - trial_chi2) / chi2.max(f64::MIN_POSITIVE);
                    params = trial;
                    chi2 = trial_chi2;
                    lambda = (lambda * LAMBDA_DOWN).max(LAMBDA_MIN);

                    if improvement < cfg.tolerance || chi2 == 0.0 {
                        status = FitStatus::Converged;
                        break 'outer;
                    }
                    break;
                }

                lambda *= LAMBDA_UP;
                if lambda > LAMBDA_MAX {
                    break 'outer;
                }
            }
        }
    }

    if !params.is_finite() || !chi2.is_finite() {
        status = FitStatus::NonFinite;
    }

    PulseFitResult {
        channel: waveform.channel,
        step: waveform.step,
        event_in_step: waveform.event_in_step,
        params,
        status,
        chi2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveform_from_model(p: &FitParameters, sample_count: usize) -> ChannelWaveform {
        let samples = (0..sample_count)
            .map(|i| pulse_shape(i as f64, p).round() as u16)
            .collect();
        ChannelWaveform {
            channel: 0,
            step: 0,
            event_in_step: 0,
            samples,
        }
    }

    #[test]
    fn test_initial_guess_matches_waveform() {
        let w = ChannelWaveform {
            channel: 3,
            step: 1,
            event_in_step: 0,
            samples: vec![100, 120, 400, 300, 150],
        };
        let (p, bounds) = initial_guess(&w, 1.5);

        assert!((p.amplitude() - 0.7 * 300.0).abs() < 1e-12);
        assert!((p.peak_offset() - (2.0 - 1.5)).abs() < 1e-12);
        assert_eq!(p.power(), 5.0);
        assert_eq!(p.rise_tau(), 1.5);
        assert_eq!(p.pedestal(), 100.0);
        assert_eq!(p.mix(), 0.0);
        assert_eq!(p.decay_tau(), 1.5);

        assert_eq!(bounds.lower[0], -450.0);
        assert_eq!(bounds.upper[0], 450.0);
        assert_eq!(bounds.lower[1], 2.0 - 4.5);
        assert_eq!(bounds.upper[1], 2.0 + 1.5);
    }

    #[test]
    fn test_fit_recovers_synthetic_pulse() {
        let truth = FitParameters([800.0, 3.2, 5.0, 1.5, 1000.0, 0.0, 1.5]);
        let w = waveform_from_model(&truth, 24);

        let result = fit_waveform(&w, &FitConfig::default());
        assert_eq!(result.status, FitStatus::Converged);

        // Quantization to integer ADC counts is the only noise source
        assert!((result.params.amplitude() - 800.0).abs() / 800.0 < 0.02);
        assert!((result.params.pedestal() - 1000.0).abs() < 5.0);
        assert!((result.params.peak_offset() - 3.2).abs() < 0.5);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let truth = FitParameters([500.0, 4.0, 5.0, 1.5, 900.0, 0.0, 1.5]);
        let w = waveform_from_model(&truth, 20);
        let cfg = FitConfig::default();

        let a = fit_waveform(&w, &cfg);
        let b = fit_waveform(&w, &cfg);

        assert_eq!(a.params, b.params);
        assert_eq!(a.status, b.status);
        assert_eq!(a.chi2, b.chi2);
    }

    #[test]
    fn test_flat_waveform_converges_immediately() {
        let w = ChannelWaveform {
            channel: 0,
            step: 0,
            event_in_step: 0,
            samples: vec![250; 16],
        };
        let result = fit_waveform(&w, &FitConfig::default());

        assert_eq!(result.status, FitStatus::Converged);
        assert_eq!(result.chi2, 0.0);
        assert_eq!(result.params.amplitude(), 0.0);
        assert_eq!(result.params.pedestal(), 250.0);
    }

    #[test]
    fn test_exhausted_iterations_flag_failure() {
        let truth = FitParameters([600.0, 3.0, 5.0, 1.5, 800.0, 0.0, 1.5]);
        let w = waveform_from_model(&truth, 20);

        let cfg = FitConfig {
            max_iterations: 0,
            ..FitConfig::default()
        };
        let result = fit_waveform(&w, &cfg);
        assert_eq!(result.status, FitStatus::NotConverged);
        assert!(!result.status.is_valid());
    }

    #[test]
    fn test_amplitude_stays_within_bounds() {
        let w = ChannelWaveform {
            channel: 0,
            step: 0,
            event_in_step: 0,
            samples: vec![10, 11, 200, 12, 10, 9, 10, 11, 10, 10],
        };
        let result = fit_waveform(&w, &FitConfig::default());

        let amp_raw = 190.0;
        assert!(result.params.amplitude() <= 1.5 * amp_raw + 1e-9);
        assert!(result.params.amplitude() >= -1.5 * amp_raw - 1e-9);
        assert!(result.params.peak_offset() <= 2.0 + 1.5 + 1e-9);
        assert!(result.params.peak_offset() >= 2.0 - 4.5 - 1e-9);
    }
}
