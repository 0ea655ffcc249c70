//! Peak extraction from fitted pulse curves.
//!
//! The peak is located on the continuous fitted model rather than on the
//! discrete samples, which denoises the estimate: a coarse grid scan
//! brackets the extremum, a golden-section refinement pins it down.

use crate::core::model::{pulse_shape, FitParameters};
use crate::processors::fitting::PulseFitResult;

/// Grid points of the coarse bracketing scan.
const GRID_POINTS: usize = 64;

/// Golden-section refinement iterations.
const REFINE_ITERATIONS: usize = 60;

/// Baseline-subtracted peak amplitude of one fitted event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    pub channel: usize,
    pub step: usize,
    pub event_in_step: usize,
    /// Extremum of the fitted curve minus the fitted pedestal.
    pub amplitude: f64,
}

/// Locate the extremum of the fitted curve and return its
/// baseline-subtracted amplitude.
///
/// The search window runs from the fitted onset to the onset plus the
/// larger decay constant, clipped to the sample range. A positive
/// amplitude parameter selects a maximum search, a negative one a
/// minimum.
pub fn peak_amplitude(params: &FitParameters, sample_count: usize) -> f64 {
    let decay = params.rise_tau().max(params.decay_tau());
    let lo = params.peak_offset();
    let hi = (lo + decay).min(sample_count as f64 - 1.0);

    if !(hi > lo) {
        // Degenerate window (onset at or past the last sample)
        return pulse_shape(lo, params) - params.pedestal();
    }

    let maximize = params.amplitude() > 0.0;
    let x = bounded_extremum(|t| pulse_shape(t, params), lo, hi, maximize);
    pulse_shape(x, params) - params.pedestal()
}

/// Derive a peak estimate from a fit result.
///
/// Returns `None` for fits flagged as failed, so convergence failures
/// never leak into the aggregates.
pub fn from_fit(fit: &PulseFitResult, sample_count: usize) -> Option<PeakEstimate> {
    if !fit.status.is_valid() {
        return None;
    }

    Some(PeakEstimate {
        channel: fit.channel,
        step: fit.step,
        event_in_step: fit.event_in_step,
        amplitude: peak_amplitude(&fit.params, sample_count),
    })
}

/// Bounded 1-D extremum search: coarse grid scan, then golden-section
/// refinement of the bracketing interval.
fn bounded_extremum<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64, maximize: bool) -> f64 {
    let sign = if maximize { 1.0 } else { -1.0 };

    let span = hi - lo;
    let mut best_x = lo;
    let mut best_v = f64::NEG_INFINITY;
    for i in 0..=GRID_POINTS {
        let x = lo + span * i as f64 / GRID_POINTS as f64;
        let v = sign * f(x);
        if v > best_v {
            best_v = v;
            best_x = x;
        }
    }

    let step = span / GRID_POINTS as f64;
    let mut a = (best_x - step).max(lo);
    let mut b = (best_x + step).min(hi);

    let phi = (5f64.sqrt() - 1.0) / 2.0;
    let mut c = b - phi * (b - a);
    let mut d = a + phi * (b - a);
    let mut fc = sign * f(c);
    let mut fd = sign * f(d);

    for _ in 0..REFINE_ITERATIONS {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - phi * (b - a);
            fc = sign * f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + phi * (b - a);
            fd = sign * f(d);
        }
        if (b - a).abs() < 1e-10 {
            break;
        }
    }

    0.5 * (a + b)
}
