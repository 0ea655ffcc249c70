//! Parametric pulse-shape model.
//!
//! The signal model is a pedestal plus a power-law rise with a
//! double-exponential decay envelope. The envelope is normalized so that
//! with the mix weight at zero the curve peaks at `t = peak_offset +
//! rise_tau` with value `pedestal + amplitude`.
//!
//! Evaluation is a pure function of `(t, parameters)` with no shared
//! state, so concurrent fits can evaluate the model freely.

/// Number of parameters in the pulse-shape model.
pub const NUM_PARAMS: usize = 7;

/// Parameters of the power-law double-exponential pulse shape.
///
/// Layout: `[amplitude, peak_offset, power, rise_tau, pedestal, mix,
/// decay_tau]`. The mix weight is reserved (held at 0) and the second
/// decay constant is pinned to the configured rise-time constant; neither
/// is varied by the fitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitParameters(pub [f64; NUM_PARAMS]);

impl FitParameters {
    /// Peak amplitude above the pedestal.
    #[inline]
    pub fn amplitude(&self) -> f64 {
        self.0[0]
    }

    /// Onset position of the pulse, in samples.
    #[inline]
    pub fn peak_offset(&self) -> f64 {
        self.0[1]
    }

    /// Power-law exponent of the rising edge.
    #[inline]
    pub fn power(&self) -> f64 {
        self.0[2]
    }

    /// Primary rise/decay time constant, in samples.
    #[inline]
    pub fn rise_tau(&self) -> f64 {
        self.0[3]
    }

    /// Baseline offset.
    #[inline]
    pub fn pedestal(&self) -> f64 {
        self.0[4]
    }

    /// Mix weight of the second decay term (reserved, always 0).
    #[inline]
    pub fn mix(&self) -> f64 {
        self.0[5]
    }

    /// Second decay time constant, in samples (never varied).
    #[inline]
    pub fn decay_tau(&self) -> f64 {
        self.0[6]
    }

    /// Returns true if every parameter is a finite number.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Evaluate the pulse shape at continuous sample position `t`.
///
/// Below the onset the curve is the flat pedestal. Past the onset each
/// decay term is scaled by `e^power / tau^power` so a pure single-decay
/// pulse reaches exactly `pedestal + amplitude` at `t = peak_offset +
/// rise_tau`.
pub fn pulse_shape(t: f64, p: &FitParameters) -> f64 {
    let [amplitude, onset, power, rise_tau, pedestal, mix, decay_tau] = p.0;

    if t < onset {
        return pedestal;
    }

    let dt = t - onset;
    let norm = power.exp();
    let primary = (1.0 - mix) / rise_tau.powf(power) * (-dt * power / rise_tau).exp();
    let secondary = mix / decay_tau.powf(power) * (-dt * power / decay_tau).exp();

    pedestal + amplitude * dt.powf(power) * norm * (primary + secondary)
}
