//! Order-independent aggregation of peak estimates into response curves.
//!
//! Each (channel, step) cell keeps a count/sum/sum-of-squares accumulator.
//! The reduction is associative and commutative, so results are identical
//! whatever order estimates arrive in, and partitioned accumulators can be
//! merged after parallel processing.

use crate::processors::peak::PeakEstimate;

/// Running accumulator for one (channel, step) cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepAccumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    failed_fits: u64,
}

impl StepAccumulator {
    /// Fold one peak estimate into the cell.
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// Tally a fit that failed to converge for this cell.
    pub fn record_failure(&mut self) {
        self.failed_fits += 1;
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &StepAccumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.failed_fits += other.failed_fits;
    }

    /// Number of valid estimates recorded.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    fn outcome(&self) -> StepOutcome {
        if self.count < 2 {
            return StepOutcome::InsufficientData;
        }

        let n = self.count as f64;
        let mean = self.sum / n;
        // Unbiased sample variance; clamped at zero against cancellation
        let variance = ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0);

        StepOutcome::Measured {
            mean,
            standard_error: (variance / n).sqrt(),
        }
    }
}

/// Aggregate outcome for one (channel, step) cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Mean peak amplitude and its standard error over all valid events.
    Measured { mean: f64, standard_error: f64 },
    /// Fewer than two valid estimates; no mean or error is reported.
    InsufficientData,
}

/// Statistic for one calibration step of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStatistic {
    pub channel: usize,
    pub step: usize,
    /// Valid peak estimates folded into this cell.
    pub valid_count: u64,
    /// Fits excluded because they failed to converge.
    pub failed_fits: u64,
    pub outcome: StepOutcome,
}

impl StepStatistic {
    /// Mean peak amplitude, if measured.
    pub fn mean(&self) -> Option<f64> {
        match self.outcome {
            StepOutcome::Measured { mean, .. } => Some(mean),
            StepOutcome::InsufficientData => None,
        }
    }

    /// Standard error of the mean, if measured.
    pub fn standard_error(&self) -> Option<f64> {
        match self.outcome {
            StepOutcome::Measured { standard_error, .. } => Some(standard_error),
            StepOutcome::InsufficientData => None,
        }
    }
}

/// Per-channel ordered sequence of step statistics: the pipeline's final
/// artifact.
#[derive(Debug, Clone)]
pub struct ResponseCurve {
    pub channel: usize,
    /// One statistic per step, ordered by step index.
    pub steps: Vec<StepStatistic>,
}

/// Accumulates peak estimates for every (channel, step) cell in the
/// configured window.
///
/// Cells live in a flat array keyed by `(channel - min_channel) *
/// step_count + step`, sized from the validated header. Estimates outside
/// the window or step range are ignored.
#[derive(Debug, Clone)]
pub struct ResponseCurveBuilder {
    min_channel: usize,
    max_channel: usize,
    step_count: usize,
    cells: Vec<StepAccumulator>,
}

impl ResponseCurveBuilder {
    /// Create a builder covering `[min_channel, max_channel]` over
    /// `step_count` steps.
    pub fn new(min_channel: usize, max_channel: usize, step_count: usize) -> Self {
        let channels = max_channel - min_channel + 1;
        Self {
            min_channel,
            max_channel,
            step_count,
            cells: vec![StepAccumulator::default(); channels * step_count],
        }
    }

    fn cell_mut(&mut self, channel: usize, step: usize) -> Option<&mut StepAccumulator> {
        if channel < self.min_channel || channel > self.max_channel || step >= self.step_count {
            return None;
        }
        let idx = (channel - self.min_channel) * self.step_count + step;
        Some(&mut self.cells[idx])
    }

    /// Fold one peak estimate into its cell.
    pub fn record(&mut self, estimate: &PeakEstimate) {
        if let Some(cell) = self.cell_mut(estimate.channel, estimate.step) {
            cell.record(estimate.amplitude);
        }
    }

    /// Tally a failed fit for its cell.
    pub fn record_failure(&mut self, channel: usize, step: usize) {
        if let Some(cell) = self.cell_mut(channel, step) {
            cell.record_failure();
        }
    }

    /// Fold a partition's accumulators into this builder. Both builders
    /// must cover the same window and step count.
    pub fn merge(&mut self, other: &ResponseCurveBuilder) {
        debug_assert_eq!(self.min_channel, other.min_channel);
        debug_assert_eq!(self.max_channel, other.max_channel);
        debug_assert_eq!(self.step_count, other.step_count);

        for (cell, other_cell) in self.cells.iter_mut().zip(&other.cells) {
            cell.merge(other_cell);
        }
    }

    /// Produce one ordered response curve per channel in the window.
    pub fn build(self) -> Vec<ResponseCurve> {
        let step_count = self.step_count;
        (self.min_channel..=self.max_channel)
            .map(|channel| {
                let base = (channel - self.min_channel) * step_count;
                let steps = (0..step_count)
                    .map(|step| {
                        let cell = &self.cells[base + step];
                        StepStatistic {
                            channel,
                            step,
                            valid_count: cell.count,
                            failed_fits: cell.failed_fits,
                            outcome: cell.outcome(),
                        }
                    })
                    .collect();
                ResponseCurve { channel, steps }
            })
            .collect()
    }
}
