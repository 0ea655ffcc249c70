//! Response-curve rendering.
//!
//! This module renders per-channel response curves (mean peak amplitude
//! vs. calibration step, with error bars) as PNG images using the
//! plotters library.

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::processors::aggregate::{ResponseCurve, StepOutcome};

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("channel {0}: no measured steps to plot")]
    EmptyCurve(usize),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Plot width in pixels.
const PLOT_WIDTH: u32 = 900;

/// Plot height in pixels.
const PLOT_HEIGHT: u32 = 900;

/// Plot one channel's response curve and save as PNG.
///
/// Steps marked insufficient-data are skipped; if no step carries a
/// measured statistic the plot is refused instead of rendering an empty
/// frame.
pub fn plot_response_curve(output_path: &Path, curve: &ResponseCurve) -> Result<()> {
    let points: Vec<(f64, f64, f64)> = curve
        .steps
        .iter()
        .filter_map(|stat| match stat.outcome {
            StepOutcome::Measured {
                mean,
                standard_error,
            } => Some((stat.step as f64, mean, standard_error)),
            StepOutcome::InsufficientData => None,
        })
        .collect();

    if points.is_empty() {
        return Err(VisualizationError::EmptyCurve(curve.channel));
    }

    let step_count = curve.steps.len();
    let x_range = -0.5..(step_count as f64 - 0.5);

    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;
    for &(_, mean, err) in &points {
        y_min = y_min.min(mean - err);
        y_max = y_max.max(mean + err);
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }
    let y_padding = (y_max - y_min) * 0.05;
    let y_range = (y_min - y_padding)..(y_max + y_padding);

    let root = BitMapBackend::new(output_path, (PLOT_WIDTH, PLOT_HEIGHT)).into_drawing_area();

    root.fill(&WHITE)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(x_range, y_range)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(points.iter().map(|&(x, mean, err)| {
            ErrorBar::new_vertical(x, mean - err, mean, mean + err, BLACK.filled(), 8)
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, mean, _)| Circle::new((x, mean), 4, BLACK.filled())),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    root.present()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

/// Plot every channel's response curve into `output_dir`.
///
/// Channels without a single measured step are skipped. Returns the
/// paths of the images written.
pub fn plot_response_curves(output_dir: &Path, curves: &[ResponseCurve]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;

    let mut written = Vec::new();
    for curve in curves {
        let path = output_dir.join(format!("response_channel{:02}.png", curve.channel));
        match plot_response_curve(&path, curve) {
            Ok(()) => written.push(path),
            Err(VisualizationError::EmptyCurve(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::aggregate::StepStatistic;
    use tempfile::tempdir;

    fn measured(channel: usize, step: usize, mean: f64, standard_error: f64) -> StepStatistic {
        StepStatistic {
            channel,
            step,
            valid_count: 3,
            failed_fits: 0,
            outcome: StepOutcome::Measured {
                mean,
                standard_error,
            },
        }
    }

    fn empty(channel: usize, step: usize) -> StepStatistic {
        StepStatistic {
            channel,
            step,
            valid_count: 0,
            failed_fits: 3,
            outcome: StepOutcome::InsufficientData,
        }
    }

    #[test]
    fn test_plot_response_curve() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channel05.png");

        let curve = ResponseCurve {
            channel: 5,
            steps: vec![
                measured(5, 0, 410.0, 3.5),
                measured(5, 1, 805.0, 4.1),
                empty(5, 2),
            ],
        };

        plot_response_curve(&path, &curve).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_refuses_empty_curve() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channel00.png");

        let curve = ResponseCurve {
            channel: 0,
            steps: vec![empty(0, 0), empty(0, 1)],
        };

        let result = plot_response_curve(&path, &curve);
        assert!(matches!(result, Err(VisualizationError::EmptyCurve(0))));
    }

    #[test]
    fn test_plot_all_skips_empty_channels() {
        let dir = tempdir().unwrap();

        let curves = vec![
            ResponseCurve {
                channel: 0,
                steps: vec![measured(0, 0, 100.0, 1.0), measured(0, 1, 200.0, 1.0)],
            },
            ResponseCurve {
                channel: 1,
                steps: vec![empty(1, 0), empty(1, 1)],
            },
        ];

        let written = plot_response_curves(dir.path(), &curves).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("response_channel00.png"));
    }
}
