//! CSV writers for pipeline results.
//!
//! This module persists the pipeline's output structures:
//! - Response curves (one row per channel and step)
//! - Per-event fit audit records, including failed fits
//! - Per-event peak estimates of the converged fits

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use crate::processors::aggregate::ResponseCurve;
use crate::processors::fitting::PulseFitResult;
use crate::processors::peak::PeakEstimate;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

/// Write response curves to CSV, one row per (channel, step).
///
/// Steps marked insufficient-data get blank mean and standard-error
/// fields rather than zeros, so downstream consumers cannot mistake a
/// missing statistic for a measured one.
pub fn write_response_csv(path: &Path, curves: &[ResponseCurve]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    let path_str = path.display().to_string();

    writer
        .write_record([
            "channel",
            "step",
            "mean",
            "standard_error",
            "valid_count",
            "failed_fits",
        ])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for curve in curves {
        for stat in &curve.steps {
            let mean = stat.mean().map_or(String::new(), |m| format!("{:.6}", m));
            let standard_error = stat
                .standard_error()
                .map_or(String::new(), |e| format!("{:.6}", e));

            writer
                .write_record(&[
                    stat.channel.to_string(),
                    stat.step.to_string(),
                    mean,
                    standard_error,
                    stat.valid_count.to_string(),
                    stat.failed_fits.to_string(),
                ])
                .map_err(|e| WriteError::CsvError {
                    path: path_str.clone(),
                    source: e,
                })?;
        }
    }

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write every fit performed to CSV, including failed ones.
pub fn write_fit_audit_csv(path: &Path, fits: &[PulseFitResult]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    let path_str = path.display().to_string();

    writer
        .write_record([
            "channel",
            "step",
            "event",
            "status",
            "chi2",
            "amplitude",
            "peak_offset",
            "power",
            "rise_tau",
            "pedestal",
            "mix",
            "decay_tau",
        ])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for fit in fits {
        let p = &fit.params;
        writer
            .write_record(&[
                fit.channel.to_string(),
                fit.step.to_string(),
                fit.event_in_step.to_string(),
                fit.status.to_string(),
                format!("{:.6}", fit.chi2),
                format!("{:.6}", p.amplitude()),
                format!("{:.6}", p.peak_offset()),
                format!("{:.6}", p.power()),
                format!("{:.6}", p.rise_tau()),
                format!("{:.6}", p.pedestal()),
                format!("{:.6}", p.mix()),
                format!("{:.6}", p.decay_tau()),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write per-event peak estimates to CSV.
pub fn write_peaks_csv(path: &Path, peaks: &[PeakEstimate]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    let path_str = path.display().to_string();

    writer
        .write_record(["channel", "step", "event", "peak_amplitude"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for peak in peaks {
        writer
            .write_record(&[
                peak.channel.to_string(),
                peak.step.to_string(),
                peak.event_in_step.to_string(),
                format!("{:.6}", peak.amplitude),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::FitParameters;
    use crate::processors::aggregate::{StepOutcome, StepStatistic};
    use crate::processors::fitting::FitStatus;
    use std::fs;
    use tempfile::tempdir;

    fn test_curve() -> ResponseCurve {
        ResponseCurve {
            channel: 7,
            steps: vec![
                StepStatistic {
                    channel: 7,
                    step: 0,
                    valid_count: 3,
                    failed_fits: 0,
                    outcome: StepOutcome::Measured {
                        mean: 123.5,
                        standard_error: 1.25,
                    },
                },
                StepStatistic {
                    channel: 7,
                    step: 1,
                    valid_count: 1,
                    failed_fits: 2,
                    outcome: StepOutcome::InsufficientData,
                },
            ],
        }
    }

    #[test]
    fn test_write_response_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("response.csv");

        write_response_csv(&path, &[test_curve()]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(
            lines[0],
            "channel,step,mean,standard_error,valid_count,failed_fits"
        );
        assert_eq!(lines.len(), 3); // header + 2 step rows
        assert_eq!(lines[1], "7,0,123.500000,1.250000,3,0");
        // Insufficient data rows have blank mean/error fields
        assert_eq!(lines[2], "7,1,,,1,2");
    }

    #[test]
    fn test_write_response_csv_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out").join("response.csv");

        write_response_csv(&path, &[test_curve()]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_fit_audit_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fits.csv");

        let fits = vec![PulseFitResult {
            channel: 2,
            step: 1,
            event_in_step: 4,
            params: FitParameters([250.0, 3.0, 5.0, 1.5, 1000.0, 0.0, 1.5]),
            status: FitStatus::Converged,
            chi2: 0.75,
        }];

        write_fit_audit_csv(&path, &fits).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2,1,4,converged,0.750000,250.000000"));
    }

    #[test]
    fn test_write_peaks_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("peaks.csv");

        let peaks = vec![
            PeakEstimate {
                channel: 0,
                step: 0,
                event_in_step: 0,
                amplitude: 401.25,
            },
            PeakEstimate {
                channel: 0,
                step: 1,
                event_in_step: 0,
                amplitude: 802.5,
            },
        ];

        write_peaks_csv(&path, &peaks).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "channel,step,event,peak_amplitude");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "0,0,0,401.250000");
    }
}
