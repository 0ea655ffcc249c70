//! End-to-end capture processing.
//!
//! Single pass over the capture: decode one event block, fit every
//! in-window channel (parallelized with rayon; fits share no mutable
//! state), extract peak estimates, and fold them into the response-curve
//! builder. The fold is an order-independent reduction, so the result
//! does not depend on scheduling.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::loaders::{CaptureHeader, CaptureReader, LoaderError};
use crate::processors::aggregate::{ResponseCurve, ResponseCurveBuilder};
use crate::processors::fitting::{fit_waveform, PulseFitResult};
use crate::processors::peak::{self, PeakEstimate};

/// Complete output of one capture run: the response curves plus the full
/// per-event fit and peak records for auditing.
#[derive(Debug)]
pub struct CaptureAnalysis {
    pub header: CaptureHeader,
    /// One curve per channel in the configured window.
    pub curves: Vec<ResponseCurve>,
    /// Every fit performed, including failed ones.
    pub fits: Vec<PulseFitResult>,
    /// Peak estimates of the converged fits.
    pub peaks: Vec<PeakEstimate>,
    pub events_processed: usize,
    /// Malformed or out-of-range blocks skipped in lenient mode.
    pub events_skipped: usize,
    /// Fits excluded from the aggregates for failing to converge.
    pub failed_fits: usize,
}

/// Process a capture file into response curves.
pub fn process_file(path: &Path, config: &PipelineConfig) -> Result<CaptureAnalysis> {
    config.validate()?;

    let file = File::open(path)
        .with_context(|| format!("failed to open capture file: {}", path.display()))?;
    let reader = CaptureReader::new(BufReader::new(file))
        .with_context(|| format!("failed to read capture header: {}", path.display()))?;

    process_events(reader, config, |_, _| {})
}

/// Process an already-opened capture.
///
/// `progress` is invoked after each processed or skipped event with
/// `(events_seen, total_events)`.
pub fn process_events<R, F>(
    events: CaptureReader<R>,
    config: &PipelineConfig,
    mut progress: F,
) -> Result<CaptureAnalysis>
where
    R: BufRead,
    F: FnMut(usize, usize),
{
    config.validate()?;

    let header = *events.header();
    let total = header.total_events();
    let report_every = (total / 20).max(1);

    let min_channel = config.capture.min_channel;
    let max_channel = config.capture.max_channel;

    let mut builder = ResponseCurveBuilder::new(min_channel, max_channel, header.step_count);
    let mut fits = Vec::new();
    let mut peaks = Vec::new();
    let mut events_processed = 0;
    let mut events_skipped = 0;
    let mut failed_fits = 0;
    let mut events_seen = 0;

    for result in events {
        events_seen += 1;

        match result {
            Ok(event) => {
                if event.index >= total {
                    warn!(
                        "event {} is beyond the {} events announced by the header, skipping",
                        event.index, total
                    );
                    events_skipped += 1;
                    progress(events_seen, total);
                    continue;
                }

                // Per-channel fits within one event are independent
                let event_fits: Vec<PulseFitResult> = event.waveforms
                    [min_channel..=max_channel]
                    .par_iter()
                    .map(|waveform| fit_waveform(waveform, &config.fit))
                    .collect();

                for fit in event_fits {
                    match peak::from_fit(&fit, header.sample_count) {
                        Some(estimate) => {
                            builder.record(&estimate);
                            peaks.push(estimate);
                        }
                        None => {
                            builder.record_failure(fit.channel, fit.step);
                            failed_fits += 1;
                        }
                    }
                    fits.push(fit);
                }

                events_processed += 1;
                if event.index % report_every == 0 {
                    info!("event {}/{}", event.index, total);
                }
            }
            Err(err @ LoaderError::MalformedEventBlock { .. }) => {
                if config.parsing.strict {
                    return Err(anyhow::Error::new(err)
                        .context("strict mode: aborting on malformed event block"));
                }
                warn!("skipping malformed event block: {}", err);
                events_skipped += 1;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context("failed reading capture"));
            }
        }

        progress(events_seen, total);
    }

    if events_processed < total {
        warn!(
            "capture ended after {} of {} announced events",
            events_processed, total
        );
    }

    Ok(CaptureAnalysis {
        header,
        curves: builder.build(),
        fits,
        peaks,
        events_processed,
        events_skipped,
        failed_fits,
    })
}
