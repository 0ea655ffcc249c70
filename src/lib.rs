//! Multi-channel ADC calibration capture processing pipeline.
//!
//! This crate provides tools for:
//! - Decoding raw hex-word capture files into per-channel waveforms
//! - Fitting a power-law double-exponential pulse shape to every event
//! - Extracting baseline-subtracted peak amplitudes from the fitted curves
//! - Aggregating per-step statistics into per-channel response curves
//!
//! # Example
//!
//! ```no_run
//! use adc_pipeline::config::PipelineConfig;
//! use adc_pipeline::processors::response::process_file;
//! use std::path::Path;
//!
//! let config = PipelineConfig::default();
//! let analysis = process_file(Path::new("capture.dat"), &config).unwrap();
//! for curve in &analysis.curves {
//!     println!("channel {}: {} steps", curve.channel, curve.steps.len());
//! }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::PipelineConfig;
pub use core::loaders::{CaptureHeader, ChannelWaveform, EventRecord};
pub use processors::aggregate::{ResponseCurve, StepOutcome, StepStatistic};
pub use processors::response::CaptureAnalysis;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
