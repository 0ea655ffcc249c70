//! Core data types, capture decoding, and result persistence.

pub mod loaders;
pub mod model;
pub mod writers;

pub use loaders::{CaptureHeader, CaptureReader, ChannelWaveform, EventRecord};
pub use model::{pulse_shape, FitParameters};
pub use writers::{write_fit_audit_csv, write_peaks_csv, write_response_csv, WriteError};
