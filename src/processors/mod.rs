//! Waveform processing modules.

pub mod aggregate;
pub mod fitting;
pub mod peak;
pub mod response;

// Re-export key types for convenience
pub use aggregate::{ResponseCurve, ResponseCurveBuilder, StepOutcome, StepStatistic};
pub use fitting::{fit_waveform, FitStatus, PulseFitResult};
pub use peak::PeakEstimate;
pub use response::{process_events, process_file, CaptureAnalysis};
