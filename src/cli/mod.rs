//! Command-line interface for the ADC pipeline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::core::loaders::{self, LoaderError};
use crate::core::writers;
use crate::processors::response;
use crate::visualization;

#[derive(Parser)]
#[command(name = "adc-pipeline")]
#[command(about = "Multi-channel ADC calibration capture processing", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a capture file into per-channel response curves
    Process {
        /// Input capture file (.dat or .txt)
        input: PathBuf,
        /// Output directory for CSV results
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
        /// Lowest channel to process
        #[arg(long)]
        min_channel: Option<usize>,
        /// Highest channel to process
        #[arg(long)]
        max_channel: Option<usize>,
        /// Abort on the first malformed event block
        #[arg(long)]
        strict: bool,
        /// Render per-channel response plots
        #[arg(long)]
        plots: bool,
        /// Output directory for plots (defaults to <output_dir>/plots)
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },

    /// Print capture header info and a census of its event blocks
    Inspect {
        /// Input capture file
        input: PathBuf,
    },
}

/// Create a progress bar sized to the announced event count
fn create_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.green} {pos}/{len} events {msg}")
            .unwrap(),
    );
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.len() > 39 {
            format!("{}...", &value[..36])
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Process {
            input,
            output_dir,
            min_channel,
            max_channel,
            strict,
            plots,
            plot_dir,
        } => {
            cmd_process(
                &input,
                &output_dir,
                min_channel,
                max_channel,
                strict,
                plots,
                plot_dir,
                &config,
            );
        }
        Commands::Inspect { input } => {
            cmd_inspect(&input);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_process(
    input: &PathBuf,
    output_dir: &PathBuf,
    min_channel: Option<usize>,
    max_channel: Option<usize>,
    strict: bool,
    plots: bool,
    plot_dir: Option<PathBuf>,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    // Apply CLI overrides to the configured window and policy
    let mut config = config.clone();
    if let Some(min) = min_channel {
        config.capture.min_channel = min;
    }
    if let Some(max) = max_channel {
        config.capture.max_channel = max;
    }
    if strict {
        config.parsing.strict = true;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    println!("Processing capture...");
    println!("Input: {}", input.display());
    println!("Output directory: {}", output_dir.display());
    println!(
        "Channels: {}-{}",
        config.capture.min_channel, config.capture.max_channel
    );

    let reader = match loaders::open_capture(input) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to open capture: {}", e);
            std::process::exit(1);
        }
    };

    let pb = create_progress_bar(reader.header().total_events());

    let analysis = match response::process_events(reader, &config, |done, _| {
        pb.set_position(done as u64)
    }) {
        Ok(analysis) => {
            pb.finish_and_clear();
            analysis
        }
        Err(e) => {
            pb.finish_and_clear();
            error!("Processing failed: {:#}", e);
            std::process::exit(1);
        }
    };

    // Persist curves plus the full audit trail
    let response_path = output_dir.join("response_curves.csv");
    let fits_path = output_dir.join("fit_audit.csv");
    let peaks_path = output_dir.join("peak_estimates.csv");

    let write_result = writers::write_response_csv(&response_path, &analysis.curves)
        .and_then(|_| writers::write_fit_audit_csv(&fits_path, &analysis.fits))
        .and_then(|_| writers::write_peaks_csv(&peaks_path, &analysis.peaks));

    if let Err(e) = write_result {
        error!("Failed to write results: {}", e);
        std::process::exit(1);
    }

    let mut plot_count = 0;
    if plots {
        let plot_output = plot_dir.unwrap_or_else(|| output_dir.join("plots"));
        match visualization::plot_response_curves(&plot_output, &analysis.curves) {
            Ok(written) => plot_count = written.len(),
            Err(e) => {
                error!("Plot rendering failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    print_summary(
        "Processing Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output directory", output_dir.display().to_string()),
            (
                "Steps x events",
                format!(
                    "{} x {}",
                    analysis.header.step_count, analysis.header.events_per_step
                ),
            ),
            ("Events processed", analysis.events_processed.to_string()),
            ("Events skipped", analysis.events_skipped.to_string()),
            ("Curves built", analysis.curves.len().to_string()),
            ("Failed fits", analysis.failed_fits.to_string()),
            ("Plots written", plot_count.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_inspect(input: &PathBuf) {
    let start = Instant::now();

    let reader = match loaders::open_capture(input) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to open capture: {}", e);
            std::process::exit(1);
        }
    };

    let header = *reader.header();
    println!("Capture: {}", input.display());
    println!("  steps: {}", header.step_count);
    println!("  events per step: {}", header.events_per_step);
    println!("  ADC words per sample: {}", header.adc_words_per_step);
    println!("  samples per pulse: {}", header.sample_count);
    println!("  expected events: {}", header.total_events());
    println!("  expected words per event: {}", header.words_per_event());

    let mut complete = 0usize;
    let mut malformed = 0usize;
    for result in reader {
        match result {
            Ok(_) => complete += 1,
            Err(LoaderError::MalformedEventBlock { event, found, .. }) => {
                warn!("event {}: malformed block ({} words)", event, found);
                malformed += 1;
            }
            Err(e) => {
                error!("Failed reading capture: {}", e);
                std::process::exit(1);
            }
        }
    }

    print_summary(
        "Inspection Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Expected events", header.total_events().to_string()),
            ("Complete blocks", complete.to_string()),
            ("Malformed blocks", malformed.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}
