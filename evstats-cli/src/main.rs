//! Event statistics CLI application.
//!
//! Accumulates per-pixel event counts from columnar, interleaved or EVT 3.0
//! raw recordings and writes them as a JSON statistics container plus PNG
//! previews. Also paints per-exposure polarity frames from a columnar store.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use evstats_core::output::{self, StoredStatistics};
use evstats_core::source::{DEFAULT_DELTA_T_US, DEFAULT_MAX_EVENTS};
use evstats_core::{
    frames, store, AxisFlip, BufferSummary, ChunkedSource, EventSource, Geometry, Pipeline,
    PipelineConfig, RawReader, Raster, StatsError, WindowBudget,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `debug`, `evstats_core=trace`).
const LOG_ENV: &str = "EVSTATS_LOG";

/// Per-pixel event statistics for event camera recordings.
///
/// Counts total, positive and negative events per pixel, optionally within a
/// time window and after rectification, and writes the counts and their
/// per-second rates.
#[derive(Parser, Debug)]
#[command(name = "evstats")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Columnar store with parallel x, y, t, p arrays (e.g. DSEC exports)
    Columnar {
        /// Input store path
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Interleaved store of (t, x, y, p) records (e.g. v2e exports)
    Interleaved {
        /// Input store path
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// EVT 3.0 raw recording, decoded in time slices
    Raw {
        /// Input .raw file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Stop after this many events even if the recording continues
        #[arg(long, default_value_t = DEFAULT_MAX_EVENTS)]
        max_events: u64,

        /// Time slice pulled from the decoder per step [us]
        #[arg(long, default_value_t = DEFAULT_DELTA_T_US)]
        delta_t_us: i64,

        /// Keep the sensor orientation instead of rotating the buffers by 180 degrees
        #[arg(long)]
        no_flip: bool,
    },

    /// Polarity frames for each exposure interval of a columnar store
    AccumulateFrames {
        /// Input store path
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        /// Table of exposure start and end timestamps [us]
        #[arg(short = 't', long, value_name = "PATH")]
        exposure_timestamps: PathBuf,

        /// Sensor height (y resolution)
        #[arg(long)]
        height: u32,

        /// Sensor width (x resolution)
        #[arg(long)]
        width: u32,

        /// Directory receiving the frames
        #[arg(short, long, default_value = "accumulated_events")]
        output_dir: PathBuf,
    },

    /// Print summary statistics of two statistics containers
    Compare {
        /// Statistics of the real recording
        #[arg(value_name = "REAL")]
        real: PathBuf,

        /// Statistics of the simulated recording
        #[arg(value_name = "SIM")]
        sim: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Sensor height (y resolution); required unless the input declares it
    #[arg(long)]
    height: Option<u32>,

    /// Sensor width (x resolution); required unless the input declares it
    #[arg(long)]
    width: Option<u32>,

    /// Duration to evaluate [s]
    #[arg(long)]
    seconds: Option<f64>,

    /// Duration to evaluate [ms], added to --seconds
    #[arg(long)]
    ms: Option<f64>,

    /// Duration to evaluate [us], added to --seconds and --ms
    #[arg(long)]
    us: Option<f64>,

    /// Rectification store with a (height, width, 2) `rectify_map`
    #[arg(short, long, value_name = "PATH")]
    rectify: Option<PathBuf>,

    /// Directory receiving the PNG and JSON outputs
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Output file name prefix (defaults to one per input kind)
    #[arg(short, long)]
    prefix: Option<String>,
}

impl RunArgs {
    fn geometry(&self) -> Result<Option<Geometry>> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Ok(Some(Geometry::new(w, h)?)),
            (None, None) => Ok(None),
            _ => Err(StatsError::Configuration(
                "--height and --width must be given together".to_string(),
            )
            .into()),
        }
    }

    fn budget(&self) -> WindowBudget {
        WindowBudget::from_parts(self.seconds, self.ms, self.us)
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    match cli.command {
        Command::Columnar { events, run } => {
            let source = store::open_columnar(&events)
                .with_context(|| format!("Failed to load columnar store {:?}", events))?;
            accumulate(source, &events, &run, "events_per_pixel_from_dsec", cli.quiet)
        }
        Command::Interleaved { events, run } => {
            let source = store::open_interleaved(&events)
                .with_context(|| format!("Failed to load interleaved store {:?}", events))?;
            accumulate(source, &events, &run, "events_per_pixel_from_v2e", cli.quiet)
        }
        Command::Raw {
            input,
            run,
            max_events,
            delta_t_us,
            no_flip,
        } => {
            let reader = RawReader::open(&input)
                .with_context(|| format!("Failed to open raw recording {:?}", input))?;
            let flip = if no_flip { AxisFlip::NONE } else { AxisFlip::BOTH };
            let source = ChunkedSource::new(reader)
                .with_delta_t(delta_t_us)
                .with_max_events(max_events)
                .with_flip(flip);
            accumulate(source, &input, &run, "events_per_pixel_from_raw", cli.quiet)
        }
        Command::AccumulateFrames {
            events,
            exposure_timestamps,
            height,
            width,
            output_dir,
        } => accumulate_frames(
            &events,
            &exposure_timestamps,
            Geometry::new(width, height)?,
            &output_dir,
            cli.quiet,
        ),
        Command::Compare { real, sim } => compare(&real, &sim),
    }
}

fn accumulate<S: EventSource>(
    source: S,
    input: &Path,
    run: &RunArgs,
    default_prefix: &str,
    quiet: bool,
) -> Result<()> {
    let geometry = run
        .geometry()?
        .or_else(|| source.geometry())
        .context("--height and --width are required for this input")?;
    let budget = run.budget();
    info!(duration_us = budget.duration_us(), "window budget");

    let mut pipeline = Pipeline::new(PipelineConfig {
        geometry: Some(geometry),
        budget,
    });
    if let Some(path) = &run.rectify {
        let map = store::load_rectify_map(path, geometry)
            .with_context(|| format!("Failed to load rectify map {:?}", path))?;
        pipeline = pipeline.with_rectifier(map);
    }

    let progress = spinner(quiet);
    progress.set_message(format!(
        "Accumulating {:?}...",
        input.file_name().unwrap_or_default()
    ));
    let start_time = Instant::now();

    let outcome = pipeline
        .run_observed(source, |n| {
            progress.set_message(format!("Accumulated {} events...", n));
        })
        .with_context(|| format!("Failed to accumulate events from {:?}", input))?;
    let report = outcome.report;

    let prefix = run.prefix.as_deref().unwrap_or(default_prefix);
    progress.set_message(format!("Writing {}...", prefix));
    let artifact = outcome.finalize();
    let paths = output::write_artifact(&artifact, &run.output_dir, prefix)
        .with_context(|| format!("Failed to write statistics to {:?}", run.output_dir))?;

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Accumulated {} events in {:.2}s (sensor: {}x{})",
        report.admitted,
        total_duration.as_secs_f64(),
        geometry.width,
        geometry.height
    ));

    if !quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", input);
        eprintln!("  Image:        {:?}", paths.image);
        eprintln!("  Statistics:   {:?}", paths.statistics);
        eprintln!("  Events:       {}", report.admitted);
        eprintln!("  Sensor:       {}x{}", geometry.width, geometry.height);
        if report.duration_seconds.is_finite() {
            eprintln!("  Window:       {:.6}s", report.duration_seconds);
        } else {
            eprintln!("  Window:       unbounded (per-second buffers are zero)");
        }
        if let Some(last) = report.stopped_at {
            eprintln!("  Stopped at:   {}us", last);
        }
        if !report.flip.is_none() {
            eprintln!("  Flip:         {:?}", report.flip);
        }
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}

fn accumulate_frames(
    events: &Path,
    exposure_timestamps: &Path,
    geometry: Geometry,
    output_dir: &Path,
    quiet: bool,
) -> Result<()> {
    let columns = store::load_columnar(events)
        .with_context(|| format!("Failed to load columnar store {:?}", events))?;
    let intervals = store::load_exposure_intervals(exposure_timestamps).with_context(|| {
        format!("Failed to load exposure timestamps {:?}", exposure_timestamps)
    })?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;

    let progress = spinner(quiet);
    let start_time = Instant::now();
    let report = frames::write_frames(&columns, &intervals, geometry, output_dir, |n| {
        progress.set_message(format!("Painted {}/{} intervals...", n, intervals.len()));
    })
    .with_context(|| format!("Failed to write frames to {:?}", output_dir))?;

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Wrote {} frames in {:.2}s",
        report.written.len(),
        total_duration.as_secs_f64()
    ));

    if !quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", events);
        eprintln!("  Intervals:    {}", intervals.len());
        eprintln!("  Frames:       {}", report.written.len());
        eprintln!("  Skipped:      {}", report.skipped);
        eprintln!("  Events:       {}", report.events);
        eprintln!("  Output:       {:?}", output_dir);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}

fn compare(real: &Path, sim: &Path) -> Result<()> {
    let real_stats = output::read_statistics(real)
        .with_context(|| format!("Failed to read statistics {:?}", real))?;
    let sim_stats = output::read_statistics(sim)
        .with_context(|| format!("Failed to read statistics {:?}", sim))?;

    print_shapes("real", &real_stats);
    print_shapes("sim", &sim_stats);

    print_summary("total_events_per_pixel_sim", &sim_stats.total);
    print_summary("total_events_per_pixel_real", &real_stats.total);
    print_summary("total_events_per_pixel_per_second_sim", &sim_stats.total_per_second);
    print_summary("total_events_per_pixel_per_second_real", &real_stats.total_per_second);
    Ok(())
}

fn print_shapes(label: &str, stats: &StoredStatistics) {
    println!(
        "events_per_pixel_{}.shape: ({}, {})",
        label,
        stats.total.height(),
        stats.total.width()
    );
    println!(
        "events_per_pixel_per_second_{}.shape: ({}, {})",
        label,
        stats.total_per_second.height(),
        stats.total_per_second.width()
    );
}

fn print_summary(label: &str, buffer: &Raster<f64>) {
    let summary = BufferSummary::of(buffer.as_slice());
    println!("{}:", label);
    println!(" mean: {}", summary.mean);
    println!(" std: {}", summary.std);
    println!(" var: {}", summary.var);
}
