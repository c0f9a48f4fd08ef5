//! Single-pass accumulation pipeline.
//!
//! Events flow from an [`EventSource`] through the [`WindowPolicy`] gate,
//! optionally through a [`RectifyMap`], into a [`PixelAccumulator`]. All run
//! state lives in a [`PipelineContext`], so independent runs never share
//! anything.

use crate::accumulator::{AxisFlip, PixelAccumulator};
use crate::error::{Result, StatsError};
use crate::rectify::RectifyMap;
use crate::source::EventSource;
use crate::stats::StatisticsArtifact;
use crate::types::Geometry;
use crate::window::{admitted, WindowBudget, WindowPolicy};
use tracing::info;

/// Events between two progress callbacks.
pub const PROGRESS_INTERVAL: u64 = 1 << 20;

/// Settings for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineConfig {
    /// Buffer resolution; falls back to the source's own geometry when unset.
    pub geometry: Option<Geometry>,
    pub budget: WindowBudget,
}

/// Mutable state of one run.
pub struct PipelineContext<'r> {
    accumulator: PixelAccumulator,
    window: WindowPolicy,
    rectifier: Option<&'r RectifyMap>,
    admitted: u64,
}

impl<'r> PipelineContext<'r> {
    pub fn new(
        geometry: Geometry,
        window: WindowPolicy,
        rectifier: Option<&'r RectifyMap>,
    ) -> Self {
        Self {
            accumulator: PixelAccumulator::new(geometry),
            window,
            rectifier,
            admitted: 0,
        }
    }

    /// Drains `source` into the accumulator until it ends or the window closes.
    pub fn consume<S, F>(&mut self, source: S, mut on_progress: F) -> Result<()>
    where
        S: EventSource,
        F: FnMut(u64),
    {
        for event in admitted(source, &mut self.window) {
            let event = event?;
            let (x, y) = match self.rectifier {
                Some(map) => map.resolve(event.x as u32, event.y as u32)?,
                None => (event.x as u32, event.y as u32),
            };
            self.accumulator.accumulate(x, y, event.polarity)?;

            self.admitted += 1;
            if self.admitted % PROGRESS_INTERVAL == 0 {
                on_progress(self.admitted);
            }
        }
        Ok(())
    }

    pub fn accumulator(&self) -> &PixelAccumulator {
        &self.accumulator
    }

    pub fn window(&self) -> &WindowPolicy {
        &self.window
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    pub geometry: Geometry,
    /// Events counted into the buffers
    pub admitted: u64,
    /// Absolute timestamp of the event that closed the window, if it closed
    pub stopped_at: Option<i64>,
    pub t_offset: i64,
    pub flip: AxisFlip,
    /// Normalisation duration (infinite when the window is unbounded)
    pub duration_seconds: f64,
}

/// Buffers and report of a finished run, ready to be finalised.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub accumulator: PixelAccumulator,
    pub report: RunReport,
}

impl RunOutcome {
    pub fn finalize(self) -> StatisticsArtifact {
        StatisticsArtifact::from_accumulator(self.accumulator, self.report.duration_seconds)
    }
}

/// Reusable pipeline definition: configuration plus optional rectification.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    rectifier: Option<RectifyMap>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            rectifier: None,
        }
    }

    pub fn with_rectifier(mut self, map: RectifyMap) -> Self {
        self.rectifier = Some(map);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Buffer geometry for `source`: configured value first, then the source's.
    pub fn resolve_geometry<S: EventSource>(&self, source: &S) -> Result<Geometry> {
        self.config
            .geometry
            .or_else(|| source.geometry())
            .ok_or_else(|| {
                StatsError::Configuration(
                    "height and width are required for this source".to_string(),
                )
            })
    }

    pub fn run<S: EventSource>(&self, source: S) -> Result<RunOutcome> {
        self.run_observed(source, |_| {})
    }

    /// Runs the pipeline, calling `on_progress` with the admitted count
    /// every [`PROGRESS_INTERVAL`] events.
    pub fn run_observed<S, F>(&self, mut source: S, on_progress: F) -> Result<RunOutcome>
    where
        S: EventSource,
        F: FnMut(u64),
    {
        let geometry = self.resolve_geometry(&source)?;
        if let Some(map) = &self.rectifier {
            if map.geometry() != geometry {
                return Err(StatsError::Configuration(format!(
                    "rectify map is {}x{} but the buffers are {}x{}",
                    map.geometry().width,
                    map.geometry().height,
                    geometry.width,
                    geometry.height
                )));
            }
        }

        let t_offset = source.t_offset();
        let window = WindowPolicy::new(self.config.budget).with_t_offset(t_offset);
        info!(
            width = geometry.width,
            height = geometry.height,
            duration_us = self.config.budget.duration_us(),
            rectify = self.rectifier.is_some(),
            "accumulating events"
        );

        let mut ctx = PipelineContext::new(geometry, window, self.rectifier.as_ref());
        ctx.consume(&mut source, on_progress)?;

        let flip = source.post_flip();
        let PipelineContext {
            mut accumulator,
            window,
            admitted,
            ..
        } = ctx;
        accumulator.flip(flip);

        let report = RunReport {
            geometry,
            admitted,
            stopped_at: window.stopped_at(),
            t_offset,
            flip,
            duration_seconds: self.config.budget.duration_seconds(),
        };
        info!(admitted, stopped_at = ?report.stopped_at, "accumulation finished");
        Ok(RunOutcome {
            accumulator,
            report,
        })
    }
}
