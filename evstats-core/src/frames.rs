//! Polarity frames for the exposure intervals of a frame camera.
//!
//! Each row of an exposure timestamp table gives the start and end of one
//! image exposure in absolute microseconds. The events of a columnar store
//! that fall in `[t_start, t_end)` are painted into a [`PolarityFrame`], so
//! frames and event pictures can be laid side by side.

use crate::error::Result;
use crate::output;
use crate::source::ColumnarEvents;
use crate::stats::PolarityFrame;
use crate::types::{Geometry, Polarity};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One exposure, keyed by its row in the timestamp table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureInterval {
    /// Zero-based row in the table, used to number the output frame
    pub index: usize,
    pub t_start: i64,
    pub t_end: i64,
}

/// Cuts a columnar store into per-interval frames.
#[derive(Debug)]
pub struct FrameSlicer<'a> {
    columns: &'a ColumnarEvents,
    geometry: Geometry,
}

impl<'a> FrameSlicer<'a> {
    pub fn new(columns: &'a ColumnarEvents, geometry: Geometry) -> Result<Self> {
        columns.validate()?;
        Ok(Self { columns, geometry })
    }

    /// Paints the events of one interval, or returns `None` when the
    /// recording does not cover it.
    pub fn render(&self, interval: &ExposureInterval) -> Result<Option<PolarityFrame>> {
        let range = match self.columns.time_range(interval.t_start, interval.t_end) {
            Some(range) => range,
            None => {
                debug!(
                    index = interval.index,
                    t_start = interval.t_start,
                    t_end = interval.t_end,
                    "interval outside the recording"
                );
                return Ok(None);
            }
        };

        let c = self.columns;
        let mut frame = PolarityFrame::new(self.geometry);
        for i in range {
            frame.mark(
                c.x[i] as u32,
                c.y[i] as u32,
                Polarity::from_raw(c.p[i] as i64),
            )?;
        }
        Ok(Some(frame))
    }
}

/// Outcome of [`write_frames`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramesReport {
    pub written: Vec<PathBuf>,
    /// Intervals the recording does not cover
    pub skipped: usize,
    /// Events painted over all frames
    pub events: u64,
}

/// Renders every interval and writes the covered ones into `dir`.
///
/// `on_frame` is called with the number of intervals processed so far.
pub fn write_frames<F>(
    columns: &ColumnarEvents,
    intervals: &[ExposureInterval],
    geometry: Geometry,
    dir: &Path,
    mut on_frame: F,
) -> Result<FramesReport>
where
    F: FnMut(usize),
{
    let slicer = FrameSlicer::new(columns, geometry)?;
    let mut report = FramesReport::default();

    for (done, interval) in intervals.iter().enumerate() {
        match slicer.render(interval)? {
            Some(frame) => {
                report.events += frame.events();
                report.written.push(output::write_frame(dir, interval.index, &frame)?);
            }
            None => report.skipped += 1,
        }
        on_frame(done + 1);
    }

    info!(
        frames = report.written.len(),
        skipped = report.skipped,
        events = report.events,
        "wrote polarity frames"
    );
    Ok(report)
}
