//! Per-second normalisation, rendering and summaries of accumulated counts.

use crate::accumulator::{CountRaster, PixelAccumulator, Raster};
use crate::error::{Result, StatsError};
use crate::types::{Geometry, Polarity};
use image::{GrayImage, Luma, RgbImage};

pub const TOTAL_KEY: &str = "total_events_per_pixel";
pub const POSITIVE_KEY: &str = "pos_events_per_pixel";
pub const NEGATIVE_KEY: &str = "neg_events_per_pixel";
pub const TOTAL_PER_SECOND_KEY: &str = "total_events_per_pixel_per_second";
pub const POSITIVE_PER_SECOND_KEY: &str = "pos_events_per_pixel_per_second";
pub const NEGATIVE_PER_SECOND_KEY: &str = "neg_events_per_pixel_per_second";

/// The six buffers produced by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsArtifact {
    pub total: CountRaster,
    pub positive: CountRaster,
    pub negative: CountRaster,
    pub total_per_second: Raster<f64>,
    pub positive_per_second: Raster<f64>,
    pub negative_per_second: Raster<f64>,
    /// Duration the per-second buffers were normalised by
    pub duration_seconds: f64,
}

impl StatisticsArtifact {
    /// Derives the per-second buffers from raw counts.
    ///
    /// A zero, negative or infinite duration cannot normalise anything,
    /// so the per-second buffers are left all-zero in that case.
    pub fn finalize(
        total: CountRaster,
        positive: CountRaster,
        negative: CountRaster,
        duration_seconds: f64,
    ) -> Self {
        Self {
            total_per_second: per_second(&total, duration_seconds),
            positive_per_second: per_second(&positive, duration_seconds),
            negative_per_second: per_second(&negative, duration_seconds),
            total,
            positive,
            negative,
            duration_seconds,
        }
    }

    pub fn from_accumulator(accumulator: PixelAccumulator, duration_seconds: f64) -> Self {
        let (total, positive, negative) = accumulator.into_buffers();
        Self::finalize(total, positive, negative, duration_seconds)
    }

    /// All six buffers as floats under their container keys.
    pub fn named_buffers(&self) -> [(&'static str, Raster<f64>); 6] {
        let widen = |r: &CountRaster| r.map(|v| v as f64);
        [
            (TOTAL_KEY, widen(&self.total)),
            (POSITIVE_KEY, widen(&self.positive)),
            (NEGATIVE_KEY, widen(&self.negative)),
            (TOTAL_PER_SECOND_KEY, self.total_per_second.clone()),
            (POSITIVE_PER_SECOND_KEY, self.positive_per_second.clone()),
            (NEGATIVE_PER_SECOND_KEY, self.negative_per_second.clone()),
        ]
    }

    /// Grayscale view of the total counts, saturating at 255.
    pub fn render_total(&self) -> GrayImage {
        render(&self.total.map(|v| v as f64))
    }

    pub fn render_total_per_second(&self) -> GrayImage {
        render(&self.total_per_second)
    }
}

/// Divides every count by `duration_seconds`.
pub fn per_second(counts: &CountRaster, duration_seconds: f64) -> Raster<f64> {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return counts.map(|_| 0.0);
    }
    let scale = 1.0 / duration_seconds;
    counts.map(|v| v as f64 * scale)
}

/// Maps values straight to 8-bit intensities.
///
/// There is no normalisation: values above 255 saturate and values below
/// zero (or NaN) become black. The numeric buffers stay authoritative.
pub fn render(buffer: &Raster<f64>) -> GrayImage {
    let width = buffer.width();
    GrayImage::from_fn(buffer.width() as u32, buffer.height() as u32, |x, y| {
        let v = buffer.as_slice()[y as usize * width + x as usize];
        Luma([saturate_u8(v)])
    })
}

#[inline]
fn saturate_u8(v: f64) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0.0, 255.0) as u8
    }
}

/// RGB channel painted by positive events (red).
pub const POSITIVE_CHANNEL: usize = 0;
/// RGB channel painted by negative events (blue).
pub const NEGATIVE_CHANNEL: usize = 2;

/// Binary polarity picture of the events in one exposure interval.
///
/// Unlike the count buffers this keeps no totals: a pixel's positive channel
/// is 255 once any positive event hit it, its negative channel likewise, so
/// a pixel that saw both polarities shows up magenta.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarityFrame {
    geometry: Geometry,
    image: RgbImage,
    events: u64,
}

impl PolarityFrame {
    /// Creates an all-black frame.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            image: RgbImage::new(geometry.width, geometry.height),
            events: 0,
        }
    }

    /// Paints one event at column `x`, row `y`.
    pub fn mark(&mut self, x: u32, y: u32, polarity: Polarity) -> Result<()> {
        if !self.geometry.contains(x, y) {
            return Err(StatsError::Index(format!(
                "pixel (x={}, y={}) is outside the {}x{} frame",
                x, y, self.geometry.width, self.geometry.height
            )));
        }

        let channel = match polarity {
            Polarity::Positive => POSITIVE_CHANNEL,
            Polarity::Negative => NEGATIVE_CHANNEL,
        };
        self.image.get_pixel_mut(x, y).0[channel] = u8::MAX;
        self.events += 1;
        Ok(())
    }

    /// Number of events painted so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Mean, population standard deviation and variance of a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSummary {
    pub mean: f64,
    pub std: f64,
    pub var: f64,
}

impl BufferSummary {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                var: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
            var,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(data: Vec<u32>) -> CountRaster {
        Raster::from_vec(2, 2, data).unwrap()
    }

    #[test]
    fn test_per_second_scales() {
        let rate = per_second(&counts(vec![0, 2, 4, 10]), 2.0);
        assert_eq!(rate.as_slice(), &[0.0, 1.0, 2.0, 5.0]);
    }

    #[test]
    fn test_per_second_zero_and_infinite_duration() {
        for duration in [0.0, f64::INFINITY, -1.0, f64::NAN] {
            let rate = per_second(&counts(vec![1, 2, 3, 4]), duration);
            assert!(rate.as_slice().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_finalize_keeps_raw_counts() {
        let artifact = StatisticsArtifact::finalize(
            counts(vec![3, 1, 0, 2]),
            counts(vec![2, 1, 0, 0]),
            counts(vec![1, 0, 0, 2]),
            0.5,
        );
        assert_eq!(artifact.total.as_slice(), &[3, 1, 0, 2]);
        assert_eq!(artifact.total_per_second.as_slice(), &[6.0, 2.0, 0.0, 4.0]);
        assert_eq!(artifact.negative_per_second.as_slice(), &[2.0, 0.0, 0.0, 4.0]);

        let names: Vec<&str> = artifact.named_buffers().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            names,
            vec![
                TOTAL_KEY,
                POSITIVE_KEY,
                NEGATIVE_KEY,
                TOTAL_PER_SECOND_KEY,
                POSITIVE_PER_SECOND_KEY,
                NEGATIVE_PER_SECOND_KEY
            ]
        );
    }

    #[test]
    fn test_render_saturates() {
        let buffer = Raster::from_vec(1, 4, vec![-3.0, 7.4, 300.0, f64::NAN]).unwrap();
        let image = render(&buffer);
        assert_eq!(image.dimensions(), (4, 1));
        let pixels: Vec<u8> = image.pixels().map(|p| p.0[0]).collect();
        assert_eq!(pixels, vec![0, 7, 255, 0]);
    }

    #[test]
    fn test_polarity_frame_channels() {
        let mut frame = PolarityFrame::new(Geometry::new(3, 2).unwrap());
        frame.mark(0, 0, Polarity::Positive).unwrap();
        frame.mark(2, 1, Polarity::Negative).unwrap();
        frame.mark(1, 0, Polarity::Positive).unwrap();
        frame.mark(1, 0, Polarity::Negative).unwrap();
        frame.mark(1, 0, Polarity::Negative).unwrap();

        let image = frame.image();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(2, 1).0, [0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 0, 255]);
        assert_eq!(image.get_pixel(0, 1).0, [0, 0, 0]);
        assert_eq!(frame.events(), 5);
    }

    #[test]
    fn test_polarity_frame_out_of_bounds() {
        let mut frame = PolarityFrame::new(Geometry::new(3, 2).unwrap());
        assert!(matches!(
            frame.mark(3, 0, Polarity::Positive),
            Err(StatsError::Index(_))
        ));
        assert_eq!(frame.events(), 0);
    }

    #[test]
    fn test_summary() {
        let summary = BufferSummary::of(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(summary.mean, 2.5);
        assert_eq!(summary.var, 1.25);
        assert!((summary.std - 1.25f64.sqrt()).abs() < 1e-12);
    }
}
