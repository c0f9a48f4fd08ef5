//! Per-pixel event counting.

use crate::error::{Result, StatsError};
use crate::types::{Geometry, Polarity};

/// Dense row-major 2D buffer addressed by `(row, column)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// Raw per-pixel event counts.
pub type CountRaster = Raster<u32>;

impl<T: Copy + Default> Raster<T> {
    /// Creates a zero-filled buffer.
    pub fn zeros(geometry: Geometry) -> Self {
        Self {
            width: geometry.width as usize,
            height: geometry.height as usize,
            data: vec![T::default(); geometry.pixels()],
        }
    }

    /// Wraps row-major data, checking it matches `rows * cols`.
    pub fn from_vec(height: usize, width: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != height * width {
            return Err(StatsError::DataFormat(format!(
                "buffer holds {} values, expected {}x{}",
                data.len(),
                height,
                width
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.height && col < self.width {
            Some(self.data[row * self.width + col])
        } else {
            None
        }
    }

    /// Element-wise conversion into a new buffer of the same shape.
    pub fn map<U, F: Fn(T) -> U>(&self, f: F) -> Raster<U> {
        Raster {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Mirrors the buffer in place.
    pub fn flip(&mut self, flip: AxisFlip) {
        if self.width == 0 {
            return;
        }
        if flip.vertical {
            for row in 0..self.height / 2 {
                let mirror = self.height - 1 - row;
                let (top, bottom) = self.data.split_at_mut(mirror * self.width);
                top[row * self.width..(row + 1) * self.width]
                    .swap_with_slice(&mut bottom[..self.width]);
            }
        }
        if flip.horizontal {
            for row in self.data.chunks_mut(self.width) {
                row.reverse();
            }
        }
    }
}

impl CountRaster {
    /// Sum of all counts.
    pub fn sum(&self) -> u64 {
        self.data.iter().map(|&v| v as u64).sum()
    }
}

/// Mirroring applied to the buffers after accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisFlip {
    /// Swap rows top to bottom
    pub vertical: bool,
    /// Swap columns left to right
    pub horizontal: bool,
}

impl AxisFlip {
    pub const NONE: Self = Self {
        vertical: false,
        horizontal: false,
    };

    /// Both axes, equivalent to a 180 degree rotation.
    pub const BOTH: Self = Self {
        vertical: true,
        horizontal: true,
    };

    pub fn is_none(&self) -> bool {
        !self.vertical && !self.horizontal
    }
}

/// Total, positive and negative counts per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelAccumulator {
    geometry: Geometry,
    total: CountRaster,
    positive: CountRaster,
    negative: CountRaster,
}

impl PixelAccumulator {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            total: CountRaster::zeros(geometry),
            positive: CountRaster::zeros(geometry),
            negative: CountRaster::zeros(geometry),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Counts one event at column `x`, row `y`.
    ///
    /// Coordinates outside the buffers are rejected, never clamped.
    #[inline]
    pub fn accumulate(&mut self, x: u32, y: u32, polarity: Polarity) -> Result<()> {
        if !self.geometry.contains(x, y) {
            return Err(StatsError::Index(format!(
                "pixel (x={}, y={}) is outside the {}x{} buffer",
                x, y, self.geometry.width, self.geometry.height
            )));
        }

        let idx = y as usize * self.geometry.width as usize + x as usize;
        self.total.data[idx] += 1;
        match polarity {
            Polarity::Positive => self.positive.data[idx] += 1,
            Polarity::Negative => self.negative.data[idx] += 1,
        }
        Ok(())
    }

    /// Applies the same flip to all three buffers.
    pub fn flip(&mut self, flip: AxisFlip) {
        if flip.is_none() {
            return;
        }
        self.total.flip(flip);
        self.positive.flip(flip);
        self.negative.flip(flip);
    }

    pub fn total(&self) -> &CountRaster {
        &self.total
    }

    pub fn positive(&self) -> &CountRaster {
        &self.positive
    }

    pub fn negative(&self) -> &CountRaster {
        &self.negative
    }

    /// Number of events counted.
    pub fn event_count(&self) -> u64 {
        self.total.sum()
    }

    /// Consumes the accumulator, returning `(total, positive, negative)`.
    pub fn into_buffers(self) -> (CountRaster, CountRaster, CountRaster) {
        (self.total, self.positive, self.negative)
    }
}
