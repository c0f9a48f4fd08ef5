//! Core types shared by the ingestion sources and the accumulation stages.

use crate::error::{Result, StatsError};

/// Sign of the brightness change reported by a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    /// Brightness increase (ON)
    Positive,
    /// Brightness decrease (OFF)
    Negative,
}

impl Polarity {
    /// Maps a stored polarity value to a polarity.
    ///
    /// Stores encode polarity as `{0, 1}` or `{-1, 1}`; anything strictly
    /// greater than zero is positive.
    #[inline]
    pub fn from_raw(value: i64) -> Self {
        if value > 0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self == Self::Positive
    }
}

/// A single asynchronous brightness-change report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Column index
    pub x: u16,
    /// Row index
    pub y: u16,
    /// Timestamp in microseconds
    pub t: i64,
    pub polarity: Polarity,
}

impl Event {
    #[inline]
    pub fn new(x: u16, y: u16, t: i64, polarity: Polarity) -> Self {
        Self { x, y, t, polarity }
    }
}

/// Pixel resolution of a sensor or of the accumulator buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Width in pixels (number of columns)
    pub width: u32,
    /// Height in pixels (number of rows)
    pub height: u32,
}

impl Geometry {
    /// Creates a geometry, rejecting empty resolutions.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(StatsError::Configuration(format!(
                "resolution must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    /// Number of pixels in one buffer of this geometry.
    #[inline]
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }
}

impl Default for Geometry {
    fn default() -> Self {
        // Gen4 sensor geometry (1280x720)
        Self {
            width: 1280,
            height: 720,
        }
    }
}
