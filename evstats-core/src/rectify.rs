//! Geometric rectification of raw pixel coordinates.
//!
//! A rectification map stores, for every raw `(row, column)`, the corrected
//! `(x, y)` position as floating point. Resolved coordinates are rounded
//! half-to-even, so `2.5` maps to `2` and `3.5` maps to `4`.

use crate::error::{Result, StatsError};
use crate::types::Geometry;

/// Dense `(height, width, 2)` lookup from raw to corrected coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RectifyMap {
    geometry: Geometry,
    targets: Vec<[f32; 2]>,
}

impl RectifyMap {
    /// Builds a map from row-major `[x, y]` targets.
    pub fn new(geometry: Geometry, targets: Vec<[f32; 2]>) -> Result<Self> {
        if targets.len() != geometry.pixels() {
            return Err(StatsError::DataFormat(format!(
                "rectify map holds {} entries, expected {}x{}",
                targets.len(),
                geometry.height,
                geometry.width
            )));
        }
        Ok(Self { geometry, targets })
    }

    /// Map sending every pixel to itself.
    pub fn identity(geometry: Geometry) -> Self {
        let targets = (0..geometry.height)
            .flat_map(|y| (0..geometry.width).map(move |x| [x as f32, y as f32]))
            .collect();
        Self { geometry, targets }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Looks up the corrected, rounded coordinate of raw pixel `(x, y)`.
    #[inline]
    pub fn resolve(&self, x: u32, y: u32) -> Result<(u32, u32)> {
        if !self.geometry.contains(x, y) {
            return Err(StatsError::Index(format!(
                "raw pixel (x={}, y={}) is outside the {}x{} rectify map",
                x, y, self.geometry.width, self.geometry.height
            )));
        }

        let [rx, ry] = self.targets[y as usize * self.geometry.width as usize + x as usize];
        Ok((round_coordinate(rx, x, y)?, round_coordinate(ry, x, y)?))
    }
}

#[inline]
fn round_coordinate(value: f32, x: u32, y: u32) -> Result<u32> {
    let rounded = value.round_ties_even();
    if !rounded.is_finite() || rounded < 0.0 || rounded > u32::MAX as f32 {
        return Err(StatsError::Index(format!(
            "raw pixel (x={}, y={}) rectifies to unusable coordinate {}",
            x, y, value
        )));
    }
    Ok(rounded as u32)
}
