//! Writers and readers for statistics artifacts.
//!
//! Buffers are stored as JSON in the OpenCV FileStorage matrix layout, one
//! entry per key, so containers from different sources can be compared
//! side by side. The total-count rasters are written as 8-bit PNGs, and
//! exposure-interval frames as 8-bit RGB PNGs.

use crate::accumulator::Raster;
use crate::error::{Result, StatsError};
use crate::stats::{
    PolarityFrame, StatisticsArtifact, NEGATIVE_KEY, NEGATIVE_PER_SECOND_KEY, POSITIVE_KEY,
    POSITIVE_PER_SECOND_KEY, TOTAL_KEY, TOTAL_PER_SECOND_KEY,
};
use image::{GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const MATRIX_TYPE_ID: &str = "opencv-matrix";
const DOUBLE_DT: &str = "d";

/// One 2D matrix entry of a statistics container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixRecord {
    pub type_id: String,
    pub rows: usize,
    pub cols: usize,
    pub dt: String,
    pub data: Vec<f64>,
}

impl MatrixRecord {
    pub fn from_raster(raster: &Raster<f64>) -> Self {
        Self {
            type_id: MATRIX_TYPE_ID.to_string(),
            rows: raster.height(),
            cols: raster.width(),
            dt: DOUBLE_DT.to_string(),
            data: raster.as_slice().to_vec(),
        }
    }

    pub fn into_raster(self) -> Result<Raster<f64>> {
        Raster::from_vec(self.rows, self.cols, self.data)
    }
}

/// All six buffers read back from a statistics container.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStatistics {
    pub total: Raster<f64>,
    pub positive: Raster<f64>,
    pub negative: Raster<f64>,
    pub total_per_second: Raster<f64>,
    pub positive_per_second: Raster<f64>,
    pub negative_per_second: Raster<f64>,
}

/// Where a run's outputs were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub image: PathBuf,
    pub per_second_image: PathBuf,
    pub statistics: PathBuf,
}

impl ArtifactPaths {
    /// `<dir>/<prefix>.png`, the per-second preview and `<dir>/<prefix>.json`.
    ///
    /// The per-second preview inserts `_per_second` right after the
    /// `events_per_pixel` stem when the prefix has one, so
    /// `events_per_pixel_from_dsec` yields
    /// `events_per_pixel_per_second_from_dsec.png`. Other prefixes get
    /// `<prefix>_per_second.png`.
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            image: dir.join(format!("{}.png", prefix)),
            per_second_image: dir.join(format!("{}.png", per_second_name(prefix))),
            statistics: dir.join(format!("{}.json", prefix)),
        }
    }
}

const EVENTS_PER_PIXEL_STEM: &str = "events_per_pixel";

fn per_second_name(prefix: &str) -> String {
    match prefix.find(EVENTS_PER_PIXEL_STEM) {
        Some(pos) => {
            let (head, tail) = prefix.split_at(pos + EVENTS_PER_PIXEL_STEM.len());
            format!("{}_per_second{}", head, tail)
        }
        None => format!("{}_per_second", prefix),
    }
}

/// `<dir>/accumulated_events_NNNN.png` for the exposure in table row `index`.
pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("accumulated_events_{:04}.png", index))
}

/// Writes the statistics container.
pub fn write_statistics<P: AsRef<Path>>(path: P, artifact: &StatisticsArtifact) -> Result<()> {
    let path = path.as_ref();
    let mut entries = Map::new();
    for (key, raster) in artifact.named_buffers() {
        let record = serde_json::to_value(MatrixRecord::from_raster(&raster))
            .map_err(|e| StatsError::json(path, e))?;
        entries.insert(key.to_string(), record);
    }

    let file = File::create(path).map_err(|e| StatsError::resource(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &Value::Object(entries))
        .map_err(|e| StatsError::json(path, e))?;
    writer.flush().map_err(|e| StatsError::resource(path, e))?;
    Ok(())
}

/// Reads a statistics container, requiring all six keys.
pub fn read_statistics<P: AsRef<Path>>(path: P) -> Result<StoredStatistics> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| StatsError::resource(path, e))?;
    let mut entries: Map<String, Value> =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| StatsError::json(path, e))?;

    let mut take = |key: &str| -> Result<Raster<f64>> {
        let value = entries.remove(key).ok_or_else(|| {
            StatsError::Configuration(format!("{:?} has no '{}' entry", path, key))
        })?;
        let record: MatrixRecord =
            serde_json::from_value(value).map_err(|e| StatsError::json(path, e))?;
        record.into_raster()
    };

    Ok(StoredStatistics {
        total: take(TOTAL_KEY)?,
        positive: take(POSITIVE_KEY)?,
        negative: take(NEGATIVE_KEY)?,
        total_per_second: take(TOTAL_PER_SECOND_KEY)?,
        positive_per_second: take(POSITIVE_PER_SECOND_KEY)?,
        negative_per_second: take(NEGATIVE_PER_SECOND_KEY)?,
    })
}

fn image_error(path: &Path) -> impl FnOnce(image::ImageError) -> StatsError + '_ {
    move |source| StatsError::Image {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes an 8-bit grayscale PNG.
pub fn write_png<P: AsRef<Path>>(path: P, image: &GrayImage) -> Result<()> {
    let path = path.as_ref();
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(image_error(path))
}

/// Writes one exposure-interval frame into `dir`, returning its path.
pub fn write_frame(dir: &Path, index: usize, frame: &PolarityFrame) -> Result<PathBuf> {
    let path = frame_path(dir, index);
    frame
        .image()
        .save_with_format(&path, ImageFormat::Png)
        .map_err(image_error(&path))?;
    Ok(path)
}

/// Persists the whole artifact under `dir` using `prefix` for file names.
pub fn write_artifact(
    artifact: &StatisticsArtifact,
    dir: &Path,
    prefix: &str,
) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::new(dir, prefix);
    write_png(&paths.image, &artifact.render_total())?;
    write_png(&paths.per_second_image, &artifact.render_total_per_second())?;
    write_statistics(&paths.statistics, artifact)?;
    info!(
        image = ?paths.image,
        statistics = ?paths.statistics,
        "wrote statistics artifact"
    );
    Ok(paths)
}
