//! Readers for the on-disk event and rectification stores.
//!
//! All stores are JSON objects:
//!
//! - columnar: `{"events": {"x": [..], "y": [..], "t": [..], "p": [..]}, "t_offset": 0}`
//! - interleaved: `{"events": [[t, x, y, p], ..], "t_offset": 0}`
//! - rectification: `{"rectify_map": [[[x, y], ..], ..]}` with shape `(height, width, 2)`
//!
//! `t_offset` is optional and defaults to zero.
//!
//! Exposure timestamps are a comma separated table whose first two columns
//! hold the start and end of each exposure in microseconds. The first two
//! rows are skipped, but row indices still count them.

use crate::error::{Result, StatsError};
use crate::frames::ExposureInterval;
use crate::rectify::RectifyMap;
use crate::source::{ColumnarEvents, ColumnarSource, EventRecord, InterleavedSource};
use crate::types::Geometry;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

#[derive(Deserialize)]
struct ColumnarFile {
    events: Option<ColumnarColumns>,
    #[serde(default)]
    t_offset: i64,
}

#[derive(Deserialize)]
struct ColumnarColumns {
    x: Option<Vec<i64>>,
    y: Option<Vec<i64>>,
    t: Option<Vec<i64>>,
    p: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct InterleavedFile {
    events: Option<Vec<Vec<i64>>>,
    #[serde(default)]
    t_offset: i64,
}

#[derive(Deserialize)]
struct RectifyFile {
    rectify_map: Option<Vec<Vec<Vec<f32>>>>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| StatsError::resource(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| StatsError::json(path, e))
}

fn require<T>(value: Option<T>, path: &Path, key: &str) -> Result<T> {
    value.ok_or_else(|| StatsError::Configuration(format!("{:?} has no '{}' key", path, key)))
}

fn narrow<T: TryFrom<i64>>(value: i64, field: &str, index: usize) -> Result<T> {
    T::try_from(value).map_err(|_| {
        StatsError::DataFormat(format!(
            "event {}: {} value {} is out of range",
            index, field, value
        ))
    })
}

fn narrow_column<T: TryFrom<i64>>(values: Vec<i64>, field: &str) -> Result<Vec<T>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| narrow(v, field, i))
        .collect()
}

/// Loads the parallel columns of a columnar store.
pub fn load_columnar<P: AsRef<Path>>(path: P) -> Result<ColumnarEvents> {
    let path = path.as_ref();
    let file: ColumnarFile = read_json(path)?;
    let events = require(file.events, path, "events")?;

    let columns = ColumnarEvents {
        x: narrow_column(require(events.x, path, "events/x")?, "x")?,
        y: narrow_column(require(events.y, path, "events/y")?, "y")?,
        t: require(events.t, path, "events/t")?,
        p: narrow_column(require(events.p, path, "events/p")?, "p")?,
        t_offset: file.t_offset,
    };
    let n = columns.validate()?;
    info!(?path, events = n, t_offset = columns.t_offset, "loaded columnar store");
    Ok(columns)
}

/// Opens a columnar store as an event source.
pub fn open_columnar<P: AsRef<Path>>(path: P) -> Result<ColumnarSource> {
    ColumnarSource::new(load_columnar(path)?)
}

/// Loads the `(t, x, y, p)` records of an interleaved store.
pub fn load_interleaved<P: AsRef<Path>>(path: P) -> Result<(Vec<EventRecord>, i64)> {
    let path = path.as_ref();
    let file: InterleavedFile = read_json(path)?;
    let rows = require(file.events, path, "events")?;

    let records = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| match row[..] {
            [t, x, y, p] => Ok(EventRecord {
                t,
                x: narrow(x, "x", i)?,
                y: narrow(y, "y", i)?,
                p: narrow(p, "p", i)?,
            }),
            _ => Err(StatsError::DataFormat(format!(
                "{:?}: record {} has {} fields, expected (t, x, y, p)",
                path,
                i,
                row.len()
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    info!(?path, events = records.len(), t_offset = file.t_offset, "loaded interleaved store");
    Ok((records, file.t_offset))
}

/// Opens an interleaved store as an event source.
pub fn open_interleaved<P: AsRef<Path>>(path: P) -> Result<InterleavedSource> {
    let (records, t_offset) = load_interleaved(path)?;
    Ok(InterleavedSource::new(records, t_offset))
}

/// Loads a rectification map and checks it covers `geometry`.
pub fn load_rectify_map<P: AsRef<Path>>(path: P, geometry: Geometry) -> Result<RectifyMap> {
    let path = path.as_ref();
    let file: RectifyFile = read_json(path)?;
    let rows = require(file.rectify_map, path, "rectify_map")?;

    if rows.len() != geometry.height as usize {
        return Err(StatsError::DataFormat(format!(
            "{:?}: rectify map has {} rows, expected {}",
            path,
            rows.len(),
            geometry.height
        )));
    }

    let mut targets = Vec::with_capacity(geometry.pixels());
    for (y, row) in rows.into_iter().enumerate() {
        if row.len() != geometry.width as usize {
            return Err(StatsError::DataFormat(format!(
                "{:?}: rectify map row {} has {} columns, expected {}",
                path,
                y,
                row.len(),
                geometry.width
            )));
        }
        for (x, entry) in row.into_iter().enumerate() {
            match entry[..] {
                [tx, ty] => targets.push([tx, ty]),
                _ => {
                    return Err(StatsError::DataFormat(format!(
                        "{:?}: rectify map entry ({}, {}) has {} values, expected 2",
                        path,
                        y,
                        x,
                        entry.len()
                    )))
                }
            }
        }
    }

    info!(?path, width = geometry.width, height = geometry.height, "loaded rectify map");
    RectifyMap::new(geometry, targets)
}

/// Rows of an exposure table that carry no interval.
const EXPOSURE_SKIPPED_ROWS: usize = 2;

/// Loads exposure intervals, keeping each row's index for frame numbering.
pub fn load_exposure_intervals<P: AsRef<Path>>(path: P) -> Result<Vec<ExposureInterval>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| StatsError::resource(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quote(b'|')
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let mut intervals = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| StatsError::csv(path, e))?;
        if index < EXPOSURE_SKIPPED_ROWS {
            continue;
        }

        let column = |col: usize, name: &str| -> Result<i64> {
            let field = record.get(col).ok_or_else(|| {
                StatsError::DataFormat(format!("{:?}: row {} has no {} column", path, index, name))
            })?;
            field.parse().map_err(|_| {
                StatsError::DataFormat(format!(
                    "{:?}: row {}: {} value {:?} is not an integer",
                    path, index, name, field
                ))
            })
        };
        intervals.push(ExposureInterval {
            index,
            t_start: column(0, "t_start")?,
            t_end: column(1, "t_end")?,
        });
    }

    info!(?path, intervals = intervals.len(), "loaded exposure timestamps");
    Ok(intervals)
}
