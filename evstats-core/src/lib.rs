//! Per-pixel event statistics for event camera recordings.
//!
//! This crate reduces a stream of `(x, y, t, p)` events into per-pixel count
//! buffers (total, positive and negative polarity) and their per-second
//! rates. Events come from one of three stores: a columnar store with
//! parallel arrays, an interleaved `(t, x, y, p)` record store, or a
//! Prophesee EVT 3.0 raw recording decoded chunk by chunk.
//!
//! # Example
//!
//! ```no_run
//! use evstats_core::{store, output, Pipeline, PipelineConfig, Geometry, WindowBudget};
//!
//! let config = PipelineConfig {
//!     geometry: Some(Geometry::new(640, 480).unwrap()),
//!     budget: WindowBudget::from_parts(Some(1.0), None, None),
//! };
//! let source = store::open_columnar("events.json").unwrap();
//! let outcome = Pipeline::new(config).run(source).unwrap();
//!
//! println!("Accumulated {} events", outcome.report.admitted);
//! let artifact = outcome.finalize();
//! output::write_artifact(&artifact, std::path::Path::new("."), "events_per_pixel").unwrap();
//! ```
//!
//! # Features
//!
//! - Lazy, single-pass ingestion with an elapsed-time cutoff
//! - Optional rectification through a dense lookup map
//! - Streaming EVT 3.0 decoding with an event-count ceiling
//! - JSON statistics containers and 8-bit PNG previews
//! - Polarity frames per camera exposure interval

pub mod accumulator;
pub mod decoder;
pub mod error;
pub mod frames;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod rectify;
pub mod source;
pub mod stats;
pub mod store;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use accumulator::{AxisFlip, CountRaster, PixelAccumulator, Raster};
pub use decoder::{Evt3Decoder, RawReader};
pub use error::{Result, StatsError};
pub use frames::{ExposureInterval, FrameSlicer, FramesReport};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, RunOutcome, RunReport};
pub use rectify::RectifyMap;
pub use source::{
    ChunkedDecoder, ChunkedSource, ColumnarEvents, ColumnarSource, EventRecord, EventSource,
    InterleavedSource,
};
pub use stats::{BufferSummary, PolarityFrame, StatisticsArtifact};
pub use types::{Event, Geometry, Polarity};
pub use window::{Admission, WindowBudget, WindowPolicy};
