//! End-to-end properties of the accumulation pipeline.
//!
//! Run with: cargo test --test pipeline_properties

use evstats_core::{
    frames, output, store, AxisFlip, ChunkedDecoder, ChunkedSource, ColumnarEvents,
    ColumnarSource, Event, EventRecord, Geometry, InterleavedSource, Pipeline, PipelineConfig,
    Polarity, RawReader, RectifyMap, Result, StatisticsArtifact, StatsError, WindowBudget,
};
use std::io::Cursor;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;

fn geometry() -> Geometry {
    Geometry::new(WIDTH, HEIGHT).unwrap()
}

fn config(budget: WindowBudget) -> PipelineConfig {
    PipelineConfig {
        geometry: Some(geometry()),
        budget,
    }
}

/// Deterministic pseudo-random columns covering the whole sensor.
fn synthetic_columns(n: usize) -> ColumnarEvents {
    let mut state = 0x2545_f491_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };

    let mut columns = ColumnarEvents::default();
    for i in 0..n {
        columns.x.push((next() % WIDTH) as u16);
        columns.y.push((next() % HEIGHT) as u16);
        columns.t.push(i as i64 * 3);
        columns.p.push((next() % 2) as i8);
    }
    columns
}

/// Every pixel's total equals its positive plus negative count.
#[test]
fn test_total_is_sum_of_polarities() {
    let source = ColumnarSource::new(synthetic_columns(5_000)).unwrap();
    let outcome = Pipeline::new(config(WindowBudget::unbounded()))
        .run(source)
        .unwrap();

    let acc = &outcome.accumulator;
    for ((total, pos), neg) in acc
        .total()
        .as_slice()
        .iter()
        .zip(acc.positive().as_slice())
        .zip(acc.negative().as_slice())
    {
        assert_eq!(*total, pos + neg);
    }
    assert_eq!(acc.event_count(), 5_000);
    assert_eq!(outcome.report.admitted, 5_000);
}

/// The sum of all counts equals the events admitted before the window closed.
#[test]
fn test_sum_matches_admitted_events() {
    // Timestamps are 0, 3, 6, ...; a 300us window admits t <= 300
    let source = ColumnarSource::new(synthetic_columns(1_000)).unwrap();
    let outcome = Pipeline::new(config(WindowBudget::from_micros(300.0)))
        .run(source)
        .unwrap();

    assert_eq!(outcome.report.admitted, 101);
    assert_eq!(outcome.accumulator.total().sum(), 101);
    assert_eq!(outcome.report.stopped_at, Some(303));
}

/// Identical input and configuration give identical buffers.
#[test]
fn test_runs_are_deterministic() {
    let pipeline = Pipeline::new(config(WindowBudget::from_micros(1_500.0)));
    let first = pipeline
        .run(ColumnarSource::new(synthetic_columns(2_000)).unwrap())
        .unwrap();
    let second = pipeline
        .run(ColumnarSource::new(synthetic_columns(2_000)).unwrap())
        .unwrap();

    assert_eq!(first.accumulator, second.accumulator);
}

/// An identity rectification map leaves the buffers unchanged.
#[test]
fn test_identity_rectification_is_transparent() {
    let plain = Pipeline::new(config(WindowBudget::unbounded()))
        .run(ColumnarSource::new(synthetic_columns(3_000)).unwrap())
        .unwrap();
    let rectified = Pipeline::new(config(WindowBudget::unbounded()))
        .with_rectifier(RectifyMap::identity(geometry()))
        .run(ColumnarSource::new(synthetic_columns(3_000)).unwrap())
        .unwrap();

    assert_eq!(plain.accumulator, rectified.accumulator);
}

/// Rectified coordinates land where the map sends them, rounding halves to even.
#[test]
fn test_rectification_moves_events() {
    let g = Geometry::new(4, 1).unwrap();
    let map = RectifyMap::new(g, vec![[2.5, 0.0], [1.0, 0.0], [1.5, 0.0], [0.0, 0.0]]).unwrap();
    let source = InterleavedSource::new(
        vec![
            EventRecord { t: 0, x: 0, y: 0, p: 1 },
            EventRecord { t: 1, x: 2, y: 0, p: 0 },
        ],
        0,
    );

    let outcome = Pipeline::new(PipelineConfig {
        geometry: Some(g),
        budget: WindowBudget::unbounded(),
    })
    .with_rectifier(map)
    .run(source)
    .unwrap();

    assert_eq!(outcome.accumulator.positive().as_slice(), &[0, 0, 1, 0]);
    assert_eq!(outcome.accumulator.negative().as_slice(), &[0, 0, 1, 0]);
}

/// A map pointing outside the buffers aborts the run instead of clamping.
#[test]
fn test_rectification_out_of_bounds_aborts() {
    let g = Geometry::new(2, 1).unwrap();
    let map = RectifyMap::new(g, vec![[0.0, 0.0], [1.5, 0.0]]).unwrap();
    let source = InterleavedSource::new(vec![EventRecord { t: 0, x: 1, y: 0, p: 1 }], 0);

    let result = Pipeline::new(PipelineConfig {
        geometry: Some(g),
        budget: WindowBudget::unbounded(),
    })
    .with_rectifier(map)
    .run(source);
    assert!(matches!(result, Err(StatsError::Index(_))));
}

/// Timestamps [100, 150, 200, 260] with a 100us window admit exactly t <= 200.
#[test]
fn test_window_boundary_event() {
    let source = InterleavedSource::new(
        [100, 150, 200, 260]
            .iter()
            .enumerate()
            .map(|(i, &t)| EventRecord {
                t,
                x: i as u16,
                y: 0,
                p: 1,
            })
            .collect(),
        1_000_000,
    );
    let outcome = Pipeline::new(config(WindowBudget::from_micros(100.0)))
        .run(source)
        .unwrap();

    assert_eq!(outcome.report.admitted, 3);
    assert_eq!(outcome.accumulator.total().get(0, 2), Some(1));
    assert_eq!(outcome.accumulator.total().get(0, 3), Some(0));
    assert_eq!(outcome.report.stopped_at, Some(1_000_260));
}

/// A zero duration yields all-zero per-second buffers, never NaN or infinity.
#[test]
fn test_zero_duration_guard() {
    let source = ColumnarSource::new(synthetic_columns(500)).unwrap();
    let outcome = Pipeline::new(config(WindowBudget::unbounded()))
        .run(source)
        .unwrap();
    let (total, positive, negative) = outcome.accumulator.into_buffers();
    assert!(total.sum() > 0);

    let artifact = StatisticsArtifact::finalize(total, positive, negative, 0.0);
    for buffer in [
        &artifact.total_per_second,
        &artifact.positive_per_second,
        &artifact.negative_per_second,
    ] {
        assert!(buffer.as_slice().iter().all(|&v| v == 0.0));
    }
}

/// An unbounded window normalises to zero as well.
#[test]
fn test_unbounded_window_has_no_rate() {
    let source = ColumnarSource::new(synthetic_columns(100)).unwrap();
    let artifact = Pipeline::new(config(WindowBudget::unbounded()))
        .run(source)
        .unwrap()
        .finalize();

    assert!(artifact.duration_seconds.is_infinite());
    assert!(artifact.total_per_second.as_slice().iter().all(|&v| v == 0.0));
}

/// The interleaved record (t=5, x=3, y=7, p=1) lands at row 7, column 3.
#[test]
fn test_interleaved_field_order() {
    let record = EventRecord { t: 5, x: 3, y: 7, p: 1 };
    let interleaved = Pipeline::new(config(WindowBudget::unbounded()))
        .run(InterleavedSource::new(vec![record], 0))
        .unwrap();

    assert_eq!(interleaved.accumulator.positive().get(7, 3), Some(1));
    assert_eq!(interleaved.accumulator.total().sum(), 1);

    let columnar = Pipeline::new(config(WindowBudget::unbounded()))
        .run(
            ColumnarSource::new(ColumnarEvents {
                x: vec![3],
                y: vec![7],
                t: vec![5],
                p: vec![1],
                t_offset: 0,
            })
            .unwrap(),
        )
        .unwrap();
    assert_eq!(interleaved.accumulator, columnar.accumulator);
}

/// Decoder that never reports completion.
struct StuckDecoder {
    index: u64,
    t: i64,
}

impl ChunkedDecoder for StuckDecoder {
    fn is_done(&self) -> bool {
        false
    }

    fn current_event_index(&self) -> u64 {
        self.index
    }

    fn load_delta_t(&mut self, delta_t_us: i64) -> Result<Vec<Event>> {
        let chunk: Vec<Event> = (0..64)
            .map(|i| {
                Event::new(
                    (i % WIDTH as u64) as u16,
                    (i % HEIGHT as u64) as u16,
                    self.t,
                    Polarity::Negative,
                )
            })
            .collect();
        self.index += chunk.len() as u64;
        self.t += delta_t_us;
        Ok(chunk)
    }

    fn get_size(&self) -> (u32, u32) {
        (HEIGHT, WIDTH)
    }
}

/// A decoder that never finishes is cut off at the event ceiling.
#[test]
fn test_safety_ceiling_terminates() {
    let mut source = ChunkedSource::new(StuckDecoder { index: 0, t: 0 })
        .with_max_events(1_000)
        .with_flip(AxisFlip::NONE);
    let outcome = Pipeline::new(PipelineConfig::default())
        .run(&mut source)
        .unwrap();

    assert!(source.hit_ceiling());
    assert!(outcome.report.admitted <= 1_000);
    assert_eq!(outcome.report.geometry, geometry());

    let dir = tempfile::tempdir().unwrap();
    let artifact = outcome.finalize();
    let paths = output::write_artifact(&artifact, dir.path(), "ceiling").unwrap();
    assert!(paths.statistics.exists());
}

fn raw_recording() -> Vec<u8> {
    let mut data = b"% evt 3.0\n% format EVT3;width=4;height=2\n% end\n".to_vec();
    let words: [u16; 7] = [
        0x8000, // TIME_HIGH: 0
        0x6010, // TIME_LOW: 16
        0x0000, // ADDR_Y: y=0
        0x2800, // ADDR_X: x=0, pol=1
        0x0001, // ADDR_Y: y=1
        0x2001, // ADDR_X: x=1, pol=0
        0x2803, // ADDR_X: x=3, pol=1
    ];
    data.extend(words.iter().flat_map(|w| w.to_le_bytes()));
    data
}

/// Raw recordings are flipped on both axes after accumulation by default.
#[test]
fn test_raw_recording_flip() {
    let reader = RawReader::from_reader(Cursor::new(raw_recording()), "mem.raw").unwrap();
    let outcome = Pipeline::new(PipelineConfig::default())
        .run(ChunkedSource::new(reader))
        .unwrap();

    assert_eq!(outcome.report.flip, AxisFlip::BOTH);
    let total = outcome.accumulator.total();
    // (x=0, y=0) -> (x=3, y=1); (x=1, y=1) -> (x=2, y=0); (x=3, y=1) -> (x=0, y=0)
    assert_eq!(total.as_slice(), &[1, 0, 1, 0, 0, 0, 0, 1]);
    assert_eq!(outcome.accumulator.positive().get(1, 3), Some(1));
    assert_eq!(outcome.accumulator.negative().get(0, 2), Some(1));
}

/// The flip can be switched off.
#[test]
fn test_raw_recording_without_flip() {
    let reader = RawReader::from_reader(Cursor::new(raw_recording()), "mem.raw").unwrap();
    let outcome = Pipeline::new(PipelineConfig::default())
        .run(ChunkedSource::new(reader).with_flip(AxisFlip::NONE))
        .unwrap();

    assert_eq!(
        outcome.accumulator.total().as_slice(),
        &[1, 0, 0, 0, 0, 1, 0, 1]
    );
}

/// Raw files are read from disk through the same path.
#[test]
fn test_raw_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recording.raw");
    std::fs::write(&path, raw_recording()).unwrap();

    let reader = RawReader::open(&path).unwrap();
    assert_eq!(reader.geometry(), Geometry::new(4, 2).unwrap());
    let outcome = Pipeline::new(PipelineConfig::default())
        .run(ChunkedSource::new(reader))
        .unwrap();
    assert_eq!(outcome.report.admitted, 3);
}

/// Exposure frames built from stores on disk, one PNG per covered table row.
#[test]
fn test_exposure_frames_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("events.json");
    std::fs::write(
        &events,
        r#"{"events": {"x": [0, 3, 1, 2], "y": [0, 1, 1, 0], "t": [0, 40, 60, 90], "p": [1, 0, 1, 1]}, "t_offset": 1000}"#,
    )
    .unwrap();
    let table = dir.path().join("exposure_timestamps.txt");
    std::fs::write(
        &table,
        "# exposure_start_timestamp_us, exposure_end_timestamp_us\n\
         1000, 1030\n\
         1030, 1070\n\
         1070, 1200\n",
    )
    .unwrap();

    let columns = store::load_columnar(&events).unwrap();
    let intervals = store::load_exposure_intervals(&table).unwrap();
    let report = frames::write_frames(
        &columns,
        &intervals,
        Geometry::new(4, 2).unwrap(),
        dir.path(),
        |_| {},
    )
    .unwrap();

    assert_eq!(report.written, vec![dir.path().join("accumulated_events_0002.png")]);
    assert_eq!(report.skipped, 1);

    let frame = image::open(&report.written[0]).unwrap().into_rgb8();
    assert_eq!(frame.get_pixel(3, 1).0, [0, 0, 255]);
    assert_eq!(frame.get_pixel(1, 1).0, [255, 0, 0]);
    assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0]);
}
