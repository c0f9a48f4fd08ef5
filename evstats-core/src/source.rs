//! Event source adapters.
//!
//! Three backing stores feed the pipeline: a columnar store with parallel
//! `x`/`y`/`t`/`p` arrays, an interleaved store of `(t, x, y, p)` records,
//! and a raw sensor bitstream read through a stateful [`ChunkedDecoder`].
//! Each is wrapped in an adapter implementing [`EventSource`], which yields
//! canonical [`Event`]s one at a time.

use crate::accumulator::AxisFlip;
use crate::error::{Result, StatsError};
use crate::types::{Event, Geometry, Polarity};
use std::collections::VecDeque;
use std::ops::Range;
use tracing::{debug, warn};

/// Default slice pulled from a chunked decoder per call (50 ms).
pub const DEFAULT_DELTA_T_US: i64 = 50_000;

/// Default ceiling on events consumed from a chunked decoder.
pub const DEFAULT_MAX_EVENTS: u64 = 10_000_000;

/// A lazily produced, single-pass stream of events.
pub trait EventSource {
    /// Produces the next event in arrival order, or `None` once exhausted.
    fn next_event(&mut self) -> Result<Option<Event>>;

    /// Absolute time bias of the recording in microseconds.
    fn t_offset(&self) -> i64 {
        0
    }

    /// Resolution declared by the store itself, if any.
    fn geometry(&self) -> Option<Geometry> {
        None
    }

    /// Flip to apply to the accumulated buffers once the stream ends.
    fn post_flip(&self) -> AxisFlip {
        AxisFlip::NONE
    }
}

impl<S: EventSource + ?Sized> EventSource for &mut S {
    fn next_event(&mut self) -> Result<Option<Event>> {
        (**self).next_event()
    }

    fn t_offset(&self) -> i64 {
        (**self).t_offset()
    }

    fn geometry(&self) -> Option<Geometry> {
        (**self).geometry()
    }

    fn post_flip(&self) -> AxisFlip {
        (**self).post_flip()
    }
}

/// Parallel event columns, all of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnarEvents {
    pub x: Vec<u16>,
    pub y: Vec<u16>,
    pub t: Vec<i64>,
    pub p: Vec<i8>,
    pub t_offset: i64,
}

impl ColumnarEvents {
    /// Checks that the four columns line up.
    pub fn validate(&self) -> Result<usize> {
        let n = self.x.len();
        if self.y.len() != n || self.t.len() != n || self.p.len() != n {
            return Err(StatsError::DataFormat(format!(
                "column lengths differ: x={}, y={}, t={}, p={}",
                n,
                self.y.len(),
                self.t.len(),
                self.p.len()
            )));
        }
        Ok(n)
    }

    /// Index range of the events whose absolute time lies in `[t_start, t_end)`.
    ///
    /// Expects `t` sorted ascending. Returns `None` when the recording does
    /// not cover the interval, i.e. it starts before `t_offset` or ends after
    /// the last event.
    pub fn time_range(&self, t_start: i64, t_end: i64) -> Option<Range<usize>> {
        let last = *self.t.last()?;
        let start = t_start.checked_sub(self.t_offset)?;
        let end = t_end.checked_sub(self.t_offset)?;
        if start < 0 || end > last.saturating_add(1) {
            return None;
        }

        let lo = self.t.partition_point(|&t| t < start);
        let hi = self.t.partition_point(|&t| t < end);
        Some(lo..hi.max(lo))
    }
}

/// Zips the columns of a [`ColumnarEvents`] index by index.
#[derive(Debug)]
pub struct ColumnarSource {
    columns: ColumnarEvents,
    len: usize,
    index: usize,
}

impl ColumnarSource {
    pub fn new(columns: ColumnarEvents) -> Result<Self> {
        let len = columns.validate()?;
        Ok(Self {
            columns,
            len,
            index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl EventSource for ColumnarSource {
    #[inline]
    fn next_event(&mut self) -> Result<Option<Event>> {
        if self.index >= self.len {
            return Ok(None);
        }
        let i = self.index;
        self.index += 1;
        let c = &self.columns;
        Ok(Some(Event::new(
            c.x[i],
            c.y[i],
            c.t[i],
            Polarity::from_raw(c.p[i] as i64),
        )))
    }

    fn t_offset(&self) -> i64 {
        self.columns.t_offset
    }
}

/// One interleaved record, stored as `(t, x, y, p)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub t: i64,
    pub x: u16,
    pub y: u16,
    pub p: i8,
}

impl From<EventRecord> for Event {
    #[inline]
    fn from(record: EventRecord) -> Self {
        Event::new(
            record.x,
            record.y,
            record.t,
            Polarity::from_raw(record.p as i64),
        )
    }
}

/// Iterates a sequence of interleaved records in order.
#[derive(Debug)]
pub struct InterleavedSource {
    records: std::vec::IntoIter<EventRecord>,
    t_offset: i64,
}

impl InterleavedSource {
    pub fn new(records: Vec<EventRecord>, t_offset: i64) -> Self {
        Self {
            records: records.into_iter(),
            t_offset,
        }
    }
}

impl EventSource for InterleavedSource {
    #[inline]
    fn next_event(&mut self) -> Result<Option<Event>> {
        Ok(self.records.next().map(Event::from))
    }

    fn t_offset(&self) -> i64 {
        self.t_offset
    }
}

/// A stateful decoder that hands out events in time slices.
pub trait ChunkedDecoder {
    /// True once every event has been handed out.
    fn is_done(&self) -> bool;

    /// Number of events handed out so far.
    fn current_event_index(&self) -> u64;

    /// Decodes the next `delta_t_us` microseconds worth of events.
    fn load_delta_t(&mut self, delta_t_us: i64) -> Result<Vec<Event>>;

    /// Sensor resolution as `(height, width)`.
    fn get_size(&self) -> (u32, u32);
}

/// Pulls time slices from a [`ChunkedDecoder`] until it is done or the
/// event ceiling is reached.
pub struct ChunkedSource<D> {
    decoder: D,
    delta_t_us: i64,
    max_events: u64,
    flip: AxisFlip,

    chunk: VecDeque<Event>,
    emitted: u64,
    capped: bool,
}

impl<D: ChunkedDecoder> ChunkedSource<D> {
    /// Creates a source with the default slice, ceiling and a full flip.
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            delta_t_us: DEFAULT_DELTA_T_US,
            max_events: DEFAULT_MAX_EVENTS,
            flip: AxisFlip::BOTH,
            chunk: VecDeque::new(),
            emitted: 0,
            capped: false,
        }
    }

    pub fn with_delta_t(mut self, delta_t_us: i64) -> Self {
        self.delta_t_us = delta_t_us.max(1);
        self
    }

    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn with_flip(mut self, flip: AxisFlip) -> Self {
        self.flip = flip;
        self
    }

    /// Events handed to the pipeline so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Whether the event ceiling cut the stream short.
    pub fn hit_ceiling(&self) -> bool {
        self.capped
    }

    pub fn into_inner(self) -> D {
        self.decoder
    }

    fn cap(&mut self) {
        if !self.capped {
            warn!(
                max_events = self.max_events,
                "event ceiling reached, stopping before the decoder is done"
            );
            self.capped = true;
        }
    }
}

impl<D: ChunkedDecoder> EventSource for ChunkedSource<D> {
    fn next_event(&mut self) -> Result<Option<Event>> {
        if self.emitted >= self.max_events {
            self.cap();
            return Ok(None);
        }

        while self.chunk.is_empty() {
            if self.decoder.is_done() {
                return Ok(None);
            }
            if self.decoder.current_event_index() >= self.max_events {
                self.cap();
                return Ok(None);
            }
            let slice = self.decoder.load_delta_t(self.delta_t_us)?;
            debug!(
                events = slice.len(),
                index = self.decoder.current_event_index(),
                "loaded chunk"
            );
            self.chunk.extend(slice);
        }

        self.emitted += 1;
        Ok(self.chunk.pop_front())
    }

    fn geometry(&self) -> Option<Geometry> {
        let (height, width) = self.decoder.get_size();
        Geometry::new(width, height).ok()
    }

    fn post_flip(&self) -> AxisFlip {
        self.flip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decoder that never finishes and yields `per_chunk` events per call.
    struct EndlessDecoder {
        per_chunk: usize,
        index: u64,
        t: i64,
    }

    impl ChunkedDecoder for EndlessDecoder {
        fn is_done(&self) -> bool {
            false
        }

        fn current_event_index(&self) -> u64 {
            self.index
        }

        fn load_delta_t(&mut self, delta_t_us: i64) -> Result<Vec<Event>> {
            let events = (0..self.per_chunk)
                .map(|i| Event::new((i % 4) as u16, 0, self.t, Polarity::Positive))
                .collect::<Vec<_>>();
            self.index += events.len() as u64;
            self.t += delta_t_us;
            Ok(events)
        }

        fn get_size(&self) -> (u32, u32) {
            (2, 4)
        }
    }

    fn drain<S: EventSource>(source: &mut S) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = source.next_event().unwrap() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_columnar_zips_by_index() {
        let mut source = ColumnarSource::new(ColumnarEvents {
            x: vec![1, 2],
            y: vec![3, 4],
            t: vec![10, 20],
            p: vec![1, 0],
            t_offset: 7,
        })
        .unwrap();

        assert_eq!(source.t_offset(), 7);
        assert_eq!(
            drain(&mut source),
            vec![
                Event::new(1, 3, 10, Polarity::Positive),
                Event::new(2, 4, 20, Polarity::Negative),
            ]
        );
    }

    #[test]
    fn test_columnar_length_mismatch() {
        let err = ColumnarSource::new(ColumnarEvents {
            x: vec![1, 2],
            y: vec![3],
            t: vec![10, 20],
            p: vec![1, 0],
            t_offset: 0,
        })
        .unwrap_err();
        assert!(matches!(err, StatsError::DataFormat(_)));
    }

    #[test]
    fn test_time_range_is_half_open() {
        let columns = ColumnarEvents {
            x: vec![0; 5],
            y: vec![0; 5],
            t: vec![0, 10, 10, 20, 30],
            p: vec![1; 5],
            t_offset: 1_000,
        };

        assert_eq!(columns.time_range(1_010, 1_020), Some(1..3));
        assert_eq!(columns.time_range(1_000, 1_031), Some(0..5));
        assert_eq!(columns.time_range(1_011, 1_019), Some(3..3));
        assert_eq!(columns.time_range(1_020, 1_010), Some(3..3));

        // Outside the recording
        assert_eq!(columns.time_range(999, 1_010), None);
        assert_eq!(columns.time_range(1_020, 1_032), None);
        assert_eq!(ColumnarEvents::default().time_range(0, 10), None);
    }

    #[test]
    fn test_interleaved_reorders_fields() {
        let record = EventRecord {
            t: 5,
            x: 3,
            y: 7,
            p: 1,
        };
        let mut source = InterleavedSource::new(vec![record], 0);
        assert_eq!(
            source.next_event().unwrap(),
            Some(Event::new(3, 7, 5, Polarity::Positive))
        );
        assert_eq!(source.next_event().unwrap(), None);
    }

    #[test]
    fn test_chunked_source_respects_ceiling() {
        let decoder = EndlessDecoder {
            per_chunk: 7,
            index: 0,
            t: 0,
        };
        let mut source = ChunkedSource::new(decoder).with_max_events(20);

        let events = drain(&mut source);
        assert_eq!(events.len(), 20);
        assert!(source.hit_ceiling());
        assert_eq!(source.geometry(), Some(Geometry { width: 4, height: 2 }));
        assert_eq!(source.post_flip(), AxisFlip::BOTH);
    }
}
