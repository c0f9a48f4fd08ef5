//! Stateful EVT 3.0 decoding and the chunked raw-file reader.
//!
//! [`Evt3Decoder`] tracks timestamp, row and vector-base state across words.
//! [`RawReader`] wraps it around a `.raw` file and hands out events in
//! fixed time slices through the [`ChunkedDecoder`] interface, so a
//! recording is never decoded in one piece.

use crate::error::{Result, StatsError};
use crate::parser::{RawWord, WordKind};
use crate::source::ChunkedDecoder;
use crate::types::{Event, Geometry, Polarity};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Timestamp wrap handling constants (24-bit time base in microseconds).
const MAX_TIMESTAMP_BASE: u64 = ((1u64 << 12) - 1) << 12;
const TIME_LOOP: u64 = MAX_TIMESTAMP_BASE + (1 << 12);
const LOOP_THRESHOLD: u64 = 10 << 12;

/// Bytes pulled from the file per refill.
const READ_BUFFER_BYTES: usize = 1 << 20;

/// EVT 3.0 state machine.
#[derive(Debug, Default)]
pub struct Evt3Decoder {
    time_base: u64,
    current_time: u64,
    n_time_high_loops: u64,
    synced: bool,

    current_y: u16,
    current_base_x: u16,
    current_polarity: u8,
}

impl Evt3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a slice of words, appending CD events to `out`.
    ///
    /// Words before the first TIME_HIGH are dropped since no absolute time
    /// is known for them. Trigger and extension words are ignored.
    pub fn decode_words(&mut self, words: &[u16], out: &mut VecDeque<Event>) {
        let mut iter = words.iter().map(|&w| RawWord(w));

        if !self.synced {
            for word in iter.by_ref() {
                if word.kind() == Some(WordKind::TimeHigh) {
                    self.time_base = word.time_bits() << 12;
                    self.current_time = self.time_base;
                    self.synced = true;
                    break;
                }
            }
        }

        for word in iter {
            match word.kind() {
                Some(WordKind::AddrX) => {
                    out.push_back(self.event_at(word.coordinate(), word.polarity_bit()));
                }
                Some(WordKind::Vect12) => self.emit_vector(word.validity(12), 12, out),
                Some(WordKind::Vect8) => self.emit_vector(word.validity(8), 8, out),
                Some(WordKind::AddrY) => self.current_y = word.coordinate(),
                Some(WordKind::VectBaseX) => {
                    self.current_base_x = word.coordinate();
                    self.current_polarity = word.polarity_bit();
                }
                Some(WordKind::TimeHigh) => self.advance_time_high(word),
                Some(WordKind::TimeLow) => {
                    self.current_time = self.time_base + word.time_bits();
                }
                Some(WordKind::ExtTrigger)
                | Some(WordKind::Continued4)
                | Some(WordKind::Others)
                | Some(WordKind::Continued12)
                | None => {}
            }
        }
    }

    #[inline]
    fn event_at(&self, x: u16, polarity: u8) -> Event {
        Event::new(
            x,
            self.current_y,
            self.current_time as i64,
            Polarity::from_raw(polarity as i64),
        )
    }

    #[inline]
    fn advance_time_high(&mut self, word: RawWord) {
        let mut new_base = (word.time_bits() << 12) + self.n_time_high_loops * TIME_LOOP;

        // The 24-bit base wrapped around
        if self.time_base > new_base
            && (self.time_base - new_base) >= (MAX_TIMESTAMP_BASE - LOOP_THRESHOLD)
        {
            new_base += TIME_LOOP;
            self.n_time_high_loops += 1;
        }

        self.time_base = new_base;
        self.current_time = new_base;
    }

    #[inline]
    fn emit_vector(&mut self, mut valid: u32, count: u16, out: &mut VecDeque<Event>) {
        let end_x = self.current_base_x + count;
        for x in self.current_base_x..end_x {
            if valid & 0x1 != 0 {
                out.push_back(self.event_at(x, self.current_polarity));
            }
            valid >>= 1;
        }
        self.current_base_x = end_x;
    }
}

/// Chunked reader over an EVT 3.0 recording.
#[derive(Debug)]
pub struct RawReader<R> {
    reader: R,
    path: PathBuf,
    decoder: Evt3Decoder,
    geometry: Geometry,

    bytes: Vec<u8>,
    words: Vec<u16>,
    carry: usize,
    exhausted: bool,

    pending: VecDeque<Event>,
    cursor: Option<i64>,
    events_loaded: u64,
}

impl RawReader<BufReader<File>> {
    /// Opens a `.raw` file and parses its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| StatsError::resource(path, e))?;
        Self::from_reader(BufReader::new(file), path)
    }
}

impl<R: BufRead> RawReader<R> {
    /// Wraps an already opened stream. `path` is only used in error messages.
    pub fn from_reader(mut reader: R, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let geometry = parse_header(&mut reader).map_err(|e| match e.kind() {
            ErrorKind::InvalidData => {
                StatsError::DataFormat(format!("{:?}: malformed header: {}", path, e))
            }
            _ => StatsError::resource(&path, e),
        })?;
        debug!(?path, width = geometry.width, height = geometry.height, "parsed raw header");

        Ok(Self {
            reader,
            path,
            decoder: Evt3Decoder::new(),
            geometry,
            bytes: vec![0u8; READ_BUFFER_BYTES],
            words: Vec::with_capacity(READ_BUFFER_BYTES / 2),
            carry: 0,
            exhausted: false,
            pending: VecDeque::new(),
            cursor: None,
            events_loaded: 0,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Reads and decodes one more block of words.
    fn refill(&mut self) -> Result<()> {
        let read = loop {
            match self.reader.read(&mut self.bytes[self.carry..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(StatsError::resource(&self.path, e)),
            }
        };

        if read == 0 {
            self.exhausted = true;
            if self.carry != 0 {
                return Err(StatsError::DataFormat(format!(
                    "{:?} ends in the middle of a 16-bit word",
                    self.path
                )));
            }
            return Ok(());
        }

        let filled = self.carry + read;
        let even = filled & !1;
        self.words.resize(even / 2, 0);
        LittleEndian::read_u16_into(&self.bytes[..even], &mut self.words);
        self.decoder.decode_words(&self.words, &mut self.pending);

        self.carry = filled - even;
        if self.carry != 0 {
            self.bytes[0] = self.bytes[filled - 1];
        }
        Ok(())
    }
}

impl<R: BufRead> ChunkedDecoder for RawReader<R> {
    fn is_done(&self) -> bool {
        self.exhausted && self.pending.is_empty()
    }

    fn current_event_index(&self) -> u64 {
        self.events_loaded
    }

    /// Returns the events in `[cursor, cursor + delta_t_us)`; the first
    /// window starts at the first decoded timestamp.
    fn load_delta_t(&mut self, delta_t_us: i64) -> Result<Vec<Event>> {
        if self.cursor.is_none() {
            while self.pending.is_empty() && !self.exhausted {
                self.refill()?;
            }
            self.cursor = Some(self.pending.front().map_or(0, |e| e.t));
        }
        let end = self.cursor.unwrap_or(0).saturating_add(delta_t_us);

        while !self.exhausted && self.pending.back().map_or(true, |e| e.t < end) {
            self.refill()?;
        }

        let mut chunk = Vec::new();
        while let Some(event) = self.pending.front() {
            if event.t >= end {
                break;
            }
            chunk.push(*event);
            self.pending.pop_front();
        }

        self.cursor = Some(end);
        self.events_loaded += chunk.len() as u64;
        Ok(chunk)
    }

    fn get_size(&self) -> (u32, u32) {
        (self.geometry.height, self.geometry.width)
    }
}

/// Consumes the `%`-prefixed text header, returning the declared geometry.
fn parse_header<R: BufRead>(reader: &mut R) -> std::io::Result<Geometry> {
    let mut geometry = Geometry::default();

    loop {
        let peeked = reader.fill_buf()?;
        if peeked.first() != Some(&b'%') {
            break;
        }

        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.starts_with("% end") {
            break;
        }
        apply_header_line(&mut geometry, line.trim_end());
    }

    Ok(geometry)
}

fn apply_header_line(geometry: &mut Geometry, line: &str) {
    if let Some(format) = line.strip_prefix("% format ") {
        // "% format EVT3;width=1280;height=720"
        for (name, value) in format.split(';').filter_map(|part| part.split_once('=')) {
            match (name, value.parse::<u32>()) {
                ("width", Ok(w)) if w > 0 => geometry.width = w,
                ("height", Ok(h)) if h > 0 => geometry.height = h,
                _ => {}
            }
        }
    } else if let Some(dims) = line.strip_prefix("% geometry ") {
        // "% geometry 1280x720"
        if let Some((w, h)) = dims.split_once('x') {
            if let (Ok(w), Ok(h)) = (w.parse::<u32>(), h.parse::<u32>()) {
                if w > 0 && h > 0 {
                    geometry.width = w;
                    geometry.height = h;
                }
            }
        }
    } else if let Some(version) = line.strip_prefix("% evt ") {
        if version != "3.0" {
            warn!(version, "raw header declares a non-3.0 EVT version, decoding anyway");
        }
    }
}
