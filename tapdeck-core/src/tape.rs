//! C64 TAP tape image: pulse-stream timing and chunked streaming.
//!
//! A TAP file is a 20 byte header followed by pulse records. A non-zero byte
//! `b` is a pulse of `b * 8` clock cycles; a zero byte is followed by a
//! little-endian 24-bit cycle count. Cycles are converted to seconds at the
//! PAL cassette clock.
//!
//! Timing is always recomputed from the raw bytes so that position->time and
//! time->position walk the exact same records.

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{TapError, TapResult};
use crate::event::{DeckEvent, EventSender};

/// Offset of the first pulse record.
pub const HEADER_END: usize = 0x14;

/// PAL cassette clock in Hz.
pub const CLOCK_HZ: f64 = 985_248.0;

/// Minimum cursor movement between two position notifications.
pub const NOTIFY_THRESHOLD: usize = 1000;

/// Signature found at the start of C64 raw tape images.
pub const C64_SIGNATURE: &[u8; 12] = b"C64-TAPE-RAW";

/// Tape shared between the recorder and the link's communication loop.
pub type SharedTape = Arc<Mutex<Tape>>;

/// Informational view of the 20 byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapHeader {
    pub signature: [u8; 12],
    pub version: u8,
    /// Pulse data length as declared by the file (not trusted for parsing).
    pub data_length: u32,
}

impl TapHeader {
    fn parse(bytes: &[u8]) -> Self {
        let mut signature = [0u8; 12];
        signature.copy_from_slice(&bytes[..12]);
        Self {
            signature,
            version: bytes[12],
            data_length: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        }
    }

    /// Signature as text (lossy).
    pub fn signature_str(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }

    pub fn is_c64_raw(&self) -> bool {
        &self.signature == C64_SIGNATURE
    }
}

/// Decode the pulse record at `pos`.
///
/// Returns the cycle count and the record length in bytes, or `None` when
/// the record would run past the end of the buffer.
fn pulse_at(data: &[u8], pos: usize) -> Option<(u32, usize)> {
    match *data.get(pos)? {
        0 => {
            let d = data.get(pos + 1..pos + 4)?;
            let cycles = u32::from(d[0]) | u32::from(d[1]) << 8 | u32::from(d[2]) << 16;
            Some((cycles, 4))
        }
        b => Some((u32::from(b) * 8, 1)),
    }
}

fn cycles_to_seconds(cycles: u32) -> f64 {
    f64::from(cycles) / CLOCK_HZ
}

/// A loaded tape image with a read cursor.
#[derive(Debug)]
pub struct Tape {
    data: Vec<u8>,
    pos: usize,
    last_reported: usize,
    events: Option<EventSender>,
}

impl Tape {
    /// Build a tape from an in-memory image.
    pub fn from_bytes(data: Vec<u8>) -> TapResult<Self> {
        if data.len() < HEADER_END {
            return Err(TapError::TooShort(data.len()));
        }
        Ok(Self {
            data,
            pos: HEADER_END,
            last_reported: 0,
            events: None,
        })
    }

    /// Read exactly `length` bytes from `reader`.
    ///
    /// Anything less than the full length fails the load; no partial tape
    /// is produced.
    pub fn load<R: Read>(reader: R, length: usize) -> TapResult<Self> {
        let mut data = Vec::with_capacity(length);
        reader.take(length as u64).read_to_end(&mut data)?;
        if data.len() != length {
            return Err(TapError::ShortRead {
                expected: length,
                actual: data.len(),
            });
        }
        Self::from_bytes(data)
    }

    /// Load a tape from a file path.
    pub fn from_path(path: &Path) -> TapResult<Self> {
        let file = std::fs::File::open(path)?;
        let length = file.metadata()?.len() as usize;
        Self::load(std::io::BufReader::new(file), length)
    }

    /// Wrap into the shared handle used by the link.
    pub fn into_shared(self) -> SharedTape {
        Arc::new(Mutex::new(self))
    }

    /// Route position notifications to `events`.
    pub fn set_event_sender(&mut self, events: Option<EventSender>) {
        self.events = events;
    }

    pub fn header(&self) -> TapHeader {
        TapHeader::parse(&self.data[..HEADER_END])
    }

    /// Raw image including the header.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the image.
    pub fn remaining(&self) -> usize {
        self.size() - self.pos
    }

    /// Move the cursor back to the first pulse record.
    pub fn rewind(&mut self) {
        self.pos = HEADER_END;
        self.report_position();
    }

    /// Move the cursor, clamped to the pulse stream.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.clamp(HEADER_END, self.size());
        self.report_position();
    }

    /// Elapsed time at the cursor, in seconds.
    pub fn time(&self) -> f64 {
        self.position_to_time(self.pos)
    }

    /// Move the cursor to the first record boundary at or after `time`.
    ///
    /// Always notifies, regardless of the distance moved.
    pub fn set_time(&mut self, time: f64) {
        self.pos = self.time_to_position(time);
        self.last_reported = self.pos;
        self.notify();
    }

    /// Total playing time of the pulse stream.
    pub fn duration(&self) -> f64 {
        self.position_to_time(self.size())
    }

    /// Sum the durations of all records starting before `pos`.
    ///
    /// A trailing escape record cut short by the end of the image is not
    /// counted.
    pub fn position_to_time(&self, pos: usize) -> f64 {
        let mut time = 0.0;
        let mut xpos = HEADER_END;
        while xpos < pos {
            match pulse_at(&self.data, xpos) {
                Some((cycles, len)) => {
                    time += cycles_to_seconds(cycles);
                    xpos += len;
                }
                None => break,
            }
        }
        time
    }

    /// First record boundary whose cumulative time is `>= time`, or the end
    /// of the image if the stream is shorter.
    pub fn time_to_position(&self, time: f64) -> usize {
        let mut xtime = 0.0;
        let mut xpos = HEADER_END;
        while xpos < self.size() && xtime < time {
            match pulse_at(&self.data, xpos) {
                Some((cycles, len)) => {
                    xtime += cycles_to_seconds(cycles);
                    xpos += len;
                }
                None => return self.size(),
            }
        }
        xpos
    }

    /// Take up to `max_len` bytes at the cursor and advance past them.
    pub fn next_chunk(&mut self, max_len: usize) -> &[u8] {
        let start = self.pos;
        let end = start + max_len.min(self.remaining());
        self.pos = end;
        self.report_position();
        &self.data[start..end]
    }

    fn report_position(&mut self) {
        if self.pos.abs_diff(self.last_reported) > NOTIFY_THRESHOLD {
            self.last_reported = self.pos;
            self.notify();
        }
    }

    fn notify(&self) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening any more.
            let _ = events.send(DeckEvent::PositionChanged {
                position: self.pos,
                length: self.size(),
            });
        }
    }
}
