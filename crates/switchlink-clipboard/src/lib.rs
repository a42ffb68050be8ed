//! The multi-format clipboard value shared between a server and its clients.
//!
//! `Clipboard` deliberately splits what the original's single `empty()` call
//! did: [`Clipboard::clear`] only drops format payloads, [`Clipboard::take_ownership`]
//! only advances the generation counter and the owner flag. [`Clipboard::empty`]
//! is kept as a thin composition of the two for callers that don't need the
//! distinction (see module-level rationale below).

use std::collections::BTreeMap;

use switchlink_wire::{FrameReader, FrameWriter};
use thiserror::Error;

/// One of the clipboard's supported representations of the same selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Format {
    Text = 0,
    Html = 1,
    Bitmap = 2,
}

impl Format {
    const ALL: [Format; 3] = [Format::Text, Format::Html, Format::Bitmap];

    fn from_wire(id: u32) -> Option<Format> {
        match id {
            0 => Some(Format::Text),
            1 => Some(Format::Html),
            2 => Some(Format::Bitmap),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard marshalled data is truncated")]
    Truncated,
    #[error("clipboard contains an unrecognised format id {0}")]
    UnknownFormat(u32),
}

impl From<switchlink_wire::WireError> for ClipboardError {
    fn from(_: switchlink_wire::WireError) -> Self {
        ClipboardError::Truncated
    }
}

/// A clipboard's content plus the bookkeeping needed to decide whose copy is
/// newer: a monotonically increasing generation and an ownership flag.
#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    formats: BTreeMap<u32, Vec<u8>>,
    generation: u32,
    owner: bool,
    is_open: bool,
}

impl Clipboard {
    /// A freshly constructed clipboard, matching the original's
    /// `open(0); empty(); close();` constructor sequence: `get_time()`
    /// reports generation `0` from the start, same as "never owned" would.
    pub fn new() -> Self {
        let mut c = Clipboard { formats: BTreeMap::new(), generation: 0, owner: false, is_open: false };
        c.open(0);
        c.clear();
        c.take_ownership(0);
        c.close();
        c
    }

    /// Marks the clipboard as open for writing with the given candidate
    /// generation. Returns whether the open succeeded (always true here;
    /// platform implementations that arbitrate with a system clipboard may
    /// override this to reject concurrent opens).
    pub fn open(&mut self, _generation: u32) -> bool {
        self.is_open = true;
        true
    }

    pub fn close(&mut self) {
        self.is_open = false;
    }

    /// Drops every stored format payload. Does not touch the generation
    /// counter or the ownership flag.
    pub fn clear(&mut self) {
        self.formats.clear();
    }

    /// Takes ownership at `generation`. This is the only operation that
    /// advances what [`Clipboard::get_time`] subsequently reports.
    pub fn take_ownership(&mut self, generation: u32) {
        self.owner = true;
        self.generation = generation;
    }

    /// `clear()` then `take_ownership(generation)`, matching the original's
    /// fused `empty()` for callers that don't need the split.
    pub fn empty(&mut self, generation: u32) -> bool {
        self.clear();
        self.take_ownership(generation);
        true
    }

    pub fn add(&mut self, format: Format, data: Vec<u8>) {
        if self.is_open {
            self.formats.insert(format as u32, data);
        }
    }

    pub fn has(&self, format: Format) -> bool {
        self.formats.contains_key(&(format as u32))
    }

    pub fn get(&self, format: Format) -> &[u8] {
        self.formats.get(&(format as u32)).map_or(&[], Vec::as_slice)
    }

    /// Generation of the data currently held. `0` until the first
    /// [`Clipboard::take_ownership`] call ever made on this value.
    pub fn get_time(&self) -> u32 {
        self.generation
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// `u32` format count, then per format: `u32` format id, `u32` length,
    /// the raw bytes.
    pub fn marshall(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = FrameWriter::new(&mut buf);
        w.put_u32(self.formats.len() as u32);
        for format in Format::ALL {
            if let Some(data) = self.formats.get(&(format as u32)) {
                w.put_u32(format as u32).put_str(data);
            }
        }
        buf
    }

    /// Inverse of [`Clipboard::marshall`]; the resulting clipboard takes
    /// ownership at `generation` as if it had just been populated locally.
    pub fn unmarshall(bytes: &[u8], generation: u32) -> Result<Clipboard, ClipboardError> {
        let mut r = FrameReader::new(bytes);
        let count = r.get_u32()?;
        let mut c = Clipboard::new();
        c.open(generation);
        for _ in 0..count {
            let id = r.get_u32()?;
            let format = Format::from_wire(id).ok_or(ClipboardError::UnknownFormat(id))?;
            let data = r.get_bytes()?.to_vec();
            c.add(format, data);
        }
        c.take_ownership(generation);
        c.close();
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_clipboard_reports_generation_zero() {
        let c = Clipboard::new();
        assert_eq!(c.get_time(), 0);
    }

    #[test]
    fn marshall_round_trips_every_populated_format() {
        let mut c = Clipboard::new();
        c.open(7);
        c.add(Format::Text, b"hello".to_vec());
        c.add(Format::Html, b"<b>hi</b>".to_vec());
        c.take_ownership(7);
        c.close();

        let bytes = c.marshall();
        assert_eq!(bytes.len(), 4 + (8 + 5) + (8 + 9));

        let round = Clipboard::unmarshall(&bytes, 7).unwrap();
        assert_eq!(round.get(Format::Text), b"hello");
        assert_eq!(round.get(Format::Html), b"<b>hi</b>");
        assert!(!round.has(Format::Bitmap));
        assert_eq!(round.get_time(), 7);
    }

    #[test]
    fn clear_does_not_move_the_generation() {
        let mut c = Clipboard::new();
        c.open(3);
        c.add(Format::Text, b"x".to_vec());
        c.take_ownership(3);
        c.close();
        c.clear();
        assert_eq!(c.get_time(), 3);
        assert!(!c.has(Format::Text));
    }

    #[test]
    fn writes_outside_an_open_session_are_dropped() {
        let mut c = Clipboard::new();
        c.add(Format::Text, b"ignored".to_vec());
        assert!(!c.has(Format::Text));
    }
}
