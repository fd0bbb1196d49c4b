//! Program image: the segment list and the bounded byte cursor.
//!
//! An [`Image`] is read-only once constructed and may be shared across any
//! number of decoder instances. The [`Cursor`] is the decoder's only way to
//! read bytes: every primitive read is bounds-checked against the segment's
//! buffer, so a decode attempt can never read adjacent memory.

use crate::Address;

/// One segment of the loaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    name: String,
    base: Address,
    executable: bool,
    data: Vec<u8>,
}

impl Segment {
    pub fn new(name: impl Into<String>, base: Address, executable: bool, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            base,
            executable,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base address of the segment in the image's address space.
    pub fn base(&self) -> Address {
        self.base
    }

    /// Length of the segment's backing buffer, in bytes.
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last mapped address.
    pub fn end(&self) -> Address {
        self.base.wrapping_add(self.len())
    }

    /// True if `addr` falls within this segment.
    pub fn contains(&self, addr: Address) -> bool {
        addr.wrapping_sub(self.base) < self.len()
    }

    pub fn executable(&self) -> bool {
        self.executable
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An ordered list of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    segments: Vec<Segment>,
}

impl Image {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Linear scan for the segment containing `addr`.
    pub fn segment_at(&self, addr: Address) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    /// Like [`Image::segment_at`], returning the segment's position.
    pub fn segment_index_at(&self, addr: Address) -> Option<usize> {
        self.segments.iter().position(|s| s.contains(addr))
    }
}

/// Bounded, sequential little-endian reader over one segment's buffer.
///
/// Each successful read advances the offset by its width; a read past the
/// end of the buffer returns `None` and leaves the offset unchanged. The
/// cursor remembers where it started so the decoder can compute how many
/// bytes a decode attempt consumed.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    start: usize,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8], start: usize) -> Self {
        Self {
            buf,
            start,
            pos: start,
        }
    }

    /// Current read offset within the buffer.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Bytes consumed since the cursor was created.
    pub fn consumed(&self) -> u32 {
        (self.pos - self.start) as u32
    }

    /// True if at least `n` more bytes can be read.
    pub fn avail(&self, n: usize) -> bool {
        self.pos + n <= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_u8().map(|b| b as i8)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Option<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }
}
