//! Word-oriented binary codec primitives.
//!
//! Every scalar travels as a 4-byte big-endian word. Strings are arrays of
//! bytes whose length includes the trailing NUL; a length of zero encodes an
//! absent string. Optional records ("pointers") are prefixed by an is-null
//! word.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of a protocol word in bytes.
pub const WORD_SIZE: usize = 4;
/// Largest array length (in elements) accepted while decoding.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Errors raised while encoding or decoding wire records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ends before the record does; read more bytes and retry.
    #[error("incomplete record")]
    Incomplete,
    #[error("invalid record: {0}")]
    Invalid(&'static str),
    #[error("unknown {kind} value {value}")]
    UnknownValue { kind: &'static str, value: i32 },
}

/// Types that can be written to the wire.
pub trait Encode {
    fn encode(&self, w: &mut WireWriter);
}

/// Types that can be read back from the wire.
pub trait Decode: Sized {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError>;
}

/// Growable output buffer tagged with the negotiated protocol build.
#[derive(Debug)]
pub struct WireWriter {
    buf: BytesMut,
    build: u16,
}

impl WireWriter {
    /// Create an empty writer for the given protocol build.
    pub fn new(build: u16) -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
            build,
        }
    }

    /// Protocol build the record is encoded for.
    pub fn build(&self) -> u16 {
        self.build
    }

    pub fn word(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.word(i32::from(value));
    }

    /// Write an array length prefix.
    pub fn len(&mut self, len: usize) {
        self.word(len as i32);
    }

    /// Write raw bytes without a length prefix.
    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Write an optional string; `None` is encoded as a zero length.
    pub fn string(&mut self, value: Option<&str>) {
        match value {
            None => self.len(0),
            Some(s) => {
                self.len(s.len() + 1);
                self.buf.put_slice(s.as_bytes());
                self.buf.put_u8(0);
            }
        }
    }

    /// Write an optional record behind an is-null word.
    pub fn ptr<T: Encode + ?Sized>(&mut self, value: Option<&T>) {
        match value {
            None => self.word(1),
            Some(inner) => {
                self.word(0);
                inner.encode(self);
            }
        }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.buf.len()
    }

    /// Finish the record.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a possibly incomplete receive buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    build: u16,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], build: u16) -> Self {
        Self { buf, pos: 0, build }
    }

    /// Protocol build the record was encoded for.
    pub fn build(&self) -> u16 {
        self.build
    }

    /// Bytes consumed from the start of the buffer.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn word(&mut self) -> Result<i32, WireError> {
        let raw = self.take(WORD_SIZE)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn bool(&mut self) -> Result<bool, WireError> {
        Ok(self.word()? != 0)
    }

    /// Read and validate an array length prefix.
    pub fn len(&mut self) -> Result<usize, WireError> {
        let len = self.word()?;
        if len < 0 {
            return Err(WireError::Invalid("negative array length"));
        }
        let len = len as usize;
        if len > MAX_ARRAY_LEN {
            return Err(WireError::Invalid("array length exceeds limit"));
        }
        Ok(len)
    }

    /// Read `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    /// Read an optional string, dropping the trailing NUL and anything after it.
    pub fn string(&mut self) -> Result<Option<String>, WireError> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.take(len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(Some(String::from_utf8_lossy(&raw[..end]).into_owned()))
    }

    /// Read an optional record behind an is-null word.
    pub fn ptr<T: Decode>(&mut self) -> Result<Option<T>, WireError> {
        if self.bool()? {
            return Ok(None);
        }
        T::decode(self).map(Some)
    }
}

impl Encode for () {
    fn encode(&self, _w: &mut WireWriter) {}
}

impl Decode for () {
    fn decode(_r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(())
    }
}

impl Encode for i32 {
    fn encode(&self, w: &mut WireWriter) {
        w.word(*self);
    }
}

impl Decode for i32 {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.word()
    }
}

impl Encode for str {
    fn encode(&self, w: &mut WireWriter) {
        w.string(Some(self));
    }
}

impl Encode for String {
    fn encode(&self, w: &mut WireWriter) {
        w.string(Some(self));
    }
}

impl Decode for String {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(r.string()?.unwrap_or_default())
    }
}

/// Encode a single record for the given protocol build.
pub fn encode<T: Encode + ?Sized>(value: &T, build: u16) -> Bytes {
    let mut w = WireWriter::new(build);
    value.encode(&mut w);
    w.freeze()
}

/// Decode one record from the front of `buf`, returning it with the number of
/// bytes it occupied. Returns [`WireError::Incomplete`] when `buf` holds only
/// a prefix of the record.
pub fn decode<T: Decode>(buf: &[u8], build: u16) -> Result<(T, usize), WireError> {
    let mut r = WireReader::new(buf, build);
    let value = T::decode(&mut r)?;
    Ok((value, r.consumed()))
}
