//! Restartable primitive decoder over a possibly-partial byte window.
//!
//! Every `try_*` method either fully advances the cursor and returns
//! [`ReadStatus::Ready`], or leaves the cursor untouched and returns
//! [`ReadStatus::Incomplete`] — the contract spelled out for the Sequence
//! Reader component. Fixed-width primitives are built on
//! `nom::number::streaming`, whose `Err(nom::Err::Incomplete(_))` already
//! means "didn't touch the input"; `SequenceReader` just translates that
//! into `Incomplete` and tracks the absolute stream position across chunks.

use nom::number::streaming::{le_f32, le_f64, le_i16, le_i32, le_i64, le_u16, le_u32, le_u64, le_u8};
use nom::Err as NomErr;
use uuid::Uuid;

use crate::error::{NettraceError, Result};

/// Outcome of a single primitive or composite read.
#[derive(Debug)]
pub enum ReadStatus<T> {
    Ready(T),
    /// Not enough bytes buffered yet. The reader position is unchanged;
    /// the caller should feed more bytes and retry the same read.
    Incomplete,
}

/// A sliding window over an append-only byte stream, with an absolute
/// position counter that survives compaction.
pub struct SequenceReader {
    buf: Vec<u8>,
    /// Absolute stream position of `buf[0]`.
    base: u64,
    /// Read cursor, as an offset into `buf`.
    cursor: usize,
}

impl SequenceReader {
    pub fn new() -> Self {
        SequenceReader {
            buf: Vec::new(),
            base: 0,
            cursor: 0,
        }
    }

    /// Append newly-arrived bytes from the byte source.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Absolute position of the read cursor in the overall stream.
    pub fn position(&self) -> u64 {
        self.base + self.cursor as u64
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.cursor..]
    }

    /// Drop already-consumed bytes so the buffer doesn't grow without
    /// bound across a long stream. Safe to call any time the cursor sits
    /// at a committed boundary (after a fully-parsed object/block).
    pub fn compact(&mut self) {
        if self.cursor > 0 {
            self.buf.drain(0..self.cursor);
            self.base += self.cursor as u64;
            self.cursor = 0;
        }
    }

    /// Run a composite read, rewinding the cursor if it reports
    /// `Incomplete`. Fatal errors are propagated without rewinding, since
    /// the caller is about to abort the whole parse anyway.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<ReadStatus<T>>,
    ) -> Result<ReadStatus<T>> {
        let snapshot = self.cursor;
        match f(self) {
            Ok(ReadStatus::Incomplete) => {
                self.cursor = snapshot;
                Ok(ReadStatus::Incomplete)
            }
            other => other,
        }
    }

    fn from_nom<T>(&mut self, r: nom::IResult<&[u8], T>) -> ReadStatus<T> {
        match r {
            Ok((rest, value)) => {
                let consumed = self.remaining().len() - rest.len();
                self.cursor += consumed;
                ReadStatus::Ready(value)
            }
            Err(NomErr::Incomplete(_)) => ReadStatus::Incomplete,
            // Fixed-width numeric parsers over a byte slice cannot fail
            // other than Incomplete.
            Err(_) => unreachable!("streaming numeric parsers only fail with Incomplete"),
        }
    }

    pub fn try_u8(&mut self) -> ReadStatus<u8> {
        let r = le_u8::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_i16(&mut self) -> ReadStatus<i16> {
        let r = le_i16::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_u16(&mut self) -> ReadStatus<u16> {
        let r = le_u16::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_i32(&mut self) -> ReadStatus<i32> {
        let r = le_i32::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_u32(&mut self) -> ReadStatus<u32> {
        let r = le_u32::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_i64(&mut self) -> ReadStatus<i64> {
        let r = le_i64::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_u64(&mut self) -> ReadStatus<u64> {
        let r = le_u64::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_f32(&mut self) -> ReadStatus<f32> {
        let r = le_f32::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_f64(&mut self) -> ReadStatus<f64> {
        let r = le_f64::<_, nom::error::Error<&[u8]>>(self.remaining());
        self.from_nom(r)
    }

    pub fn try_bytes(&mut self, len: usize) -> ReadStatus<Vec<u8>> {
        if self.remaining().len() < len {
            return ReadStatus::Incomplete;
        }
        let bytes = self.remaining()[..len].to_vec();
        self.cursor += len;
        ReadStatus::Ready(bytes)
    }

    pub fn advance(&mut self, len: usize) -> ReadStatus<()> {
        if self.remaining().len() < len {
            return ReadStatus::Incomplete;
        }
        self.cursor += len;
        ReadStatus::Ready(())
    }

    /// Microsoft GUID layout: first three fields little-endian, trailing
    /// 8 bytes verbatim — exactly `Uuid::from_bytes_le`'s contract.
    pub fn try_guid(&mut self) -> ReadStatus<Uuid> {
        match self.try_bytes(16) {
            ReadStatus::Ready(bytes) => {
                let arr: [u8; 16] = bytes.try_into().expect("exactly 16 bytes");
                ReadStatus::Ready(Uuid::from_bytes_le(arr))
            }
            ReadStatus::Incomplete => ReadStatus::Incomplete,
        }
    }

    /// Unsigned LEB128, used both for genuinely-unsigned fields and for
    /// what were originally signed deltas (callers reinterpret via
    /// `as i32`/`as i64` — see `try_var_i32`/`try_var_i64`).
    pub fn try_var_u64(&mut self) -> Result<ReadStatus<u64>> {
        let snapshot = self.cursor;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        for i in 0..10 {
            let byte = match self.try_u8() {
                ReadStatus::Ready(b) => b,
                ReadStatus::Incomplete => {
                    self.cursor = snapshot;
                    return Ok(ReadStatus::Incomplete);
                }
            };
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(ReadStatus::Ready(result));
            }
            shift += 7;
            if i == 9 {
                return Err(NettraceError::malformed(
                    self.position(),
                    "varint exceeds 10 bytes",
                ));
            }
        }
        unreachable!()
    }

    pub fn try_var_u32(&mut self) -> Result<ReadStatus<u32>> {
        Ok(match self.try_var_u64()? {
            ReadStatus::Ready(v) => ReadStatus::Ready(v as u32),
            ReadStatus::Incomplete => ReadStatus::Incomplete,
        })
    }

    /// The wire format only ever carries unsigned varints; fields that are
    /// semantically signed deltas are decoded as unsigned and reinterpreted
    /// bit-for-bit, matching the source's `transmute`-based approach but
    /// without `unsafe`.
    pub fn try_var_i64(&mut self) -> Result<ReadStatus<i64>> {
        Ok(match self.try_var_u64()? {
            ReadStatus::Ready(v) => ReadStatus::Ready(v as i64),
            ReadStatus::Incomplete => ReadStatus::Incomplete,
        })
    }

    pub fn try_var_i32(&mut self) -> Result<ReadStatus<i32>> {
        Ok(match self.try_var_u64()? {
            ReadStatus::Ready(v) => ReadStatus::Ready(v as u32 as i32),
            ReadStatus::Incomplete => ReadStatus::Incomplete,
        })
    }

    /// `i32` char count followed by `2 * count` bytes of UTF-16LE.
    pub fn try_length_prefixed_utf16(&mut self) -> Result<ReadStatus<String>> {
        self.transaction(|r| {
            let count = match r.try_i32() {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
            };
            if count < 0 {
                return Err(NettraceError::malformed(
                    r.position(),
                    "negative UTF-16 string length",
                ));
            }
            let byte_len = count as usize * 2;
            let bytes = match r.try_bytes(byte_len) {
                ReadStatus::Ready(b) => b,
                ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
            };
            Ok(ReadStatus::Ready(decode_utf16le(&bytes)))
        })
    }

    /// Consume UTF-16 code units until a `0x0000` terminator.
    pub fn try_null_terminated_utf16(&mut self) -> Result<ReadStatus<String>> {
        self.transaction(|r| {
            let mut units = Vec::new();
            loop {
                let unit = match r.try_u16() {
                    ReadStatus::Ready(v) => v,
                    ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
                };
                if unit == 0 {
                    break;
                }
                units.push(unit);
            }
            Ok(ReadStatus::Ready(
                String::from_utf16_lossy(&units),
            ))
        })
    }
}

impl Default for SequenceReader {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
