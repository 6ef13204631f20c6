//! FastSerialization container framing (spec.md §4.3).
//!
//! Ported from `coreclr-tracing::nettrace::{NettraceHeader, NettraceString,
//! NettraceTag, NettraceTypeObject}`, rebuilt on the restartable
//! `SequenceReader` so a type-object envelope can arrive split across
//! multiple byte-pipe chunks.

use crate::error::{NettraceError, Result};
use crate::reader::{ReadStatus, SequenceReader};

/// The highest reader version this crate understands (spec.md §4.3, §9).
/// Objects declaring a higher `minReaderVersion` are forward-skipped.
pub const READER_VERSION: i32 = 4;

const MAGIC: &[u8; 8] = b"Nettrace";
const SIGNATURE: &str = "!FastSerialization.1";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Tag {
    NullReference = 1,
    BeginPrivateObject = 5,
    EndObject = 6,
}

impl Tag {
    fn from_raw(raw: u8, pos: u64) -> Result<Self> {
        match raw {
            1 => Ok(Tag::NullReference),
            5 => Ok(Tag::BeginPrivateObject),
            6 => Ok(Tag::EndObject),
            other => Err(NettraceError::malformed(pos, format!("unexpected tag byte {other}"))),
        }
    }
}

/// The `{ BeginPrivateObject NullReference objectVersion minReaderVersion
/// name }` envelope that precedes every object's body.
pub struct ObjectHeader {
    pub type_name: String,
    pub object_version: i32,
    pub min_reader_version: i32,
}

/// Reads the fixed 8-byte magic and the length-prefixed serializer
/// signature that open every `.nettrace` stream.
pub fn read_stream_header(r: &mut SequenceReader) -> Result<ReadStatus<()>> {
    r.transaction(|r| {
        let magic = match r.try_bytes(8) {
            ReadStatus::Ready(b) => b,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        if magic != MAGIC {
            return Err(NettraceError::malformed(r.position(), "bad magic, expected \"Nettrace\""));
        }
        let sig_len = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        if sig_len < 0 {
            return Err(NettraceError::malformed(r.position(), "negative signature length"));
        }
        let sig_bytes = match r.try_bytes(sig_len as usize) {
            ReadStatus::Ready(b) => b,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let signature = String::from_utf8(sig_bytes)
            .map_err(|_| NettraceError::malformed(r.position(), "serializer signature is not valid UTF-8"))?;
        if signature != SIGNATURE {
            return Err(NettraceError::malformed(
                r.position(),
                format!("unexpected serializer signature {signature:?}"),
            ));
        }
        Ok(ReadStatus::Ready(()))
    })
}

/// Reads the next tag in the stream. Returns `Ok(Ready(None))` on
/// `NullReference` (end of stream), `Ok(Ready(Some(header)))` for a real
/// object, or propagates `Incomplete`.
pub fn advance_to_next_object(r: &mut SequenceReader) -> Result<ReadStatus<Option<ObjectHeader>>> {
    r.transaction(|r| {
        let start_tag = match r.try_u8() {
            ReadStatus::Ready(v) => Tag::from_raw(v, r.position())?,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        if start_tag == Tag::NullReference {
            return Ok(ReadStatus::Ready(None));
        }
        if start_tag != Tag::BeginPrivateObject {
            return Err(NettraceError::malformed(r.position(), "expected BeginPrivateObject tag"));
        }

        // The type object: BeginPrivateObject NullReference objectVersion
        // minReaderVersion nameLength name EndObject.
        match r.try_u8() {
            ReadStatus::Ready(v) => {
                let tag = Tag::from_raw(v, r.position())?;
                if tag != Tag::NullReference {
                    return Err(NettraceError::malformed(r.position(), "expected type object NullReference"));
                }
            }
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        }
        let object_version = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let min_reader_version = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let name_length = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        if name_length < 0 {
            return Err(NettraceError::malformed(r.position(), "negative object name length"));
        }
        let name_bytes = match r.try_bytes(name_length as usize) {
            ReadStatus::Ready(b) => b,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let type_name = String::from_utf8(name_bytes)
            .map_err(|_| NettraceError::malformed(r.position(), "object type name is not valid UTF-8"))?;

        match r.try_u8() {
            ReadStatus::Ready(v) => {
                let tag = Tag::from_raw(v, r.position())?;
                if tag != Tag::EndObject {
                    return Err(NettraceError::malformed(r.position(), "expected EndObject after type object"));
                }
            }
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        }

        Ok(ReadStatus::Ready(Some(ObjectHeader {
            type_name,
            object_version,
            min_reader_version,
        })))
    })
}

/// Reads the `EndObject` tag that closes every object's body.
pub fn read_object_end(r: &mut SequenceReader) -> Result<ReadStatus<()>> {
    r.transaction(|r| match r.try_u8() {
        ReadStatus::Ready(v) => {
            let tag = Tag::from_raw(v, r.position())?;
            if tag != Tag::EndObject {
                return Err(NettraceError::malformed(r.position(), "expected EndObject tag"));
            }
            Ok(ReadStatus::Ready(()))
        }
        ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
    })
}

/// `(4 - pos % 4) % 4` padding bytes, validated zero but not fatal if not
/// (spec.md §4.3, Open Question resolved in DESIGN.md: stays non-fatal).
pub fn align_to_4(r: &mut SequenceReader) -> Result<ReadStatus<()>> {
    let pad = (4 - (r.position() % 4)) % 4;
    if pad == 0 {
        return Ok(ReadStatus::Ready(()));
    }
    r.transaction(|r| match r.try_bytes(pad as usize) {
        ReadStatus::Ready(bytes) => {
            if bytes.iter().any(|&b| b != 0) {
                log::warn!("non-zero alignment padding at byte {}", r.position());
            }
            Ok(ReadStatus::Ready(()))
        }
        ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
    })
}
