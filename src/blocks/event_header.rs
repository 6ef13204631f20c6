//! Shared header for `MetadataBlock`/`EventBlock` bodies (spec.md §4.4).
//! Ported from `coreclr-tracing::nettrace::NettraceEventBlockHeader`.

use crate::error::Result;
use crate::reader::{ReadStatus, SequenceReader};

pub struct EventBlockHeader {
    pub header_size: i16,
    pub flags: i16,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

pub const COMPRESSED_FLAG: i16 = 1;

/// Reads the `{i16 headerSize, i16 flags, i64 minTimestamp, i64
/// maxTimestamp, headerSize - 20 reserved bytes}` prelude, leaving the
/// reader positioned at the first event blob.
pub fn read_event_block_header(r: &mut SequenceReader) -> Result<ReadStatus<EventBlockHeader>> {
    r.transaction(|r| {
        let header_size = match r.try_i16() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let flags = match r.try_i16() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let min_timestamp = match r.try_i64() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let max_timestamp = match r.try_i64() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let reserved = (header_size as i64 - 20).max(0) as usize;
        match r.advance(reserved) {
            ReadStatus::Ready(()) => {}
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        }
        Ok(ReadStatus::Ready(EventBlockHeader {
            header_size,
            flags,
            min_timestamp,
            max_timestamp,
        }))
    })
}

impl EventBlockHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & COMPRESSED_FLAG != 0
    }
}
