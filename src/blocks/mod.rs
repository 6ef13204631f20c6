//! One decoder per block kind (spec.md §4.4): `Trace`, `MetadataBlock`,
//! `EventBlock`, `StackBlock`, `SPBlock`. Ported from
//! `coreclr-tracing::nettrace::{NettraceTraceObject, NettraceEventBlock,
//! NettraceEventBlockHeader, StackBlock, StackStack, SequencePointBlock,
//! ThreadSequenceNumber}`.

pub mod event_header;
pub mod sp;
pub mod stack;
pub mod trace;

use crate::container;
use crate::error::Result;
use crate::reader::{ReadStatus, SequenceReader};

/// Every non-`Trace` block shares this prelude: a 4-byte size, alignment
/// padding relative to the absolute stream position, then exactly `size`
/// bytes of body (spec.md §4.4 "Generic block prelude").
pub fn read_sized_block_body(r: &mut SequenceReader) -> Result<ReadStatus<Vec<u8>>> {
    r.transaction(|r| {
        let size = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        if size < 0 {
            return Err(crate::error::NettraceError::malformed(r.position(), "negative block size"));
        }
        match container::align_to_4(r)? {
            ReadStatus::Ready(()) => {}
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        }
        match r.try_bytes(size as usize) {
            ReadStatus::Ready(body) => Ok(ReadStatus::Ready(body)),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        }
    })
}
