//! `SPBlock` (sequence point) body (spec.md §4.4). Ported from
//! `coreclr-tracing::nettrace::{SequencePointBlock, ThreadSequenceNumber}`.
//! Thread/sequence-number content is discarded; the only observable effect
//! is the stack-id epoch reset handled by [`crate::stack::StackResolver`].

use crate::error::{NettraceError, Result};
use crate::reader::{ReadStatus, SequenceReader};

pub fn parse_sp_block_body(body: &[u8]) -> Result<()> {
    let mut r = SequenceReader::new();
    r.feed(body);

    let _timestamp = match r.try_i64() {
        ReadStatus::Ready(v) => v,
        ReadStatus::Incomplete => {
            return Err(NettraceError::malformed(r.position(), "truncated SPBlock"))
        }
    };
    let thread_count = match r.try_i32() {
        ReadStatus::Ready(v) => v,
        ReadStatus::Incomplete => {
            return Err(NettraceError::malformed(r.position(), "truncated SPBlock"))
        }
    };
    if thread_count < 0 {
        return Err(NettraceError::malformed(r.position(), "negative SPBlock thread count"));
    }
    for _ in 0..thread_count {
        match r.try_i64() {
            ReadStatus::Ready(_) => {}
            ReadStatus::Incomplete => {
                return Err(NettraceError::malformed(r.position(), "truncated SPBlock thread entry"))
            }
        }
        match r.try_i32() {
            ReadStatus::Ready(_) => {}
            ReadStatus::Incomplete => {
                return Err(NettraceError::malformed(r.position(), "truncated SPBlock thread entry"))
            }
        }
    }
    Ok(())
}
