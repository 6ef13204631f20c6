//! `StackBlock` body (spec.md §4.4). Ported from
//! `coreclr-tracing::nettrace::{StackBlock, StackStack}`.

use crate::error::{NettraceError, Result};
use crate::reader::{ReadStatus, SequenceReader};

pub struct StackRecord {
    pub addresses: Vec<u64>,
}

pub struct StackBlockBody {
    pub first_id: u32,
    pub records: Vec<StackRecord>,
}

/// Parses a already-extracted block body (the fixed `{firstId, count,
/// records}` layout) from its own `SequenceReader`. `pointer_size` comes
/// from the stream's `Trace` object (spec.md §4.4: "stackSize is a multiple
/// of pointerSize") and is either 4 or 8.
pub fn parse_stack_block_body(body: &[u8], pointer_size: i32) -> Result<StackBlockBody> {
    if pointer_size != 4 && pointer_size != 8 {
        return Err(NettraceError::malformed(
            0,
            format!("unsupported pointer size {pointer_size}"),
        ));
    }
    let pointer_size = pointer_size as usize;

    let mut r = SequenceReader::new();
    r.feed(body);

    let first_id = read_to_completion(&mut r, |r| r.try_u32())?;
    let count = read_to_completion(&mut r, |r| r.try_u32())?;

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let stack_size = read_to_completion(&mut r, |r| r.try_u32())?;
        let raw = read_bytes_to_completion(&mut r, stack_size as usize)?;
        if raw.len() % pointer_size != 0 {
            return Err(NettraceError::malformed(
                r.position(),
                "stack record size is not a multiple of pointerSize",
            ));
        }
        let addresses = raw
            .chunks_exact(pointer_size)
            .map(|c| {
                if pointer_size == 4 {
                    u32::from_le_bytes(c.try_into().unwrap()) as u64
                } else {
                    u64::from_le_bytes(c.try_into().unwrap())
                }
            })
            .collect();
        records.push(StackRecord { addresses });
    }

    Ok(StackBlockBody { first_id, records })
}

/// The whole body is already fully buffered (it was extracted by the
/// generic sized-block prelude), so any `Incomplete` here means the block's
/// declared size was inconsistent with its own contents.
fn read_to_completion<T>(
    r: &mut SequenceReader,
    f: impl FnOnce(&mut SequenceReader) -> ReadStatus<T>,
) -> Result<T> {
    match f(r) {
        ReadStatus::Ready(v) => Ok(v),
        ReadStatus::Incomplete => Err(crate::error::NettraceError::malformed(
            r.position(),
            "stack block body shorter than its own fields declare",
        )),
    }
}

fn read_bytes_to_completion(r: &mut SequenceReader, len: usize) -> Result<Vec<u8>> {
    match r.try_bytes(len) {
        ReadStatus::Ready(v) => Ok(v),
        ReadStatus::Incomplete => Err(crate::error::NettraceError::malformed(
            r.position(),
            "stack record shorter than its declared size",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_record_body(first_id: u32, address_bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&first_id.to_le_bytes());
        body.extend_from_slice(&1u32.to_le_bytes()); // count
        body.extend_from_slice(&(address_bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(address_bytes);
        body
    }

    #[test]
    fn eight_byte_pointer_size_reads_u64_addresses() {
        let body = one_record_body(0, &0x1122_3344_5566_7788u64.to_le_bytes());
        let parsed = parse_stack_block_body(&body, 8).unwrap();
        assert_eq!(parsed.records[0].addresses, vec![0x1122_3344_5566_7788]);
    }

    #[test]
    fn four_byte_pointer_size_reads_u32_addresses() {
        let body = one_record_body(0, &0xAABB_CCDDu32.to_le_bytes());
        let parsed = parse_stack_block_body(&body, 4).unwrap();
        assert_eq!(parsed.records[0].addresses, vec![0xAABB_CCDD]);
    }

    #[test]
    fn unsupported_pointer_size_is_rejected() {
        let body = one_record_body(0, &[0u8; 8]);
        assert!(parse_stack_block_body(&body, 2).is_err());
    }
}
