//! The compressed event-blob state machine (spec.md §4.5), the delta-coded
//! heart of the format. Ported from
//! `coreclr-tracing::nettrace::parser::EventBlobIter::parse_compressed_header`,
//! restructured to run over an already-extracted block body (the whole body
//! is buffered up front by the generic sized-block prelude, so `Incomplete`
//! here can only mean the block's own `blockSize` disagreed with its
//! contents — a fatal format error, not a retry).

use bitflags::bitflags;
use uuid::Uuid;

use crate::error::{NettraceError, Result};
use crate::reader::{ReadStatus, SequenceReader};

bitflags! {
    /// Per-blob header flags (spec.md §4.5). Named after the conditional
    /// field they gate, in the same lower_snake `bitflags!` style as the
    /// CoreCLR method-flags enums elsewhere in this codebase's lineage.
    #[derive(PartialEq, Eq)]
    struct BlobFlags: u8 {
        const has_metadata_id = 1 << 0;
        const has_seq_capture_thread_proc = 1 << 1;
        const has_thread_id = 1 << 2;
        const has_stack_id = 1 << 3;
        const has_activity_id = 1 << 4;
        const has_related_activity_id = 1 << 5;
        const is_sorted = 1 << 6;
        const has_payload_size = 1 << 7;
    }
}

#[derive(Clone)]
pub struct BlobFields {
    pub metadata_id: u32,
    pub sequence_number: u32,
    pub capture_thread_id: u64,
    pub processor_number: Option<u32>,
    pub thread_id: u64,
    pub stack_id: u32,
    pub timestamp: i64,
    pub activity_id: Uuid,
    pub related_activity_id: Uuid,
}

/// `S` in spec.md §4.5: the per-block carry-over state the compressed
/// decoder inherits fields from when a flag bit is clear.
#[derive(Clone)]
struct BlobState {
    metadata_id: u32,
    sequence_number: u32,
    capture_thread_id: u64,
    processor_number: Option<u32>,
    thread_id: u64,
    stack_id: u32,
    timestamp: i64,
    activity_id: Uuid,
    related_activity_id: Uuid,
    payload_size: u32,
}

impl Default for BlobState {
    fn default() -> Self {
        BlobState {
            metadata_id: 0,
            sequence_number: 0,
            capture_thread_id: 0,
            processor_number: None,
            thread_id: 0,
            stack_id: 0,
            timestamp: 0,
            activity_id: Uuid::nil(),
            related_activity_id: Uuid::nil(),
            payload_size: 0,
        }
    }
}

/// Iterates the compressed event blobs packed into one `MetadataBlock` or
/// `EventBlock` body, yielding `(BlobFields, payload bytes)` pairs.
pub struct CompressedBlobIter<'a> {
    reader: SequenceReader,
    state: BlobState,
    body_len: u64,
    _body: &'a [u8],
}

impl<'a> CompressedBlobIter<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        let mut reader = SequenceReader::new();
        reader.feed(body);
        CompressedBlobIter {
            reader,
            state: BlobState::default(),
            body_len: body.len() as u64,
            _body: body,
        }
    }

    fn truncated(&self) -> NettraceError {
        NettraceError::malformed(self.reader.position(), "truncated compressed event blob")
    }

    /// Reads the next blob's header and payload. Returns `None` once the
    /// body has been fully consumed.
    pub fn next_blob(&mut self) -> Result<Option<(BlobFields, Vec<u8>)>> {
        if self.reader.position() >= self.body_len {
            return Ok(None);
        }

        let flags = match self.reader.try_u8() {
            ReadStatus::Ready(v) => BlobFlags::from_bits_truncate(v),
            ReadStatus::Incomplete => return Err(self.truncated()),
        };

        let metadata_id = if flags.contains(BlobFlags::has_metadata_id) {
            match self.reader.try_var_u32()? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            }
        } else {
            self.state.metadata_id
        };

        let (sequence_number, capture_thread_id, processor_number) = if flags
            .contains(BlobFlags::has_seq_capture_thread_proc)
        {
            let delta = match self.reader.try_var_i32()? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            };
            let seq = self.state.sequence_number.wrapping_add_signed(delta);
            let capture_thread_id = match self.reader.try_var_u64()? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            };
            let processor_number = match self.reader.try_var_u32()? {
                ReadStatus::Ready(v) => Some(v),
                ReadStatus::Incomplete => return Err(self.truncated()),
            };
            (seq, capture_thread_id, processor_number)
        } else {
            (
                self.state.sequence_number,
                self.state.capture_thread_id,
                self.state.processor_number,
            )
        };
        // The sequence number only actually advances for real events
        // (metadata_id != 0); metadata-definition blobs don't occupy a slot.
        let sequence_number = if metadata_id != 0 {
            sequence_number.wrapping_add(1)
        } else {
            sequence_number
        };

        let thread_id = if flags.contains(BlobFlags::has_thread_id) {
            match self.reader.try_var_u64()? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            }
        } else {
            self.state.thread_id
        };

        let stack_id = if flags.contains(BlobFlags::has_stack_id) {
            match self.reader.try_var_u32()? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            }
        } else {
            self.state.stack_id
        };

        let timestamp_delta = match self.reader.try_var_i64()? {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Err(self.truncated()),
        };
        let timestamp = self.state.timestamp.wrapping_add(timestamp_delta);

        let activity_id = if flags.contains(BlobFlags::has_activity_id) {
            match self.reader.try_guid() {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            }
        } else {
            self.state.activity_id
        };

        let related_activity_id = if flags.contains(BlobFlags::has_related_activity_id) {
            match self.reader.try_guid() {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            }
        } else {
            self.state.related_activity_id
        };

        let payload_size = if flags.contains(BlobFlags::has_payload_size) {
            match self.reader.try_var_u32()? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Err(self.truncated()),
            }
        } else {
            self.state.payload_size
        };

        let payload = match self.reader.try_bytes(payload_size as usize) {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Err(self.truncated()),
        };

        self.state = BlobState {
            metadata_id,
            sequence_number,
            capture_thread_id,
            processor_number,
            thread_id,
            stack_id,
            timestamp,
            activity_id,
            related_activity_id,
            payload_size,
        };

        Ok(Some((
            BlobFields {
                metadata_id,
                sequence_number,
                capture_thread_id,
                processor_number,
                thread_id,
                stack_id,
                timestamp,
                activity_id,
                related_activity_id,
            },
            payload,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out
    }

    #[test]
    fn second_blob_inherits_fields_not_flagged() {
        let mut body = Vec::new();
        // Blob 1: full header, metadata_id=1, seq/capt/proc, thread_id,
        // stack_id, timestamp delta=100, payload_size=0.
        body.push(0b1001_1111); // all low bits + payload size
        body.extend(varint(1)); // metadata_id
        body.extend(varint(5)); // seq delta (zigzag-free: unsigned reinterpret, 5 here)
        body.extend(varint(10)); // capture_thread_id
        body.extend(varint(0)); // processor_number
        body.extend(varint(42)); // thread_id
        body.extend(varint(7)); // stack_id
        body.extend(varint(100)); // timestamp delta
        body.extend(varint(0)); // payload_size

        // Blob 2: only timestamp delta flagged (always present), everything
        // else inherited.
        body.push(0b0000_0000);
        body.extend(varint(50)); // timestamp delta

        let mut iter = CompressedBlobIter::new(&body);
        let (first, _) = iter.next_blob().unwrap().unwrap();
        assert_eq!(first.metadata_id, 1);
        assert_eq!(first.thread_id, 42);
        assert_eq!(first.stack_id, 7);
        assert_eq!(first.timestamp, 100);

        let (second, _) = iter.next_blob().unwrap().unwrap();
        assert_eq!(second.metadata_id, 1, "inherited from previous blob");
        assert_eq!(second.thread_id, 42, "inherited from previous blob");
        assert_eq!(second.stack_id, 7, "inherited from previous blob");
        assert_eq!(second.timestamp, 150, "150 = 100 + 50 delta");

        assert!(iter.next_blob().unwrap().is_none());
    }
}
