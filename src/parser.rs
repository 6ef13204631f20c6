//! The orchestrating decode loop (spec.md §5): pulls chunks from the
//! [`crate::source::ByteSource`], feeds them into a single
//! [`SequenceReader`], and drives the container/block/event-blob decoders
//! through the one suspension point at the channel boundary — whenever a
//! decoder reports `Incomplete`, this loop (and only this loop) awaits the
//! next chunk and retries the same call.

use tokio::io::AsyncRead;

use crate::blocks::{self, event_header, sp, stack as stack_block, trace as trace_block};
use crate::container;
use crate::error::{NettraceError, Result};
use crate::event_blob::CompressedBlobIter;
use crate::intern::InternPool;
use crate::known_events;
use crate::options::{ParseOptions, Progress, ProgressCallback};
use crate::payload;
use crate::reader::{ReadStatus, SequenceReader};
use crate::source::{ByteSource, Chunk};
use crate::trace::{Trace, TraceBuilder};

/// Parses a `.nettrace` stream read from `reader` into a fully assembled
/// [`Trace`]. `on_progress`, if given, is invoked after every fully-decoded
/// top-level object.
pub async fn parse<R>(
    reader: R,
    options: ParseOptions,
    mut on_progress: Option<&mut ProgressCallback<'_>>,
) -> Result<Trace>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut source = ByteSource::spawn(reader);
    let mut r = SequenceReader::new();
    let mut builder = TraceBuilder::new(options.reject_divergent_metadata_redefinition);
    let mut pool = InternPool::new();
    let mut events_decoded: u64 = 0;

    read_retrying(&mut source, &mut r, container::read_stream_header).await?;

    loop {
        let header = match read_retrying(&mut source, &mut r, container::advance_to_next_object).await? {
            Some(h) => h,
            None => break,
        };

        match header.type_name.as_str() {
            "Trace" => {
                let trace_object = read_retrying(&mut source, &mut r, trace_block::read_trace_object).await?;
                builder.set_trace_object(trace_object);
            }
            "MetadataBlock" | "EventBlock" => {
                let body = read_retrying(&mut source, &mut r, blocks::read_sized_block_body).await?;
                let decoded = decode_blob_block(&body, &mut builder, &mut pool)?;
                events_decoded += decoded;
            }
            "StackBlock" => {
                let body = read_retrying(&mut source, &mut r, blocks::read_sized_block_body).await?;
                let pointer_size = builder
                    .trace_object()
                    .ok_or_else(|| NettraceError::malformed(r.position(), "StackBlock before Trace object"))?
                    .pointer_size;
                decode_stack_block(&body, pointer_size, &mut builder)?;
            }
            "SPBlock" => {
                let body = read_retrying(&mut source, &mut r, blocks::read_sized_block_body).await?;
                sp::parse_sp_block_body(&body)?;
                builder.on_sequence_point();
            }
            other => {
                if header.min_reader_version > container::READER_VERSION {
                    log::debug!(
                        "skipping forward-compatible object {other:?} (minReaderVersion {})",
                        header.min_reader_version
                    );
                }
                // Every non-Trace object shares the generic sized-body
                // framing regardless of whether we recognize its name.
                read_retrying(&mut source, &mut r, blocks::read_sized_block_body).await?;
            }
        }

        read_retrying(&mut source, &mut r, container::read_object_end).await?;
        r.compact();

        if let Some(cb) = on_progress.as_deref_mut() {
            cb(Progress {
                bytes_consumed: r.position(),
                events_decoded,
            });
        }
    }

    builder.finish()
}

/// Repeats `f` against `r`, pulling chunks from `source` and feeding them in
/// whenever `f` reports [`ReadStatus::Incomplete`]. This is the crate's only
/// await point inside the decode loop (spec.md §5).
async fn read_retrying<T>(
    source: &mut ByteSource,
    r: &mut SequenceReader,
    mut f: impl FnMut(&mut SequenceReader) -> Result<ReadStatus<T>>,
) -> Result<T> {
    loop {
        match f(r)? {
            ReadStatus::Ready(v) => return Ok(v),
            ReadStatus::Incomplete => match source.next_chunk().await {
                Some(Chunk::Data(bytes)) => r.feed(&bytes),
                Some(Chunk::End(Ok(()))) => {
                    return Err(NettraceError::TruncatedStream { pos: r.position() })
                }
                Some(Chunk::End(Err(e))) => return Err(e),
                None => return Err(NettraceError::TruncatedStream { pos: r.position() }),
            },
        }
    }
}

/// `MetadataBlock` and `EventBlock` bodies share one layout (spec.md §4.4):
/// the same `{headerSize, flags, minTimestamp, maxTimestamp, reserved}`
/// prelude followed by compressed blobs, with the decoder routing each blob
/// on its own `metadataId` — a metadata-definition blob (`metadataId == 0`)
/// can appear inside an `EventBlock` and vice versa, so both block kinds
/// are decoded through this one function.
fn decode_blob_block(body: &[u8], builder: &mut TraceBuilder, pool: &mut InternPool) -> Result<u64> {
    let mut br = SequenceReader::new();
    br.feed(body);
    let header = match event_header::read_event_block_header(&mut br)? {
        ReadStatus::Ready(h) => h,
        ReadStatus::Incomplete => {
            return Err(NettraceError::malformed(
                br.position(),
                "block shorter than its own header declares",
            ))
        }
    };
    if !header.is_compressed() {
        // Open Question resolved in DESIGN.md: uncompressed event blobs
        // remain unsupported and fatal rather than silently skipped.
        return Err(NettraceError::malformed(
            br.position(),
            "uncompressed blocks are not supported",
        ));
    }

    let rest = &body[br.position() as usize..];
    let mut iter = CompressedBlobIter::new(rest);
    let mut count = 0u64;
    while let Some((fields, payload)) = iter.next_blob()? {
        if fields.metadata_id == 0 {
            let mut pr = SequenceReader::new();
            pr.feed(&payload);
            let def = match crate::metadata::parse_metadata_definition(&mut pr, payload.len() as u64)? {
                ReadStatus::Ready(def) => def,
                ReadStatus::Incomplete => {
                    return Err(NettraceError::malformed(
                        pr.position(),
                        "metadata definition shorter than its own blob declares",
                    ))
                }
            };
            builder.insert_metadata(def, pr.position())?;
            continue;
        }

        let metadata = builder.metadata_for(fields.metadata_id).cloned().ok_or_else(|| {
            NettraceError::malformed(
                br.position(),
                format!("event references unknown metadata id {}", fields.metadata_id),
            )
        })?;

        let known = known_events::decode_known_event(
            &metadata.provider_name,
            metadata.event_id,
            metadata.version,
            &payload,
        )?;
        if let Some(k) = &known {
            builder.register_known_event_method_range(k);
        }

        // Run the generic walker regardless of whether a hand-written parser
        // also matched: for known events, `metadata.field_definitions` has
        // already been overridden (see `metadata::parse_metadata_definition`)
        // to the same shape that parser expects, so `Event.fields` is
        // populated consistently either way (spec.md §4.6b "same mapping
        // shape"; §8 invariant 6).
        let mut pr = SequenceReader::new();
        pr.feed(&payload);
        let field_values = match payload::parse_fields(&mut pr, &metadata.field_definitions, pool)? {
            ReadStatus::Ready(map) => map,
            ReadStatus::Incomplete => {
                return Err(NettraceError::malformed(
                    pr.position(),
                    "event payload shorter than its metadata's field definitions declare",
                ))
            }
        };

        // spec.md §4.5 step 5: every event gets `stackIndex = stackIndexOffset
        // + stackId` unconditionally; if no StackBlock ever registered that
        // index, `StackResolver::resolve` just yields no frames for it.
        let stack_index = builder.effective_stack_index(fields.stack_id);

        builder.push_event(
            metadata,
            fields.sequence_number,
            fields.timestamp,
            fields.thread_id,
            fields.capture_thread_id,
            fields.processor_number,
            fields.activity_id,
            fields.related_activity_id,
            stack_index,
            field_values,
            known,
        );
        count += 1;
    }
    Ok(count)
}

fn decode_stack_block(body: &[u8], pointer_size: i32, builder: &mut TraceBuilder) -> Result<()> {
    let parsed = stack_block::parse_stack_block_body(body, pointer_size)?;
    for (offset, record) in parsed.records.into_iter().enumerate() {
        let raw_id = parsed.first_id + offset as u32;
        builder.register_stack(raw_id, record.addresses);
    }
    Ok(())
}
