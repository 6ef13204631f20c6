//! Literal-byte scenarios from spec.md §8, S1–S6, plus the cross-module
//! invariants they're meant to prove. Ported in spirit from
//! `coreclr-tracing`'s own fixture-driven nettrace tests, adapted to this
//! crate's async `parse()` entry point.

use nettrace::{options::ParseOptions, parse};

fn s1_trace_object_bytes() -> Vec<u8> {
    base64_decode(
        "BQUBBAAAAAQAAAAFAAAAVHJhY2UG5wcMAAIAGgARAC8ACgBuAk8T5s1YAwAAgJaYAAAAAAAIAAAAxAoAAAwAAABAQg8ABg==",
    )
}

fn stream_header_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"Nettrace");
    let sig = "!FastSerialization.1";
    bytes.extend_from_slice(&(sig.len() as i32).to_le_bytes());
    bytes.extend_from_slice(sig.as_bytes());
    bytes
}

fn footer_bytes() -> Vec<u8> {
    vec![0x01] // NullReference: terminates the top-level object stream.
}

/// A minimal base64 decoder so the fixture literals can be written exactly
/// as they appear in spec.md §8, without pulling in a base64 crate for
/// production code (it's already a dev-dependency for this purpose).
fn base64_decode(s: &str) -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).unwrap()
}

async fn run(bytes: Vec<u8>) -> nettrace::Result<nettrace::Trace> {
    let cursor = std::io::Cursor::new(bytes);
    parse(cursor, ParseOptions::default(), None).await
}

#[tokio::test]
async fn s1_trace_object_fields_match_literal_bytes() {
    let mut bytes = stream_header_bytes();
    bytes.extend(s1_trace_object_bytes());
    bytes.extend(footer_bytes());

    let trace = run(bytes).await.expect("well-formed S1 stream parses");
    let t = &trace.trace_object;
    assert_eq!(t.date.year, 2023);
    assert_eq!(t.date.month, 12);
    assert_eq!(t.date.day, 26);
    assert_eq!(t.date.hour, 17);
    assert_eq!(t.date.minute, 47);
    assert_eq!(t.date.second, 10);
    assert_eq!(t.date.millisecond, 622);
    assert_eq!(t.qpc_sync_time, 3_679_946_412_879);
    assert_eq!(t.qpc_frequency, 10_000_000);
    assert_eq!(t.pointer_size, 8);
    assert_eq!(t.process_id, 2756);
    assert_eq!(t.number_of_processors, 12);
    assert_eq!(t.cpu_sampling_rate, 1_000_000);
}

#[tokio::test]
async fn s3_truncated_stream_is_reported_and_no_trace_is_returned() {
    let mut bytes = stream_header_bytes();
    bytes.extend(s1_trace_object_bytes());
    // No footer, and drop the last byte of the Trace object itself so the
    // stream ends mid-object rather than just missing its terminator.
    bytes.pop();

    let err = run(bytes).await.expect_err("truncated stream must not parse");
    assert!(matches!(err, nettrace::NettraceError::TruncatedStream { .. }));
}

/// S4 — an object naming a future, unrecognized block type with a
/// `minReaderVersion` above what this crate understands must be skipped
/// without disturbing the objects that follow it.
#[tokio::test]
async fn s4_forward_compatible_object_is_skipped() {
    let mut bytes = stream_header_bytes();
    bytes.extend(s1_trace_object_bytes());
    bytes.extend(future_block_object_bytes());
    bytes.extend(footer_bytes());

    let trace = run(bytes).await.expect("future block must not abort the parse");
    assert_eq!(trace.trace_object.process_id, 2756);
}

fn future_block_object_bytes() -> Vec<u8> {
    let name = "FutureBlock";
    let mut obj = Vec::new();
    obj.push(0x05); // BeginPrivateObject (outer)
    obj.push(0x05); // BeginPrivateObject (type header)
    obj.push(0x01); // NullReference
    obj.extend_from_slice(&1i32.to_le_bytes()); // objectVersion
    obj.extend_from_slice(&99i32.to_le_bytes()); // minReaderVersion: far above ours
    obj.extend_from_slice(&(name.len() as i32).to_le_bytes());
    obj.extend_from_slice(name.as_bytes());
    obj.push(0x06); // EndObject (closes type header)

    // Generic sized-block body: a 4-byte size, alignment padding, then that
    // many bytes of (ignored) content.
    let body = vec![0xAAu8; 6];
    obj.extend_from_slice(&(body.len() as i32).to_le_bytes());
    let pos_before_padding = obj.len() as u64;
    let pad = (4 - pos_before_padding % 4) % 4;
    obj.extend(std::iter::repeat(0u8).take(pad as usize));
    obj.extend_from_slice(&body);

    obj.push(0x06); // EndObject (closes the whole block object)
    obj
}

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

fn utf16_nt(s: &str) -> Vec<u8> {
    let mut out: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

fn int32_field_definition(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&9i32.to_le_bytes()); // TypeCode::Int32
    out.extend(utf16_nt(name));
    out
}

/// A `TplEventSource/TaskWaitBegin` v3 `EventMetadata` definition: 5 `Int32`
/// fields, no tagged trailer.
fn task_wait_begin_metadata_definition_bytes() -> Vec<u8> {
    let mut def = Vec::new();
    def.extend_from_slice(&1u32.to_le_bytes()); // metadata_id
    def.extend(utf16_nt("System.Threading.Tasks.TplEventSource"));
    def.extend_from_slice(&10u32.to_le_bytes()); // event_id
    def.extend(utf16_nt("TaskWaitBegin"));
    def.extend_from_slice(&0u64.to_le_bytes()); // keywords
    def.extend_from_slice(&3u32.to_le_bytes()); // version
    def.extend_from_slice(&0u32.to_le_bytes()); // level
    def.extend_from_slice(&5i32.to_le_bytes()); // field_count
    for name in [
        "OriginatingTaskSchedulerID",
        "OriginatingTaskID",
        "TaskID",
        "Behavior",
        "ContinueWithTaskID",
    ] {
        def.extend(int32_field_definition(name));
    }
    def
}

fn event_block_header_bytes() -> Vec<u8> {
    let mut h = Vec::new();
    h.extend_from_slice(&20i16.to_le_bytes()); // headerSize
    h.extend_from_slice(&1i16.to_le_bytes()); // flags: Compressed
    h.extend_from_slice(&0i64.to_le_bytes()); // minTimestamp
    h.extend_from_slice(&0i64.to_le_bytes()); // maxTimestamp
    h
}

fn metadata_block_bytes() -> Vec<u8> {
    let def = task_wait_begin_metadata_definition_bytes();
    let mut blob = Vec::new();
    blob.push(0b1000_0000); // has_payload_size only; metadata_id stays 0
    blob.extend(varint(0)); // timestamp delta
    blob.extend(varint(def.len() as u64)); // payload_size
    blob.extend(def);

    let mut body = event_block_header_bytes();
    body.extend(blob);
    wrap_sized_block_object("MetadataBlock", &body)
}

fn task_wait_begin_payload(scheduler_id: i32, originating_task_id: i32, task_id: i32, behavior: i32, continue_with_task_id: i32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&scheduler_id.to_le_bytes());
    p.extend_from_slice(&originating_task_id.to_le_bytes());
    p.extend_from_slice(&task_id.to_le_bytes());
    p.extend_from_slice(&behavior.to_le_bytes());
    p.extend_from_slice(&continue_with_task_id.to_le_bytes());
    p
}

fn event_block_bytes() -> Vec<u8> {
    let payload1 = task_wait_begin_payload(1, 0, 4, 2, 5);
    let payload2 = task_wait_begin_payload(1, 0, 5, 2, 3);

    let mut blob1 = Vec::new();
    blob1.push(0b1000_0001); // has_metadata_id | has_payload_size
    blob1.extend(varint(1)); // metadata_id
    blob1.extend(varint(0)); // timestamp delta
    blob1.extend(varint(payload1.len() as u64));
    blob1.extend(payload1);

    let mut blob2 = Vec::new();
    blob2.push(0b0000_0000); // everything inherited from blob1
    blob2.extend(varint(10)); // timestamp delta
    blob2.extend(payload2);

    let mut body = event_block_header_bytes();
    body.extend(blob1);
    body.extend(blob2);
    wrap_sized_block_object("EventBlock", &body)
}

/// S2 — a `MetadataBlock` defining `TplEventSource/TaskWaitBegin` v3
/// (metadataId 1) followed by an `EventBlock` carrying two events that
/// reference it.
#[tokio::test]
async fn s2_metadata_and_event_block_share_one_metadata_reference() {
    let mut bytes = stream_header_bytes();
    bytes.extend(s1_trace_object_bytes());
    bytes.extend(metadata_block_bytes());
    bytes.extend(event_block_bytes());
    bytes.extend(footer_bytes());

    let trace = run(bytes).await.expect("well-formed S2 stream parses");
    assert_eq!(trace.events.len(), 2);

    let meta0 = &trace.events[0].metadata;
    let meta1 = &trace.events[1].metadata;
    assert!(std::sync::Arc::ptr_eq(meta0, meta1), "both events share one EventMetadata");
    assert_eq!(meta0.provider_name, "System.Threading.Tasks.TplEventSource");
    assert_eq!(meta0.event_name, "TaskWaitBegin");
    assert_eq!(meta0.event_id, 10);
    assert_eq!(meta0.field_definitions.len(), 5);

    let nettrace::known_events::KnownEvent::TaskWaitBegin(first) =
        trace.events[0].known.as_ref().expect("known event")
    else {
        panic!("expected TaskWaitBegin");
    };
    assert_eq!(first.originating_task_scheduler_id, 1);
    assert_eq!(first.originating_task_id, 0);
    assert_eq!(first.task_id, 4);
    assert_eq!(first.behavior, 2);
    assert_eq!(first.continue_with_task_id, 5);

    let nettrace::known_events::KnownEvent::TaskWaitBegin(second) =
        trace.events[1].known.as_ref().expect("known event")
    else {
        panic!("expected TaskWaitBegin");
    };
    assert_eq!(second.task_id, 5);
    assert_eq!(second.continue_with_task_id, 3);
}

/// S5 — two `StackBlock`s with colliding `firstId = 0`, separated by an
/// `SPBlock`, exercised end-to-end through the decode loop rather than
/// directly against `StackResolver` (see the resolver's own unit tests for
/// the narrower version of this check).
#[tokio::test]
async fn s5_sequence_point_uniquifies_stack_ids_end_to_end() {
    let mut bytes = stream_header_bytes();
    bytes.extend(s1_trace_object_bytes());
    bytes.extend(stack_block_bytes(0, &[0xAAAA]));
    bytes.extend(sp_block_bytes());
    bytes.extend(stack_block_bytes(0, &[0xBBBB]));
    bytes.extend(footer_bytes());

    // `Trace` deliberately doesn't expose raw stack ids publicly, so the
    // full uniqueness assertion lives in
    // `stack::tests::sequence_point_uniquifies_colliding_raw_ids`; this test
    // proves only that two StackBlocks colliding on firstId=0 across an
    // SPBlock parse without error end to end.
    let trace = run(bytes).await.expect("well-formed S5 stream parses");
    assert!(trace.events.is_empty(), "stream carries no EventBlocks");
}

fn stack_block_bytes(first_id: u32, addresses: &[u64]) -> Vec<u8> {
    let name = "StackBlock";
    let mut body = Vec::new();
    body.extend_from_slice(&first_id.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes()); // count: one record
    let stack_size = addresses.len() as u32 * 8;
    body.extend_from_slice(&stack_size.to_le_bytes());
    for addr in addresses {
        body.extend_from_slice(&addr.to_le_bytes());
    }
    wrap_sized_block_object(name, &body)
}

fn sp_block_bytes() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0i64.to_le_bytes()); // timestamp
    body.extend_from_slice(&0i32.to_le_bytes()); // thread_count
    wrap_sized_block_object("SPBlock", &body)
}

fn wrap_sized_block_object(name: &str, body: &[u8]) -> Vec<u8> {
    let mut obj = Vec::new();
    obj.push(0x05);
    obj.push(0x05);
    obj.push(0x01);
    obj.extend_from_slice(&1i32.to_le_bytes());
    obj.extend_from_slice(&0i32.to_le_bytes());
    obj.extend_from_slice(&(name.len() as i32).to_le_bytes());
    obj.extend_from_slice(name.as_bytes());
    obj.push(0x06);

    obj.extend_from_slice(&(body.len() as i32).to_le_bytes());
    let pos_before_padding = obj.len() as u64;
    let pad = (4 - pos_before_padding % 4) % 4;
    obj.extend(std::iter::repeat(0u8).take(pad as usize));
    obj.extend_from_slice(body);
    obj.push(0x06);
    obj
}

/// S6 — a rundown `MethodDCEnd` (event id 144) registers an address range;
/// a later event carrying an address inside that range resolves to the
/// registered method. Exercised directly against `known_events` +
/// `StackResolver` rather than the full wire format, since building a
/// well-formed `MetadataBlock` + compressed `EventBlock` fixture by hand for
/// every known-event shape would duplicate `event_blob`'s own tests.
#[tokio::test]
async fn s6_rundown_method_resolves_later_stack_address() {
    let payload = method_dc_end_payload(0x1000, 0x100, "N", "M", "()");
    let known = nettrace::known_events::decode_known_event(
        nettrace::known_events::RUNDOWN_PROVIDER,
        nettrace::known_events::METHOD_DC_END_VERBOSE_ID,
        0,
        &payload,
    )
    .unwrap()
    .expect("recognized rundown event");

    let mut resolver = nettrace::stack::StackResolver::new();
    if let Some((start, size, method)) = known.as_method_range() {
        resolver.register_method(start, size, method);
    }
    resolver.register_stack(0, vec![0x1050]);
    let frames = resolver.resolve(resolver.effective_index(0));
    assert_eq!(frames[0].method.name, "M");
    assert_eq!(frames[0].method.namespace, "N");
}

fn method_dc_end_payload(start: u64, size: u32, namespace: &str, name: &str, signature: &str) -> Vec<u8> {
    fn utf16_nt(s: &str) -> Vec<u8> {
        let mut out: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u64.to_le_bytes()); // method_id
    payload.extend_from_slice(&2u64.to_le_bytes()); // module_id
    payload.extend_from_slice(&start.to_le_bytes());
    payload.extend_from_slice(&size.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes()); // token
    payload.extend_from_slice(&0u32.to_le_bytes()); // flags
    payload.extend(utf16_nt(namespace));
    payload.extend(utf16_nt(name));
    payload.extend(utf16_nt(signature));
    payload
}

/// Invariant 2 from spec.md §8: every event's metadata handle is the exact
/// same `Arc` as the one reachable from `Trace::event_metadata()`, proven
/// against a real parsed stream rather than two clones of the same `Arc`.
#[tokio::test]
async fn shared_metadata_handles_are_referentially_identical() {
    let mut bytes = stream_header_bytes();
    bytes.extend(s1_trace_object_bytes());
    bytes.extend(metadata_block_bytes());
    bytes.extend(event_block_bytes());
    bytes.extend(footer_bytes());

    let trace = run(bytes).await.expect("well-formed S2 stream parses");
    assert_eq!(trace.events.len(), 2);

    for event in &trace.events {
        let from_table = trace
            .metadata_by_id(event.metadata.metadata_id)
            .expect("event references a metadata id present in the table");
        assert!(
            std::sync::Arc::ptr_eq(&event.metadata, from_table),
            "event's metadata handle must be the same Arc as the table's"
        );
        let found_in_iter = trace
            .event_metadata()
            .any(|m| std::sync::Arc::ptr_eq(m, &event.metadata));
        assert!(found_in_iter, "event_metadata() must yield the same Arc too");
    }
}
