//! The Trace Assembler (spec.md §4.8): accumulates decoded events, metadata
//! and stacks into the final [`Trace`], stable-sorting events by timestamp
//! and wiring up resolved stack traces. Ported from the top-level assembly
//! step in `coreclr-tracing::coreclr::eventpipe`.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::blocks::trace::TraceObject;
use crate::known_events::KnownEvent;
use crate::metadata::{EventMetadataRef, MetadataTable};
use crate::payload::Value;
use crate::stack::{StackFrame, StackResolver};

#[derive(Debug, Clone)]
pub struct Event {
    pub metadata: EventMetadataRef,
    pub sequence_number: u32,
    /// Raw QPC ticks, as they appeared on the wire.
    pub time_stamp_ticks: i64,
    /// Ticks converted to nanoseconds since the trace's sync time, using
    /// `TraceObject::qpc_frequency` (spec.md §3).
    pub time_stamp_ns: i64,
    pub thread_id: u64,
    pub capture_thread_id: u64,
    pub processor_number: Option<u32>,
    pub activity_id: Uuid,
    pub related_activity_id: Uuid,
    /// Global, epoch-uniquified stack index (see [`StackResolver`]).
    pub stack_index: u64,
    pub fields: HashMap<Arc<str>, Arc<Value>>,
    /// Populated when `(provider, eventId, version)` matched one of the
    /// hardcoded parsers in [`crate::known_events`].
    pub known: Option<KnownEvent>,
}

/// The fully assembled result of parsing a `.nettrace` stream (spec.md §3).
pub struct Trace {
    pub trace_object: TraceObject,
    pub events: Vec<Event>,
    metadata: MetadataTable,
    stacks: StackResolver,
}

impl Trace {
    pub fn event_metadata(&self) -> impl Iterator<Item = &EventMetadataRef> {
        self.metadata.values()
    }

    pub fn metadata_by_id(&self, id: u32) -> Option<&EventMetadataRef> {
        self.metadata.get(id)
    }

    /// Resolves `event`'s stack index into a symbolized frame list,
    /// innermost frame first; empty if no `StackBlock` ever registered it.
    pub fn stack_trace(&self, event: &Event) -> Vec<StackFrame> {
        self.stacks.resolve(event.stack_index)
    }
}

/// Accumulates events/metadata/stacks while the stream is still being
/// decoded; [`TraceBuilder::finish`] produces the immutable [`Trace`].
pub struct TraceBuilder {
    trace_object: Option<TraceObject>,
    events: Vec<Event>,
    metadata: MetadataTable,
    stacks: StackResolver,
}

impl TraceBuilder {
    pub fn new(reject_divergent_redefinition: bool) -> Self {
        TraceBuilder {
            trace_object: None,
            events: Vec::new(),
            metadata: MetadataTable::new(reject_divergent_redefinition),
            stacks: StackResolver::new(),
        }
    }

    pub fn set_trace_object(&mut self, trace_object: TraceObject) {
        self.trace_object = Some(trace_object);
    }

    pub fn trace_object(&self) -> Option<&TraceObject> {
        self.trace_object.as_ref()
    }

    pub fn insert_metadata(&mut self, def: crate::metadata::EventMetadata, pos: u64) -> crate::error::Result<()> {
        self.metadata.insert(def, pos)
    }

    pub fn metadata_for(&self, id: u32) -> Option<&EventMetadataRef> {
        self.metadata.get(id)
    }

    pub fn register_stack(&mut self, raw_id: u32, addresses: Vec<u64>) {
        self.stacks.register_stack(raw_id, addresses);
    }

    pub fn on_sequence_point(&mut self) {
        self.stacks.on_sequence_point();
    }

    pub fn effective_stack_index(&self, raw_id: u32) -> u64 {
        self.stacks.effective_index(raw_id)
    }

    pub fn register_known_event_method_range(&mut self, known: &KnownEvent) {
        if let Some((start, size, method)) = known.as_method_range() {
            self.stacks.register_method(start, size, method);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_event(
        &mut self,
        metadata: EventMetadataRef,
        sequence_number: u32,
        time_stamp_ticks: i64,
        thread_id: u64,
        capture_thread_id: u64,
        processor_number: Option<u32>,
        activity_id: Uuid,
        related_activity_id: Uuid,
        stack_index: u64,
        fields: HashMap<Arc<str>, Arc<Value>>,
        known: Option<KnownEvent>,
    ) {
        let time_stamp_ns = self
            .trace_object
            .map(|t| ticks_to_ns(time_stamp_ticks, t.qpc_sync_time, t.qpc_frequency))
            .unwrap_or(time_stamp_ticks);
        self.events.push(Event {
            metadata,
            sequence_number,
            time_stamp_ticks,
            time_stamp_ns,
            thread_id,
            capture_thread_id,
            processor_number,
            activity_id,
            related_activity_id,
            stack_index,
            fields,
            known,
        });
    }

    /// Stable sort by timestamp (spec.md §8 invariant 1: events with equal
    /// timestamps keep their relative arrival order) and hand back the
    /// finished trace.
    pub fn finish(mut self) -> crate::error::Result<Trace> {
        let trace_object = self.trace_object.ok_or_else(|| {
            crate::error::NettraceError::malformed(0, "stream ended without a Trace object")
        })?;
        self.events.sort_by_key(|e| e.time_stamp_ns);
        Ok(Trace {
            trace_object,
            events: self.events,
            metadata: self.metadata,
            stacks: self.stacks,
        })
    }
}

fn ticks_to_ns(ticks: i64, qpc_sync_time: i64, qpc_frequency: i64) -> i64 {
    let delta = ticks - qpc_sync_time;
    // i128 intermediate: a multi-hour trace at a multi-GHz QPC frequency
    // would overflow i64 before dividing.
    ((delta as i128 * 1_000_000_000) / qpc_frequency as i128) as i64
}
