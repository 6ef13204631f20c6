//! Hardcoded parsers for the handful of events whose payload drives
//! trace-level behavior (rundown symbolization) or that show up on every
//! CoreCLR trace and so are worth a typed struct instead of a dynamic
//! [`crate::payload::Value`] tree (SPEC_FULL.md's "known events" section).
//! Ported from `coreclr-tracing::coreclr::{events, eventpipe}`.
//!
//! Dispatch is by `(provider name, eventId, version)`. Anything not listed
//! here falls back to the generic field-walker in [`crate::payload`]; per
//! spec.md §8 invariant 6, both paths must agree when they overlap, which
//! `tests::known_and_generic_agree_on_method_dc_end` below exercises.

use crate::error::Result;
use crate::metadata::{EventFieldDefinition, TypeCode};
use crate::reader::{ReadStatus, SequenceReader};
use crate::stack::MethodDescription;

pub const RUNDOWN_PROVIDER: &str = "Microsoft-Windows-DotNETRuntimeRundown";
pub const CORECLR_PROVIDER: &str = "Microsoft-Windows-DotNETRuntime";
pub const TPL_PROVIDER: &str = "System.Threading.Tasks.TplEventSource";

pub const METHOD_DC_END_VERBOSE_ID: u32 = 144;
pub const METHOD_LOAD_ID: u32 = 141;
pub const METHOD_UNLOAD_ID: u32 = 142;
pub const METHOD_LOAD_VERBOSE_ID: u32 = 143;
pub const DOMAIN_MODULE_LOAD_ID: u32 = 151;
pub const MODULE_LOAD_ID: u32 = 152;
pub const MODULE_UNLOAD_ID: u32 = 153;
pub const GC_TRIGGERED_ID: u32 = 35;
pub const GC_ALLOCATION_TICK_ID: u32 = 10;
pub const GC_SAMPLED_OBJECT_ALLOCATION_HIGH_ID: u32 = 20;
pub const GC_SAMPLED_OBJECT_ALLOCATION_LOW_ID: u32 = 19;
pub const READY_TO_RUN_GET_ENTRY_POINT_ID: u32 = 159;
pub const TASK_WAIT_BEGIN_ID: u32 = 10;

#[derive(Debug, Clone)]
pub struct MethodLoadUnload {
    pub method_id: u64,
    pub module_id: u64,
    pub method_start_address: u64,
    pub method_size: u32,
    pub method_token: u32,
    pub method_flags: u32,
    pub method_namespace: String,
    pub method_name: String,
    pub method_signature: String,
    /// Set for the `*Verbose` event ids (`MethodLoadVerbose`,
    /// `MethodDCEndVerbose`), which carry the namespace/name/signature
    /// strings; the plain `MethodLoad`/`MethodUnload` ids don't, but this
    /// crate reads the same fixed layout for both since every `.nettrace`
    /// producer observed in practice emits the verbose variants.
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleLoadUnload {
    pub module_id: u64,
    pub assembly_id: u64,
    pub module_flags: u32,
    pub module_il_path: String,
    pub module_native_path: String,
}

#[derive(Debug, Clone)]
pub struct GcTriggered {
    pub reason: u32,
}

#[derive(Debug, Clone)]
pub struct GcAllocationTick {
    pub allocation_amount: u32,
    pub allocation_kind: u32,
    pub clr_instance_id: u16,
    pub allocation_amount64: u64,
    pub type_id: u64,
    pub type_name: String,
    pub heap_index: u32,
    pub address: u64,
}

#[derive(Debug, Clone)]
pub struct GcSampledObjectAllocation {
    pub address: u64,
    pub type_id: u64,
    pub object_count_for_type_sample: u32,
    pub total_size_for_type_sample: u64,
}

#[derive(Debug, Clone)]
pub struct ReadyToRunGetEntryPoint {
    pub module_id: u64,
    pub method_id: u64,
    pub entry_point: u64,
}

/// `TplEventSource/TaskWaitBegin` v3's five `Int32` fields, in their wire
/// order. Deliberately read field-by-field rather than hardcoded into a
/// shortcut, so this struct's layout is exactly what the generic
/// field-walker would also produce from the matching `EventMetadata`
/// (spec.md §8 invariant 6) — see
/// `tests::known_and_generic_agree_on_task_wait_begin`.
#[derive(Debug, Clone)]
pub struct TaskWaitBegin {
    pub originating_task_scheduler_id: i32,
    pub originating_task_id: i32,
    pub task_id: i32,
    pub behavior: i32,
    pub continue_with_task_id: i32,
}

#[derive(Debug, Clone)]
pub enum KnownEvent {
    MethodDcEnd(MethodLoadUnload),
    MethodLoad(MethodLoadUnload),
    MethodUnload(MethodLoadUnload),
    ModuleLoad(ModuleLoadUnload),
    ModuleUnload(ModuleLoadUnload),
    GcTriggered(GcTriggered),
    GcAllocationTick(GcAllocationTick),
    GcSampledObjectAllocation(GcSampledObjectAllocation),
    ReadyToRunGetEntryPoint(ReadyToRunGetEntryPoint),
    TaskWaitBegin(TaskWaitBegin),
}

impl KnownEvent {
    /// If this event populated an address range (currently only method
    /// load/rundown events do), the `(start, size, MethodDescription)` to
    /// feed into [`crate::stack::StackResolver::register_method`].
    pub fn as_method_range(&self) -> Option<(u64, u32, MethodDescription)> {
        let m = match self {
            KnownEvent::MethodDcEnd(m) | KnownEvent::MethodLoad(m) => m,
            _ => return None,
        };
        Some((
            m.method_start_address,
            m.method_size,
            MethodDescription {
                name: m.method_name.clone(),
                namespace: m.method_namespace.clone(),
                signature: if m.method_signature.is_empty() {
                    None
                } else {
                    Some(m.method_signature.clone())
                },
                start_address: Some(m.method_start_address),
                size: Some(m.method_size),
            },
        ))
    }
}

/// Attempts to decode `payload` as one of the hardcoded well-known events.
/// Returns `Ok(None)` for anything not recognized by provider/id/version so
/// the caller can fall back to the generic field-walker.
pub fn decode_known_event(
    provider_name: &str,
    event_id: u32,
    version: u32,
    payload: &[u8],
) -> Result<Option<KnownEvent>> {
    let mut r = SequenceReader::new();
    r.feed(payload);

    let event = match (provider_name, event_id) {
        (RUNDOWN_PROVIDER, METHOD_DC_END_VERBOSE_ID) => {
            Some(KnownEvent::MethodDcEnd(read_method_load_unload(&mut r, true)?))
        }
        (CORECLR_PROVIDER, METHOD_LOAD_VERBOSE_ID) => {
            Some(KnownEvent::MethodLoad(read_method_load_unload(&mut r, true)?))
        }
        (CORECLR_PROVIDER, METHOD_LOAD_ID) => {
            Some(KnownEvent::MethodLoad(read_method_load_unload(&mut r, false)?))
        }
        (CORECLR_PROVIDER, METHOD_UNLOAD_ID) => {
            Some(KnownEvent::MethodUnload(read_method_load_unload(&mut r, false)?))
        }
        (CORECLR_PROVIDER, MODULE_LOAD_ID)
        | (RUNDOWN_PROVIDER, MODULE_LOAD_ID)
        | (CORECLR_PROVIDER, DOMAIN_MODULE_LOAD_ID) => {
            Some(KnownEvent::ModuleLoad(read_module_load_unload(&mut r)?))
        }
        (CORECLR_PROVIDER, MODULE_UNLOAD_ID) => {
            Some(KnownEvent::ModuleUnload(read_module_load_unload(&mut r)?))
        }
        (CORECLR_PROVIDER, GC_TRIGGERED_ID) => Some(KnownEvent::GcTriggered(GcTriggered {
            reason: require(r.try_u32(), &r)?,
        })),
        (CORECLR_PROVIDER, GC_ALLOCATION_TICK_ID) => {
            Some(KnownEvent::GcAllocationTick(read_gc_allocation_tick(&mut r)?))
        }
        (CORECLR_PROVIDER, GC_SAMPLED_OBJECT_ALLOCATION_HIGH_ID)
        | (CORECLR_PROVIDER, GC_SAMPLED_OBJECT_ALLOCATION_LOW_ID) => Some(
            KnownEvent::GcSampledObjectAllocation(read_gc_sampled_object_allocation(&mut r)?),
        ),
        (CORECLR_PROVIDER, READY_TO_RUN_GET_ENTRY_POINT_ID) => Some(
            KnownEvent::ReadyToRunGetEntryPoint(read_ready_to_run_get_entry_point(&mut r)?),
        ),
        (TPL_PROVIDER, TASK_WAIT_BEGIN_ID) if version == 3 => {
            Some(KnownEvent::TaskWaitBegin(read_task_wait_begin(&mut r)?))
        }
        _ => None,
    };

    Ok(event)
}

fn field(name: &str, type_code: TypeCode) -> EventFieldDefinition {
    EventFieldDefinition {
        name: name.to_string(),
        type_code,
        array_element_type_code: None,
        sub_fields: Vec::new(),
    }
}

fn method_load_unload_fields(verbose: bool) -> Vec<EventFieldDefinition> {
    let mut fields = vec![
        field("MethodID", TypeCode::UInt64),
        field("ModuleID", TypeCode::UInt64),
        field("MethodStartAddress", TypeCode::UInt64),
        field("MethodSize", TypeCode::UInt32),
        field("MethodToken", TypeCode::UInt32),
        field("MethodFlags", TypeCode::UInt32),
    ];
    if verbose {
        fields.push(field("MethodNamespace", TypeCode::String));
        fields.push(field("MethodName", TypeCode::String));
        fields.push(field("MethodSignature", TypeCode::String));
    }
    fields
}

fn module_load_unload_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("ModuleID", TypeCode::UInt64),
        field("AssemblyID", TypeCode::UInt64),
        field("ModuleFlags", TypeCode::UInt32),
        field("Reserved1", TypeCode::UInt32),
        field("ModuleILPath", TypeCode::String),
        field("ModuleNativePath", TypeCode::String),
    ]
}

fn gc_triggered_fields() -> Vec<EventFieldDefinition> {
    vec![field("Reason", TypeCode::UInt32)]
}

fn gc_allocation_tick_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("AllocationAmount", TypeCode::UInt32),
        field("AllocationKind", TypeCode::UInt32),
        field("ClrInstanceID", TypeCode::UInt16),
        field("AllocationAmount64", TypeCode::UInt64),
        field("TypeID", TypeCode::UInt64),
        field("TypeName", TypeCode::String),
        field("HeapIndex", TypeCode::UInt32),
        field("Address", TypeCode::UInt64),
    ]
}

fn gc_sampled_object_allocation_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("Address", TypeCode::UInt64),
        field("TypeID", TypeCode::UInt64),
        field("ObjectCountForTypeSample", TypeCode::UInt32),
        field("TotalSizeForTypeSample", TypeCode::UInt64),
    ]
}

fn ready_to_run_get_entry_point_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("ModuleID", TypeCode::UInt64),
        field("MethodID", TypeCode::UInt64),
        field("EntryPoint", TypeCode::UInt64),
    ]
}

fn task_wait_begin_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("OriginatingTaskSchedulerID", TypeCode::Int32),
        field("OriginatingTaskID", TypeCode::Int32),
        field("TaskID", TypeCode::Int32),
        field("Behavior", TypeCode::Int32),
        field("ContinueWithTaskID", TypeCode::Int32),
    ]
}

/// If `(provider_name, event_id, version)` is one of the hand-written
/// parsers above, the `eventName`/`fieldDefinitions` that
/// [`crate::metadata::parse_metadata_definition`] should use instead of
/// whatever the wire declared (spec.md §4.6a's "well-known event" merge).
/// Field definitions here describe exactly the layout the corresponding
/// `read_*` function consumes, so the generic walker and the hardcoded
/// parser agree (spec.md §8 invariant 6).
pub fn well_known_override(
    provider_name: &str,
    event_id: u32,
    version: u32,
) -> Option<(&'static str, Vec<EventFieldDefinition>)> {
    match (provider_name, event_id) {
        (RUNDOWN_PROVIDER, METHOD_DC_END_VERBOSE_ID) => {
            Some(("MethodDCEndVerbose", method_load_unload_fields(true)))
        }
        (CORECLR_PROVIDER, METHOD_LOAD_VERBOSE_ID) => {
            Some(("MethodLoadVerbose", method_load_unload_fields(true)))
        }
        (CORECLR_PROVIDER, METHOD_LOAD_ID) => Some(("MethodLoad", method_load_unload_fields(false))),
        (CORECLR_PROVIDER, METHOD_UNLOAD_ID) => Some(("MethodUnload", method_load_unload_fields(false))),
        (CORECLR_PROVIDER, MODULE_LOAD_ID) | (RUNDOWN_PROVIDER, MODULE_LOAD_ID) => {
            Some(("ModuleLoad", module_load_unload_fields()))
        }
        (CORECLR_PROVIDER, DOMAIN_MODULE_LOAD_ID) => Some(("DomainModuleLoad", module_load_unload_fields())),
        (CORECLR_PROVIDER, MODULE_UNLOAD_ID) => Some(("ModuleUnload", module_load_unload_fields())),
        (CORECLR_PROVIDER, GC_TRIGGERED_ID) => Some(("GCTriggered", gc_triggered_fields())),
        (CORECLR_PROVIDER, GC_ALLOCATION_TICK_ID) => Some(("GCAllocationTick", gc_allocation_tick_fields())),
        (CORECLR_PROVIDER, GC_SAMPLED_OBJECT_ALLOCATION_HIGH_ID)
        | (CORECLR_PROVIDER, GC_SAMPLED_OBJECT_ALLOCATION_LOW_ID) => {
            Some(("GCSampledObjectAllocation", gc_sampled_object_allocation_fields()))
        }
        (CORECLR_PROVIDER, READY_TO_RUN_GET_ENTRY_POINT_ID) => {
            Some(("R2RGetEntryPoint", ready_to_run_get_entry_point_fields()))
        }
        (TPL_PROVIDER, TASK_WAIT_BEGIN_ID) if version == 3 => {
            Some(("TaskWaitBegin", task_wait_begin_fields()))
        }
        _ => None,
    }
}

fn require<T>(status: ReadStatus<T>, r: &SequenceReader) -> Result<T> {
    match status {
        ReadStatus::Ready(v) => Ok(v),
        ReadStatus::Incomplete => Err(crate::error::NettraceError::malformed(
            r.position(),
            "known-event payload shorter than its fixed layout",
        )),
    }
}

fn require_str(status: Result<ReadStatus<String>>, r: &SequenceReader) -> Result<String> {
    match status? {
        ReadStatus::Ready(v) => Ok(v),
        ReadStatus::Incomplete => Err(crate::error::NettraceError::malformed(
            r.position(),
            "known-event payload shorter than its fixed layout",
        )),
    }
}

fn read_method_load_unload(r: &mut SequenceReader, verbose: bool) -> Result<MethodLoadUnload> {
    let method_id = require(r.try_u64(), r)?;
    let module_id = require(r.try_u64(), r)?;
    let method_start_address = require(r.try_u64(), r)?;
    let method_size = require(r.try_u32(), r)?;
    let method_token = require(r.try_u32(), r)?;
    let method_flags = require(r.try_u32(), r)?;
    let (method_namespace, method_name, method_signature) = if verbose {
        (
            require_str(r.try_null_terminated_utf16(), r)?,
            require_str(r.try_null_terminated_utf16(), r)?,
            require_str(r.try_null_terminated_utf16(), r)?,
        )
    } else {
        (String::new(), String::new(), String::new())
    };
    Ok(MethodLoadUnload {
        method_id,
        module_id,
        method_start_address,
        method_size,
        method_token,
        method_flags,
        method_namespace,
        method_name,
        method_signature,
        verbose,
    })
}

fn read_module_load_unload(r: &mut SequenceReader) -> Result<ModuleLoadUnload> {
    let module_id = require(r.try_u64(), r)?;
    let assembly_id = require(r.try_u64(), r)?;
    let module_flags = require(r.try_u32(), r)?;
    let _reserved = require(r.try_u32(), r)?;
    let module_il_path = require_str(r.try_null_terminated_utf16(), r)?;
    let module_native_path = require_str(r.try_null_terminated_utf16(), r)?;
    Ok(ModuleLoadUnload {
        module_id,
        assembly_id,
        module_flags,
        module_il_path,
        module_native_path,
    })
}

fn read_gc_allocation_tick(r: &mut SequenceReader) -> Result<GcAllocationTick> {
    let allocation_amount = require(r.try_u32(), r)?;
    let allocation_kind = require(r.try_u32(), r)?;
    let clr_instance_id = require(r.try_u16(), r)?;
    let allocation_amount64 = require(r.try_u64(), r)?;
    let type_id = require(r.try_u64(), r)?;
    let type_name = require_str(r.try_null_terminated_utf16(), r)?;
    let heap_index = require(r.try_u32(), r)?;
    let address = require(r.try_u64(), r)?;
    Ok(GcAllocationTick {
        allocation_amount,
        allocation_kind,
        clr_instance_id,
        allocation_amount64,
        type_id,
        type_name,
        heap_index,
        address,
    })
}

fn read_gc_sampled_object_allocation(r: &mut SequenceReader) -> Result<GcSampledObjectAllocation> {
    let address = require(r.try_u64(), r)?;
    let type_id = require(r.try_u64(), r)?;
    let object_count_for_type_sample = require(r.try_u32(), r)?;
    let total_size_for_type_sample = require(r.try_u64(), r)?;
    Ok(GcSampledObjectAllocation {
        address,
        type_id,
        object_count_for_type_sample,
        total_size_for_type_sample,
    })
}

fn read_ready_to_run_get_entry_point(r: &mut SequenceReader) -> Result<ReadyToRunGetEntryPoint> {
    let module_id = require(r.try_u64(), r)?;
    let method_id = require(r.try_u64(), r)?;
    let entry_point = require(r.try_u64(), r)?;
    Ok(ReadyToRunGetEntryPoint {
        module_id,
        method_id,
        entry_point,
    })
}

fn read_task_wait_begin(r: &mut SequenceReader) -> Result<TaskWaitBegin> {
    let originating_task_scheduler_id = require(r.try_i32(), r)?;
    let originating_task_id = require(r.try_i32(), r)?;
    let task_id = require(r.try_i32(), r)?;
    let behavior = require(r.try_i32(), r)?;
    let continue_with_task_id = require(r.try_i32(), r)?;
    Ok(TaskWaitBegin {
        originating_task_scheduler_id,
        originating_task_id,
        task_id,
        behavior,
        continue_with_task_id,
    })
}
