//! The dynamic, self-describing shape of an event's payload.
//!
//! Ported from the source's `System.Object`-typed fields (spec.md §9):
//! replaced here with a sum type covering every primitive the format can
//! carry plus recursive object/array nesting.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{NettraceError, Result};
use crate::intern::InternPool;
use crate::metadata::{EventFieldDefinition, TypeCode};
use crate::reader::{ReadStatus, SequenceReader};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Guid(Uuid),
    Object(HashMap<Arc<str>, Arc<Value>>),
    Array(Vec<Arc<Value>>),
}

/// Walks `fields` against `reader`, producing a name→value mapping.
///
/// This is the generic fallback used whenever an event's provider/id/version
/// isn't one of the hand-written parsers in [`crate::known_events`]; per
/// spec.md §8 invariant 6, both paths must agree on known events, which is
/// exercised directly in that module's tests.
pub fn parse_fields(
    reader: &mut SequenceReader,
    fields: &[EventFieldDefinition],
    pool: &mut InternPool,
) -> Result<ReadStatus<HashMap<Arc<str>, Arc<Value>>>> {
    reader.transaction(|r| {
        let mut map = HashMap::with_capacity(fields.len());
        for field in fields {
            let value = match parse_value(r, field, pool)? {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
            };
            map.insert(pool.field_name(&field.name), value);
        }
        Ok(ReadStatus::Ready(map))
    })
}

fn parse_value(
    r: &mut SequenceReader,
    field: &EventFieldDefinition,
    pool: &mut InternPool,
) -> Result<ReadStatus<Arc<Value>>> {
    match field.type_code {
        TypeCode::Boolean => {
            let raw = match r.try_i32() {
                ReadStatus::Ready(v) => v,
                ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
            };
            Ok(ReadStatus::Ready(pool.bool(raw != 0)))
        }
        TypeCode::SByte => read_small(r, pool, |r| r.try_u8(), |v| Value::I8(v as i8)),
        TypeCode::Byte => read_small(r, pool, |r| r.try_u8(), |v| Value::U8(v as u8)),
        TypeCode::Int16 => read_small(r, pool, |r| r.try_i16(), |v| Value::I16(v as i16)),
        TypeCode::UInt16 => read_small(r, pool, |r| r.try_u16(), |v| Value::U16(v as u16)),
        TypeCode::Int32 => match r.try_i32() {
            ReadStatus::Ready(v) => Ok(ReadStatus::Ready(Arc::new(Value::I32(v)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::UInt32 => match r.try_u32() {
            ReadStatus::Ready(v) => Ok(ReadStatus::Ready(Arc::new(Value::U32(v)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::Int64 => match r.try_i64() {
            ReadStatus::Ready(v) => Ok(ReadStatus::Ready(Arc::new(Value::I64(v)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::UInt64 => match r.try_u64() {
            ReadStatus::Ready(v) => Ok(ReadStatus::Ready(Arc::new(Value::U64(v)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::Single => match r.try_f32() {
            ReadStatus::Ready(v) => Ok(ReadStatus::Ready(Arc::new(Value::F32(v)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::Double => match r.try_f64() {
            ReadStatus::Ready(v) => Ok(ReadStatus::Ready(Arc::new(Value::F64(v)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::String => match r.try_null_terminated_utf16()? {
            ReadStatus::Ready(s) => Ok(ReadStatus::Ready(Arc::new(Value::String(s)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::Guid => match r.try_guid() {
            ReadStatus::Ready(g) => Ok(ReadStatus::Ready(Arc::new(Value::Guid(g)))),
            ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
        },
        TypeCode::Object => {
            let sub_fields = &field.sub_fields;
            match parse_fields(r, sub_fields, pool)? {
                ReadStatus::Ready(map) => Ok(ReadStatus::Ready(Arc::new(Value::Object(map)))),
                ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
            }
        }
        TypeCode::Array => {
            // V2-only; out of scope for compressed v1 blobs per spec.md §4.6.
            let element_field = EventFieldDefinition {
                name: field.name.clone(),
                type_code: field.array_element_type_code.ok_or_else(|| {
                    NettraceError::malformed(r.position(), "array field missing element type")
                })?,
                array_element_type_code: None,
                sub_fields: field.sub_fields.clone(),
            };
            r.transaction(|r| {
                let count = match r.try_i32() {
                    ReadStatus::Ready(v) => v,
                    ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
                };
                if count < 0 {
                    return Err(NettraceError::malformed(r.position(), "negative array length"));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    match parse_value(r, &element_field, pool)? {
                        ReadStatus::Ready(v) => items.push(v),
                        ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
                    }
                }
                Ok(ReadStatus::Ready(Arc::new(Value::Array(items))))
            })
        }
    }
}

fn read_small<T>(
    r: &mut SequenceReader,
    pool: &mut InternPool,
    read: impl FnOnce(&mut SequenceReader) -> ReadStatus<T>,
    make: impl FnOnce(i64) -> Value,
) -> Result<ReadStatus<Arc<Value>>>
where
    T: Into<i64>,
{
    match read(r) {
        ReadStatus::Ready(v) => Ok(ReadStatus::Ready(pool.small_int(v.into(), make))),
        ReadStatus::Incomplete => Ok(ReadStatus::Incomplete),
    }
}
