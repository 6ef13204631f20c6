//! The `Trace` object (spec.md §4.4): no size field, no padding, must be the
//! first real object in the stream. Ported from
//! `coreclr-tracing::nettrace::{NettraceTime, NettraceTraceObject}`.

use crate::error::{NettraceError, Result};
use crate::reader::{ReadStatus, SequenceReader};

#[derive(Debug, Clone, Copy)]
pub struct TraceDate {
    pub year: i16,
    pub month: i16,
    pub day: i16,
    pub hour: i16,
    pub minute: i16,
    pub second: i16,
    pub millisecond: i16,
}

#[derive(Debug, Clone, Copy)]
pub struct TraceObject {
    pub date: TraceDate,
    pub qpc_sync_time: i64,
    pub qpc_frequency: i64,
    pub pointer_size: i32,
    pub process_id: i32,
    pub number_of_processors: i32,
    pub cpu_sampling_rate: i32,
}

pub fn read_trace_object(r: &mut SequenceReader) -> Result<ReadStatus<TraceObject>> {
    r.transaction(|r| {
        macro_rules! field {
            () => {
                match r.try_i16() {
                    ReadStatus::Ready(v) => v,
                    ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
                }
            };
        }
        let year = field!();
        let month = field!();
        let _day_of_week = field!();
        let day = field!();
        let hour = field!();
        let minute = field!();
        let second = field!();
        let millisecond = field!();

        let qpc_sync_time = match r.try_i64() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let qpc_frequency = match r.try_i64() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let pointer_size = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let process_id = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let number_of_processors = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };
        let cpu_sampling_rate = match r.try_i32() {
            ReadStatus::Ready(v) => v,
            ReadStatus::Incomplete => return Ok(ReadStatus::Incomplete),
        };

        if qpc_frequency <= 0 {
            return Err(NettraceError::malformed(r.position(), "qpcFrequency must be > 0"));
        }

        Ok(ReadStatus::Ready(TraceObject {
            date: TraceDate {
                year,
                month,
                day,
                hour,
                minute,
                second,
                millisecond,
            },
            qpc_sync_time,
            qpc_frequency,
            pointer_size,
            process_id,
            number_of_processors,
            cpu_sampling_rate,
        }))
    })
}
