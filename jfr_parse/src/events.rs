//! Event stream scanning for CPU samples.

use crate::constant_pool::StackTrace;
use crate::cursor::ByteCursor;
use crate::metadata::TypeRegistry;
use crate::{CHUNK_HEADER_SIZE, ParseError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Event types decoded as CPU samples.
pub const SAMPLE_EVENT_TYPES: [&str; 2] = ["jdk.ExecutionSample", "jdk.NativeMethodSample"];

/// How many records are scanned between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// One decoded sampling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawSample {
    /// Sample time in ticks.
    pub time: i64,
    pub thread_id: i64,
    pub stack_trace_id: i64,
    pub thread_state: i32,
}

/// Shared flag for stopping a decode from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scan the event records of a chunk and collect CPU samples in stream
/// order. Each sample bumps the counter of the stack trace it references.
pub fn scan_samples(
    cursor: &mut ByteCursor<'_>,
    types: &TypeRegistry,
    stack_traces: &mut HashMap<i64, StackTrace>,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<RawSample>> {
    let sample_types: Vec<i64> = SAMPLE_EVENT_TYPES
        .iter()
        .filter_map(|name| types.type_id(name))
        .collect();
    if sample_types.is_empty() {
        log::warn!("recording declares no CPU sample event types");
    }

    let mut samples = Vec::new();
    let mut records = 0usize;
    let mut skipped = 0usize;
    cursor.seek(CHUNK_HEADER_SIZE)?;

    while cursor.has_remaining() {
        if records % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(ParseError::Cancelled);
        }
        records += 1;

        let start = cursor.position();
        let size = cursor.read_varint32()?;
        let end = record_end(start, size, cursor.len())?;
        let type_id = cursor.read_varint32()? as i64;

        if sample_types.contains(&type_id) {
            let sample = read_sample(cursor)?;
            if let Some(trace) = stack_traces.get_mut(&sample.stack_trace_id) {
                trace.samples += 1;
            }
            samples.push(sample);
        } else {
            skipped += 1;
        }
        cursor.seek(end)?;
    }

    log::debug!(
        "scanned {} event records: {} samples, {} skipped",
        records,
        samples.len(),
        skipped
    );
    Ok(samples)
}

fn record_end(start: usize, size: i32, len: usize) -> Result<usize> {
    usize::try_from(size)
        .ok()
        .filter(|&size| size > 0)
        .and_then(|size| start.checked_add(size))
        .filter(|&end| end <= len)
        .ok_or(ParseError::InvalidRecordSize {
            offset: start,
            size,
        })
}

fn read_sample(cursor: &mut ByteCursor<'_>) -> Result<RawSample> {
    Ok(RawSample {
        time: cursor.read_varint64()?,
        thread_id: cursor.read_varint32()? as i64,
        stack_trace_id: cursor.read_varint32()? as i64,
        thread_state: cursor.read_varint32()?,
    })
}
