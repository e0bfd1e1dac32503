//! Turn decoded samples into profile records.
//!
//! Samples are ordered by time and consecutive samples hitting the same stack
//! trace are folded into one record carrying a count. Only adjacent samples
//! are folded: a stack trace that reappears after a different one starts a
//! new record.

use crate::config::{ExportConfig, METRICS_TYPE};
use crate::record::{ProfileFields, ProfileRecord, Processor, SampleCount, StackFrame};
use jfr_parse::{Profile, RawSample};
use std::collections::HashMap;
use xxhash_rust::xxh64::Xxh64;

/// A run of consecutive samples sharing a stack trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRun {
    pub first: RawSample,
    pub count: u64,
}

/// Stable sort by timestamp. The thread id is not part of the
/// key, so samples of different threads interleave by time.
pub fn sort_samples(samples: &mut [RawSample]) {
    samples.sort_by_key(|s| s.time);
}

/// Fold consecutive samples with equal stack trace ids.
pub fn collapse_runs(samples: &[RawSample]) -> Vec<SampleRun> {
    let mut runs: Vec<SampleRun> = Vec::new();
    for sample in samples {
        match runs.last_mut() {
            Some(run) if run.first.stack_trace_id == sample.stack_trace_id => run.count += 1,
            _ => runs.push(SampleRun {
                first: *sample,
                count: 1,
            }),
        }
    }
    runs
}

/// Resolve a stack trace into frames, innermost first.
///
/// Frame ids chain an xxh64 hash (seed 0) over function names from the
/// outermost frame inwards, so each id stands for the whole path down to its
/// frame and stays the same across builds.
pub fn resolve_stack(profile: &Profile, stack_trace_id: i64) -> Vec<StackFrame> {
    let Some(trace) = profile.pools.stack_traces.get(&stack_trace_id) else {
        return Vec::new();
    };

    let mut hasher = Xxh64::new(0);
    let mut frames = Vec::with_capacity(trace.methods.len());
    for (depth, method_id) in trace.methods.iter().enumerate().rev() {
        let Some(method) = profile.pools.methods.get(method_id) else {
            log::warn!(
                "stack trace {} references unknown method {}",
                stack_trace_id,
                method_id
            );
            continue;
        };
        let function = profile.pools.symbol(method.name).unwrap_or_default();
        hasher.update(function.as_bytes());

        let filename = profile
            .pools
            .class_name(method.class)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let frame_type = trace
            .frame_types
            .get(depth)
            .and_then(|t| profile.pools.frame_types.get(&(*t as i32)))
            .cloned();

        frames.push(StackFrame {
            id: format!("{:016x}", hasher.digest()),
            function: function.to_string(),
            filename,
            frame_type,
        });
    }
    frames.reverse();
    frames
}

/// Build the records of one profile.
pub fn build_records(
    profile: &Profile,
    config: &ExportConfig,
    profile_id: Option<&str>,
) -> Vec<ProfileRecord> {
    let mut samples = profile.samples.clone();
    sort_samples(&mut samples);
    let runs = collapse_runs(&samples);

    let duration = Some(profile.header.duration_nanos).filter(|&d| d > 0);
    let mut stacks: HashMap<i64, Vec<StackFrame>> = HashMap::new();

    runs.iter()
        .map(|run| {
            let stack = stacks
                .entry(run.first.stack_trace_id)
                .or_insert_with(|| resolve_stack(profile, run.first.stack_trace_id))
                .clone();

            ProfileRecord {
                timestamp: profile.ticks_to_nanos(run.first.time),
                processor: Processor::default(),
                profile: ProfileFields {
                    id: profile_id.map(str::to_string),
                    duration,
                    top: stack.first().cloned(),
                    stack: Some(stack).filter(|s| !s.is_empty()),
                    samples: SampleCount { count: run.count },
                },
                data_stream_type: config.data_streams.then(|| METRICS_TYPE.to_string()),
                data_stream_dataset: config.data_streams.then(|| config.dataset()),
            }
        })
        .collect()
}
