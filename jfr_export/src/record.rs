//! Output record types.

use serde::{Deserialize, Serialize};

/// Processor tag attached to every profile record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processor {
    pub name: String,
    pub event: String,
}

impl Default for Processor {
    fn default() -> Self {
        Self {
            name: "profile".to_string(),
            event: "profile".to_string(),
        }
    }
}

/// A resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Hex digest identifying the call path from the root to this frame.
    pub id: String,
    pub function: String,
    /// Declaring class of the function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// How the frame was executing (interpreted, compiled, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCount {
    pub count: u64,
}

/// Profile-scoped fields of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Total recording duration in nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    /// Frames, innermost first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<StackFrame>>,
    /// Innermost frame, duplicated from `stack`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<StackFrame>,
    pub samples: SampleCount,
}

/// One aggregated run of identical stack samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Wall clock time of the run's first sample, nanoseconds since the
    /// epoch. Falls back to the chunk start when the tick rate is unknown.
    /// Other JFR exporters stamp every record with the profile start instead.
    pub timestamp: i64,
    pub processor: Processor,
    pub profile: ProfileFields,
    #[serde(
        rename = "data_stream.type",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub data_stream_type: Option<String>,
    #[serde(
        rename = "data_stream.dataset",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub data_stream_dataset: Option<String>,
}

impl ProfileRecord {
    pub fn sample_count(&self) -> u64 {
        self.profile.samples.count
    }

    /// Function names of the stack, innermost first.
    pub fn functions(&self) -> Vec<&str> {
        self.profile
            .stack
            .iter()
            .flatten()
            .map(|f| f.function.as_str())
            .collect()
    }
}
