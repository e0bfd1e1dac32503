//! Export configuration supplied by the caller.

/// Dataset prefix for profile records written to data streams.
pub const PROFILES_DATASET: &str = "apm.profiling";

/// Data stream type for profile records.
pub const METRICS_TYPE: &str = "metrics";

/// Configuration for the converter.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Name of the profiled service, used to tag records.
    pub service_name: String,
    /// Tag records with data stream type and dataset.
    pub data_streams: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            data_streams: false,
        }
    }
}

impl ExportConfig {
    /// Dataset for this service, e.g. `apm.profiling.my_service`.
    pub fn dataset(&self) -> String {
        format!(
            "{}.{}",
            PROFILES_DATASET,
            normalize_service_name(&self.service_name)
        )
    }
}

/// Lowercase a service name and replace characters that are not allowed in
/// data stream names with `_`.
pub fn normalize_service_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' | ',' | '#' | ':' | '-' => '_',
            c => c,
        })
        .collect()
}
