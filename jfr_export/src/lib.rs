//! Convert JFR recordings into stack-keyed profile records.
//!
//! Recordings are decoded with [`jfr_parse`], CPU samples are sorted by time,
//! consecutive samples on the same stack are folded together, and each run
//! becomes one [`ProfileRecord`] handed to a [`ProfileSink`].
//!
//! # Modules
//!
//! - [`aggregate`] - Sample ordering, run folding and frame resolution
//! - [`config`] - Export configuration
//! - [`input`] - Reading plain, gzip or zstd input
//! - [`record`] - Output record types
//! - [`sink`] - Record destinations, including newline-delimited JSON
//!
//! # Example
//!
//! ```no_run
//! use jfr_export::{ExportConfig, JfrConverter};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("recording.jfr").unwrap());
//! let output = BufWriter::new(File::create("profile.ndjson").unwrap());
//!
//! let mut converter = JfrConverter::with_config(ExportConfig {
//!     service_name: "checkout".to_string(),
//!     data_streams: true,
//! });
//! converter.parse(input).unwrap();
//! converter.write_ndjson(output).unwrap();
//! ```

pub mod aggregate;
pub mod config;
pub mod input;
pub mod record;
pub mod sink;

pub use config::ExportConfig;
pub use jfr_parse;
pub use record::ProfileRecord;
pub use sink::{NdjsonWriter, ProfileSink};

use jfr_parse::{CancellationToken, DecodeOptions, ParseError, Profile};
use std::io::{Read, Write};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JFR decode error: {0}")]
    Parse(#[from] ParseError),

    #[error("no samples found in input")]
    NoSamples,
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Export one decoded profile under a fresh profile id.
///
/// Returns the number of records emitted.
pub fn export_profile<S: ProfileSink + ?Sized>(
    profile: &Profile,
    config: &ExportConfig,
    sink: &mut S,
) -> Result<usize> {
    let profile_id = Uuid::new_v4().simple().to_string();
    let records = aggregate::build_records(profile, config, Some(&profile_id));
    let count = records.len();
    log::debug!(
        "profile {}: {} samples in {} records",
        profile_id,
        profile.samples.len(),
        count
    );
    for record in records {
        sink.emit(record)?;
    }
    Ok(count)
}

/// Decodes recordings and holds the resulting records.
pub struct JfrConverter {
    config: ExportConfig,
    options: DecodeOptions,
    records: Vec<ProfileRecord>,
}

impl JfrConverter {
    pub fn new() -> Self {
        Self::with_config(ExportConfig::default())
    }

    pub fn with_config(config: ExportConfig) -> Self {
        Self {
            config,
            options: DecodeOptions::default(),
            records: Vec::new(),
        }
    }

    /// Abort decoding once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    /// Read, decompress and decode a recording, appending its records.
    pub fn parse<R: Read>(&mut self, reader: R) -> Result<()> {
        let bytes = input::read_recording(reader)?;
        let profiles = jfr_parse::parse_recording(&bytes, &self.options)?;
        for profile in &profiles {
            export_profile(profile, &self.config, &mut self.records)?;
        }
        Ok(())
    }

    /// Records produced so far, in emission order.
    pub fn records(&self) -> &[ProfileRecord] {
        &self.records
    }

    /// Total samples across all records.
    pub fn sample_count(&self) -> u64 {
        self.records.iter().map(ProfileRecord::sample_count).sum()
    }

    /// Hand every record to `sink`.
    pub fn write_records<S: ProfileSink + ?Sized>(&self, sink: &mut S) -> Result<usize> {
        if self.records.is_empty() {
            return Err(ConvertError::NoSamples);
        }
        for record in &self.records {
            sink.emit(record.clone())?;
        }
        Ok(self.records.len())
    }

    /// Write the records as newline-delimited JSON.
    pub fn write_ndjson<W: Write>(&self, writer: W) -> Result<()> {
        let mut ndjson = NdjsonWriter::new(writer);
        self.write_records(&mut ndjson)?;
        ndjson.flush()
    }
}

impl Default for JfrConverter {
    fn default() -> Self {
        Self::new()
    }
}
