//! JFR (JDK Flight Recorder) recording decoder.
//!
//! This library decodes the chunked binary recordings written by the JVM's
//! sampling profiler and resolves everything needed to turn CPU samples into
//! named stack traces: the type metadata, the constant pools (threads,
//! classes, symbols, methods, stack traces) and the sampling events.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use jfr_parse::Profile;
//!
//! let file = File::open("recording.jfr").unwrap();
//! let profile = Profile::parse(file).unwrap();
//!
//! println!("Samples: {}", profile.samples.len());
//! println!("Stack traces: {}", profile.pools.stack_traces.len());
//! ```

use serde::Serialize;
use std::fmt;
use std::io::Read;
use thiserror::Error;

pub mod constant_pool;
pub mod cursor;
pub mod events;
pub mod metadata;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use constant_pool::{ConstantPools, MethodRef, StackTrace};
pub use cursor::ByteCursor;
pub use events::{CancellationToken, RawSample};
pub use metadata::{ClassType, Field, TypeRegistry};

/// Chunk magic, `FLR\0`.
pub const MAGIC: i32 = 0x464c_5200;

/// Size of the fixed chunk header. Event records start right after it.
pub const CHUNK_HEADER_SIZE: usize = 68;

/// Supported major format version.
pub const SUPPORTED_MAJOR_VERSION: i16 = 2;

const CHUNK_SIZE_OFFSET: usize = 8;
const CONSTANT_POOL_OFFSET: usize = 16;
const METADATA_OFFSET: usize = 24;
const TIMING_OFFSET: usize = 32;

/// Errors that can occur while decoding a recording.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid JFR file (magic {0:#010x})")]
    InvalidFormat(i32),

    #[error("unsupported JFR version: {0}")]
    UnsupportedVersion(Version),

    #[error("truncated input: {needed} byte(s) needed at offset {offset}")]
    TruncatedInput { offset: usize, needed: usize },

    #[error("offset {offset} outside of chunk of {len} bytes")]
    InvalidOffset { offset: i64, len: usize },

    #[error("invalid string encoding {tag} at offset {offset}")]
    InvalidStringEncoding { tag: i8, offset: usize },

    #[error("invalid char {0:#x} in string")]
    InvalidChar(u32),

    #[error("invalid encoding {encoding} for symbol {symbol_id}")]
    InvalidSymbolEncoding { symbol_id: i64, encoding: i8 },

    #[error("invalid metadata string index {0}")]
    InvalidStringIndex(i32),

    #[error("metadata nested deeper than {0} levels")]
    MetadataTooDeep(usize),

    #[error("constant pool references unknown type {0}")]
    UnknownConstantPoolType(i64),

    #[error("constant pool segment at offset {offset} visited twice")]
    ConstantPoolCycle { offset: usize },

    #[error("invalid record size {size} at offset {offset}")]
    InvalidRecordSize { offset: usize, size: i32 },

    #[error("decode cancelled")]
    Cancelled,
}

/// Result type for decoding operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Recording format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Version {
    pub major: i16,
    pub minor: i16,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Fixed-size header at the start of every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkHeader {
    pub version: Version,
    pub chunk_size: i64,
    pub constant_pool_offset: i64,
    pub metadata_offset: i64,
    /// Wall clock start, nanoseconds since the Unix epoch.
    pub start_nanos: i64,
    pub duration_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: i64,
    pub features: i32,
}

impl ChunkHeader {
    /// Validate magic and version and read the header fields.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        cursor.seek(0)?;
        let magic = cursor.read_i32()?;
        if magic != MAGIC {
            return Err(ParseError::InvalidFormat(magic));
        }
        let word = cursor.read_i32()?;
        let version = Version {
            major: (word >> 16) as i16,
            minor: (word & 0xffff) as i16,
        };
        if version.major != SUPPORTED_MAJOR_VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }

        let chunk_size = cursor.read_i64_at(CHUNK_SIZE_OFFSET)?;
        let constant_pool_offset = cursor.read_i64_at(CONSTANT_POOL_OFFSET)?;
        let metadata_offset = cursor.read_i64_at(METADATA_OFFSET)?;
        cursor.seek(TIMING_OFFSET)?;
        Ok(Self {
            version,
            chunk_size,
            constant_pool_offset,
            metadata_offset,
            start_nanos: cursor.read_i64()?,
            duration_nanos: cursor.read_i64()?,
            start_ticks: cursor.read_i64()?,
            ticks_per_second: cursor.read_i64()?,
            features: cursor.read_i32()?,
        })
    }

    fn offset(value: i64, len: usize) -> Result<usize> {
        usize::try_from(value)
            .ok()
            .filter(|&v| v >= CHUNK_HEADER_SIZE && v < len)
            .ok_or(ParseError::InvalidOffset { offset: value, len })
    }
}

/// Options for a decode call.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Checked periodically while scanning the event stream.
    pub cancel: Option<CancellationToken>,
}

/// Everything decoded from one chunk.
#[derive(Debug, Clone)]
pub struct Profile {
    pub header: ChunkHeader,
    pub types: TypeRegistry,
    pub pools: ConstantPools,
    /// CPU samples in stream order.
    pub samples: Vec<RawSample>,
}

impl Profile {
    /// Read a whole recording from any `Read`-able source and decode its
    /// first chunk.
    pub fn parse<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Decode the first chunk of an in-memory recording.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with_options(bytes, &DecodeOptions::default())
    }

    pub fn from_bytes_with_options(bytes: &[u8], options: &DecodeOptions) -> Result<Self> {
        let (chunk, _) = split_chunk(bytes)?;
        Self::decode_chunk(chunk, options)
    }

    fn decode_chunk(chunk: &[u8], options: &DecodeOptions) -> Result<Self> {
        let mut cursor = ByteCursor::new(chunk);
        let header = ChunkHeader::read(&mut cursor)?;
        log::debug!(
            "chunk version {}, {} bytes, {} ticks/s",
            header.version,
            chunk.len(),
            header.ticks_per_second
        );

        let metadata_offset = ChunkHeader::offset(header.metadata_offset, chunk.len())?;
        let types = metadata::read_metadata(&mut cursor, metadata_offset)?;

        let pool_offset = ChunkHeader::offset(header.constant_pool_offset, chunk.len())?;
        let mut pools = constant_pool::read_constant_pools(&mut cursor, pool_offset, &types)?;

        let samples = events::scan_samples(
            &mut cursor,
            &types,
            &mut pools.stack_traces,
            options.cancel.as_ref(),
        )?;

        Ok(Self {
            header,
            types,
            pools,
            samples,
        })
    }

    /// Convert a tick timestamp to wall clock nanoseconds since the epoch.
    ///
    /// Returns the chunk start when the tick rate is unknown.
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        let header = &self.header;
        if header.ticks_per_second <= 0 {
            return header.start_nanos;
        }
        let elapsed = (ticks as i128 - header.start_ticks as i128) * 1_000_000_000
            / header.ticks_per_second as i128;
        (header.start_nanos as i128 + elapsed).clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn thread_name(&self, thread_id: i64) -> Option<&str> {
        self.pools.thread_name(thread_id)
    }

    pub fn method_name(&self, method_id: i64) -> Option<&str> {
        self.pools.method_name(method_id)
    }

    pub fn class_name(&self, class_id: i64) -> Option<&str> {
        self.pools.class_name(class_id)
    }
}

/// Split off the first chunk. A chunk size of zero (recording still in
/// progress) or one running past the buffer takes the rest of the buffer.
fn split_chunk(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let cursor = ByteCursor::new(bytes);
    let size = match cursor.read_i64_at(CHUNK_SIZE_OFFSET) {
        Ok(size) => size,
        // Too short for a header: let header validation report it.
        Err(_) => return Ok((bytes, &[])),
    };
    let size = usize::try_from(size)
        .ok()
        .filter(|&s| s >= CHUNK_HEADER_SIZE && s <= bytes.len())
        .unwrap_or(bytes.len());
    Ok(bytes.split_at(size))
}

/// Whether `bytes` can start another chunk: a full header led by the magic.
fn starts_chunk(bytes: &[u8]) -> bool {
    bytes.len() >= CHUNK_HEADER_SIZE && bytes.starts_with(&MAGIC.to_be_bytes())
}

/// Decode every chunk of a recording.
///
/// Trailing bytes after a chunk that cannot begin another chunk (padding,
/// a cut-off header) are ignored with a warning.
pub fn parse_recording(bytes: &[u8], options: &DecodeOptions) -> Result<Vec<Profile>> {
    let mut profiles = Vec::new();
    let mut rest = bytes;
    loop {
        let (chunk, next) = split_chunk(rest)?;
        profiles.push(Profile::decode_chunk(chunk, options)?);
        if next.is_empty() {
            break;
        }
        if !starts_chunk(next) {
            log::warn!(
                "ignoring {} trailing bytes after chunk {}",
                next.len(),
                profiles.len()
            );
            break;
        }
        rest = next;
    }
    log::debug!("decoded {} chunk(s)", profiles.len());
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBuilder;

    fn single_frame_recording() -> RecordingBuilder {
        let mut builder = RecordingBuilder::new();
        builder
            .ticks(1_000, 1_000_000)
            .duration_nanos(5_000_000_000)
            .symbols(&[(1, "com/example/Main"), (2, "main"), (3, "([Ljava/lang/String;)V")])
            .classes(&[(10, 1)])
            .methods(&[(100, 10, 2, 3)])
            .stack_traces(&[(7, &[(100, 0)])])
            .execution_sample(2_000, 1, 7, 0)
            .execution_sample(3_000, 1, 7, 0)
            .execution_sample(4_000, 1, 7, 0);
        builder
    }

    #[test]
    fn parse_minimal_recording() {
        let bytes = single_frame_recording().build();
        let profile = Profile::parse(std::io::Cursor::new(bytes)).unwrap();

        assert_eq!(profile.header.version, Version { major: 2, minor: 0 });
        assert_eq!(profile.header.duration_nanos, 5_000_000_000);
        assert_eq!(profile.samples.len(), 3);
        assert_eq!(profile.pools.stack_traces[&7].samples, 3);
        assert_eq!(profile.method_name(100), Some("main"));
        assert_eq!(profile.class_name(10), Some("com/example/Main"));
        assert!(profile.types.get_by_name("jdk.ExecutionSample").is_some());
    }

    #[test]
    fn zero_magic_is_invalid_format() {
        let result = Profile::from_bytes(&[0, 0, 0, 0]);
        assert!(matches!(result, Err(ParseError::InvalidFormat(0))));
    }

    #[test]
    fn empty_input_is_truncated() {
        let result = Profile::from_bytes(&[]);
        assert!(matches!(result, Err(ParseError::TruncatedInput { .. })));
    }

    #[test]
    fn supported_versions_validate() {
        for minor in [0, 1, 0x7fff] {
            let mut builder = RecordingBuilder::new();
            builder.version(2, minor);
            assert!(Profile::from_bytes(&builder.build()).is_ok(), "2.{minor}");
        }
    }

    #[test]
    fn unsupported_versions_fail() {
        for major in [0, 1, 3, -1] {
            let mut builder = RecordingBuilder::new();
            builder.version(major, 0);
            let result = Profile::from_bytes(&builder.build());
            assert!(
                matches!(result, Err(ParseError::UnsupportedVersion(v)) if v.major == major),
                "{major}.0"
            );
        }
    }

    #[test]
    fn truncated_recording_fails() {
        let bytes = single_frame_recording().build();
        let result = Profile::from_bytes(&bytes[..bytes.len() - 10]);
        assert!(result.is_err());
    }

    #[test]
    fn bad_metadata_offset_fails() {
        let mut bytes = single_frame_recording().build();
        bytes[METADATA_OFFSET..METADATA_OFFSET + 8].copy_from_slice(&(1i64 << 40).to_be_bytes());
        assert!(matches!(
            Profile::from_bytes(&bytes),
            Err(ParseError::InvalidOffset { .. })
        ));
    }

    #[test]
    fn ticks_convert_to_wall_clock() {
        let profile = Profile::from_bytes(&single_frame_recording().build()).unwrap();
        let start = profile.header.start_nanos;

        assert_eq!(profile.ticks_to_nanos(1_000), start);
        assert_eq!(profile.ticks_to_nanos(2_000), start + 1_000_000);
    }

    #[test]
    fn multiple_chunks_decode_independently() {
        let mut second = RecordingBuilder::new();
        second
            .symbols(&[(1, "other")])
            .stack_traces(&[(7, &[])])
            .execution_sample(1, 2, 7, 0);
        let mut bytes = single_frame_recording().build();
        bytes.extend(second.build());

        let profiles = parse_recording(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].samples.len(), 3);
        assert_eq!(profiles[1].samples.len(), 1);
        assert_eq!(profiles[1].pools.symbol(1), Some("other"));

        let first = Profile::from_bytes(&bytes).unwrap();
        assert_eq!(first.samples.len(), 3);
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let mut short_tail = single_frame_recording().build();
        short_tail.extend([0u8; 16]);
        let profiles = parse_recording(&short_tail, &DecodeOptions::default()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].samples.len(), 3);

        let mut long_tail = single_frame_recording().build();
        long_tail.extend([0u8; 4096]);
        let profiles = parse_recording(&long_tail, &DecodeOptions::default()).unwrap();
        assert_eq!(profiles.len(), 1);
    }

    #[test]
    fn corrupt_second_chunk_still_fails() {
        let mut bytes = single_frame_recording().build();
        let mut second = single_frame_recording().build();
        second.truncate(CHUNK_HEADER_SIZE);
        bytes.extend(second);

        assert!(parse_recording(&bytes, &DecodeOptions::default()).is_err());
    }

    #[test]
    fn cancellation_is_honored() {
        let token = CancellationToken::new();
        token.cancel();
        let options = DecodeOptions {
            cancel: Some(token),
        };
        let bytes = single_frame_recording().build();
        assert!(matches!(
            Profile::from_bytes_with_options(&bytes, &options),
            Err(ParseError::Cancelled)
        ));
    }
}
