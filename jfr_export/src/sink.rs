//! Destinations for profile records.

use crate::Result;
use crate::record::ProfileRecord;
use std::io::Write;

/// Receives records as they are produced.
pub trait ProfileSink {
    fn emit(&mut self, record: ProfileRecord) -> Result<()>;
}

impl ProfileSink for Vec<ProfileRecord> {
    fn emit(&mut self, record: ProfileRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct NdjsonWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Serialize a record onto its own line.
    pub fn write_record(&mut self, record: &ProfileRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", json)?;
        self.written += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Consume this writer and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProfileSink for NdjsonWriter<W> {
    fn emit(&mut self, record: ProfileRecord) -> Result<()> {
        self.write_record(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProfileFields, Processor, SampleCount, StackFrame};

    fn record(count: u64, with_stack: bool) -> ProfileRecord {
        let frame = StackFrame {
            id: "00000000000000aa".to_string(),
            function: "run".to_string(),
            filename: Some("com/example/Task".to_string()),
            frame_type: None,
        };
        ProfileRecord {
            timestamp: 1_700_000_000_000_000_000,
            processor: Processor::default(),
            profile: ProfileFields {
                id: Some("4f1c".to_string()),
                duration: None,
                stack: with_stack.then(|| vec![frame.clone()]),
                top: with_stack.then_some(frame),
                samples: SampleCount { count },
            },
            data_stream_type: None,
            data_stream_dataset: None,
        }
    }

    #[test]
    fn vec_sink_collects() {
        let mut sink: Vec<ProfileRecord> = Vec::new();
        sink.emit(record(1, true)).unwrap();
        sink.emit(record(2, false)).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].sample_count(), 2);
    }

    #[test]
    fn ndjson_writes_one_line_per_record() {
        let mut writer = NdjsonWriter::new(Vec::new());
        writer.emit(record(3, true)).unwrap();
        writer.emit(record(1, false)).unwrap();
        assert_eq!(writer.written(), 2);

        let output = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["profile"]["samples"]["count"], 3);
        assert_eq!(first["profile"]["top"]["function"], "run");
        assert_eq!(first["processor"]["event"], "profile");
        assert!(first["profile"]["top"].get("frame_type").is_none());
        assert!(first["profile"].get("duration").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second["profile"].get("stack").is_none());
        assert!(second.get("data_stream.type").is_none());
    }

    #[test]
    fn data_stream_keys_are_dotted() {
        let mut rec = record(1, false);
        rec.data_stream_type = Some("metrics".to_string());
        rec.data_stream_dataset = Some("apm.profiling.svc".to_string());

        let mut writer = NdjsonWriter::new(Vec::new());
        writer.emit(rec.clone()).unwrap();
        let output = String::from_utf8(writer.into_inner()).unwrap();

        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value["data_stream.type"], "metrics");
        assert_eq!(value["data_stream.dataset"], "apm.profiling.svc");

        let back: ProfileRecord = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(back, rec);
    }
}
