//! Encoder for building synthetic recordings in tests.
//!
//! This is not a general-purpose writer: it produces just enough of the
//! chunk layout (header, event records, metadata, constant pool segments)
//! for the decoder to be exercised end to end.

use crate::{CHUNK_HEADER_SIZE, MAGIC};
use std::collections::BTreeMap;

pub const STRING: i64 = 10;
pub const LONG: i64 = 11;
pub const INT: i64 = 12;
pub const THREAD: i64 = 30;
pub const CLASS: i64 = 31;
pub const SYMBOL: i64 = 32;
pub const METHOD: i64 = 33;
pub const STACK_TRACE: i64 = 34;
pub const FRAME_TYPE: i64 = 35;
pub const THREAD_STATE: i64 = 36;
pub const PACKAGE: i64 = 37;
pub const EXECUTION_SAMPLE: i64 = 101;
pub const NATIVE_METHOD_SAMPLE: i64 = 102;
pub const GC_EVENT: i64 = 103;

const METADATA_RECORD: i32 = 0;
const CONSTANT_POOL_RECORD: i32 = 1;

pub fn encode_varint32(value: i32) -> Vec<u8> {
    let mut v = value as u32;
    let mut out = Vec::new();
    while v >= 0x80 {
        out.push((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
    out
}

pub fn encode_varint64(value: i64) -> Vec<u8> {
    let mut v = value as u64;
    let mut out = Vec::new();
    for _ in 0..8 {
        if v < 0x80 {
            out.push(v as u8);
            return out;
        }
        out.push((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
    out
}

/// Five-byte varint32, used for record sizes written before the body is known.
fn encode_padded_varint32(value: i32) -> [u8; 5] {
    let v = value as u32;
    [
        (v & 0x7f) as u8 | 0x80,
        ((v >> 7) & 0x7f) as u8 | 0x80,
        ((v >> 14) & 0x7f) as u8 | 0x80,
        ((v >> 21) & 0x7f) as u8 | 0x80,
        ((v >> 28) & 0x7f) as u8,
    ]
}

/// Appends encoded primitives to a byte buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    pub buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend(value.to_be_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend(value.to_be_bytes());
        self
    }

    pub fn varint32(&mut self, value: i32) -> &mut Self {
        self.buf.extend(encode_varint32(value));
        self
    }

    pub fn varint64(&mut self, value: i64) -> &mut Self {
        self.buf.extend(encode_varint64(value));
        self
    }

    /// UTF-8 encoded string.
    pub fn string(&mut self, value: &str) -> &mut Self {
        self.u8(3).bytes(value.as_bytes())
    }

    pub fn null_string(&mut self) -> &mut Self {
        self.u8(0)
    }

    /// Length-prefixed raw bytes.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.varint32(value.len() as i32);
        self.buf.extend_from_slice(value);
        self
    }

    /// Write a size-prefixed record of the given type.
    pub fn record(&mut self, type_id: i64, body: &[u8]) -> &mut Self {
        let mut rest = encode_varint64(type_id);
        rest.extend_from_slice(body);
        let size = 5 + rest.len();
        self.buf.extend(encode_padded_varint32(size as i32));
        self.buf.extend(rest);
        self
    }
}

/// An element of the metadata tree.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    fn collect_strings(&self, strings: &mut Vec<String>) {
        let mut add = |s: &str| {
            if !strings.iter().any(|existing| existing == s) {
                strings.push(s.to_string());
            }
        };
        add(&self.name);
        for (k, v) in &self.attributes {
            add(k);
            add(v);
        }
        for child in &self.children {
            child.collect_strings(strings);
        }
    }

    fn encode(&self, strings: &[String], w: &mut Writer) {
        let index = |s: &str| strings.iter().position(|e| e == s).unwrap_or(0) as i32;
        w.varint32(index(&self.name));
        w.varint32(self.attributes.len() as i32);
        for (k, v) in &self.attributes {
            w.varint32(index(k));
            w.varint32(index(v));
        }
        w.varint32(self.children.len() as i32);
        for child in &self.children {
            child.encode(strings, w);
        }
    }
}

/// Encodes a metadata section (header fields, string table, element tree).
#[derive(Debug, Default)]
pub struct MetadataBuilder;

impl MetadataBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Encode the section as a bare body: zeroed header fields first.
    pub fn encode(&self, root: &ElementSpec) -> Vec<u8> {
        let mut w = Writer::new();
        w.varint32(0).varint32(0).varint64(0).varint64(0).varint64(0);
        w.buf.extend(Self::encode_tree(root));
        w.buf
    }

    fn encode_tree(root: &ElementSpec) -> Vec<u8> {
        let mut strings = Vec::new();
        root.collect_strings(&mut strings);
        let mut w = Writer::new();
        w.varint32(strings.len() as i32);
        for s in &strings {
            w.string(s);
        }
        root.encode(&strings, &mut w);
        w.buf
    }

    /// Encode the section as a size-prefixed metadata record.
    fn encode_record(root: &ElementSpec) -> Vec<u8> {
        let mut body = Writer::new();
        body.varint64(0).varint64(0).varint64(1);
        body.buf.extend(Self::encode_tree(root));
        let mut w = Writer::new();
        w.record(METADATA_RECORD as i64, &body.buf);
        w.buf
    }
}

#[derive(Debug, Clone)]
struct ClassSpec {
    id: i64,
    name: String,
    super_type: Option<String>,
    fields: Vec<(String, i64, bool)>,
}

/// Builds one chunk of a recording.
#[derive(Debug, Clone)]
pub struct RecordingBuilder {
    version: i32,
    start_nanos: i64,
    duration_nanos: i64,
    start_ticks: i64,
    ticks_per_second: i64,
    classes: Vec<ClassSpec>,
    segments: Vec<Vec<(i64, Vec<u8>)>>,
    events: Writer,
    reverse_segments: bool,
    loop_segments: bool,
}

impl Default for RecordingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBuilder {
    /// An empty builder with no types declared.
    pub fn empty() -> Self {
        Self {
            version: 0x0002_0000,
            start_nanos: 1_600_000_000_000_000_000,
            duration_nanos: 0,
            start_ticks: 0,
            ticks_per_second: 0,
            classes: Vec::new(),
            segments: vec![Vec::new()],
            events: Writer::new(),
            reverse_segments: false,
            loop_segments: false,
        }
    }

    /// A builder declaring the standard types used by the decoder.
    pub fn new() -> Self {
        let mut b = Self::empty();
        b.class(STRING, "java.lang.String", None, &[]);
        b.class(LONG, "long", None, &[]);
        b.class(INT, "int", None, &[]);
        b.class(
            THREAD,
            "java.lang.Thread",
            None,
            &[
                ("osName", STRING, false),
                ("osThreadId", LONG, false),
                ("javaName", STRING, false),
                ("javaThreadId", LONG, false),
            ],
        );
        b.class(
            CLASS,
            "java.lang.Class",
            None,
            &[
                ("classLoader", LONG, true),
                ("name", SYMBOL, true),
                ("package", PACKAGE, true),
                ("modifiers", INT, false),
            ],
        );
        b.class(SYMBOL, "jdk.types.Symbol", None, &[("string", STRING, false)]);
        b.class(
            METHOD,
            "jdk.types.Method",
            None,
            &[
                ("type", CLASS, true),
                ("name", SYMBOL, true),
                ("descriptor", SYMBOL, true),
                ("modifiers", INT, false),
                ("hidden", INT, false),
            ],
        );
        b.class(STACK_TRACE, "jdk.types.StackTrace", None, &[]);
        b.class(FRAME_TYPE, "jdk.types.FrameType", None, &[("description", STRING, false)]);
        b.class(THREAD_STATE, "jdk.types.ThreadState", None, &[("name", STRING, false)]);
        b.class(
            PACKAGE,
            "jdk.types.Package",
            None,
            &[("name", SYMBOL, true), ("exported", INT, false)],
        );
        b.class(
            EXECUTION_SAMPLE,
            "jdk.ExecutionSample",
            Some("jdk.jfr.Event"),
            &[
                ("startTime", LONG, false),
                ("sampledThread", THREAD, true),
                ("stackTrace", STACK_TRACE, true),
                ("state", THREAD_STATE, true),
            ],
        );
        b.class(
            NATIVE_METHOD_SAMPLE,
            "jdk.NativeMethodSample",
            Some("jdk.jfr.Event"),
            &[
                ("startTime", LONG, false),
                ("sampledThread", THREAD, true),
                ("stackTrace", STACK_TRACE, true),
                ("state", THREAD_STATE, true),
            ],
        );
        b.class(
            GC_EVENT,
            "jdk.GarbageCollection",
            Some("jdk.jfr.Event"),
            &[("startTime", LONG, false), ("name", STRING, false)],
        );
        b
    }

    pub fn version(&mut self, major: i16, minor: i16) -> &mut Self {
        self.version = ((major as i32) << 16) | (minor as u16 as i32);
        self
    }

    pub fn start_nanos(&mut self, value: i64) -> &mut Self {
        self.start_nanos = value;
        self
    }

    pub fn duration_nanos(&mut self, value: i64) -> &mut Self {
        self.duration_nanos = value;
        self
    }

    pub fn ticks(&mut self, start_ticks: i64, ticks_per_second: i64) -> &mut Self {
        self.start_ticks = start_ticks;
        self.ticks_per_second = ticks_per_second;
        self
    }

    /// Declare a class type with `(name, type id, constant pool)` fields.
    pub fn class(
        &mut self,
        id: i64,
        name: &str,
        super_type: Option<&str>,
        fields: &[(&str, i64, bool)],
    ) -> &mut Self {
        self.classes.push(ClassSpec {
            id,
            name: name.to_string(),
            super_type: super_type.map(str::to_string),
            fields: fields
                .iter()
                .map(|(n, t, cp)| (n.to_string(), *t, *cp))
                .collect(),
        });
        self
    }

    /// Add a field to an already declared class.
    pub fn add_field(&mut self, class_id: i64, name: &str, type_id: i64, cp: bool) -> &mut Self {
        if let Some(class) = self.classes.iter_mut().find(|c| c.id == class_id) {
            class.fields.push((name.to_string(), type_id, cp));
        }
        self
    }

    /// Start a new constant pool segment; later pools go into it.
    pub fn segment(&mut self) -> &mut Self {
        self.segments.push(Vec::new());
        self
    }

    /// Lay segments out in the file in reverse order (negative deltas).
    pub fn reverse_segments(&mut self) -> &mut Self {
        self.reverse_segments = true;
        self
    }

    /// Make the last segment link back to the first one.
    pub fn loop_segments(&mut self) -> &mut Self {
        self.loop_segments = true;
        self
    }

    /// Add a raw pool body (count plus entries) for `type_id`.
    pub fn pool(&mut self, type_id: i64, body: Vec<u8>) -> &mut Self {
        if let Some(segment) = self.segments.last_mut() {
            segment.push((type_id, body));
        }
        self
    }

    pub fn symbols(&mut self, symbols: &[(i64, &str)]) -> &mut Self {
        let mut w = Writer::new();
        w.varint32(symbols.len() as i32);
        for (id, s) in symbols {
            w.varint64(*id).string(s);
        }
        self.pool(SYMBOL, w.buf)
    }

    /// `(class id, name symbol id)` pairs.
    pub fn classes(&mut self, classes: &[(i64, i64)]) -> &mut Self {
        let mut w = Writer::new();
        w.varint32(classes.len() as i32);
        for (id, name) in classes {
            w.varint64(*id).varint64(0).varint64(*name).varint64(0).varint32(1);
        }
        self.pool(CLASS, w.buf)
    }

    /// `(method id, class id, name symbol id, signature symbol id)`.
    pub fn methods(&mut self, methods: &[(i64, i64, i64, i64)]) -> &mut Self {
        let mut w = Writer::new();
        w.varint32(methods.len() as i32);
        for (id, class, name, sig) in methods {
            w.varint64(*id)
                .varint64(*class)
                .varint64(*name)
                .varint64(*sig)
                .varint32(1)
                .varint32(0);
        }
        self.pool(METHOD, w.buf)
    }

    /// `(stack trace id, [(method id, frame type)])`, frames innermost first.
    pub fn stack_traces(&mut self, traces: &[(i64, &[(i64, u8)])]) -> &mut Self {
        let mut w = Writer::new();
        w.varint32(traces.len() as i32);
        for (id, frames) in traces {
            w.varint64(*id).varint32(0).varint32(frames.len() as i32);
            for (line, (method, frame_type)) in frames.iter().enumerate() {
                w.varint64(*method)
                    .varint32(line as i32 + 10)
                    .varint32(3)
                    .u8(*frame_type);
            }
        }
        self.pool(STACK_TRACE, w.buf)
    }

    /// `(thread id, os name, java name)`.
    pub fn threads(&mut self, threads: &[(i64, Option<&str>, Option<&str>)]) -> &mut Self {
        let mut w = Writer::new();
        w.varint32(threads.len() as i32);
        for (id, os_name, java_name) in threads {
            w.varint64(*id);
            match os_name {
                Some(name) => w.string(name),
                None => w.null_string(),
            };
            w.varint64(*id + 1000);
            match java_name {
                Some(name) => w.string(name),
                None => w.null_string(),
            };
            w.varint64(*id);
        }
        self.pool(THREAD, w.buf)
    }

    fn label_map(&mut self, type_id: i64, labels: &[(i32, &str)]) -> &mut Self {
        let mut w = Writer::new();
        w.varint32(labels.len() as i32);
        for (key, label) in labels {
            w.varint32(*key).string(label);
        }
        self.pool(type_id, w.buf)
    }

    pub fn frame_types(&mut self, labels: &[(i32, &str)]) -> &mut Self {
        self.label_map(FRAME_TYPE, labels)
    }

    pub fn thread_states(&mut self, labels: &[(i32, &str)]) -> &mut Self {
        self.label_map(THREAD_STATE, labels)
    }

    /// Append an event record with a raw body.
    pub fn event(&mut self, type_id: i64, body: &[u8]) -> &mut Self {
        self.events.record(type_id, body);
        self
    }

    pub fn execution_sample(
        &mut self,
        ticks: i64,
        thread_id: i32,
        stack_trace_id: i32,
        state: i32,
    ) -> &mut Self {
        let mut w = Writer::new();
        w.varint64(ticks)
            .varint32(thread_id)
            .varint32(stack_trace_id)
            .varint32(state);
        self.event(EXECUTION_SAMPLE, &w.buf)
    }

    fn metadata_tree(&self) -> ElementSpec {
        let mut metadata = ElementSpec::new("metadata");
        for class in &self.classes {
            let mut spec = ElementSpec::new("class")
                .attr("id", &class.id.to_string())
                .attr("name", &class.name);
            if let Some(super_type) = &class.super_type {
                spec = spec.attr("superType", super_type);
            }
            for (name, type_id, cp) in &class.fields {
                let mut field = ElementSpec::new("field")
                    .attr("name", name)
                    .attr("class", &type_id.to_string());
                if *cp {
                    field = field.attr("constantPool", "true");
                }
                spec = spec.child(field);
            }
            metadata = metadata.child(spec);
        }
        ElementSpec::new("root")
            .child(metadata)
            .child(ElementSpec::new("region").attr("locale", "en_US"))
    }

    fn encode_segment(pools: &[(i64, Vec<u8>)], delta: i64) -> Vec<u8> {
        let mut body = Writer::new();
        body.varint64(0).varint64(0).varint64(delta).varint32(1);
        body.varint32(pools.len() as i32);
        for (type_id, pool) in pools {
            body.varint64(*type_id);
            body.buf.extend_from_slice(pool);
        }
        let mut w = Writer::new();
        w.record(CONSTANT_POOL_RECORD as i64, &body.buf);
        w.buf
    }

    /// Encode the chunk.
    pub fn build(&self) -> Vec<u8> {
        let metadata = MetadataBuilder::encode_record(&self.metadata_tree());

        let mut body = Vec::new();
        body.extend_from_slice(&self.events.buf);
        let metadata_offset = CHUNK_HEADER_SIZE + body.len();
        body.extend(metadata);

        // Segment sizes depend on their deltas only through the delta varint
        // width, so lay out with a first pass and fix up with a second.
        let order: Vec<usize> = if self.reverse_segments {
            (0..self.segments.len()).rev().collect()
        } else {
            (0..self.segments.len()).collect()
        };
        let mut offsets: BTreeMap<usize, usize> = BTreeMap::new();
        let mut deltas = vec![0i64; self.segments.len()];
        for _ in 0..3 {
            offsets.clear();
            let mut pos = CHUNK_HEADER_SIZE + body.len();
            for &i in &order {
                offsets.insert(i, pos);
                pos += Self::encode_segment(&self.segments[i], deltas[i]).len();
            }
            for i in 0..self.segments.len() {
                let next = if i + 1 < self.segments.len() {
                    Some(offsets[&(i + 1)])
                } else if self.loop_segments {
                    Some(offsets[&0])
                } else {
                    None
                };
                deltas[i] = next.map_or(0, |n| n as i64 - offsets[&i] as i64);
            }
        }
        let constant_pool_offset = offsets[&0];
        for &i in &order {
            body.extend(Self::encode_segment(&self.segments[i], deltas[i]));
        }

        let chunk_size = CHUNK_HEADER_SIZE + body.len();
        let mut w = Writer::new();
        w.i32(MAGIC)
            .i32(self.version)
            .i64(chunk_size as i64)
            .i64(constant_pool_offset as i64)
            .i64(metadata_offset as i64)
            .i64(self.start_nanos)
            .i64(self.duration_nanos)
            .i64(self.start_ticks)
            .i64(self.ticks_per_second)
            .i32(1);
        w.buf.extend(body);
        w.buf
    }
}
