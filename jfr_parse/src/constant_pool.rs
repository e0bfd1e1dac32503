//! Constant pool decoding.
//!
//! A chunk's constant pools are spread over one or more segments linked by
//! byte deltas. Each segment holds a list of pools, one per type, and each
//! pool is decoded according to its type name. Pools the decoder has no use
//! for are walked field by field using the type's metadata so the cursor
//! stays in sync.

use crate::cursor::{ByteCursor, STRING_UTF8};
use crate::metadata::{ClassType, Field, TypeRegistry};
use crate::{CHUNK_HEADER_SIZE, ParseError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A resolved method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MethodRef {
    /// Class id, resolved through [`ConstantPools::classes`].
    pub class: i64,
    /// Name symbol id.
    pub name: i64,
    /// Signature symbol id.
    pub signature: i64,
}

/// A stack trace as recorded: frames innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackTrace {
    pub methods: Vec<i64>,
    pub frame_types: Vec<i8>,
    /// Number of samples seen referencing this trace.
    pub samples: u64,
}

/// Resolved constant pool tables of one chunk.
#[derive(Debug, Clone, Default)]
pub struct ConstantPools {
    /// Thread id to display name.
    pub threads: HashMap<i64, String>,
    /// Class id to name symbol id.
    pub classes: HashMap<i64, i64>,
    pub symbols: HashMap<i64, String>,
    pub methods: HashMap<i64, MethodRef>,
    pub stack_traces: HashMap<i64, StackTrace>,
    pub frame_types: HashMap<i32, String>,
    pub thread_states: HashMap<i32, String>,
}

impl ConstantPools {
    pub fn symbol(&self, id: i64) -> Option<&str> {
        self.symbols.get(&id).map(String::as_str)
    }

    /// Name of a class, through its name symbol.
    pub fn class_name(&self, class_id: i64) -> Option<&str> {
        self.classes
            .get(&class_id)
            .and_then(|&symbol| self.symbol(symbol))
    }

    /// Name of a method, through its name symbol.
    pub fn method_name(&self, method_id: i64) -> Option<&str> {
        self.methods
            .get(&method_id)
            .and_then(|m| self.symbol(m.name))
    }

    pub fn thread_name(&self, thread_id: i64) -> Option<&str> {
        self.threads.get(&thread_id).map(String::as_str)
    }
}

/// Pool kinds with a dedicated decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolKind {
    ChunkHeader,
    Thread,
    Class,
    Symbol,
    Method,
    StackTrace,
    FrameType,
    ThreadState,
    Other,
}

impl PoolKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "jdk.types.ChunkHeader" => PoolKind::ChunkHeader,
            "java.lang.Thread" => PoolKind::Thread,
            "java.lang.Class" => PoolKind::Class,
            "jdk.types.Symbol" => PoolKind::Symbol,
            "jdk.types.Method" => PoolKind::Method,
            "jdk.types.StackTrace" => PoolKind::StackTrace,
            "jdk.types.FrameType" => PoolKind::FrameType,
            "jdk.types.ThreadState" => PoolKind::ThreadState,
            _ => PoolKind::Other,
        }
    }
}

/// Read every constant pool segment, starting with the one at `offset`.
pub fn read_constant_pools(
    cursor: &mut ByteCursor<'_>,
    offset: usize,
    types: &TypeRegistry,
) -> Result<ConstantPools> {
    let mut pools = ConstantPools::default();
    let mut visited = HashSet::new();
    let mut offset = offset;

    loop {
        if !visited.insert(offset) {
            return Err(ParseError::ConstantPoolCycle { offset });
        }
        cursor.seek(offset)?;
        // size, type, start, duration
        cursor.read_varint32()?;
        cursor.read_varint32()?;
        cursor.read_varint64()?;
        cursor.read_varint64()?;
        let delta = cursor.read_varint64()?;
        // flush
        cursor.read_varint32()?;
        let pool_count = cursor.read_len()?;

        for _ in 0..pool_count {
            let type_id = cursor.read_varint32()? as i64;
            let class = types
                .get(type_id)
                .ok_or(ParseError::UnknownConstantPoolType(type_id))?;
            read_pool(cursor, class, types, &mut pools)?;
        }

        if delta == 0 {
            break;
        }
        offset = next_segment(offset, delta, cursor.len())?;
    }

    log::debug!(
        "read {} constant pool segment(s): {} threads, {} classes, {} symbols, {} methods, {} stack traces",
        visited.len(),
        pools.threads.len(),
        pools.classes.len(),
        pools.symbols.len(),
        pools.methods.len(),
        pools.stack_traces.len()
    );
    Ok(pools)
}

fn next_segment(offset: usize, delta: i64, len: usize) -> Result<usize> {
    let next = (offset as i64).checked_add(delta);
    match next {
        Some(next) if next >= CHUNK_HEADER_SIZE as i64 && (next as usize) < len => {
            Ok(next as usize)
        }
        _ => Err(ParseError::InvalidOffset {
            offset: next.unwrap_or(i64::MAX),
            len,
        }),
    }
}

fn read_pool(
    cursor: &mut ByteCursor<'_>,
    class: &ClassType,
    types: &TypeRegistry,
    pools: &mut ConstantPools,
) -> Result<()> {
    let kind = PoolKind::from_type_name(&class.name);
    log::trace!(
        "constant pool {} ({}) at {}",
        class.name,
        class.id,
        cursor.position()
    );
    match kind {
        PoolKind::ChunkHeader => cursor.skip(CHUNK_HEADER_SIZE + 3),
        PoolKind::Thread => read_threads(cursor, class.has_field("group"), &mut pools.threads),
        PoolKind::Class => read_classes(cursor, class.has_field("hidden"), &mut pools.classes),
        PoolKind::Symbol => read_symbols(cursor, &mut pools.symbols),
        PoolKind::Method => read_methods(cursor, &mut pools.methods),
        PoolKind::StackTrace => read_stack_traces(cursor, &mut pools.stack_traces),
        PoolKind::FrameType => read_labels(cursor, &mut pools.frame_types),
        PoolKind::ThreadState => read_labels(cursor, &mut pools.thread_states),
        PoolKind::Other => read_other(cursor, &class.fields, types),
    }
}

fn read_threads(
    cursor: &mut ByteCursor<'_>,
    has_group: bool,
    threads: &mut HashMap<i64, String>,
) -> Result<()> {
    let count = cursor.read_len()?;
    threads.reserve(count);
    for _ in 0..count {
        let id = cursor.read_varint64()?;
        let os_name = cursor.read_string()?;
        // os thread id
        cursor.read_varint64()?;
        let java_name = cursor.read_string()?;
        // java thread id
        cursor.read_varint64()?;
        if has_group {
            cursor.read_varint64()?;
        }
        threads.insert(id, java_name.or(os_name).unwrap_or_default());
    }
    Ok(())
}

fn read_classes(
    cursor: &mut ByteCursor<'_>,
    has_hidden: bool,
    classes: &mut HashMap<i64, i64>,
) -> Result<()> {
    let count = cursor.read_len()?;
    classes.reserve(count);
    for _ in 0..count {
        let id = cursor.read_varint64()?;
        // class loader
        cursor.read_varint64()?;
        let name = cursor.read_varint64()?;
        // package
        cursor.read_varint64()?;
        // modifiers
        cursor.read_varint32()?;
        if has_hidden {
            cursor.read_varint32()?;
        }
        classes.insert(id, name);
    }
    Ok(())
}

fn read_symbols(cursor: &mut ByteCursor<'_>, symbols: &mut HashMap<i64, String>) -> Result<()> {
    let count = cursor.read_len()?;
    symbols.reserve(count);
    for _ in 0..count {
        let id = cursor.read_varint64()?;
        let encoding = cursor.read_i8()?;
        if encoding != STRING_UTF8 {
            return Err(ParseError::InvalidSymbolEncoding {
                symbol_id: id,
                encoding,
            });
        }
        let bytes = cursor.read_bytes()?;
        symbols.insert(id, String::from_utf8_lossy(bytes).into_owned());
    }
    Ok(())
}

fn read_methods(cursor: &mut ByteCursor<'_>, methods: &mut HashMap<i64, MethodRef>) -> Result<()> {
    let count = cursor.read_len()?;
    methods.reserve(count);
    for _ in 0..count {
        let id = cursor.read_varint64()?;
        let class = cursor.read_varint64()?;
        let name = cursor.read_varint64()?;
        let signature = cursor.read_varint64()?;
        // modifiers, hidden
        cursor.read_varint32()?;
        cursor.read_varint32()?;
        methods.insert(
            id,
            MethodRef {
                class,
                name,
                signature,
            },
        );
    }
    Ok(())
}

fn read_stack_traces(
    cursor: &mut ByteCursor<'_>,
    stack_traces: &mut HashMap<i64, StackTrace>,
) -> Result<()> {
    let count = cursor.read_len()?;
    stack_traces.reserve(count);
    for _ in 0..count {
        let id = cursor.read_varint64()?;
        // truncated
        cursor.read_varint32()?;
        stack_traces.insert(id, read_stack_trace(cursor)?);
    }
    Ok(())
}

fn read_stack_trace(cursor: &mut ByteCursor<'_>) -> Result<StackTrace> {
    let depth = cursor.read_len()?;
    let mut methods = Vec::with_capacity(depth);
    let mut frame_types = Vec::with_capacity(depth);
    for _ in 0..depth {
        methods.push(cursor.read_varint64()?);
        // line, bytecode index
        cursor.read_varint32()?;
        cursor.read_varint32()?;
        frame_types.push(cursor.read_i8()?);
    }
    Ok(StackTrace {
        methods,
        frame_types,
        samples: 0,
    })
}

fn read_labels(cursor: &mut ByteCursor<'_>, labels: &mut HashMap<i32, String>) -> Result<()> {
    let count = cursor.read_len()?;
    for _ in 0..count {
        let key = cursor.read_varint32()?;
        labels.insert(key, cursor.read_string()?.unwrap_or_default());
    }
    Ok(())
}

/// Walk a pool the decoder does not keep, using the type's field list.
fn read_other(cursor: &mut ByteCursor<'_>, fields: &[Field], types: &TypeRegistry) -> Result<()> {
    let string_type = types.type_id("java.lang.String");
    let numeric: Vec<bool> = fields
        .iter()
        .map(|f| f.constant_pool || Some(f.type_id) != string_type)
        .collect();

    let count = cursor.read_len()?;
    for _ in 0..count {
        // id
        cursor.read_varint64()?;
        for &is_numeric in &numeric {
            if is_numeric {
                cursor.read_varint64()?;
            } else {
                cursor.read_string()?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::read_metadata;
    use crate::testing::{self, RecordingBuilder, Writer};

    fn decode(builder: &RecordingBuilder) -> Result<ConstantPools> {
        let bytes = builder.build();
        let mut cursor = ByteCursor::new(&bytes);
        let metadata_offset = cursor.read_i64_at(24).unwrap() as usize;
        let pool_offset = cursor.read_i64_at(16).unwrap() as usize;
        let types = read_metadata(&mut cursor, metadata_offset)?;
        read_constant_pools(&mut cursor, pool_offset, &types)
    }

    #[test]
    fn resolves_method_class_symbol_chain() {
        let mut builder = RecordingBuilder::new();
        builder
            .symbols(&[(1, "com/example/Main"), (2, "run"), (3, "()V")])
            .classes(&[(10, 1)])
            .methods(&[(100, 10, 2, 3)])
            .stack_traces(&[(7, &[(100, 1)])]);
        let pools = decode(&builder).unwrap();

        let method = pools.methods[&100];
        assert_eq!(method.signature, 3);
        assert_eq!(pools.method_name(100), Some("run"));
        assert_eq!(pools.class_name(method.class), Some("com/example/Main"));
        assert_eq!(pools.stack_traces[&7].methods, vec![100]);
        assert_eq!(pools.stack_traces[&7].frame_types, vec![1]);
        assert_eq!(pools.stack_traces[&7].samples, 0);
    }

    #[test]
    fn thread_name_prefers_java_name() {
        let mut builder = RecordingBuilder::new();
        builder.threads(&[
            (1, Some("os-main"), Some("main")),
            (2, Some("os-worker"), None),
            (3, None, None),
        ]);
        let pools = decode(&builder).unwrap();

        assert_eq!(pools.thread_name(1), Some("main"));
        assert_eq!(pools.thread_name(2), Some("os-worker"));
        assert_eq!(pools.thread_name(3), Some(""));
    }

    #[test]
    fn thread_group_field_is_consumed_when_declared() {
        let mut builder = RecordingBuilder::new();
        builder.add_field(testing::THREAD, "group", testing::LONG, true);
        let mut w = Writer::new();
        w.varint32(1)
            .varint64(5)
            .string("os")
            .varint64(77)
            .string("worker")
            .varint64(5)
            .varint64(9);
        builder.pool(testing::THREAD, w.buf).symbols(&[(1, "after")]);
        let pools = decode(&builder).unwrap();

        assert_eq!(pools.thread_name(5), Some("worker"));
        assert_eq!(pools.symbol(1), Some("after"));
    }

    #[test]
    fn class_hidden_field_is_consumed_when_declared() {
        let mut builder = RecordingBuilder::new();
        builder.add_field(testing::CLASS, "hidden", testing::INT, false);
        let mut w = Writer::new();
        w.varint32(1)
            .varint64(10)
            .varint64(0)
            .varint64(1)
            .varint64(0)
            .varint32(1)
            .varint32(0);
        builder.pool(testing::CLASS, w.buf).symbols(&[(1, "Hidden")]);
        let pools = decode(&builder).unwrap();

        assert_eq!(pools.class_name(10), Some("Hidden"));
    }

    #[test]
    fn label_maps_are_read() {
        let mut builder = RecordingBuilder::new();
        builder
            .frame_types(&[(0, "Interpreted"), (1, "JIT compiled")])
            .thread_states(&[(3, "STATE_RUNNABLE")]);
        let pools = decode(&builder).unwrap();

        assert_eq!(pools.frame_types[&1], "JIT compiled");
        assert_eq!(pools.thread_states[&3], "STATE_RUNNABLE");
    }

    #[test]
    fn unknown_pool_types_are_walked_by_schema() {
        let mut builder = RecordingBuilder::new();
        let mut w = Writer::new();
        w.varint32(2);
        // name symbol ref, exported int
        w.varint64(1).varint64(300).varint64(1);
        w.varint64(2).varint64(301).varint64(0);
        builder.pool(testing::PACKAGE, w.buf);

        builder.class(
            200,
            "jdk.types.Custom",
            None,
            &[("label", testing::STRING, false), ("value", testing::LONG, false)],
        );
        let mut w = Writer::new();
        w.varint32(1).varint64(1).string("label").varint64(1 << 40);
        builder.pool(200, w.buf).symbols(&[(9, "tail")]);

        let pools = decode(&builder).unwrap();
        assert_eq!(pools.symbol(9), Some("tail"));
    }

    #[test]
    fn chunk_header_pool_is_skipped() {
        let mut builder = RecordingBuilder::new();
        builder.class(300, "jdk.types.ChunkHeader", None, &[]);
        let mut body = vec![0u8; CHUNK_HEADER_SIZE + 3];
        body[0] = 0xff;
        builder.pool(300, body).symbols(&[(1, "next")]);

        let pools = decode(&builder).unwrap();
        assert_eq!(pools.symbol(1), Some("next"));
    }

    #[test]
    fn segments_are_followed_in_either_file_order() {
        for reverse in [false, true] {
            let mut builder = RecordingBuilder::new();
            builder
                .symbols(&[(1, "first")])
                .segment()
                .symbols(&[(2, "second")])
                .segment()
                .methods(&[(5, 0, 1, 2)]);
            if reverse {
                builder.reverse_segments();
            }
            let pools = decode(&builder).unwrap();

            assert_eq!(pools.symbol(1), Some("first"));
            assert_eq!(pools.symbol(2), Some("second"));
            assert_eq!(pools.method_name(5), Some("first"));
        }
    }

    #[test]
    fn segment_cycle_fails_closed() {
        let mut builder = RecordingBuilder::new();
        builder
            .symbols(&[(1, "a")])
            .segment()
            .symbols(&[(2, "b")])
            .loop_segments();

        assert!(matches!(
            decode(&builder),
            Err(ParseError::ConstantPoolCycle { .. })
        ));
    }

    #[test]
    fn invalid_symbol_encoding_is_an_error() {
        let mut builder = RecordingBuilder::new();
        let mut w = Writer::new();
        w.varint32(1).varint64(4).u8(5).bytes(b"abc");
        builder.pool(testing::SYMBOL, w.buf);

        assert!(matches!(
            decode(&builder),
            Err(ParseError::InvalidSymbolEncoding {
                symbol_id: 4,
                encoding: 5
            })
        ));
    }

    #[test]
    fn unregistered_pool_type_is_an_error() {
        let mut builder = RecordingBuilder::new();
        builder.pool(999, vec![0]);

        assert!(matches!(
            decode(&builder),
            Err(ParseError::UnknownConstantPoolType(999))
        ));
    }

    #[test]
    fn event_types_are_not_pool_types() {
        // Event types carry a super type and are never registered by id.
        let mut builder = RecordingBuilder::new();
        builder.pool(testing::EXECUTION_SAMPLE, vec![0]);

        assert!(matches!(
            decode(&builder),
            Err(ParseError::UnknownConstantPoolType(id)) if id == testing::EXECUTION_SAMPLE
        ));
    }

    #[test]
    fn next_segment_rejects_out_of_chunk_targets() {
        assert!(next_segment(100, -90, 500).is_err());
        assert!(next_segment(100, 400, 500).is_err());
        assert_eq!(next_segment(100, 300, 500).unwrap(), 400);
        assert_eq!(next_segment(400, -300, 500).unwrap(), 100);
    }
}
