use jfr_parse::{ChunkHeader, DecodeOptions, parse_recording};
use serde::Serialize;
use std::env;
use std::fs;
use std::process::ExitCode;

#[derive(Serialize)]
struct ChunkSummary<'a> {
    header: &'a ChunkHeader,
    types: usize,
    threads: usize,
    classes: usize,
    symbols: usize,
    methods: usize,
    stack_traces: usize,
    samples: usize,
}

fn main() -> ExitCode {
    env_logger::builder()
        .format_timestamp(None)
        .format_module_path(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let json = args.iter().any(|a| a == "--json");
    let paths: Vec<&String> = args[1..].iter().filter(|a| *a != "--json").collect();

    if paths.len() != 1 {
        eprintln!("Usage: {} [--json] <file.jfr>", args[0]);
        return ExitCode::from(2);
    }

    let path = paths[0];

    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let profiles = match parse_recording(&bytes, &DecodeOptions::default()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid JFR file '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let summaries: Vec<ChunkSummary> = profiles
        .iter()
        .map(|p| ChunkSummary {
            header: &p.header,
            types: p.types.len(),
            threads: p.pools.threads.len(),
            classes: p.pools.classes.len(),
            symbols: p.pools.symbols.len(),
            methods: p.pools.methods.len(),
            stack_traces: p.pools.stack_traces.len(),
            samples: p.samples.len(),
        })
        .collect();

    if json {
        match serde_json::to_string_pretty(&summaries) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Valid JFR file: {}", path);
    println!("  Chunks: {}", summaries.len());
    for (i, s) in summaries.iter().enumerate() {
        println!("  Chunk {}:", i);
        println!("    Format version: {}", s.header.version);
        println!("    Duration: {} ns", s.header.duration_nanos);
        println!("    Types: {}", s.types);
        println!("    Threads: {}", s.threads);
        println!("    Classes: {}", s.classes);
        println!("    Symbols: {}", s.symbols);
        println!("    Methods: {}", s.methods);
        println!("    Stack traces: {}", s.stack_traces);
        println!("    Samples: {}", s.samples);
    }
    ExitCode::SUCCESS
}
