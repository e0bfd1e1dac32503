//! Convert a JFR recording into newline-delimited profile records.
//!
//! Input may be a plain, gzip or zstd compressed `.jfr` file. Only CPU
//! samples (`jdk.ExecutionSample` and `jdk.NativeMethodSample`) are exported.
//!
//! # Usage
//!
//! ```bash
//! jfr_to_ndjson recording.jfr -o profile.ndjson
//! jfr_to_ndjson recording.jfr.gz --service-name checkout --data-streams
//! RUST_LOG=debug jfr_to_ndjson recording.jfr
//! ```

use clap::Parser;
use jfr_export::{ExportConfig, JfrConverter};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "jfr_to_ndjson")]
#[command(about = "Convert JFR CPU samples to newline-delimited JSON profile records")]
#[command(version)]
struct Args {
    /// Input JFR recording, optionally gzip or zstd compressed
    input: PathBuf,

    /// Output file (defaults to input filename with .ndjson extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Service name used to tag records
    #[arg(long, default_value = "unknown")]
    service_name: String,

    /// Add data stream type and dataset fields to every record
    #[arg(long)]
    data_streams: bool,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = args.output.unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension("ndjson");
        path
    });

    let input_file = File::open(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;

    let mut converter = JfrConverter::with_config(ExportConfig {
        service_name: args.service_name,
        data_streams: args.data_streams,
    });
    converter.parse(BufReader::new(input_file))?;

    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let mut writer = BufWriter::new(output_file);
    converter.write_ndjson(&mut writer)?;
    writer.flush()?;

    eprintln!(
        "Converted '{}' -> '{}' ({} samples in {} records)",
        args.input.display(),
        output_path.display(),
        converter.sample_count(),
        converter.records().len()
    );

    Ok(())
}

fn main() -> ExitCode {
    env_logger::builder()
        .format_timestamp(None)
        .format_module_path(false)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
