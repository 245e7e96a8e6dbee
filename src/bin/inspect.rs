//! segwal Inspector
//!
//! Read-only tooling for a WAL directory: list segments, dump records,
//! and classify transactions without replaying anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use segwal::wal::{
    list_segments, segment_path, CheckpointInfo, RecordType, ScanEnd, SegmentReader, WalRecovery,
};
use segwal::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// segwal inspector
#[derive(Parser, Debug)]
#[command(name = "segwal-inspect")]
#[command(about = "Inspect a segwal write-ahead log directory")]
#[command(version)]
struct Args {
    /// WAL directory
    #[arg(short, long, default_value = "./segwal_data")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List segment files
    Segments,

    /// Print every valid record
    Dump {
        /// Only dump this segment
        #[arg(short, long)]
        segment: Option<u32>,

        /// Print payloads as lossy UTF-8
        #[arg(short, long)]
        payloads: bool,
    },

    /// Classify transactions from the resumption point, applying nothing
    Verify,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,segwal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("segwal-inspect v{}", segwal::VERSION);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Segments => segments(&args.dir),
        Command::Dump { segment, payloads } => dump(&args.dir, *segment, *payloads),
        Command::Verify => verify(&args.dir),
    }
}

fn segments(dir: &Path) -> Result<()> {
    for number in list_segments(dir)? {
        let path = segment_path(dir, number);
        let len = fs::metadata(&path)?.len();
        println!("{:>10}  {:>12} bytes  {}", number, len, path.display());
    }
    Ok(())
}

fn dump(dir: &Path, only: Option<u32>, payloads: bool) -> Result<()> {
    let numbers: Vec<u32> = list_segments(dir)?
        .into_iter()
        .filter(|n| only.map_or(true, |o| o == *n))
        .collect();

    for number in numbers {
        let mut reader = SegmentReader::open(dir, number)?;
        while let Some((location, record)) = reader.next_record()? {
            let header = &record.header;
            print!(
                "{:<14} {:<12} xid={:<8} prev={:<14} len={}",
                location.to_string(),
                header.record_type.name(),
                header.xid,
                header.prev_location.to_string(),
                header.data_len
            );
            if header.record_type == RecordType::Checkpoint {
                match CheckpointInfo::decode(&record.payload) {
                    Ok(info) if info.is_quiescent() => print!(" quiescent"),
                    Ok(info) => print!(" in_flight={:?}", info.in_flight),
                    Err(e) => print!(" undecodable ({})", e),
                }
            } else if payloads && !record.payload.is_empty() {
                print!(" {:?}", String::from_utf8_lossy(&record.payload));
            }
            println!();
        }
        if let Some(ScanEnd::Torn { location, cause }) = reader.stop_reason() {
            println!("{:<14} TORN         {}", location.to_string(), cause);
        }
    }
    Ok(())
}

fn verify(dir: &Path) -> Result<()> {
    let stats = WalRecovery::new(dir).verify()?;
    println!("resume location:        {}", stats.resume_location);
    println!("end location:           {}", stats.end_location);
    println!("segments processed:     {}", stats.segments_processed);
    println!("records processed:      {}", stats.records_processed);
    println!("bytes processed:        {}", stats.bytes_processed);
    println!("torn segments:          {}", stats.corrupt_records);
    println!("committed transactions: {}", stats.committed_transactions);
    println!("aborted transactions:   {}", stats.aborted_transactions);
    println!("incomplete transactions:{}", stats.incomplete_transactions);
    Ok(())
}
