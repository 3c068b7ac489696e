mod pipeline;

use bs_protocol::EncodingMode;
use bs_stats::{AnalysisConfig, DEFAULT_REORDER_TOLERANCE};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "backscatter-eval")]
#[command(about = "Bit error rate and ETX of a backscatter link from receiver logs")]
struct Cli {
    /// Receiver log file
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Payload encoding used by the tag: raw, ecc, fec
    #[arg(short = 'm', long, default_value = "raw")]
    mode: String,

    /// Payload bytes per packet
    #[arg(short = 'p', long, default_value = "32")]
    packet_len: usize,

    /// Modulus of the receiver's sequence counter
    #[arg(long, default_value = "256")]
    max_seq: u32,

    /// Tag to receiver distance in meters
    #[arg(short = 'd', long, default_value = "0")]
    distance: f64,

    /// JSON report output file (stdout if omitted)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Include the per-packet error table in the report
    #[arg(long)]
    errors: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mode = match cli.mode.parse::<EncodingMode>() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let config = AnalysisConfig {
        packet_len: cli.packet_len,
        max_seq: cli.max_seq,
        mode,
        reorder_tolerance: DEFAULT_REORDER_TOLERANCE,
    };

    if cli.verbose {
        log::info!("backscatter-eval starting");
        log::info!("mode: {}", config.mode);
        log::info!("packet length: {} bytes, sequence modulus: {}", config.packet_len, config.max_seq);
    }

    if let Some(ref file) = cli.file {
        let options = pipeline::RunOptions {
            distance_m: cli.distance,
            report_path: cli.output.as_deref(),
            include_errors: cli.errors,
            print_stats: cli.stats,
        };
        if let Err(e) = pipeline::run_file(file, config, &options) {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    } else {
        eprintln!("no input specified. Use -f <file> to analyze a receiver log.");
        std::process::exit(1);
    }
}
