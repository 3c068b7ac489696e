use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crossbeam::channel;

use bs_output::{write_report, Report};
use bs_protocol::Frame;
use bs_source::{FrameSource, LogFileSource};
use bs_stats::{AnalysisConfig, BerOutcome, BitErrorAccumulator, ReferenceCache};

pub struct RunOptions<'a> {
    pub distance_m: f64,
    /// Write the report here instead of stdout
    pub report_path: Option<&'a Path>,
    pub include_errors: bool,
    pub print_stats: bool,
}

/// Run the full pipeline from receiver log to JSON report.
pub fn run_file(log_path: &Path, config: AnalysisConfig, options: &RunOptions<'_>) -> Result<(), String> {
    let start = Instant::now();
    let mut source = LogFileSource::new(log_path);
    let (tx, rx) = channel::bounded(1024);

    // Log reader in a separate thread
    let reader_thread = std::thread::spawn(move || source.start(tx));

    let frames: Vec<Frame> = rx.iter().collect();
    reader_thread
        .join()
        .map_err(|_| "log reader thread panicked".to_string())??;

    let cache = ReferenceCache::new();
    let outcome = analyze(&frames, config, &cache)?;

    if options.print_stats {
        print_stats(&outcome, start.elapsed().as_secs_f64());
    }

    let report = Report::new(&config, &outcome, &frames, options.distance_m, options.include_errors);
    match options.report_path {
        Some(path) => {
            let file = File::create(path).map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
            let mut writer = BufWriter::new(file);
            write_report(&mut writer, &report)?;
            writer.flush().map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
            log::info!("report written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            write_report(&mut writer, &report)?;
            writeln!(writer).map_err(|e| format!("failed to write report: {}", e))?;
        }
    }

    Ok(())
}

/// Compute link metrics for an already collected frame list.
pub fn analyze(frames: &[Frame], config: AnalysisConfig, cache: &ReferenceCache) -> Result<BerOutcome, String> {
    let outcome = BitErrorAccumulator::new(config, cache)
        .compute(frames)
        .map_err(|e| e.to_string())?;
    if let BerOutcome::NoData = outcome {
        log::warn!("no frames received, BER and ETX undefined");
    }
    Ok(outcome)
}

fn print_stats(outcome: &BerOutcome, elapsed: f64) {
    match outcome.report() {
        Some(run) => eprintln!(
            "done ({:.1}s): frames: {} sent: {} lost: {} BER: {:.6} ETX: {:.3}",
            elapsed,
            run.frames_received,
            run.packets_transmitted,
            run.table.lost(),
            run.ber,
            run.etx,
        ),
        None => eprintln!("done ({:.1}s): no frames", elapsed),
    }
}
