// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bs_protocol::Frame;
use chrono::NaiveTime;
use crossbeam::channel::Sender;

use crate::FrameSource;

// Receiver log line: "HH:MM:SS.ffffff | LL SS PP PP ... | RSSI ..."
const FIELD_SEP: char = '|';
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const OVERFLOW_MARKER: &str = "packet overflow";
/// Sequence byte within the frame field
const SEQ_CHARS: Range<usize> = 3..5;
/// Payload tokens start after "LL SS "
const PAYLOAD_START: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("expected 3 '|' separated fields, got {0}")]
    FieldCount(usize),
    #[error("bad capture time {0:?}")]
    Time(String),
    #[error("frame field too short: {0:?}")]
    ShortFrame(String),
    #[error("bad sequence number {0:?}")]
    Sequence(String),
    #[error("bad rssi {0:?}")]
    Rssi(String),
    #[error("receiver reported packet overflow")]
    Overflow,
}

/// Parse one receiver log line into a frame.
pub fn parse_line(line: &str) -> Result<Frame, ParseError> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() != 3 {
        return Err(ParseError::FieldCount(fields.len()));
    }

    let time = fields[0].trim();
    let capture_time = NaiveTime::parse_from_str(time, TIME_FORMAT)
        .map_err(|_| ParseError::Time(time.to_string()))?;

    let frame = fields[1].trim();
    if frame.contains(OVERFLOW_MARKER) {
        return Err(ParseError::Overflow);
    }
    let seq = frame
        .get(SEQ_CHARS)
        .ok_or_else(|| ParseError::ShortFrame(frame.to_string()))?;
    if !seq.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::Sequence(seq.to_string()));
    }
    let raw_seq = u32::from_str_radix(seq, 16).map_err(|_| ParseError::Sequence(seq.to_string()))?;
    let payload = frame.get(PAYLOAD_START..).unwrap_or("");

    let rssi = fields[2].split_whitespace().next().unwrap_or("");
    let rssi = rssi
        .parse::<i32>()
        .map_err(|_| ParseError::Rssi(rssi.to_string()))?;

    Ok(Frame::new(capture_time, raw_seq, payload, rssi))
}

/// Read every parseable frame. Malformed lines are dropped with a warning.
pub fn read_frames<R: BufRead>(reader: R) -> io::Result<Vec<Frame>> {
    let mut frames = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        if let Some(frame) = accept_line(n + 1, &line?) {
            frames.push(frame);
        }
    }
    Ok(frames)
}

fn accept_line(line_no: usize, line: &str) -> Option<Frame> {
    if line.trim().is_empty() {
        return None;
    }
    match parse_line(line) {
        Ok(frame) => Some(frame),
        Err(ParseError::Overflow) => {
            log::debug!("line {}: packet overflow, dropped", line_no);
            None
        }
        Err(e) => {
            log::warn!("line {}: {}, dropped", line_no, e);
            None
        }
    }
}

/// Receiver log file reader: parses lines and sends them as frames.
pub struct LogFileSource {
    path: PathBuf,
    running: Arc<AtomicBool>,
}

impl LogFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops a running reader when cleared from another thread.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

impl FrameSource for LogFileSource {
    fn start(&mut self, tx: Sender<Frame>) -> Result<(), String> {
        let file = File::open(&self.path)
            .map_err(|e| format!("failed to open {}: {}", self.path.display(), e))?;
        let reader = BufReader::new(file);

        self.running.store(true, Ordering::Relaxed);
        log::info!("reading receiver log {}", self.path.display());

        let mut sent = 0usize;
        for (n, line) in reader.lines().enumerate() {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let line = line.map_err(|e| format!("read error: {}", e))?;
            if let Some(frame) = accept_line(n + 1, &line) {
                if tx.send(frame).is_err() {
                    break; // receiver dropped
                }
                sent += 1;
            }
        }

        log::info!("end of log: {} ({} frames)", self.path.display(), sent);
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const GOOD: &str = "12:30:01.250000 | 20 0A 00 40 13 5D | -62 dBm";

    #[test]
    fn test_parse_good_line() {
        let frame = parse_line(GOOD).unwrap();
        assert_eq!(frame.capture_time, NaiveTime::from_hms_micro_opt(12, 30, 1, 250_000).unwrap());
        assert_eq!(frame.raw_seq, 0x0A);
        assert_eq!(frame.payload, "00 40 13 5D");
        assert_eq!(frame.rssi, -62);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_line("garbage"), Err(ParseError::FieldCount(1)));
        assert!(matches!(
            parse_line("noon | 20 0A 00 | -60"),
            Err(ParseError::Time(_))
        ));
        assert!(matches!(
            parse_line("12:00:00.0 | 20 | -60"),
            Err(ParseError::ShortFrame(_))
        ));
        assert!(matches!(
            parse_line("12:00:00.0 | 20 +1 00 | -60"),
            Err(ParseError::Sequence(_))
        ));
        assert!(matches!(
            parse_line("12:00:00.0 | 20 0A 00 | strong"),
            Err(ParseError::Rssi(_))
        ));
        assert_eq!(
            parse_line("12:00:00.0 | packet overflow | -60"),
            Err(ParseError::Overflow)
        );
    }

    #[test]
    fn test_read_frames_drops_bad_lines() {
        let log = format!(
            "{}\n\nnot a frame\n12:30:01.260000 | packet overflow | 0\n12:30:01.270000 | 20 0B 00 60 1F 43 | -63\n",
            GOOD
        );
        let frames = read_frames(Cursor::new(log)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].raw_seq, 0x0B);
        assert_eq!(frames[1].payload, "00 60 1F 43");
    }

    #[test]
    fn test_file_source_streams_frames() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", GOOD).unwrap();
        writeln!(file, "bad line").unwrap();
        writeln!(file, "12:30:01.270000 | 20 0B 00 60 | -63").unwrap();
        file.flush().unwrap();

        let (tx, rx) = crossbeam::channel::unbounded();
        let mut source = LogFileSource::new(file.path());
        source.start(tx).unwrap();
        let frames: Vec<Frame> = rx.iter().collect();
        assert_eq!(frames.len(), 2);
        assert!(!source.running_flag().load(Ordering::Relaxed));
    }

    #[test]
    fn test_file_source_missing_file() {
        let (tx, _rx) = crossbeam::channel::unbounded();
        let mut source = LogFileSource::new("/nonexistent/receiver.log");
        assert!(source.start(tx).unwrap_err().contains("failed to open"));
    }
}
