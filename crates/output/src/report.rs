// Copyright 2025-2026 CEMAXECUTER LLC

use std::io::Write;

use bs_protocol::Frame;
use bs_stats::{AnalysisConfig, BerOutcome, ErrorRecord};
use chrono::NaiveTime;
use serde::Serialize;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Headline metrics of one experiment: how long, how reliable, how far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    /// Seconds between the first and last received frame
    pub time_s: f64,
    /// Share of transmitted packets that were received, in percent
    pub reliability_pct: f64,
    /// Tag to receiver distance of the run
    pub distance_m: f64,
}

/// Baseline system the radar comparison is drawn against.
pub const REFERENCE_SUMMARY: Summary = Summary {
    time_s: 62.321888,
    reliability_pct: 0.201875 * 100.0,
    distance_m: 39.956474923886844,
};

impl Summary {
    pub fn from_run(frames: &[Frame], etx: f64, distance_m: f64) -> Self {
        let time_s = match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => capture_span(first.capture_time, last.capture_time),
            _ => 0.0,
        };
        let reliability_pct = if etx > 0.0 { 100.0 / etx } else { 0.0 };
        Self {
            time_s,
            reliability_pct,
            distance_m,
        }
    }

    /// Per-metric ratio (time, reliability, distance) against `reference`.
    pub fn relative_to(&self, reference: &Summary) -> [f64; 3] {
        [
            self.time_s / reference.time_s,
            self.reliability_pct / reference.reliability_pct,
            self.distance_m / reference.distance_m,
        ]
    }
}

/// Seconds from `first` to `last`, assuming at most one midnight rollover.
pub fn capture_span(first: NaiveTime, last: NaiveTime) -> f64 {
    let micros = (last - first).num_microseconds().unwrap_or(0);
    let secs = micros as f64 / 1e6;
    if secs < 0.0 {
        secs + SECONDS_PER_DAY
    } else {
        secs
    }
}

/// JSON report of one analysis run.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub config: &'a AnalysisConfig,
    pub status: &'static str,
    pub frames_received: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ber: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_transmitted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_errors: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lost_packets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<&'a [ErrorRecord]>,
}

impl<'a> Report<'a> {
    pub fn new(
        config: &'a AnalysisConfig,
        outcome: &'a BerOutcome,
        frames: &[Frame],
        distance_m: f64,
        include_errors: bool,
    ) -> Self {
        let mut report = Report {
            config,
            status: "no_data",
            frames_received: frames.len(),
            ber: None,
            etx: None,
            packets_transmitted: None,
            bit_errors: None,
            lost_packets: None,
            summary: None,
            errors: None,
        };
        if let Some(run) = outcome.report() {
            report.status = "measured";
            report.ber = Some(run.ber);
            report.etx = Some(run.etx);
            report.packets_transmitted = Some(run.packets_transmitted);
            report.bit_errors = Some(run.bit_errors);
            report.lost_packets = Some(run.table.lost());
            report.summary = Some(Summary::from_run(frames, run.etx, distance_m));
            if include_errors {
                report.errors = Some(run.table.records());
            }
        }
        report
    }
}

pub fn write_report<W: Write>(writer: W, report: &Report<'_>) -> Result<(), String> {
    serde_json::to_writer_pretty(writer, report).map_err(|e| format!("failed to write report: {}", e))
}
