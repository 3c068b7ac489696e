pub mod report;

pub use report::{capture_span, write_report, Report, Summary, REFERENCE_SUMMARY};
