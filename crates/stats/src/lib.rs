// Copyright 2025-2026 CEMAXECUTER LLC

pub mod ber;
pub mod reference;
pub mod sequence;

use bs_protocol::{DecodeError, EncodingMode};
use serde::{Deserialize, Serialize};

pub use ber::{compute_ber, BerOutcome, BerReport, BitErrorAccumulator, ErrorRecord, ErrorTable};
pub use reference::{ReferenceCache, ReferenceStream};
pub use sequence::{reconstruct, SequenceReconstructor, DEFAULT_REORDER_TOLERANCE};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("frame {frame}: {source}")]
    Decode {
        /// Position of the frame in the input
        frame: usize,
        #[source]
        source: DecodeError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("reference generation cancelled")]
    Cancelled,
}

/// Experiment parameters. Must match the tag firmware the log was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Payload bytes per packet, pseudo-sequence included
    pub packet_len: usize,
    /// Modulus of the receiver's sequence counter
    pub max_seq: u32,
    pub mode: EncodingMode,
    pub reorder_tolerance: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            packet_len: 32,
            max_seq: 256,
            mode: EncodingMode::Raw,
            reorder_tolerance: DEFAULT_REORDER_TOLERANCE,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.packet_len < 4 || self.packet_len % 2 != 0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "packet length must be even and at least 4, got {}",
                self.packet_len
            )));
        }
        if self.max_seq == 0 {
            return Err(AnalysisError::InvalidConfig(
                "sequence modulus must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Bits each expected packet contributes to the BER denominator.
    pub fn bits_per_packet(&self) -> u32 {
        self.mode.max_errors(self.packet_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AnalysisConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bits_per_packet(), 256);
    }

    #[test]
    fn test_config_rejects_odd_packet_len() {
        let cfg = AnalysisConfig {
            packet_len: 31,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AnalysisError::InvalidConfig(_))));
        let cfg = AnalysisConfig {
            max_seq: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
