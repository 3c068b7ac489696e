// Copyright 2025-2026 CEMAXECUTER LLC

pub mod fec;
pub mod payload;

use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

pub use payload::{decode, decode_packet, DecodeError, DecodedPacket};

/// Payload encoding used by the tag. Must match the transmitter firmware build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Plain bytes, no coding
    #[default]
    Raw,
    /// 3:1 bit repetition, majority vote
    Ecc,
    /// One nibble per packet on an order-4 Walsh codeword
    Fec,
}

impl EncodingMode {
    /// Bits counted against a packet that was never received.
    pub fn max_errors(self, packet_len: usize) -> u32 {
        match self {
            EncodingMode::Raw | EncodingMode::Ecc => (packet_len * 8) as u32,
            EncodingMode::Fec => fec::DATA_BITS,
        }
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncodingMode::Raw => "raw",
            EncodingMode::Ecc => "ecc",
            EncodingMode::Fec => "fec",
        };
        f.write_str(name)
    }
}

impl FromStr for EncodingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(EncodingMode::Raw),
            "ecc" => Ok(EncodingMode::Ecc),
            "fec" => Ok(EncodingMode::Fec),
            other => Err(format!("unknown encoding mode: {} (use raw, ecc, or fec)", other)),
        }
    }
}

/// One packet as reported by the receiver log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub capture_time: NaiveTime,
    /// Outer link-layer sequence counter, wraps at the configured modulus
    pub raw_seq: u32,
    /// Whitespace separated hex byte tokens
    pub payload: String,
    pub rssi: i32,
}

impl Frame {
    pub fn new(capture_time: NaiveTime, raw_seq: u32, payload: impl Into<String>, rssi: i32) -> Self {
        Self {
            capture_time,
            raw_seq,
            payload: payload.into(),
            rssi,
        }
    }
}
