// Copyright 2025-2026 CEMAXECUTER LLC

//! Payload decoding for the three tag encodings.

use crate::fec;
use crate::EncodingMode;

/// Bytes of pseudo-sequence at the start of every payload.
pub const PSEUDO_SEQ_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid hex token {token:?} at position {position}")]
    InvalidToken { position: usize, token: String },
    #[error("ECC payload decodes to {bits} bits, not a whole number of bytes")]
    EccLength { bits: usize },
    #[error("payload too short: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

/// A payload split into its pseudo-sequence header and decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// Position of this packet in the reference stream, written by the tag
    pub pseudo_seq: u16,
    /// Decoded data after the header. One symbol byte for FEC.
    pub body: Vec<u8>,
}

fn parse_token(token: &str) -> Option<u8> {
    if token.is_empty() || token.len() > 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}

/// Parse whitespace separated hex byte tokens.
pub fn parse_hex(payload: &str) -> Result<Vec<u8>, DecodeError> {
    payload
        .split_whitespace()
        .enumerate()
        .map(|(position, token)| {
            parse_token(token).ok_or_else(|| DecodeError::InvalidToken {
                position,
                token: token.to_string(),
            })
        })
        .collect()
}

/// Majority vote over one repetition triple.
#[inline]
pub fn majority3(bits: [u8; 3]) -> u8 {
    let ones = bits.iter().filter(|&&b| b & 1 == 1).count();
    (ones >= 2) as u8
}

/// Undo the 3:1 repetition code.
///
/// The encoded length must be a multiple of 3 bytes (24 coded bits per output byte).
pub fn decode_ecc(encoded: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let bits: Vec<u8> = encoded
        .iter()
        .flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1))
        .collect();

    let decoded_bits = bits.len().div_ceil(3);
    if decoded_bits % 8 != 0 {
        return Err(DecodeError::EccLength { bits: decoded_bits });
    }

    let decoded: Vec<u8> = bits
        .chunks_exact(3)
        .map(|t| majority3([t[0], t[1], t[2]]))
        .collect();

    Ok(decoded
        .chunks_exact(8)
        .map(|byte| byte.iter().fold(0u8, |acc, &b| (acc << 1) | b))
        .collect())
}

/// Decode a full payload under `mode`.
///
/// RAW and ECC return every decoded byte including the pseudo-sequence header.
/// FEC returns exactly one symbol byte; the 2 plain header bytes are skipped.
pub fn decode(payload: &str, mode: EncodingMode) -> Result<Vec<u8>, DecodeError> {
    let bytes = parse_hex(payload)?;
    match mode {
        EncodingMode::Raw => Ok(bytes),
        EncodingMode::Ecc => decode_ecc(&bytes),
        EncodingMode::Fec => {
            let block = bytes.get(PSEUDO_SEQ_LEN..).unwrap_or(&[]);
            match fec::decode_block(block) {
                Ok(symbol) => Ok(vec![symbol]),
                Err(DecodeError::Truncated { needed, got }) => Err(DecodeError::Truncated {
                    needed: needed + PSEUDO_SEQ_LEN,
                    got: got + bytes.len().min(PSEUDO_SEQ_LEN),
                }),
                Err(e) => Err(e),
            }
        }
    }
}

/// Decode a payload and split off its pseudo-sequence.
///
/// Under FEC the pseudo-sequence travels uncoded ahead of the Walsh block, so it
/// is read from the plain bytes rather than from the decoded symbol.
pub fn decode_packet(payload: &str, mode: EncodingMode) -> Result<DecodedPacket, DecodeError> {
    match mode {
        EncodingMode::Raw | EncodingMode::Ecc => {
            let mut decoded = decode(payload, mode)?;
            if decoded.len() < PSEUDO_SEQ_LEN {
                return Err(DecodeError::Truncated {
                    needed: PSEUDO_SEQ_LEN,
                    got: decoded.len(),
                });
            }
            let pseudo_seq = u16::from_be_bytes([decoded[0], decoded[1]]);
            let body = decoded.split_off(PSEUDO_SEQ_LEN);
            Ok(DecodedPacket { pseudo_seq, body })
        }
        EncodingMode::Fec => {
            let body = decode(payload, mode)?;
            let bytes = parse_hex(payload)?;
            let pseudo_seq = u16::from_be_bytes([bytes[0], bytes[1]]);
            Ok(DecodedPacket { pseudo_seq, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
    }

    /// 3:1 repetition encoder matching the tag firmware
    fn ecc_encode(data: &[u8]) -> Vec<u8> {
        let bits: Vec<u8> = data
            .iter()
            .flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1))
            .flat_map(|bit| [bit, bit, bit])
            .collect();
        bits.chunks(8)
            .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b))
            .collect()
    }

    #[test]
    fn test_raw_all_byte_values() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&to_hex(&all), EncodingMode::Raw).unwrap(), all);
    }

    #[test]
    fn test_raw_lowercase_and_extra_whitespace() {
        assert_eq!(
            decode("  0a\tff  1 ", EncodingMode::Raw).unwrap(),
            vec![0x0A, 0xFF, 0x01]
        );
    }

    #[test]
    fn test_invalid_token_reports_position() {
        let err = decode("00 11 zz 33", EncodingMode::Raw).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidToken {
                position: 2,
                token: "zz".to_string()
            }
        );
        assert!(matches!(
            parse_hex("100"),
            Err(DecodeError::InvalidToken { position: 0, .. })
        ));
        assert!(parse_hex("+1").is_err());
    }

    #[test]
    fn test_majority_truth_table() {
        let expected = [0, 0, 0, 1, 0, 1, 1, 1];
        for (v, &want) in expected.iter().enumerate() {
            let triple = [(v >> 2) as u8 & 1, (v >> 1) as u8 & 1, v as u8 & 1];
            assert_eq!(majority3(triple), want, "triple {:03b}", v);
        }
    }

    #[test]
    fn test_ecc_roundtrip_with_one_error_per_triple() {
        let data = [0xA5, 0x3C, 0xFF, 0x00];
        let mut coded = ecc_encode(&data);
        assert_eq!(coded.len(), 12);
        // flip the first bit of every byte; at most one per triple
        for b in coded.iter_mut().step_by(3) {
            *b ^= 0x80;
        }
        assert_eq!(decode(&to_hex(&coded), EncodingMode::Ecc).unwrap(), data);
    }

    #[test]
    fn test_ecc_rejects_partial_length() {
        assert_eq!(
            decode("FF FF", EncodingMode::Ecc),
            Err(DecodeError::EccLength { bits: 6 })
        );
        assert_eq!(
            decode("FF FF FF FF", EncodingMode::Ecc),
            Err(DecodeError::EccLength { bits: 11 })
        );
    }

    #[test]
    fn test_fec_decodes_one_symbol() {
        let code = fec::WALSH_CODES[6].to_be_bytes();
        let payload = to_hex(&[0x00, 0x0C, 0x03, code[0], code[1]]);
        assert_eq!(decode(&payload, EncodingMode::Fec).unwrap(), vec![0x36]);
    }

    #[test]
    fn test_fec_truncated_counts_header() {
        assert_eq!(
            decode("00 01 02", EncodingMode::Fec),
            Err(DecodeError::Truncated { needed: 5, got: 3 })
        );
        assert_eq!(
            decode("00", EncodingMode::Fec),
            Err(DecodeError::Truncated { needed: 5, got: 1 })
        );
    }

    #[test]
    fn test_packet_header_split() {
        let pkt = decode_packet("01 20 AA BB", EncodingMode::Raw).unwrap();
        assert_eq!(pkt.pseudo_seq, 0x0120);
        assert_eq!(pkt.body, vec![0xAA, 0xBB]);

        let coded = ecc_encode(&[0x00, 0x40, 0x7E]);
        let pkt = decode_packet(&to_hex(&coded), EncodingMode::Ecc).unwrap();
        assert_eq!(pkt.pseudo_seq, 0x0040);
        assert_eq!(pkt.body, vec![0x7E]);

        let code = fec::WALSH_CODES[1].to_be_bytes();
        let pkt = decode_packet(&to_hex(&[0x00, 0x83, 0x01, code[0], code[1]]), EncodingMode::Fec)
            .unwrap();
        assert_eq!(pkt.pseudo_seq, 0x0083);
        assert_eq!(pkt.body, vec![0x11]);
    }

    #[test]
    fn test_packet_too_short_for_header() {
        assert_eq!(
            decode_packet("07", EncodingMode::Raw),
            Err(DecodeError::Truncated { needed: 2, got: 1 })
        );
    }
}
