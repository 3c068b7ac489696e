// Copyright 2025-2026 CEMAXECUTER LLC

/// Walsh/Hadamard forward error correction for the tag's FEC mode.
///
/// Every FEC packet carries one 4-bit slice of a reference sample, spread onto
/// an order-4 Walsh codeword (16 bits). Minimum distance between codewords is 8,
/// so up to 3 flipped bits are always corrected.
///
/// Block layout after the 2-byte pseudo-sequence, MSB first:
///   [6 pad bits][2 bit sample position][16 bit codeword]
use crate::payload::DecodeError;

/// Pad bits at the start of a block.
pub const HEADER_BITS: usize = 6;
/// Width of the sample position field (0-3).
pub const POSITION_BITS: usize = 2;
/// Walsh codeword length.
pub const CODEWORD_BITS: u32 = 16;
/// Data bits recovered per packet.
pub const DATA_BITS: u32 = 4;
/// Bytes in one encoded block.
pub const BLOCK_LEN: usize = (HEADER_BITS + POSITION_BITS + CODEWORD_BITS as usize) / 8;

/// Codewords indexed by the 4-bit pattern they carry.
/// This order is the transmitter's encoder table. Do not reorder.
pub const WALSH_CODES: [u16; 16] = [
    0x0000, // 0000
    0x5555, // 0001
    0x3333, // 0010
    0x6666, // 0011
    0x0F0F, // 0100
    0x5A5A, // 0101
    0x3C3C, // 0110
    0x6969, // 0111
    0x00FF, // 1000
    0x55AA, // 1001
    0x33CC, // 1010
    0x6699, // 1011
    0x0FF0, // 1100
    0x5AA5, // 1101
    0x3CC3, // 1110
    0x6996, // 1111
];

/// Correlation of two hard-decision words: number of agreeing bits.
#[inline]
pub fn correlate(received: u16, codeword: u16) -> u32 {
    CODEWORD_BITS - (received ^ codeword).count_ones()
}

/// Maximum-correlation decode. Returns (pattern, correlation).
/// Ties go to the lowest table index.
pub fn walsh_decode(received: u16) -> (u8, u32) {
    let mut best = 0u8;
    let mut best_score = correlate(received, WALSH_CODES[0]);
    for (pattern, &code) in WALSH_CODES.iter().enumerate().skip(1) {
        let score = correlate(received, code);
        if score > best_score {
            best_score = score;
            best = pattern as u8;
        }
    }
    (best, best_score)
}

/// Decode one FEC block into a symbol byte: bits [5:4] sample position, bits [3:0] data.
/// Bytes past the block are ignored.
pub fn decode_block(block: &[u8]) -> Result<u8, DecodeError> {
    if block.len() < BLOCK_LEN {
        return Err(DecodeError::Truncated {
            needed: BLOCK_LEN,
            got: block.len(),
        });
    }
    let position = block[0] & ((1 << POSITION_BITS) - 1);
    let received = u16::from_be_bytes([block[1], block[2]]);
    let (pattern, _) = walsh_decode(received);
    Ok((position << 4) | pattern)
}

/// Split a decoded symbol into (sample position, data nibble).
#[inline]
pub fn split_symbol(symbol: u8) -> (u8, u8) {
    ((symbol >> 4) & 0x03, symbol & 0x0F)
}
