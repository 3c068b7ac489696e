// Copyright 2025-2026 CEMAXECUTER LLC

//! Bit error accounting of received frames against the reference stream.
//!
//! Frames are folded in receive order. The fold carries the reference stream
//! (grown on demand), the last pseudo-sequence that aligned with it, and one
//! error record per expected packet index.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bs_protocol::{decode_packet, fec, EncodingMode, Frame};
use serde::Serialize;

use crate::reference::{ReferenceCache, ReferenceStream};
use crate::sequence::reconstruct;
use crate::{AnalysisConfig, AnalysisError};

/// FEC spreads one reference sample over this many packets.
const FEC_PACKETS_PER_SAMPLE: u64 = 4;

/// Bit errors observed for one expected packet index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub index: u64,
    /// One entry per received copy
    pub candidates: Vec<u32>,
    /// Set by [`ErrorTable::finalize`]
    pub bit_errors: Option<u32>,
}

impl ErrorRecord {
    fn new(index: u64) -> Self {
        Self {
            index,
            candidates: Vec::new(),
            bit_errors: None,
        }
    }

    /// No copy of this packet was received.
    pub fn is_lost(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Contiguous error records, one per index from the first frame to the last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorTable {
    first: u64,
    records: Vec<ErrorRecord>,
}

impl ErrorTable {
    /// Records for every index in `first..=last`. A `last` before `first`
    /// yields the single record for `first`.
    pub fn new(first: u64, last: u64) -> Self {
        let records = (first..=last.max(first)).map(ErrorRecord::new).collect();
        Self { first, records }
    }

    /// Add a received copy's bit errors. Returns false if `index` has no record.
    pub fn record(&mut self, index: u64, bit_errors: u32) -> bool {
        match self.get_mut(index) {
            Some(rec) => {
                rec.candidates.push(bit_errors);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: u64) -> Option<&ErrorRecord> {
        let offset = usize::try_from(index.checked_sub(self.first)?).ok()?;
        self.records.get(offset)
    }

    fn get_mut(&mut self, index: u64) -> Option<&mut ErrorRecord> {
        let offset = usize::try_from(index.checked_sub(self.first)?).ok()?;
        self.records.get_mut(offset)
    }

    /// Settle every record: best received copy, or `max_errors` when lost.
    /// Returns the summed bit errors.
    pub fn finalize(&mut self, max_errors: u32) -> u64 {
        self.records
            .iter_mut()
            .map(|rec| {
                let errors = rec.candidates.iter().copied().min().unwrap_or(max_errors);
                rec.bit_errors = Some(errors);
                errors as u64
            })
            .sum()
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Indices with no received copy.
    pub fn lost(&self) -> usize {
        self.records.iter().filter(|r| r.is_lost()).count()
    }
}

/// Link quality of one experiment run.
#[derive(Debug, Clone)]
pub struct BerReport {
    /// Bit error rate in [0, 1]
    pub ber: f64,
    /// Expected transmissions per delivered packet
    pub etx: f64,
    pub frames_received: usize,
    pub packets_transmitted: u64,
    pub bit_errors: u64,
    pub bits_expected: u64,
    pub table: ErrorTable,
}

#[derive(Debug, Clone)]
pub enum BerOutcome {
    Measured(BerReport),
    /// No frames were received; BER and ETX are undefined.
    NoData,
}

impl BerOutcome {
    pub fn report(&self) -> Option<&BerReport> {
        match self {
            BerOutcome::Measured(report) => Some(report),
            BerOutcome::NoData => None,
        }
    }
}

/// Reference position named by a pseudo-sequence.
#[inline]
pub fn reference_index(pseudo_seq: u64, mode: EncodingMode) -> u64 {
    match mode {
        EncodingMode::Raw | EncodingMode::Ecc => pseudo_seq,
        EncodingMode::Fec => pseudo_seq / FEC_PACKETS_PER_SAMPLE,
    }
}

fn lookup(stream: &ReferenceStream, mode: EncodingMode, index: u64) -> Option<&[u8]> {
    match mode {
        EncodingMode::Raw | EncodingMode::Ecc => stream.row(index),
        EncodingMode::Fec => stream.sample_pair(index),
    }
}

/// Bit errors of one decoded body against its reference bytes.
///
/// RAW/ECC compare byte-wise up to the shorter input (at most `packet_len` body
/// bytes). FEC compares the decoded nibble with the nibble its sample position
/// selects: positions 0-1 read the high byte, 2-3 the low byte, odd positions
/// the upper nibble.
pub fn bit_errors(body: &[u8], reference: &[u8], mode: EncodingMode, packet_len: usize) -> u32 {
    match mode {
        EncodingMode::Raw | EncodingMode::Ecc => body
            .iter()
            .take(packet_len)
            .zip(reference)
            .map(|(rx, tx)| (rx ^ tx).count_ones())
            .sum(),
        EncodingMode::Fec => {
            let Some(&symbol) = body.first() else {
                return fec::DATA_BITS;
            };
            let (position, data) = fec::split_symbol(symbol);
            let byte = if position < 2 { reference.first() } else { reference.get(1) };
            let Some(&byte) = byte else {
                return fec::DATA_BITS;
            };
            let shift = if position % 2 == 1 { 4 } else { 0 };
            (((byte >> shift) & 0x0F) ^ data).count_ones()
        }
    }
}

struct FoldState {
    stream: Arc<ReferenceStream>,
    /// Last pseudo-sequence that aligned with the reference
    last_pseudo: u64,
    table: ErrorTable,
}

/// Computes BER and ETX of a captured frame sequence.
///
/// The reference cache is borrowed so repeated runs with the same packet
/// length reuse generated data.
pub struct BitErrorAccumulator<'a> {
    config: AnalysisConfig,
    cache: &'a ReferenceCache,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> BitErrorAccumulator<'a> {
    pub fn new(config: AnalysisConfig, cache: &'a ReferenceCache) -> Self {
        Self {
            config,
            cache,
            cancel: None,
        }
    }

    /// Abort reference generation when `cancel` is raised.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn compute(&self, frames: &[Frame]) -> Result<BerOutcome, AnalysisError> {
        self.config.validate()?;

        let indexed = reconstruct(frames, self.config.max_seq, self.config.reorder_tolerance);
        let (Some(&(_, first)), Some(&(_, last))) = (indexed.first(), indexed.last()) else {
            return Ok(BerOutcome::NoData);
        };

        let packets_transmitted = last + 1;
        let samples_per_packet = (self.config.packet_len / 2) as u64;
        let stream = self.reference(packets_transmitted.saturating_mul(samples_per_packet))?;

        let init = FoldState {
            stream,
            last_pseudo: 0,
            table: ErrorTable::new(first, last),
        };
        let mut state = indexed
            .iter()
            .enumerate()
            .try_fold(init, |state, (pos, &(frame, index))| {
                self.step(state, pos, frame, index)
            })?;

        let bits_per_packet = self.config.bits_per_packet();
        let bit_errors = state.table.finalize(bits_per_packet);
        let bits_expected = state.table.len() as u64 * bits_per_packet as u64;

        log::info!(
            "{} frames over {} indices ({} lost), {} of {} bits in error",
            frames.len(),
            state.table.len(),
            state.table.lost(),
            bit_errors,
            bits_expected
        );

        Ok(BerOutcome::Measured(BerReport {
            ber: bit_errors as f64 / bits_expected as f64,
            etx: packets_transmitted as f64 / frames.len() as f64,
            frames_received: frames.len(),
            packets_transmitted,
            bit_errors,
            bits_expected,
            table: state.table,
        }))
    }

    fn reference(&self, samples: u64) -> Result<Arc<ReferenceStream>, AnalysisError> {
        let samples = usize::try_from(samples).map_err(|_| {
            AnalysisError::InvalidConfig(format!("{} reference samples exceed memory", samples))
        })?;
        let never = AtomicBool::new(false);
        let cancel = self.cancel.unwrap_or(&never);
        self.cache.get_or_generate(self.config.packet_len, samples, cancel)
    }

    /// Samples needed for `index` to resolve, or None if it never can.
    fn samples_to_cover(&self, index: u64) -> Option<u64> {
        let packet_len = self.config.packet_len as u64;
        match self.config.mode {
            EncodingMode::Raw | EncodingMode::Ecc if index % packet_len == 0 => {
                Some((index / packet_len + 1) * (packet_len / 2))
            }
            EncodingMode::Raw | EncodingMode::Ecc => None,
            EncodingMode::Fec => Some(index + 1),
        }
    }

    fn step(
        &self,
        mut state: FoldState,
        pos: usize,
        frame: &Frame,
        index: u64,
    ) -> Result<FoldState, AnalysisError> {
        if state.table.get(index).is_none() {
            log::debug!("frame {}: index {} outside the expected range, skipped", pos, index);
            return Ok(state);
        }

        let mode = self.config.mode;
        let packet_len = self.config.packet_len;
        let packet = decode_packet(&frame.payload, mode)
            .map_err(|source| AnalysisError::Decode { frame: pos, source })?;

        let mut pseudo = packet.pseudo_seq as u64;
        let mut ref_index = reference_index(pseudo, mode);

        if lookup(&state.stream, mode, ref_index).is_none() {
            // FEC only moves to the next sample once a full cycle of positions went by
            let advance = match mode {
                EncodingMode::Raw | EncodingMode::Ecc => true,
                EncodingMode::Fec => state.last_pseudo % FEC_PACKETS_PER_SAMPLE == 3,
            };
            if advance {
                pseudo = state.last_pseudo + packet_len as u64;
                ref_index = reference_index(pseudo, mode);
                log::debug!(
                    "frame {}: pseudo-sequence {} out of range, using {}",
                    pos,
                    packet.pseudo_seq,
                    pseudo
                );
                if let Some(samples) = self.samples_to_cover(ref_index) {
                    if samples > state.stream.samples() as u64 {
                        state.stream = self.reference(samples)?;
                    }
                }
            }
        }

        let errors = match lookup(&state.stream, mode, ref_index) {
            Some(reference) => {
                state.last_pseudo = pseudo;
                bit_errors(&packet.body, reference, mode, packet_len)
            }
            None => {
                log::debug!(
                    "frame {}: pseudo-sequence {} has no reference, counted as fully wrong",
                    pos,
                    packet.pseudo_seq
                );
                mode.max_errors(packet_len)
            }
        };
        state.table.record(index, errors);
        Ok(state)
    }
}

/// Run a [`BitErrorAccumulator`] once.
pub fn compute_ber(
    frames: &[Frame],
    config: AnalysisConfig,
    cache: &ReferenceCache,
) -> Result<BerOutcome, AnalysisError> {
    BitErrorAccumulator::new(config, cache).compute(frames)
}
