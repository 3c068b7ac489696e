// Copyright 2025-2026 CEMAXECUTER LLC

//! Reference ("ground truth") stream the tag transmits.
//!
//! The tag fills every payload with 16-bit samples drawn from a Box-Muller
//! transform over a linear congruential generator, seeded with 0xABCD at
//! power-up. Replaying the same generator here reproduces those bytes exactly.

use std::collections::HashMap;
use std::convert::Infallible;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::AnalysisError;

/// Seed the tag starts from.
pub const INITIAL_SEED: u32 = 0xABCD;

const LCG_A: u32 = 1_664_525;
const LCG_C: u32 = 1_013_904_223;
const RAND_MAX: f64 = 0xFFFF_FFFF_u32 as f64;

const SAMPLE_SCALE: f64 = 0x7FF as f64;
const SAMPLE_OFFSET: f64 = 0x1FFF as f64;
const SAMPLE_MAX: f64 = 0x3F_FFFF as f64;

/// One congruential step: seed' = seed * A + C (mod 2^32).
#[inline]
pub fn lcg_next(seed: u32) -> u32 {
    seed.wrapping_mul(LCG_A).wrapping_add(LCG_C)
}

/// Draw one quantized Gaussian-like sample. Returns (value, next seed).
///
/// A zero uniform draw makes ln(u1) or the angle degenerate; the pair is redrawn
/// from the continuing stream. This happens with probability ~2^-31 per draw and
/// always terminates since the LCG has full period.
pub fn sample(mut seed: u32) -> (u32, u32) {
    let (u1, u2) = loop {
        seed = lcg_next(seed);
        let u1 = seed as f64 / RAND_MAX;
        seed = lcg_next(seed);
        let u2 = seed as f64 / RAND_MAX;
        if u1 != 0.0 && u2 != 0.0 {
            break (u1, u2);
        }
    };
    let magnitude = SAMPLE_SCALE * (-2.0 * u1.ln()).sqrt();
    let value = (magnitude * (2.0 * PI * u2).cos() + SAMPLE_OFFSET).clamp(0.0, SAMPLE_MAX);
    (value.trunc() as u32, seed)
}

/// Split a sample into its transmitted byte pair (high, low).
/// Bits above 15 are dropped by the 8-bit truncation of the high byte.
#[inline]
pub fn sample_bytes(value: u32) -> [u8; 2] {
    [(value >> 8) as u8, value as u8]
}

/// Endless sample sequence starting from [`INITIAL_SEED`].
#[derive(Debug, Clone)]
pub struct Samples {
    seed: u32,
}

impl Samples {
    pub fn new() -> Self {
        Self { seed: INITIAL_SEED }
    }
}

impl Default for Samples {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Samples {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let (value, next) = sample(self.seed);
        self.seed = next;
        Some(value)
    }
}

/// Generated reference data, laid out in packet-sized rows.
///
/// Row `k` holds the bytes the tag put in the packet whose pseudo-sequence is
/// `k * packet_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceStream {
    packet_len: usize,
    samples: usize,
    bytes: Vec<u8>,
}

impl ReferenceStream {
    /// Generate enough whole rows of `samples_per_row` samples to cover `total_samples`.
    pub fn generate(samples_per_row: usize, total_samples: usize) -> Self {
        match Self::build(samples_per_row, total_samples, || Ok::<(), Infallible>(())) {
            Ok(stream) => stream,
            Err(never) => match never {},
        }
    }

    /// As [`generate`](Self::generate), checking `cancel` between rows.
    pub fn generate_cancellable(
        samples_per_row: usize,
        total_samples: usize,
        cancel: &AtomicBool,
    ) -> Result<Self, AnalysisError> {
        Self::build(samples_per_row, total_samples, || {
            if cancel.load(Ordering::Relaxed) {
                Err(AnalysisError::Cancelled)
            } else {
                Ok(())
            }
        })
    }

    fn build<E>(
        samples_per_row: usize,
        total_samples: usize,
        mut check: impl FnMut() -> Result<(), E>,
    ) -> Result<Self, E> {
        let samples_per_row = samples_per_row.max(1);
        let rows = total_samples.div_ceil(samples_per_row);
        let samples = rows * samples_per_row;
        let mut bytes = Vec::with_capacity(samples * 2);
        let mut source = Samples::new();

        for _ in 0..rows {
            check()?;
            bytes.extend(source.by_ref().take(samples_per_row).flat_map(sample_bytes));
        }

        Ok(Self {
            packet_len: samples_per_row * 2,
            samples,
            bytes,
        })
    }

    pub fn packet_len(&self) -> usize {
        self.packet_len
    }

    /// Number of generated samples.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn rows(&self) -> usize {
        self.bytes.len() / self.packet_len
    }

    /// Raw bytes in stream order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Row addressed by a pseudo-sequence style byte offset.
    /// `None` unless the offset is row aligned and already generated.
    pub fn row(&self, index: u64) -> Option<&[u8]> {
        let len = self.packet_len as u64;
        if index % len != 0 {
            return None;
        }
        let start = usize::try_from(index).ok()?;
        self.bytes.get(start..start + self.packet_len)
    }

    pub fn contains(&self, index: u64) -> bool {
        self.row(index).is_some()
    }

    /// Byte pair of sample number `index`.
    pub fn sample_pair(&self, index: u64) -> Option<&[u8]> {
        let start = usize::try_from(index).ok()?.checked_mul(2)?;
        self.bytes.get(start..start + 2)
    }
}

/// Shared cache of generated streams keyed by packet length.
///
/// Entries only grow: a stream is replaced only by a longer one, so concurrent
/// writers can never shrink what readers see.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    streams: RwLock<HashMap<usize, Arc<ReferenceStream>>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached stream for `packet_len`, if any.
    pub fn get(&self, packet_len: usize) -> Option<Arc<ReferenceStream>> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        streams.get(&packet_len).cloned()
    }

    /// Return a stream with at least `samples` samples, generating it if needed.
    ///
    /// Generation runs without holding the lock. If `cancel` is raised first the
    /// cache is left untouched.
    pub fn get_or_generate(
        &self,
        packet_len: usize,
        samples: usize,
        cancel: &AtomicBool,
    ) -> Result<Arc<ReferenceStream>, AnalysisError> {
        if let Some(stream) = self.get(packet_len) {
            if stream.samples() >= samples {
                return Ok(stream);
            }
        }

        log::info!(
            "generating reference stream: {} samples for {}-byte packets",
            samples,
            packet_len
        );
        let fresh = Arc::new(ReferenceStream::generate_cancellable(
            packet_len / 2,
            samples,
            cancel,
        )?);

        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        let entry = streams.entry(packet_len).or_insert_with(|| fresh.clone());
        if entry.samples() < fresh.samples() {
            *entry = fresh;
        }
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.streams.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lcg_step() {
        assert_eq!(lcg_next(INITIAL_SEED), 0x47F0_5AC8);
        // wraps mod 2^32
        assert_eq!(lcg_next(0xFFFF_FFFF), LCG_C.wrapping_sub(LCG_A));
    }

    #[test]
    fn test_known_samples() {
        let expected = [0x135D, 0x1F43, 0x1B45, 0x256F, 0x21FE, 0x0F7E, 0x206B, 0x2BB0];
        let mut seed = INITIAL_SEED;
        for &want in &expected {
            let (value, next) = sample(seed);
            assert_eq!(value, want);
            seed = next;
        }
        assert_eq!(seed, 0xD94B_875D);
    }

    #[test]
    fn test_zero_draw_is_redrawn() {
        let seed = 0x25D6_0FE5;
        assert_eq!(lcg_next(seed), 0);
        assert_eq!(sample(seed), (9575, 3_519_870_697));
    }

    #[test]
    fn test_stream_bytes() {
        let stream = ReferenceStream::generate(2, 4);
        assert_eq!(stream.packet_len(), 4);
        assert_eq!(stream.rows(), 2);
        assert_eq!(
            stream.as_bytes(),
            &[0x13, 0x5D, 0x1F, 0x43, 0x1B, 0x45, 0x25, 0x6F]
        );
    }

    #[test]
    fn test_partial_row_rounds_up() {
        let stream = ReferenceStream::generate(16, 17);
        assert_eq!(stream.rows(), 2);
        assert_eq!(stream.samples(), 32);
    }

    #[test]
    fn test_row_addressing() {
        let stream = ReferenceStream::generate(16, 16 * 3);
        assert!(stream.contains(0));
        assert!(stream.contains(64));
        assert!(!stream.contains(96));
        assert!(!stream.contains(33));
        assert_eq!(stream.row(32).unwrap(), &stream.as_bytes()[32..64]);
    }

    #[test]
    fn test_longer_generation_extends_prefix() {
        let short = ReferenceStream::generate(16, 16 * 4);
        let long = ReferenceStream::generate(16, 16 * 10);
        assert_eq!(&long.as_bytes()[..short.as_bytes().len()], short.as_bytes());
    }

    #[test]
    fn test_cache_reuses_and_grows() {
        let cache = ReferenceCache::new();
        let cancel = AtomicBool::new(false);
        let a = cache.get_or_generate(32, 160, &cancel).unwrap();
        let b = cache.get_or_generate(32, 80, &cancel).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.get_or_generate(32, 320, &cancel).unwrap();
        assert_eq!(c.samples(), 320);
        assert_eq!(cache.get(32).unwrap().samples(), 320);
        assert_eq!(&c.as_bytes()[..a.as_bytes().len()], a.as_bytes());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cancel_leaves_cache_untouched() {
        let cache = ReferenceCache::new();
        let cancel = AtomicBool::new(false);
        cache.get_or_generate(32, 160, &cancel).unwrap();

        cancel.store(true, Ordering::Relaxed);
        let err = cache.get_or_generate(32, 1600, &cancel).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
        assert_eq!(cache.get(32).unwrap().samples(), 160);

        // a cached request is still served while cancelled
        assert!(cache.get_or_generate(32, 16, &cancel).is_ok());
    }

    #[test]
    fn test_concurrent_writers_keep_longest() {
        let cache = ReferenceCache::new();
        let cancel = AtomicBool::new(false);
        std::thread::scope(|s| {
            for n in [64usize, 640, 160, 320] {
                let cache = &cache;
                let cancel = &cancel;
                s.spawn(move || {
                    let got = cache.get_or_generate(16, n, cancel).unwrap();
                    assert!(got.samples() >= n);
                });
            }
        });
        assert_eq!(cache.get(16).unwrap().samples(), 640);
    }

    proptest! {
        #[test]
        fn prop_samples_in_range(seed in any::<u32>()) {
            let (value, _) = sample(seed);
            prop_assert!(value <= 0x3F_FFFF);
        }

        #[test]
        fn prop_generation_is_deterministic(rows in 1usize..8, per_row in 1usize..20) {
            let a = ReferenceStream::generate(per_row, rows * per_row);
            let b = ReferenceStream::generate(per_row, rows * per_row);
            prop_assert_eq!(&a, &b);
            let never = AtomicBool::new(false);
            let c = ReferenceStream::generate_cancellable(per_row, rows * per_row, &never).unwrap();
            prop_assert_eq!(a, c);
        }
    }
}
