// Copyright 2025-2026 CEMAXECUTER LLC

use bs_protocol::Frame;

/// Backwards jump (in counter units) tolerated as reordering rather than rollover.
pub const DEFAULT_REORDER_TOLERANCE: u32 = 50;

/// Unwraps the receiver's modular sequence counter into a monotonic index.
///
/// Only a wrap counter is carried between frames. A counter value more than
/// `tolerance` below its predecessor is taken as one rollover.
#[derive(Debug, Clone)]
pub struct SequenceReconstructor {
    max_seq: u32,
    tolerance: u32,
    wraps: u64,
    prev: Option<u32>,
}

impl SequenceReconstructor {
    pub fn new(max_seq: u32, tolerance: u32) -> Self {
        Self {
            max_seq,
            tolerance,
            wraps: 0,
            prev: None,
        }
    }

    /// Feed the next raw counter value and get its reconstructed index.
    pub fn push(&mut self, raw_seq: u32) -> u64 {
        if let Some(prev) = self.prev {
            if (raw_seq as u64) + (self.tolerance as u64) < prev as u64 {
                self.wraps += 1;
            }
        }
        self.prev = Some(raw_seq);
        self.wraps * self.max_seq as u64 + raw_seq as u64
    }
}

/// Pair every frame with its reconstructed index.
pub fn reconstruct(frames: &[Frame], max_seq: u32, tolerance: u32) -> Vec<(&Frame, u64)> {
    frames
        .iter()
        .scan(SequenceReconstructor::new(max_seq, tolerance), |rec, frame| {
            Some((frame, rec.push(frame.raw_seq)))
        })
        .collect()
}
