//! Page replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clock (second chance) replacement algorithm.
///
/// Reference bits are recorded lock-free; the clock hand and the set of
/// frames known to the replacer live behind a mutex. The pool supplies a
/// predicate deciding whether a candidate frame may be evicted (its pin
/// count is zero), so the replacer itself never inspects frames.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Frames currently tracked for replacement, plus the clock hand.
    inner: Mutex<ClockReplacerInner>,
}

struct ClockReplacerInner {
    /// tracked[i] is true when frame i holds a page the pool may recycle.
    tracked: Vec<bool>,
    /// Current clock hand position.
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits = (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            inner: Mutex::new(ClockReplacerInner {
                tracked: vec![false; num_frames],
                clock_hand: 0,
            }),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Records that the given frame was accessed.
    #[inline]
    pub fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    /// Starts tracking a frame as a replacement candidate.
    pub fn track(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.inner.lock().tracked[idx] = true;
        }
    }

    /// Removes a frame from the replacer (page deleted or frame freed).
    pub fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.inner.lock().tracked[idx] = false;
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }

    /// Selects a victim frame for eviction.
    ///
    /// Sweeps the clock over tracked frames, clearing reference bits and
    /// returning the first frame whose bit was already clear and for which
    /// `candidate_ok` holds. Returns None if no victim is found after the
    /// bits have all been given their second chance.
    pub fn evict<F>(&self, candidate_ok: F) -> Option<FrameId>
    where
        F: Fn(FrameId) -> bool,
    {
        let mut inner = self.inner.lock();
        if self.num_frames == 0 {
            return None;
        }

        // Two full rotations: the first may only clear reference bits.
        for _ in 0..self.num_frames * 2 {
            let idx = inner.clock_hand;
            inner.clock_hand = (inner.clock_hand + 1) % self.num_frames;

            if !inner.tracked[idx] {
                continue;
            }

            let frame_id = FrameId(idx as u32);
            if !candidate_ok(frame_id) {
                continue;
            }

            if self.reference_bits[idx].swap(false, Ordering::Relaxed) {
                continue; // second chance
            }

            inner.tracked[idx] = false;
            return Some(frame_id);
        }

        None
    }

    /// Returns the number of tracked frames.
    pub fn tracked_count(&self) -> usize {
        self.inner.lock().tracked.iter().filter(|t| **t).count()
    }
}
