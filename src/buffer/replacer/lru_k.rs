//! LRU-K replacement policy.
//!
//! LRU-K evicts the frame whose backward K-distance (time since its K-th
//! most recent access) is largest. Frames with fewer than K accesses have
//! infinite backward distance and are preferred as victims, oldest first.

use std::collections::VecDeque;

use crate::common::FrameId;

/// Per-frame bookkeeping, indexed by frame id.
#[derive(Debug, Default, Clone)]
struct FrameMeta {
    access_count: usize,
    evictable: bool,
}

/// An LRU-K eviction policy over a fixed set of frames.
///
/// Frames live in one of two sequences, both ordered most-recent-first:
/// - *history*: frames with fewer than K accesses. A frame enters at the
///   front on its first access and keeps its position on later sub-K
///   accesses, so the back of the sequence is the frame with the oldest
///   first access.
/// - *cache*: frames with at least K accesses, moved to the front on every
///   access.
///
/// Victims come from the back of history first, then the back of cache.
///
/// The caller (the buffer pool) serializes access with an external mutex,
/// matching the other replacement policies' `&mut self` interface.
pub struct LruKReplacer {
    k: usize,
    frames: Vec<FrameMeta>,
    /// Frames with `access_count < k`; front = most recent first access.
    history: VecDeque<FrameId>,
    /// Frames with `access_count >= k`; front = most recently accessed.
    cache: VecDeque<FrameId>,
    /// Number of frames currently flagged evictable.
    evictable_count: usize,
}

impl LruKReplacer {
    /// Create a replacer tracking `num_frames` frames.
    ///
    /// # Panics
    /// Panics if `k` is 0.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            frames: vec![FrameMeta::default(); num_frames],
            history: VecDeque::new(),
            cache: VecDeque::new(),
            evictable_count: 0,
        }
    }

    /// Record an access to `frame_id`.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn record_access(&mut self, frame_id: FrameId) {
        let idx = frame_id.0;
        assert!(idx < self.frames.len(), "frame id out of range");

        self.frames[idx].access_count += 1;
        let count = self.frames[idx].access_count;

        if count >= self.k {
            // Graduation from history on the K-th access; afterwards every
            // access refreshes the cache position.
            let source = if count == self.k {
                &mut self.history
            } else {
                &mut self.cache
            };
            if let Some(pos) = source.iter().position(|&f| f == frame_id) {
                source.remove(pos);
            }
            self.cache.push_front(frame_id);
        } else if count == 1 {
            self.history.push_front(frame_id);
        }
        // 1 < count < k: the frame stays at its current history position;
        // only the first and the K-th access change its rank.
    }

    /// Flag or unflag `frame_id` as an eviction candidate.
    ///
    /// A frame that has never been accessed is ignored.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let idx = frame_id.0;
        assert!(idx < self.frames.len(), "frame id out of range");

        let meta = &mut self.frames[idx];
        if meta.access_count == 0 || meta.evictable == evictable {
            return;
        }

        meta.evictable = evictable;
        if evictable {
            self.evictable_count += 1;
        } else {
            self.evictable_count -= 1;
        }
    }

    /// Choose and remove a victim frame.
    ///
    /// Returns the evictable frame with the largest backward K-distance, or
    /// `None` if no frame is evictable. The victim's access history is
    /// discarded.
    pub fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_count == 0 {
            return None;
        }

        let victim = Self::evict_from(&mut self.history, &mut self.frames)
            .or_else(|| Self::evict_from(&mut self.cache, &mut self.frames))?;
        self.evictable_count -= 1;
        Some(victim)
    }

    /// Scan a sequence from the back (oldest) for an evictable frame and
    /// reset its state.
    fn evict_from(seq: &mut VecDeque<FrameId>, frames: &mut [FrameMeta]) -> Option<FrameId> {
        let pos = seq.iter().rposition(|f| frames[f.0].evictable)?;
        let frame_id = seq.remove(pos)?;

        let meta = &mut frames[frame_id.0];
        meta.access_count = 0;
        meta.evictable = false;
        Some(frame_id)
    }

    /// Forget a frame entirely.
    ///
    /// Called when the frame's page is deleted from the buffer pool. A frame
    /// that has never been accessed is ignored.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range or the frame is still flagged
    /// evictable; callers must unflag it first.
    pub fn remove(&mut self, frame_id: FrameId) {
        let idx = frame_id.0;
        assert!(idx < self.frames.len(), "frame id out of range");
        assert!(
            !self.frames[idx].evictable,
            "remove() requires a non-evictable frame"
        );

        if self.frames[idx].access_count == 0 {
            return;
        }

        let seq = if self.frames[idx].access_count >= self.k {
            &mut self.cache
        } else {
            &mut self.history
        };
        if let Some(pos) = seq.iter().position(|&f| f == frame_id) {
            seq.remove(pos);
        }

        self.frames[idx].access_count = 0;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable_count
    }
}
