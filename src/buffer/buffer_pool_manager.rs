//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting
//! - Automatic dirty page write-back on eviction
//! - LRU-K victim selection
//! - RAII page guards

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::replacer::LruKReplacer;
use crate::buffer::{BasicPageGuard, BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{Error, FrameId, PageId, Result};
use crate::storage::page::Page;
use crate::storage::{DiskData, DiskManager, DiskRequest, DiskScheduler};

/// Buffer-pool metadata guarded by the pool-wide lock.
struct PoolState {
    /// Maps resident page IDs to frame IDs.
    page_table: HashMap<PageId, FrameId>,

    /// Queue of unoccupied frame IDs (FIFO).
    free_list: VecDeque<FrameId>,

    /// Next page id to issue; monotonic, ids are never reused.
    next_page_id: u32,
}

/// Manages a pool of buffer frames for caching disk pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌──────────────────────────────┐  ┌─────────────────────┐  │
/// │  │ state (pool-wide Mutex)      │  │  frames: Vec<Frame> │  │
/// │  │ page_table: PageId → FrameId │─▶│  [F0] [F1] [F2] ... │  │
/// │  │ free_list, next_page_id      │  │  each: RwLock<Page> │  │
/// │  └──────────────────────────────┘  └─────────────────────┘  │
/// │  ┌──────────────┐  ┌────────────────┐  ┌───────────────┐    │
/// │  │   replacer   │  │ disk_scheduler │  │     stats     │    │
/// │  │ LRU-K, Mutex │  │ worker thread  │  │    atomics    │    │
/// │  └──────────────┘  └────────────────┘  └───────────────┘    │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Locking
/// Every metadata operation serializes on the single pool-wide `state`
/// lock, and that lock is held across the disk wait inside a fetch miss and
/// inside dirty-victim eviction: correctness over throughput, so no thread
/// can ever observe a half-installed frame. Page content
/// latches are acquired only *after* the pool lock is released (guards
/// latch after the fetch returns); the one exception-free rule is that no
/// code path takes a page latch while holding the pool lock on a frame
/// another thread could be using.
///
/// # Usage
/// ```ignore
/// let dm = DiskManager::create("test.db")?;
/// let bpm = BufferPoolManager::new(10, dm, 2);
///
/// let mut guard = bpm.new_page_guarded()?.upgrade_write();
/// guard.as_mut_slice()[0] = 0xAB;
/// drop(guard); // unpinned dirty
///
/// let guard = bpm.fetch_page_read(PageId::new(0))?;
/// let data = guard.as_slice();
/// ```
pub struct BufferPoolManager {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    /// Page table, free list, and id counter under the pool-wide lock.
    state: Mutex<PoolState>,

    /// Eviction policy for selecting victim frames.
    replacer: Mutex<LruKReplacer>,

    /// All disk I/O goes through the scheduler's worker thread.
    disk_scheduler: DiskScheduler,

    /// Performance statistics.
    stats: BufferPoolStats,

    /// Number of frames in the pool (immutable after construction).
    pool_size: usize,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager.
    ///
    /// # Arguments
    /// * `pool_size` - Number of frames in the pool
    /// * `disk_manager` - Handles disk I/O; owned by the scheduler worker
    /// * `replacer_k` - K for the LRU-K replacement policy
    ///
    /// # Panics
    /// Panics if `pool_size` or `replacer_k` is 0.
    pub fn new(pool_size: usize, disk_manager: DiskManager, replacer_k: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: VecDeque<FrameId> = (0..pool_size).map(FrameId::new).collect();

        // Pages already on disk keep their ids when a file is reopened.
        let next_page_id = disk_manager.page_count();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id,
            }),
            replacer: Mutex::new(LruKReplacer::new(pool_size, replacer_k)),
            disk_scheduler: DiskScheduler::new(disk_manager),
            stats: BufferPoolStats::new(),
            pool_size,
        }
    }

    // ========================================================================
    // Public API: Create pages
    // ========================================================================

    /// Allocate a fresh page id and install a zeroed, pinned frame for it.
    ///
    /// The caller owns one pin and must release it with
    /// [`unpin_page`](Self::unpin_page). Prefer
    /// [`new_page_guarded`](Self::new_page_guarded), which ties the pin to a
    /// guard.
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if every frame is pinned
    pub fn new_page(&self) -> Result<PageId> {
        self.allocate_page().map(|(page_id, _)| page_id)
    }

    /// Like [`new_page`](Self::new_page), but returns a [`BasicPageGuard`]
    /// owning the pin.
    ///
    /// # Errors
    /// - `Error::NoFreeFrames` if every frame is pinned
    pub fn new_page_guarded(&self) -> Result<BasicPageGuard<'_>> {
        let (page_id, frame_id) = self.allocate_page()?;
        Ok(BasicPageGuard::new(self, frame_id, page_id))
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page and return a pin-only guard.
    ///
    /// Upgrade the guard to access the page content.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page id was never allocated
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Ok(BasicPageGuard::new(self, frame_id, page_id))
    }

    /// Fetch a page for reading (shared access).
    ///
    /// If the page is already in the buffer pool, returns immediately.
    /// Otherwise, loads the page from disk (possibly evicting another page).
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page id was never allocated
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        let lock = self.frames[frame_id.0].page();
        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for writing (exclusive access).
    ///
    /// Same as `fetch_page_read`, but returns an exclusive guard. The page
    /// is marked dirty when the guard releases.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page id was never allocated
    /// - `Error::NoFreeFrames` if all frames are pinned
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    // ========================================================================
    // Public API: Pin accounting
    // ========================================================================

    /// Unpin a page, optionally marking it dirty.
    ///
    /// Returns `false` if the page is not resident or its pin count is
    /// already zero. When the pin count reaches zero the frame becomes an
    /// eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &self.frames[frame_id.0];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }
        true
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Synchronously write a page to disk and clear its dirty flag.
    ///
    /// The page is written whether or not it is dirty. Returns `false` if
    /// the page is not resident or the write failed.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        // Pin the frame so it cannot be evicted or deleted mid-flush.
        let frame_id = {
            let state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return false;
            };
            self.frames[frame_id.0].pin();
            self.replacer.lock().set_evictable(frame_id, false);
            frame_id
        };

        let frame = &self.frames[frame_id.0];

        // Clear the dirty flag before copying: a modification landing after
        // the copy re-dirties the frame instead of being lost.
        frame.clear_dirty();
        let ok = self.write_frame_to_disk(frame, page_id);
        if !ok {
            frame.mark_dirty();
        }

        self.unpin_frame(frame_id, false);
        ok
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            self.flush_page(page_id);
        }
    }

    // ========================================================================
    // Public API: Delete pages
    // ========================================================================

    /// Drop a page from the buffer pool and return its frame to the free
    /// list.
    ///
    /// Succeeds trivially if the page is not resident. Returns `false` if
    /// the page is still pinned; nothing changes in that case. The page id
    /// is never reissued.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };

        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return false;
        }

        state.page_table.remove(&page_id);
        {
            let mut replacer = self.replacer.lock();
            replacer.set_evictable(frame_id, false);
            replacer.remove(frame_id);
        }
        frame.reset();
        state.free_list.push_back(frame_id);
        true
    }

    // ========================================================================
    // Public API: Introspection
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Get the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Check whether a page is resident.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Get the pin count of a resident page, or `None` if not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id.0].pin_count())
    }

    // ========================================================================
    // Internal: guard support
    // ========================================================================

    /// The frame behind a guard. Only guards may reach into frames directly.
    pub(crate) fn frame(&self, frame_id: FrameId) -> &Frame {
        &self.frames[frame_id.0]
    }

    /// Unpin a frame on behalf of a guard.
    ///
    /// Guards release their content latch *before* calling this, so taking
    /// the pool lock here cannot deadlock against a flush waiting on that
    /// latch.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let _state = self.state.lock();
        let frame = &self.frames[frame_id.0];
        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch and allocation logic
    // ========================================================================

    /// Allocate a fresh id and install a zeroed, pinned frame for it.
    fn allocate_page(&self) -> Result<(PageId, FrameId)> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;

        let frame = &self.frames[frame_id.0];
        frame.page_mut().reset();
        frame.set_page_id(Some(page_id));
        frame.clear_dirty();
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        self.record_pinned_access(frame_id);

        Ok((page_id, frame_id))
    }

    /// Fetch a page into the buffer pool, pin it, and return its frame ID.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.state.lock();

        if !page_id.is_valid() || page_id.0 >= state.next_page_id {
            return Err(Error::PageNotFound(page_id.0));
        }

        // Fast path: cache hit.
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frames[frame_id.0].pin();
            self.record_pinned_access(frame_id);
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(frame_id);
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.acquire_frame(&mut state)?;

        // Read the page image through the scheduler while still holding the
        // pool lock; no thread can observe the half-installed frame.
        let buffer = Arc::new(StdMutex::new(Page::new()));
        let (done, completion) = DiskScheduler::create_completion();
        self.disk_scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Read(Arc::clone(&buffer)),
            done,
        });

        let image = if completion.wait() {
            buffer.lock().ok()
        } else {
            None
        };
        let Some(image) = image else {
            state.free_list.push_back(frame_id);
            return Err(Error::DiskRequestFailed(page_id.0));
        };
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        frame.page_mut().copy_from(&image);
        drop(image);
        frame.set_page_id(Some(page_id));
        frame.clear_dirty();
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        self.record_pinned_access(frame_id);

        Ok(frame_id)
    }

    /// Obtain a frame for installation: free list first, then eviction.
    ///
    /// An evicted dirty victim is written back through the scheduler before
    /// the frame is handed out; the pool lock stays held across that wait.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .lock()
            .evict()
            .ok_or(Error::NoFreeFrames)?;

        let frame = &self.frames[frame_id.0];
        let old_page_id = frame.page_id();

        if let Some(old_page_id) = old_page_id {
            debug!(page = old_page_id.0, frame = frame_id.0, "evicting page");

            if frame.is_dirty() && !self.write_frame_to_disk(frame, old_page_id) {
                // Disk failures are fatal at this layer; the caller sees the
                // error and the frame stays out of circulation.
                return Err(Error::DiskRequestFailed(old_page_id.0));
            }
            state.page_table.remove(&old_page_id);
        }

        frame.clear_dirty();
        frame.set_page_id(None);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);

        Ok(frame_id)
    }

    /// Copy a frame's content and write it out through the scheduler,
    /// waiting for the completion.
    fn write_frame_to_disk(&self, frame: &Frame, page_id: PageId) -> bool {
        let mut image = Box::new(Page::new());
        image.copy_from(&frame.page());

        let (done, completion) = DiskScheduler::create_completion();
        self.disk_scheduler.schedule(DiskRequest {
            page_id,
            data: DiskData::Write(image),
            done,
        });

        let ok = completion.wait();
        if ok {
            self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Register a pin-time access with the replacer.
    fn record_pinned_access(&self, frame_id: FrameId) {
        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);
    }
}
