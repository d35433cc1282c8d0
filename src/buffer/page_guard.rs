//! RAII guards for page access.
//!
//! A guard uniquely owns a pin on a frame, and for the latched variants a
//! read or write latch on the page content:
//! - [`BasicPageGuard`] - pin only; upgrade to a latched guard to touch data
//! - [`PageReadGuard`] - pin + shared content latch
//! - [`PageWriteGuard`] - pin + exclusive content latch (marks dirty)
//!
//! Release order is always latch first, then unpin. Every guard releases at
//! most once: dropping after an explicit [`drop_guard`](PageReadGuard::drop_guard)
//! is a no-op, and upgrades transfer the pin to the new guard. Guards are
//! move-only values, so ownership transfer is checked by the compiler.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// Guard holding only a pin on a page's frame.
///
/// A basic guard keeps the page resident but grants no access to its
/// content; convert it with [`upgrade_read`](Self::upgrade_read) or
/// [`upgrade_write`](Self::upgrade_write) first. On release it unpins with
/// whatever dirty flag it accumulated via [`set_dirty`](Self::set_dirty).
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
    /// Cleared on release or upgrade; a cleared guard's drop is a no-op.
    active: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            is_dirty: false,
            active: true,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Record that the page will be unpinned dirty.
    #[inline]
    pub fn set_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Release the pin now. A later drop (or second call) is a no-op.
    pub fn drop_guard(&mut self) {
        if self.active {
            self.active = false;
            self.bpm.unpin_frame(self.frame_id, self.is_dirty);
        }
    }

    /// Acquire the read latch and turn this guard into a [`PageReadGuard`],
    /// transferring the pin.
    pub fn upgrade_read(mut self) -> PageReadGuard<'a> {
        self.active = false;
        let lock = self.bpm.frame(self.frame_id).page();
        PageReadGuard {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            lock: Some(lock),
        }
    }

    /// Acquire the write latch and turn this guard into a
    /// [`PageWriteGuard`], transferring the pin.
    pub fn upgrade_write(mut self) -> PageWriteGuard<'a> {
        self.active = false;
        let lock = self.bpm.frame(self.frame_id).page_mut();
        PageWriteGuard {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            lock: Some(lock),
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
/// On release the read latch is dropped first, then the page is unpinned
/// clean.
pub struct PageReadGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` once released.
    lock: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// View the page content.
    ///
    /// # Panics
    /// Panics if the guard was already released.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.page().as_slice()
    }

    /// Release latch and pin now. A later drop (or second call) is a no-op.
    pub fn drop_guard(&mut self) {
        if let Some(lock) = self.lock.take() {
            drop(lock);
            self.bpm.unpin_frame(self.frame_id, false);
        }
    }

    fn page(&self) -> &Page {
        self.lock.as_ref().expect("page guard used after release")
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.page()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

/// Guard for exclusive write access to a page.
///
/// Only one `PageWriteGuard` can exist for a page at a time. On release the
/// write latch is dropped first, then the page is unpinned dirty.
pub struct PageWriteGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` once released.
    lock: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            lock: Some(lock),
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// View the page content.
    ///
    /// # Panics
    /// Panics if the guard was already released.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.page().as_slice()
    }

    /// Mutate the page content.
    ///
    /// # Panics
    /// Panics if the guard was already released.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.page_mut().as_mut_slice()
    }

    /// Release latch and pin now. A later drop (or second call) is a no-op.
    pub fn drop_guard(&mut self) {
        if let Some(lock) = self.lock.take() {
            drop(lock);
            self.bpm.unpin_frame(self.frame_id, true);
        }
    }

    fn page(&self) -> &Page {
        self.lock.as_ref().expect("page guard used after release")
    }

    fn page_mut(&mut self) -> &mut Page {
        self.lock.as_mut().expect("page guard used after release")
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        self.page()
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.page_mut()
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}
