//! stratadb - the storage-engine core of an educational relational database.
//!
//! # Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          stratadb                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │              Index Layer (index/)                     │   │
//! │  │   DiskExtendibleHashTable: header → dir → bucket      │   │
//! │  └──────────────────────────────────────────────────────┘    │
//! │                             ↓                                │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │            Buffer Pool (buffer/)                      │   │
//! │  │   BufferPoolManager + Frames + LRU-K + Page Guards    │   │
//! │  └──────────────────────────────────────────────────────┘    │
//! │                             ↓                                │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │           Storage Layer (storage/)                    │   │
//! │  │   DiskScheduler (worker thread) → DiskManager → file  │   │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Error, config)
//! - [`storage`] - Disk I/O, the scheduler, and page formats
//! - [`buffer`] - Buffer pool management, eviction, and page guards
//! - [`index`] - The disk extendible hash table
//!
//! # Quick Start
//! ```no_run
//! use stratadb::{BufferPoolManager, DiskManager};
//!
//! let dm = DiskManager::create("my_database.db").unwrap();
//! let bpm = BufferPoolManager::new(64, dm, 2);
//!
//! let mut guard = bpm.new_page_guarded().unwrap().upgrade_write();
//! guard.as_mut_slice()[0] = 0xAB;
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, PageId, Result};

pub use buffer::{
    BasicPageGuard, BufferPoolManager, BufferPoolStats, Frame, PageReadGuard, PageWriteGuard,
    StatsSnapshot,
};
pub use index::DiskExtendibleHashTable;
pub use storage::page::Page;
pub use storage::{DiskManager, DiskScheduler};
