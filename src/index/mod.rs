//! Index structures built on the buffer pool.
//!
//! Currently implements:
//! - [`hash`] - A disk-backed extendible hash table

pub mod hash;

pub use hash::DiskExtendibleHashTable;
