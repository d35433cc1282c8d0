//! Disk extendible hash table.
//!
//! A persistent key-value index built on the buffer pool. See
//! [`crate::storage::page::hash`] for the page layouts; this module holds
//! the algorithms: routing, bucket splitting with directory growth, and
//! merging of empty bucket pairs with directory shrinkage.
//!
//! # Latching
//! Operations descend header → directory → bucket, dropping each level's
//! latch before latching the next, and never re-ascend. The two exceptions
//! hold an ancestor while a child is latched: creating a child page (the
//! parent slot must be updated atomically with the creation) and
//! split/merge (the directory is being rewritten around the buckets).
//! Sibling buckets are never latched while the primary bucket latch is
//! held.

use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use fnv::FnvBuildHasher;
use tracing::debug;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result};
use crate::storage::page::hash::{
    FixedBytes, HashTableBucketPage, HashTableDirectoryPage, HashTableHeaderPage,
};

/// What a single insert attempt decided.
enum InsertOutcome {
    /// The attempt finished with this result.
    Done(bool),
    /// A bucket was split; route the key again from the top.
    Retry,
}

/// A disk-backed extendible hash table mapping fixed-width keys to
/// fixed-width values.
///
/// One header page routes the top `header_max_depth` hash bits to a
/// directory; each directory routes its low `global_depth` bits to a bucket
/// of at most `bucket_max_size` entries. Keys are unique.
///
/// The table is generic over the hasher so tests can substitute a
/// deterministic one; the default is FNV with the 64-bit output truncated
/// to the 32 bits the routing scheme uses.
///
/// # Failure semantics
/// `insert` and `remove` report failure as `false`: duplicate or missing
/// keys, frame exhaustion, and directory growth past its max depth all land
/// there. A failed operation writes nothing back, so the on-disk structure
/// stays consistent.
pub struct DiskExtendibleHashTable<K, V, S = FnvBuildHasher> {
    name: String,
    bpm: Arc<BufferPoolManager>,
    hasher: S,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<K, V, S> DiskExtendibleHashTable<K, V, S>
where
    K: FixedBytes + Eq + Hash,
    V: FixedBytes,
    S: BuildHasher,
{
    /// Create a table, allocating and initializing its header page.
    ///
    /// # Errors
    /// Fails if the header page cannot be allocated.
    ///
    /// # Panics
    /// Panics if `bucket_max_size` entries of this key/value type cannot
    /// fit in one page, or a depth limit is out of range.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        hasher: S,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self> {
        assert!(
            bucket_max_size as usize <= HashTableBucketPage::<K, V>::max_slot_count(),
            "bucket_max_size {} exceeds page capacity {}",
            bucket_max_size,
            HashTableBucketPage::<K, V>::max_slot_count()
        );
        assert!(
            directory_max_depth <= crate::common::config::HASH_TABLE_DIRECTORY_MAX_DEPTH,
            "directory_max_depth {} exceeds limit {}",
            directory_max_depth,
            crate::common::config::HASH_TABLE_DIRECTORY_MAX_DEPTH
        );

        let header_basic = bpm.new_page_guarded()?;
        let header_page_id = header_basic.page_id();
        {
            let mut header_guard = header_basic.upgrade_write();
            HashTableHeaderPage::init(header_max_depth).write_to(header_guard.as_mut_slice());
        }

        Ok(Self {
            name: name.into(),
            bpm,
            hasher,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key.
    pub fn get(&self, key: &K) -> Option<V> {
        let hash = self.hash(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id).ok()?;
        let header = HashTableHeaderPage::from_bytes(header_guard.as_slice());
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);
        if !directory_page_id.is_valid() {
            return None;
        }

        let directory_guard = self.bpm.fetch_page_read(directory_page_id).ok()?;
        let directory = HashTableDirectoryPage::from_bytes(directory_guard.as_slice());
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_bucket_index(hash));
        drop(directory_guard);
        if !bucket_page_id.is_valid() {
            return None;
        }

        let bucket_guard = self.bpm.fetch_page_read(bucket_page_id).ok()?;
        let bucket = HashTableBucketPage::<K, V>::from_bytes(bucket_guard.as_slice());
        bucket.lookup(key)
    }

    /// Insert a key-value pair.
    ///
    /// Returns `false` if the key already exists, a page allocation fails,
    /// or the target directory cannot grow any further.
    pub fn insert(&self, key: K, value: V) -> bool {
        // Each retry follows a completed split, which strictly lowered the
        // load of the target bucket, so the loop terminates.
        loop {
            match self.try_insert(&key, &value) {
                InsertOutcome::Done(result) => return result,
                InsertOutcome::Retry => {}
            }
        }
    }

    /// Remove a key.
    ///
    /// Returns `false` if the key is absent. Emptied buckets are merged
    /// with their split images where possible and the directory shrinks
    /// while every slot sits below the global depth.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash(key);

        let Ok(header_guard) = self.bpm.fetch_page_write(self.header_page_id) else {
            return false;
        };
        let header = HashTableHeaderPage::from_bytes(header_guard.as_slice());
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);
        if !directory_page_id.is_valid() {
            return false;
        }

        let Ok(mut directory_guard) = self.bpm.fetch_page_write(directory_page_id) else {
            return false;
        };
        let mut directory = HashTableDirectoryPage::from_bytes(directory_guard.as_slice());
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if !bucket_page_id.is_valid() {
            return false;
        }

        let Ok(mut bucket_guard) = self.bpm.fetch_page_write(bucket_page_id) else {
            return false;
        };
        let mut bucket = HashTableBucketPage::<K, V>::from_bytes(bucket_guard.as_slice());
        if !bucket.remove(key) {
            return false;
        }
        bucket.write_to(bucket_guard.as_mut_slice());
        let now_empty = bucket.is_empty();

        // Release the bucket latch before looking at siblings.
        drop(bucket_guard);

        if now_empty {
            self.merge_empty_buckets(&mut directory, bucket_idx);
            while directory.can_shrink() {
                directory.decr_global_depth();
            }
            directory.write_to(directory_guard.as_mut_slice());
        }

        true
    }

    /// Check every directory's structural invariants.
    ///
    /// # Panics
    /// Panics on the first violation. Intended for tests and debugging.
    pub fn verify_integrity(&self) {
        let Ok(header_guard) = self.bpm.fetch_page_read(self.header_page_id) else {
            return;
        };
        let header = HashTableHeaderPage::from_bytes(header_guard.as_slice());
        let directory_ids: Vec<PageId> = (0..header.max_size())
            .map(|i| header.directory_page_id(i))
            .collect();
        drop(header_guard);

        for directory_page_id in directory_ids.into_iter().filter(PageId::is_valid) {
            if let Ok(guard) = self.bpm.fetch_page_read(directory_page_id) {
                HashTableDirectoryPage::from_bytes(guard.as_slice()).verify_integrity();
            }
        }
    }

    /// A parsed snapshot of the directory at `directory_idx`, if it exists.
    ///
    /// Diagnostics and tests only; the snapshot is stale the moment it is
    /// returned.
    pub fn directory(&self, directory_idx: usize) -> Option<HashTableDirectoryPage> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id).ok()?;
        let header = HashTableHeaderPage::from_bytes(header_guard.as_slice());
        let directory_page_id = header.directory_page_id(directory_idx);
        drop(header_guard);
        if !directory_page_id.is_valid() {
            return None;
        }

        let guard = self.bpm.fetch_page_read(directory_page_id).ok()?;
        Some(HashTableDirectoryPage::from_bytes(guard.as_slice()))
    }

    fn hash(&self, key: &K) -> u32 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    /// One full insert attempt. Splitting ends the attempt; the caller
    /// routes the key again because the split may have moved its bucket.
    fn try_insert(&self, key: &K, value: &V) -> InsertOutcome {
        let hash = self.hash(key);

        // Header tier: find or create the directory.
        let Ok(mut header_guard) = self.bpm.fetch_page_write(self.header_page_id) else {
            return InsertOutcome::Done(false);
        };
        let mut header = HashTableHeaderPage::from_bytes(header_guard.as_slice());
        let directory_idx = header.hash_to_directory_index(hash);
        let mut directory_page_id = header.directory_page_id(directory_idx);
        if !directory_page_id.is_valid() {
            let Ok(directory_basic) = self.bpm.new_page_guarded() else {
                return InsertOutcome::Done(false);
            };
            directory_page_id = directory_basic.page_id();
            {
                let mut new_directory_guard = directory_basic.upgrade_write();
                HashTableDirectoryPage::init(self.directory_max_depth)
                    .write_to(new_directory_guard.as_mut_slice());
            }
            header.set_directory_page_id(directory_idx, directory_page_id);
            header.write_to(header_guard.as_mut_slice());
        }
        drop(header_guard);

        // Directory tier: find or create the bucket.
        let Ok(mut directory_guard) = self.bpm.fetch_page_write(directory_page_id) else {
            return InsertOutcome::Done(false);
        };
        let mut directory = HashTableDirectoryPage::from_bytes(directory_guard.as_slice());
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let mut bucket_page_id = directory.bucket_page_id(bucket_idx);
        if !bucket_page_id.is_valid() {
            let Ok(bucket_basic) = self.bpm.new_page_guarded() else {
                return InsertOutcome::Done(false);
            };
            bucket_page_id = bucket_basic.page_id();
            {
                let mut new_bucket_guard = bucket_basic.upgrade_write();
                HashTableBucketPage::<K, V>::init(self.bucket_max_size)
                    .write_to(new_bucket_guard.as_mut_slice());
            }
            directory.set_bucket_page_id(bucket_idx, bucket_page_id);
            directory.set_local_depth(bucket_idx, 0);
            directory.write_to(directory_guard.as_mut_slice());
        }

        // Bucket tier.
        let Ok(mut bucket_guard) = self.bpm.fetch_page_write(bucket_page_id) else {
            return InsertOutcome::Done(false);
        };
        let mut bucket = HashTableBucketPage::<K, V>::from_bytes(bucket_guard.as_slice());

        if bucket.lookup(key).is_some() {
            return InsertOutcome::Done(false);
        }

        if !bucket.is_full() {
            bucket.insert(*key, *value);
            bucket.write_to(bucket_guard.as_mut_slice());
            return InsertOutcome::Done(true);
        }

        // Full bucket: grow the directory if the bucket sits at global
        // depth, raise its local depth, and split. A failure on this path
        // writes nothing back, so the structure is untouched.
        if directory.local_depth(bucket_idx) == directory.global_depth()
            && !directory.incr_global_depth()
        {
            return InsertOutcome::Done(false);
        }
        directory.incr_local_depth(bucket_idx);

        if !self.split_bucket(&mut directory, &mut bucket, bucket_idx) {
            return InsertOutcome::Done(false);
        }

        bucket.write_to(bucket_guard.as_mut_slice());
        directory.write_to(directory_guard.as_mut_slice());
        InsertOutcome::Retry
    }

    /// Split the full bucket at `bucket_idx`, whose local depth was just
    /// raised to `d`: allocate its split image, rewrite both orbits of the
    /// directory, and rehash the bucket's entries across the pair.
    ///
    /// The slots mapping to the old bucket are exactly
    /// `{ j : j ≡ bucket_idx (mod 2^d) }` and the split image's are
    /// `{ j : j ≡ split_idx (mod 2^d) }`, so walking each orbit upward from
    /// its canonical low-bits representative with stride `2^d` covers every
    /// affected slot exactly once.
    ///
    /// Returns `false` if the split page cannot be allocated; the parsed
    /// directory and bucket are then discarded unwritten by the caller.
    fn split_bucket(
        &self,
        directory: &mut HashTableDirectoryPage,
        bucket: &mut HashTableBucketPage<K, V>,
        bucket_idx: usize,
    ) -> bool {
        let Ok(split_basic) = self.bpm.new_page_guarded() else {
            return false;
        };
        let split_page_id = split_basic.page_id();
        let mut split_guard = split_basic.upgrade_write();
        let mut split_bucket = HashTableBucketPage::<K, V>::init(self.bucket_max_size);

        let local_depth = directory.local_depth(bucket_idx);
        let split_idx = directory.split_image_index(bucket_idx);
        let stride = 1usize << local_depth;
        let size = directory.size();

        let mut idx = bucket_idx & (stride - 1);
        while idx < size {
            directory.set_local_depth(idx, local_depth);
            idx += stride;
        }
        let mut idx = split_idx;
        while idx < size {
            directory.set_bucket_page_id(idx, split_page_id);
            directory.set_local_depth(idx, local_depth);
            idx += stride;
        }

        // Rehash the overflowing bucket's entries; the directory now routes
        // each one to either the old page or the split page.
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        for (key, value) in bucket.drain() {
            let target = directory.bucket_page_id(directory.hash_to_bucket_index(self.hash(&key)));
            debug_assert!(target == bucket_page_id || target == split_page_id);
            if target == split_page_id {
                split_bucket.insert(key, value);
            } else {
                bucket.insert(key, value);
            }
        }

        split_bucket.write_to(split_guard.as_mut_slice());
        debug!(
            bucket = bucket_page_id.0,
            split = split_page_id.0,
            depth = local_depth,
            "split bucket"
        );
        true
    }

    /// Fold the empty bucket at `bucket_idx` into its split image while the
    /// pair is empty and of equal depth, walking up one depth level per
    /// round. Retired sibling pages go back to the buffer pool.
    fn merge_empty_buckets(&self, directory: &mut HashTableDirectoryPage, mut bucket_idx: usize) {
        loop {
            if directory.local_depth(bucket_idx) == 0 {
                return;
            }

            let split_idx = directory.split_image_index(bucket_idx);
            let split_page_id = directory.bucket_page_id(split_idx);
            if !split_page_id.is_valid()
                || directory.local_depth(split_idx) != directory.local_depth(bucket_idx)
            {
                return;
            }

            // Peek at the sibling and let its latch go before rewriting the
            // directory; the directory latch keeps the pair stable.
            let Ok(split_guard) = self.bpm.fetch_page_read(split_page_id) else {
                return;
            };
            let split_empty =
                HashTableBucketPage::<K, V>::from_bytes(split_guard.as_slice()).is_empty();
            drop(split_guard);
            if !split_empty {
                return;
            }

            let surviving = directory.bucket_page_id(bucket_idx);
            directory.decr_local_depth(bucket_idx);
            let depth = directory.local_depth(bucket_idx);
            let stride = 1usize << depth;

            bucket_idx &= stride - 1;
            let mut idx = bucket_idx;
            while idx < directory.size() {
                directory.set_bucket_page_id(idx, surviving);
                directory.set_local_depth(idx, depth);
                idx += stride;
            }

            self.bpm.delete_page(split_page_id);
            debug!(
                survivor = surviving.0,
                retired = split_page_id.0,
                depth, "merged empty buckets"
            );
        }
    }
}
