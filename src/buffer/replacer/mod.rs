//! Eviction policy implementations (replacers).
//!
//! Currently implements:
//! - [`LruKReplacer`] - LRU-K, ranking frames by backward K-distance

mod lru_k;

pub use lru_k::LruKReplacer;
