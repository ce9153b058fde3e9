//! Deterministic hashing for the engine's internal maps.
//!
//! Every insertion-ordered collection in the runtime (subscription sets,
//! pending update groups, dirty queues) is keyed by small arena keys, so
//! HashDoS resistance buys nothing. `FastHashBuilder` is a zero-sized
//! `BuildHasher` over foldhash with a fixed seed.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::{IndexMap, IndexSet};

/// Zero-sized, fixed-seed foldhash builder.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x9e37_79b9_7f4a_7c15).build_hasher()
    }
}

/// Insertion-ordered map used wherever iteration order is observable.
pub(crate) type FastIndexMap<K, V> = IndexMap<K, V, FastHashBuilder>;

/// Insertion-ordered set used for dirty and eager queues.
pub(crate) type FastIndexSet<K> = IndexSet<K, FastHashBuilder>;
