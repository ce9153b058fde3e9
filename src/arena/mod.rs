// Arena-based storage for the binding graph
//
// Three arenas live inside the runtime state:
// - cell arena: per-property metadata (observer list, binding or proxy)
// - binding arena: binding records (state, subscriptions, evaluation function)
// - observer arena: intrusive observer nodes linked into a cell's chain
//
// Keys pair a slab index with a generation. Slab reuses indices, so a key to
// a freed slot must never resolve to the next occupant; every lookup compares
// generations and stale keys simply resolve to None.

use std::marker::PhantomData;

use slab::Slab;

/// A generation-checked arena key.
pub trait Key: Copy + Eq {
    /// Build a key from a slab index and the generation of its slot.
    fn from_parts(index: u32, generation: u32) -> Self;

    /// Slab index.
    fn index(self) -> usize;

    /// Generation the key was issued with.
    fn generation(self) -> u32;
}

/// Declares a `Copy` key newtype implementing [`Key`].
macro_rules! arena_key {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
        $vis struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::arena::Key for $name {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            #[inline]
            fn index(self) -> usize {
                self.index as usize
            }

            #[inline]
            fn generation(self) -> u32 {
                self.generation
            }
        }
    };
}
pub(crate) use arena_key;

pub mod binding_arena;
pub mod cell_arena;
pub mod observer_arena;

pub use binding_arena::{BindingId, BindingSlot, ReactiveState};
pub use cell_arena::{BindingMetadata, CellId, CellMetadata};
pub use observer_arena::{ObserverId, ObserverKind, ObserverList, ObserverNode};

struct Entry<V> {
    generation: u32,
    value: V,
}

/// Slab storage whose keys go stale when their slot is freed.
pub struct Arena<K, V> {
    slab: Slab<Entry<V>>,
    next_generation: u32,
    _key: PhantomData<K>,
}

impl<K: Key, V> Arena<K, V> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slab: Slab::new(),
            next_generation: 0,
            _key: PhantomData,
        }
    }

    /// Insert a value and return its key.
    pub fn insert(&mut self, value: V) -> K {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let entry = self.slab.vacant_entry();
        let key = K::from_parts(entry.key() as u32, generation);
        entry.insert(Entry { generation, value });
        key
    }

    /// Shared access; `None` for stale keys.
    pub fn get(&self, key: K) -> Option<&V> {
        self.slab
            .get(key.index())
            .filter(|entry| entry.generation == key.generation())
            .map(|entry| &entry.value)
    }

    /// Exclusive access; `None` for stale keys.
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slab
            .get_mut(key.index())
            .filter(|entry| entry.generation == key.generation())
            .map(|entry| &mut entry.value)
    }

    /// Whether `key` still refers to a live slot.
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Remove and return the value; `None` for stale keys.
    pub fn remove(&mut self, key: K) -> Option<V> {
        if !self.contains(key) {
            return None;
        }
        Some(self.slab.remove(key.index()).value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slab.len()
    }
}

impl<K: Key, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    arena_key! {
        struct TestKey;
    }

    #[test]
    fn stale_key_does_not_resolve_to_reused_slot() {
        let mut arena: Arena<TestKey, &str> = Arena::new();
        let first = arena.insert("first");
        assert_eq!(arena.remove(first), Some("first"));

        let second = arena.insert("second");
        assert_eq!(first.index(), second.index());
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut arena: Arena<TestKey, u32> = Arena::new();
        let key = arena.insert(1);
        if let Some(value) = arena.get_mut(key) {
            *value += 41;
        }
        assert_eq!(arena.get(key), Some(&42));
    }
}
