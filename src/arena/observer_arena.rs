// Observer arena - intrusive observer chains
//
// Every cell owns one doubly linked chain of observer nodes. Nodes live in the
// observer arena and link to each other by key, so unlinking is O(1) and a
// dangling link can only ever resolve to None.
//
// A node is either:
// - a binding observer: the binding read the cell during its last evaluation
//   and must be marked dirty when the cell changes
// - a change handler: an external callback bridging into the embedder's
//   change-signal mechanism
//
// The chain of a bound cell is stored in its binding record and the chain of a
// proxied cell in the update group's pending map. `source` always names the
// cell, and lookups resolve through the cell's current metadata shape.

use std::fmt;
use std::mem;

use super::{BindingId, BindingMetadata, CellId};
use crate::runtime::State;

arena_key! {
    /// Key of an observer node.
    pub struct ObserverId;
}

/// Who gets told when the source cell changes.
pub enum ObserverKind {
    /// Mark this binding dirty.
    Binding(BindingId),
    /// Invoke this callback. `None` while the callback is running.
    Handler(Option<Box<dyn FnMut()>>),
}

impl fmt::Debug for ObserverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverKind::Binding(binding) => f.debug_tuple("Binding").field(binding).finish(),
            ObserverKind::Handler(handler) => f
                .debug_tuple("Handler")
                .field(&handler.as_ref().map(|_| ".."))
                .finish(),
        }
    }
}

/// A node in a cell's observer chain.
#[derive(Debug)]
pub struct ObserverNode {
    pub(crate) source: CellId,
    pub(crate) prev: Option<ObserverId>,
    pub(crate) next: Option<ObserverId>,
    pub(crate) kind: ObserverKind,
}

/// Head, tail and length of an observer chain.
#[derive(Debug, Default)]
pub struct ObserverList {
    pub(crate) head: Option<ObserverId>,
    pub(crate) tail: Option<ObserverId>,
    pub(crate) len: usize,
}

impl ObserverList {
    /// Number of linked nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no node is linked.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl State {
    /// The chain observing `cell`, wherever its current shape keeps it.
    pub(crate) fn observer_list(&self, cell: CellId) -> Option<&ObserverList> {
        match self.metadata(cell)? {
            BindingMetadata::Observers(list) => Some(list),
            BindingMetadata::Binding(binding) => {
                self.bindings.get(*binding).map(|slot| &slot.observers)
            }
            BindingMetadata::Proxy => None,
        }
    }

    pub(crate) fn observer_list_mut(&mut self, cell: CellId) -> Option<&mut ObserverList> {
        if let Some(binding) = self.binding_of(cell) {
            return self.bindings.get_mut(binding).map(|slot| &mut slot.observers);
        }
        match self.metadata_mut(cell)? {
            BindingMetadata::Observers(list) => Some(list),
            _ => None,
        }
    }

    /// Append a node to the end of `cell`'s chain.
    ///
    /// Appending keeps delivery in registration order. If the cell is gone the
    /// kind is handed back so the caller can drop it outside the state borrow.
    pub(crate) fn append_observer(
        &mut self,
        cell: CellId,
        kind: ObserverKind,
    ) -> Result<ObserverId, ObserverKind> {
        let Some(list) = self.observer_list(cell) else {
            return Err(kind);
        };
        let tail = list.tail;

        let id = self.observers.insert(ObserverNode {
            source: cell,
            prev: tail,
            next: None,
            kind,
        });
        if let Some(node) = tail.and_then(|tail| self.observers.get_mut(tail)) {
            node.next = Some(id);
        }
        if let Some(list) = self.observer_list_mut(cell) {
            if list.head.is_none() {
                list.head = Some(id);
            }
            list.tail = Some(id);
            list.len += 1;
        }
        Ok(id)
    }

    /// Unlink a node from its chain and free it.
    ///
    /// The returned node may own a callback; drop it after releasing the state.
    pub(crate) fn unlink_observer(&mut self, id: ObserverId) -> Option<ObserverNode> {
        let node = self.observers.remove(id)?;

        if let Some(prev) = node.prev.and_then(|prev| self.observers.get_mut(prev)) {
            prev.next = node.next;
        }
        if let Some(next) = node.next.and_then(|next| self.observers.get_mut(next)) {
            next.prev = node.prev;
        }
        if let Some(list) = self.observer_list_mut(node.source) {
            if list.head == Some(id) {
                list.head = node.next;
            }
            if list.tail == Some(id) {
                list.tail = node.prev;
            }
            list.len = list.len.saturating_sub(1);
        }
        Some(node)
    }

    /// Keys of `cell`'s chain in registration order.
    ///
    /// Delivery walks this snapshot and re-validates each key, since a callback
    /// may link or unlink nodes (itself included) while it runs.
    pub(crate) fn observer_snapshot(&self, cell: CellId) -> Vec<ObserverId> {
        let Some(list) = self.observer_list(cell) else {
            return Vec::new();
        };
        let mut ids = Vec::with_capacity(list.len);
        let mut cursor = list.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.observers.get(id).and_then(|node| node.next);
        }
        ids
    }

    /// Unlink every node of `cell`'s chain; returns the freed nodes.
    pub(crate) fn unlink_all_observers(&mut self, cell: CellId) -> Vec<ObserverNode> {
        let ids = self.observer_snapshot(cell);
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.unlink_observer(id) {
                nodes.push(node);
            }
        }
        if let Some(list) = self.observer_list_mut(cell) {
            let _ = mem::take(list);
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::CellMetadata;

    fn chain(state: &State, cell: CellId) -> Vec<ObserverId> {
        state.observer_snapshot(cell)
    }

    fn handler() -> ObserverKind {
        ObserverKind::Handler(Some(Box::new(|| {})))
    }

    #[test]
    fn append_keeps_registration_order() {
        let mut state = State::default();
        let cell = state.cells.insert(CellMetadata::default());

        let a = state.append_observer(cell, handler()).ok();
        let b = state.append_observer(cell, handler()).ok();
        let c = state.append_observer(cell, handler()).ok();

        let ids: Vec<_> = [a, b, c].into_iter().flatten().collect();
        assert_eq!(chain(&state, cell), ids);
        assert_eq!(state.observer_list(cell).map(ObserverList::len), Some(3));
    }

    #[test]
    fn unlink_middle_head_and_tail() {
        let mut state = State::default();
        let cell = state.cells.insert(CellMetadata::default());
        let ids: Vec<_> = (0..4)
            .filter_map(|_| state.append_observer(cell, handler()).ok())
            .collect();

        state.unlink_observer(ids[1]);
        assert_eq!(chain(&state, cell), vec![ids[0], ids[2], ids[3]]);

        state.unlink_observer(ids[0]);
        assert_eq!(chain(&state, cell), vec![ids[2], ids[3]]);

        state.unlink_observer(ids[3]);
        assert_eq!(chain(&state, cell), vec![ids[2]]);

        state.unlink_observer(ids[2]);
        assert!(chain(&state, cell).is_empty());
        assert_eq!(state.observer_list(cell).map(ObserverList::is_empty), Some(true));

        // Unlinking twice is harmless.
        assert!(state.unlink_observer(ids[2]).is_none());
    }

    #[test]
    fn append_to_missing_cell_hands_kind_back() {
        let mut state = State::default();
        let cell = state.cells.insert(CellMetadata::default());
        state.cells.remove(cell);

        assert!(matches!(
            state.append_observer(cell, handler()),
            Err(ObserverKind::Handler(Some(_)))
        ));
        assert_eq!(state.observers.len(), 0);
    }
}
