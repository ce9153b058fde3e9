// Cell arena - storage for property metadata
//
// A property keeps its value outside the arena (in an Rc shared with its
// bindables and its binding); the arena only stores what the binding engine
// needs: which of the three metadata shapes is active.
//
// SHAPES:
// - Observers: no binding, the cell owns its observer chain
// - Binding:   an active binding owns the cell; the chain moves into the binding
// - Proxy:     an open update group captured the cell; the original shape lives
//              in the group's pending map until the group closes

use super::{BindingId, ObserverList};
use crate::runtime::State;

arena_key! {
    /// Identity of a property inside its runtime.
    ///
    /// Stays unique for the lifetime of the runtime even after the property is
    /// dropped; a stale id simply stops resolving.
    pub struct CellId;
}

/// The active metadata shape of a cell.
#[derive(Debug)]
pub enum BindingMetadata {
    /// Plain storage with a (possibly empty) observer chain.
    Observers(ObserverList),
    /// The cell's value is computed by this binding.
    Binding(BindingId),
    /// Redirected to the original shape saved by the open update group.
    Proxy,
}

impl BindingMetadata {
    /// Binding owning the cell, if this shape is `Binding`.
    pub fn binding(&self) -> Option<BindingId> {
        match self {
            BindingMetadata::Binding(binding) => Some(*binding),
            _ => None,
        }
    }

    /// Whether this is the proxy shape.
    pub fn is_proxy(&self) -> bool {
        matches!(self, BindingMetadata::Proxy)
    }
}

impl Default for BindingMetadata {
    fn default() -> Self {
        BindingMetadata::Observers(ObserverList::default())
    }
}

/// Metadata for a cell stored in the arena.
#[derive(Debug, Default)]
pub struct CellMetadata {
    pub(crate) metadata: BindingMetadata,
}

impl State {
    /// The effective metadata of `cell`, following a proxy to the original.
    pub(crate) fn metadata(&self, cell: CellId) -> Option<&BindingMetadata> {
        let metadata = &self.cells.get(cell)?.metadata;
        if metadata.is_proxy() {
            return self.group.pending.get(&cell).map(|redirect| &redirect.original);
        }
        Some(metadata)
    }

    pub(crate) fn metadata_mut(&mut self, cell: CellId) -> Option<&mut BindingMetadata> {
        if self.cells.get(cell)?.metadata.is_proxy() {
            return self
                .group
                .pending
                .get_mut(&cell)
                .map(|redirect| &mut redirect.original);
        }
        self.cells.get_mut(cell).map(|slot| &mut slot.metadata)
    }

    /// Binding currently owning `cell`.
    pub(crate) fn binding_of(&self, cell: CellId) -> Option<BindingId> {
        self.metadata(cell)?.binding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cells_start_as_plain_storage() {
        let cell = CellMetadata::default();
        assert!(matches!(
            cell.metadata,
            BindingMetadata::Observers(ref list) if list.is_empty()
        ));
        assert_eq!(cell.metadata.binding(), None);
        assert!(!cell.metadata.is_proxy());
    }
}
