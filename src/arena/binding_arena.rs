// Binding arena - storage for binding records
//
// A binding record holds everything the engine knows about one computed cell:
// - owner: the cell the binding writes into
// - function: the type-erased evaluation function (taken out while it runs)
// - state: three-state reactive state (Clean/Check/Dirty)
// - dependencies: the subscription set, one observer node per cell read during
//   the last evaluation, keyed by cell so a cell is never subscribed twice
// - observers: the owning cell's observer chain while the cell is bound
//
// THREE-STATE PROPAGATION:
// - Dirty: a cell this binding read has changed, it must recompute
// - Check: something upstream went dirty, verify sources before recomputing
// - Clean: cached value is current
//
// Only a Clean -> non-Clean transition pushes Check further downstream, which
// both coalesces repeated notifications and terminates on dependency cycles.

use std::panic::Location;

use super::{CellId, ObserverId, ObserverKind, ObserverList};
use crate::binding::BindingFunction;
use crate::error::BindingError;
use crate::hash::FastIndexMap;
use crate::runtime::State;
use crate::update_group::GroupPhase;

arena_key! {
    /// Key of a binding record.
    pub struct BindingId;
}

/// Reactive state of a binding.
///
/// States only upgrade (Clean -> Check -> Dirty) while changes propagate;
/// evaluation resets to Clean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReactiveState {
    /// Cached value is current.
    Clean,
    /// Might be stale, verify sources first.
    Check,
    /// Definitely stale, must recompute.
    Dirty,
}

/// A binding record stored in the arena.
pub struct BindingSlot {
    pub(crate) owner: CellId,
    pub(crate) function: Option<Box<dyn BindingFunction>>,
    pub(crate) state: ReactiveState,
    /// Set while the function runs and its result propagates; re-entering an
    /// updating binding is a loop.
    pub(crate) updating: bool,
    pub(crate) eager: bool,
    /// Survives plain writes to the owning cell.
    pub(crate) sticky: bool,
    pub(crate) error: Option<BindingError>,
    pub(crate) dependencies: FastIndexMap<CellId, ObserverId>,
    pub(crate) observers: ObserverList,
    pub(crate) location: &'static Location<'static>,
}

impl BindingSlot {
    /// A fresh record; starts Dirty so the first evaluation always runs.
    pub(crate) fn new(
        owner: CellId,
        function: Box<dyn BindingFunction>,
        eager: bool,
        sticky: bool,
        location: &'static Location<'static>,
    ) -> Self {
        Self {
            owner,
            function: Some(function),
            state: ReactiveState::Dirty,
            updating: false,
            eager,
            sticky,
            error: None,
            dependencies: FastIndexMap::default(),
            observers: ObserverList::default(),
            location,
        }
    }

    /// Whether the cached value may be stale.
    pub(crate) fn needs_work(&self) -> bool {
        self.state != ReactiveState::Clean
    }
}

impl State {
    /// Detach the binding owning `cell` and return its record.
    ///
    /// The cell reverts to plain storage and inherits the observer chain. The
    /// binding's own subscriptions are unlinked. The record still owns the
    /// evaluation function, so drop it after releasing the state.
    pub(crate) fn take_binding(&mut self, cell: CellId) -> Option<BindingSlot> {
        let binding = self.binding_of(cell)?;
        let mut slot = self.bindings.remove(binding)?;

        let observers = std::mem::take(&mut slot.observers);
        if let Some(metadata) = self.metadata_mut(cell) {
            *metadata = super::BindingMetadata::Observers(observers);
        }
        for (_, node) in slot.dependencies.drain(..) {
            self.unlink_observer(node);
        }
        self.pending_eager.shift_remove(&binding);
        self.group.dirtied.shift_remove(&binding);
        Some(slot)
    }

    /// Mark a binding Dirty because a cell it read has changed.
    ///
    /// Repeated marks coalesce. A Clean binding pushes Check to everything that
    /// observes its own cell. Eager bindings are queued for the next flush.
    pub(crate) fn mark_dirty(&mut self, binding: BindingId) {
        let closing = self.group.phase == GroupPhase::Closing;
        let Some(slot) = self.bindings.get_mut(binding) else {
            return;
        };

        let previous = slot.state;
        slot.state = ReactiveState::Dirty;
        if closing {
            self.group.dirtied.insert(binding);
        }
        if previous == ReactiveState::Dirty {
            cov_mark::hit!(dirty_marks_coalesce);
            return;
        }
        if slot.eager {
            self.pending_eager.insert(binding);
        }
        if previous == ReactiveState::Clean {
            let owner = slot.owner;
            self.propagate_check(owner);
        }
    }

    /// Mark every binding downstream of `cell` as Check.
    fn propagate_check(&mut self, cell: CellId) {
        let closing = self.group.phase == GroupPhase::Closing;
        let mut work = vec![cell];

        while let Some(cell) = work.pop() {
            for id in self.observer_snapshot(cell) {
                let Some(ObserverKind::Binding(binding)) =
                    self.observers.get(id).map(|node| &node.kind)
                else {
                    continue;
                };
                let binding = *binding;
                let Some(slot) = self.bindings.get_mut(binding) else {
                    continue;
                };
                if slot.state != ReactiveState::Clean {
                    continue;
                }

                cov_mark::hit!(marking_binding_check);
                slot.state = ReactiveState::Check;
                if slot.eager {
                    self.pending_eager.insert(binding);
                }
                if closing {
                    self.group.dirtied.insert(binding);
                }
                work.push(slot.owner);
            }
        }
    }

    /// Current state of a binding; Clean for stale keys.
    pub(crate) fn binding_state(&self, binding: BindingId) -> ReactiveState {
        self.bindings
            .get(binding)
            .map_or(ReactiveState::Clean, |slot| slot.state)
    }
}
