use std::any::Any;
use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use tracing::debug;

use crate::arena::{BindingId, BindingMetadata, CellId};
use crate::error::UpdateGroupError;
use crate::hash::{FastIndexMap, FastIndexSet};
use crate::runtime::Runtime;

/// Where the engine is in the update group life cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum GroupPhase {
    /// No group is open; writes apply and notify immediately.
    #[default]
    Idle,
    /// A group is open; first writes install proxies.
    Open,
    /// The outermost group is committing shadows and notifying.
    Closing,
}

/// A cell captured by the open group.
pub(crate) struct ProxyRedirect {
    /// The metadata the cell had before it was proxied.
    pub(crate) original: BindingMetadata,
    /// The deferred value, an `Rc<RefCell<T>>` of the cell's own value type
    /// so it can be read and compared outside the state borrow.
    pub(crate) shadow: Box<dyn Any>,
    /// Writes a shadow into the cell's storage; returns whether it changed.
    pub(crate) commit: Box<dyn FnOnce(Box<dyn Any>) -> bool>,
}

impl ProxyRedirect {
    pub(crate) fn new<T: Clone + PartialEq + 'static>(
        original: BindingMetadata,
        storage: &Rc<RefCell<T>>,
        shadow: T,
    ) -> Self {
        let storage = Rc::clone(storage);
        Self {
            original,
            shadow: Box::new(Rc::new(RefCell::new(shadow))),
            commit: Box::new(move |shadow| commit_shadow(&storage, shadow)),
        }
    }
}

fn commit_shadow<T: Clone + PartialEq + 'static>(
    storage: &RefCell<T>,
    shadow: Box<dyn Any>,
) -> bool {
    let Ok(shadow) = shadow.downcast::<Rc<RefCell<T>>>() else {
        return false;
    };
    let value = Rc::try_unwrap(*shadow)
        .map(RefCell::into_inner)
        .unwrap_or_else(|shared| shared.borrow().clone());
    if *storage.borrow() == value {
        return false;
    }
    let old = mem::replace(&mut *storage.borrow_mut(), value);
    drop(old);
    true
}

/// Per-runtime update group bookkeeping.
#[derive(Default)]
pub(crate) struct GroupState {
    /// Number of groups currently open (nesting depth).
    pub(crate) depth: usize,
    pub(crate) phase: GroupPhase,
    /// Proxied cells in first-touched order.
    pub(crate) pending: FastIndexMap<CellId, ProxyRedirect>,
    /// Bindings dirtied while closing, in first-dirtied order.
    pub(crate) dirtied: FastIndexSet<BindingId>,
}

impl GroupState {
    /// The shadow of `cell`, if the open group captured it.
    pub(crate) fn shadow<T: 'static>(&self, cell: CellId) -> Option<Rc<RefCell<T>>> {
        self.pending
            .get(&cell)
            .and_then(|redirect| redirect.shadow.downcast_ref::<Rc<RefCell<T>>>())
            .map(Rc::clone)
    }
}

/// Life cycle of an [`UpdateGroup`] handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Writes are being deferred.
    Open,
    /// Deferred writes are being committed and observers notified.
    Closing,
    /// The group has finished; closing again is an error.
    Closed,
}

/// A delayed update session.
///
/// While a group is open, writes to properties are held back: the first write
/// to each property captures it, reads see the new value, but no observer is
/// told anything. When the outermost group closes, every captured property
/// receives its final value and observers are notified once, in the order the
/// properties were first written.
///
/// Groups nest; only closing the outermost one commits. Dropping an open
/// group closes it, so a panic inside the session still commits.
///
/// # Example
///
/// ```
/// use propgraph::Runtime;
///
/// let runtime = Runtime::new();
/// let width = runtime.property(2);
/// let height = runtime.property(3);
/// let area = runtime.property(0);
/// let (w, h) = (width.bindable(), height.bindable());
/// area.bind(move || w.get() * h.get());
///
/// let mut group = runtime.begin_update_group();
/// width.set(4);
/// height.set(5);
/// assert_eq!(width.get(), 4);
/// assert_eq!(area.get(), 6);
/// group.close().unwrap();
///
/// assert_eq!(area.get(), 20);
/// ```
#[must_use = "the group closes as soon as it is dropped"]
pub struct UpdateGroup {
    runtime: Runtime,
    state: SessionState,
}

impl UpdateGroup {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        runtime.enter_update_group();
        Self {
            runtime: runtime.clone(),
            state: SessionState::Open,
        }
    }

    /// Current state of this session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Close the session, committing deferred writes if it is the outermost.
    ///
    /// Closing an already closed group returns
    /// [`UpdateGroupError::AlreadyClosed`] and has no other effect.
    pub fn close(&mut self) -> Result<(), UpdateGroupError> {
        if self.state != SessionState::Open {
            return Err(UpdateGroupError::AlreadyClosed);
        }
        self.state = SessionState::Closing;
        self.runtime.exit_update_group();
        self.state = SessionState::Closed;
        Ok(())
    }
}

impl Drop for UpdateGroup {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            let _ = self.close();
        }
    }
}

/// Returns the engine to `Idle` if unwinding stops early.
struct PhaseGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.runtime.state_mut();
        if state.group.phase == GroupPhase::Closing {
            state.group.phase = GroupPhase::Idle;
            state.group.dirtied.clear();
        }
    }
}

impl Runtime {
    pub(crate) fn enter_update_group(&self) {
        let mut state = self.state_mut();
        if state.group.depth == 0 && state.group.phase == GroupPhase::Idle {
            state.group.phase = GroupPhase::Open;
        }
        state.group.depth += 1;
    }

    pub(crate) fn exit_update_group(&self) {
        let unwind = {
            let mut state = self.state_mut();
            state.group.depth = state.group.depth.saturating_sub(1);
            if state.group.depth > 0 {
                cov_mark::hit!(update_group_nested);
            }
            state.group.depth == 0 && state.group.phase == GroupPhase::Open
        };
        if unwind {
            self.unwind_update_group();
        }
    }

    /// Commit every proxied cell, notify, then settle dirtied bindings.
    fn unwind_update_group(&self) {
        let _guard = PhaseGuard { runtime: self };

        // Restore original metadata under a single borrow so no proxy is ever
        // left pointing at a missing redirect.
        let commits: Vec<_> = {
            let mut state = self.state_mut();
            state.group.phase = GroupPhase::Closing;
            let pending = mem::take(&mut state.group.pending);
            debug!(cells = pending.len(), "closing update group");
            pending
                .into_iter()
                .filter_map(|(cell, redirect)| {
                    let slot = state.cells.get_mut(cell)?;
                    slot.metadata = redirect.original;
                    Some((cell, redirect.shadow, redirect.commit))
                })
                .collect()
        };

        let changed: Vec<CellId> = commits
            .into_iter()
            .filter_map(|(cell, shadow, commit)| commit(shadow).then_some(cell))
            .collect();
        for &cell in &changed {
            self.notify_observers(cell);
        }

        let dirtied = {
            let mut state = self.state_mut();
            state.group.phase = GroupPhase::Idle;
            mem::take(&mut state.group.dirtied)
        };
        debug!(
            changed = changed.len(),
            dirtied = dirtied.len(),
            "update group committed"
        );
        for binding in dirtied {
            self.update_if_necessary(binding);
        }
        self.flush_pending();
    }
}
