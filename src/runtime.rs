//! The engine instance: arenas, the evaluation stack and the graph algorithms.
//!
//! All engine state lives in one `RefCell<State>`. The borrow is never held
//! while user code runs (binding functions, change handlers, `Clone` and
//! `PartialEq` of property values, `Drop` of values and boxed closures),
//! which is what makes re-entrant reads and writes from
//! inside bindings and handlers sound. Closures removed from the graph are
//! returned out of the borrow and dropped after it is released.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::mem;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::arena::{
    Arena, BindingId, BindingMetadata, BindingSlot, CellId, CellMetadata, ObserverId, ObserverKind,
    ObserverNode, ReactiveState,
};
use crate::binding::{BindingFunction, PropertyBinding, TypedBinding};
use crate::error::BindingError;
use crate::hash::FastIndexSet;
use crate::property::Property;
use crate::update_group::{GroupPhase, GroupState, ProxyRedirect, UpdateGroup};

/// Default limit on how deeply binding evaluations may nest.
///
/// Each lazy binding that reads another stale binding adds one level.
pub const DEFAULT_MAX_EVALUATION_DEPTH: usize = 512;

/// Default evaluation policy for bindings that do not choose one.
pub const DEFAULT_EAGER: bool = false;

/// Settings of a [`Runtime`], fixed when it is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum nesting of binding evaluations.
    pub max_evaluation_depth: usize,
    /// Whether bindings without an explicit policy are eager.
    pub eager_by_default: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_evaluation_depth: DEFAULT_MAX_EVALUATION_DEPTH,
            eager_by_default: DEFAULT_EAGER,
        }
    }
}

/// Builder for configuring a [`Runtime`].
///
/// # Example
///
/// ```
/// use propgraph::RuntimeBuilder;
///
/// let runtime = RuntimeBuilder::new()
///     .max_evaluation_depth(64)
///     .eager_by_default(true)
///     .build();
/// assert_eq!(runtime.config().max_evaluation_depth, 64);
/// ```
#[derive(Clone, Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a builder with default settings.
    ///
    /// Defaults:
    /// - `max_evaluation_depth`: 512
    /// - `eager_by_default`: false
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum nesting of binding evaluations.
    ///
    /// A binding that would evaluate deeper is not run. It and every binding
    /// waiting on it keep their previous value, report
    /// [`BindingError::DepthExceeded`] and stay dirty, so a later read from a
    /// shallower point recomputes them.
    ///
    /// Default: 512
    pub fn max_evaluation_depth(mut self, depth: usize) -> Self {
        self.config.max_evaluation_depth = depth;
        self
    }

    /// Make bindings eager unless they opt out with
    /// [`PropertyBinding::lazy`].
    ///
    /// Default: false
    pub fn eager_by_default(mut self, eager: bool) -> Self {
        self.config.eager_by_default = eager;
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Runtime {
        let state = State {
            config: self.config,
            ..State::default()
        };
        Runtime {
            inner: Rc::new(Inner {
                state: RefCell::new(state),
            }),
        }
    }
}

/// Everything the engine knows about its graph.
#[derive(Default)]
pub(crate) struct State {
    pub(crate) cells: Arena<CellId, CellMetadata>,
    pub(crate) bindings: Arena<BindingId, BindingSlot>,
    pub(crate) observers: Arena<ObserverId, ObserverNode>,
    /// Evaluation frames; `None` marks a region with tracking suspended.
    pub(crate) evaluation: Vec<Option<BindingId>>,
    /// Eager bindings waiting for the next flush, in marking order.
    pub(crate) pending_eager: FastIndexSet<BindingId>,
    pub(crate) group: GroupState,
    pub(crate) config: RuntimeConfig,
}

impl State {
    /// The binding whose reads are being tracked right now.
    pub(crate) fn current_binding(&self) -> Option<BindingId> {
        self.evaluation.last().copied().flatten()
    }

    /// Number of binding evaluations currently on the stack.
    pub(crate) fn evaluation_depth(&self) -> usize {
        self.evaluation.iter().filter(|frame| frame.is_some()).count()
    }

    pub(crate) fn activity(&self, binding: BindingId) -> Activity {
        if self.evaluation.contains(&Some(binding)) {
            Activity::Running
        } else if self.bindings.get(binding).is_some_and(|slot| slot.updating) {
            Activity::Notifying
        } else {
            Activity::Idle
        }
    }
}

/// What a binding is doing right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Activity {
    Idle,
    /// Its function is on the evaluation stack; reaching it again is a loop.
    Running,
    /// Its new value is stored and being propagated; the value is current.
    Notifying,
}

/// Outcome of writing a value into a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stored {
    /// Equal to the current value; nothing happened.
    Unchanged,
    /// Written; observers must be notified.
    Changed,
    /// Held in the open update group's shadow.
    Deferred,
}

struct Inner {
    state: RefCell<State>,
}

/// Handle to one property engine.
///
/// Cloning is cheap and yields another handle to the same engine. Every
/// property belongs to exactly one runtime; runtimes never interact.
///
/// The runtime is single threaded (`!Send`, `!Sync`). Every operation runs to
/// completion on the calling thread.
///
/// # Example
///
/// ```
/// use propgraph::Runtime;
///
/// let runtime = Runtime::new();
/// let width = runtime.property(4);
/// let height = runtime.property(3);
/// let area = runtime.property(0);
///
/// let (w, h) = (width.bindable(), height.bindable());
/// area.bind(move || w.get() * h.get());
/// assert_eq!(area.get(), 12);
///
/// width.set(10);
/// assert_eq!(area.get(), 30);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Runtime")
            .field("cells", &state.cells.len())
            .field("bindings", &state.bindings.len())
            .field("config", &state.config)
            .finish()
    }
}

impl Runtime {
    /// Create a runtime with default settings.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The settings this runtime was built with.
    pub fn config(&self) -> RuntimeConfig {
        self.state().config
    }

    /// Create a property holding `value`.
    pub fn property<T: Clone + PartialEq + 'static>(&self, value: T) -> Property<T> {
        Property::new(self, value)
    }

    /// Open a delayed update session. See [`UpdateGroup`].
    pub fn begin_update_group(&self) -> UpdateGroup {
        UpdateGroup::new(self)
    }

    /// Run `f` inside an update group that closes when `f` returns or panics.
    ///
    /// ```
    /// use propgraph::Runtime;
    ///
    /// let runtime = Runtime::new();
    /// let a = runtime.property(1);
    /// let b = runtime.property(2);
    /// runtime.batch(|| {
    ///     a.set(10);
    ///     b.set(20);
    /// });
    /// assert_eq!(a.get() + b.get(), 30);
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _group = self.begin_update_group();
        f()
    }

    /// Run `f` without recording dependencies for the current binding.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = FrameGuard::push(self, None);
        f()
    }

    /// Fail the binding whose function is running with `message`.
    ///
    /// The pass is discarded and the property keeps its previous value, as
    /// for a binding loop; the next change of a dependency retries it. Returns
    /// `false` when no binding is running, as inside a change handler or an
    /// [`untracked`](Self::untracked) region.
    ///
    /// ```
    /// use propgraph::Runtime;
    ///
    /// let runtime = Runtime::new();
    /// let divisor = runtime.property(2);
    /// let quotient = runtime.property(0);
    ///
    /// let (rt, d) = (runtime.clone(), divisor.bindable());
    /// quotient.bind(move || {
    ///     let d = d.get();
    ///     if d == 0 {
    ///         rt.report_binding_error("division by zero");
    ///         return 0;
    ///     }
    ///     10 / d
    /// });
    /// divisor.set(0);
    /// assert_eq!(quotient.get(), 5);
    /// assert!(quotient.binding_error().is_some());
    /// ```
    pub fn report_binding_error(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut state = self.state_mut();
        let Some(binding) = state.current_binding() else {
            return false;
        };
        let Some(slot) = state.bindings.get_mut(binding) else {
            return false;
        };
        if slot.error.is_none() {
            let error = BindingError::Evaluation {
                message,
                location: slot.location,
            };
            warn!("{error}");
            slot.error = Some(error);
        }
        true
    }

    /// Whether any binding is being evaluated right now.
    pub fn is_evaluating(&self) -> bool {
        self.state().evaluation_depth() > 0
    }

    /// Number of live properties.
    pub fn property_count(&self) -> usize {
        self.state().cells.len()
    }

    /// Number of installed bindings.
    pub fn binding_count(&self) -> usize {
        self.state().bindings.len()
    }

    pub(crate) fn state(&self) -> Ref<'_, State> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, State> {
        self.inner.state.borrow_mut()
    }

    pub(crate) fn insert_cell(&self) -> CellId {
        self.state_mut().cells.insert(CellMetadata::default())
    }

    /// Bring `cell` up to date and subscribe the current binding to it.
    pub(crate) fn track_read(&self, cell: CellId) {
        let binding = {
            let state = self.state();
            state
                .binding_of(cell)
                .map(|binding| (binding, state.activity(binding)))
        };
        match binding {
            Some((binding, Activity::Running)) => self.report_loop(binding),
            Some((binding, Activity::Idle)) => {
                self.update_if_necessary(binding);
            }
            Some((_, Activity::Notifying)) | None => {}
        }
        self.subscribe_current(cell);
    }

    fn subscribe_current(&self, cell: CellId) {
        let mut state = self.state_mut();
        let Some(current) = state.current_binding() else {
            return;
        };
        let Some(slot) = state.bindings.get(current) else {
            return;
        };
        if slot.owner == cell || slot.dependencies.contains_key(&cell) {
            return;
        }
        if let Ok(node) = state.append_observer(cell, ObserverKind::Binding(current)) {
            if let Some(slot) = state.bindings.get_mut(current) {
                slot.dependencies.insert(cell, node);
            }
        }
    }

    fn report_loop(&self, binding: BindingId) {
        let mut state = self.state_mut();
        let Some(slot) = state.bindings.get_mut(binding) else {
            return;
        };
        cov_mark::hit!(binding_loop_detected);
        let error = BindingError::BindingLoop {
            location: slot.location,
        };
        warn!("{error}");
        slot.error = Some(error);
    }

    /// Whether the pass of `binding` must be discarded.
    pub(crate) fn evaluation_failed(&self, binding: BindingId) -> bool {
        self.state()
            .bindings
            .get(binding)
            .is_none_or(|slot| slot.error.is_some())
    }

    /// The value a reader of `cell` sees: the shadow while proxied.
    pub(crate) fn read_value<T: Clone + 'static>(&self, cell: CellId, storage: &RefCell<T>) -> T {
        let shadow = self.state().group.shadow::<T>(cell);
        match shadow {
            Some(shadow) => shadow.borrow().clone(),
            None => storage.borrow().clone(),
        }
    }

    /// Store `value` into `cell`, deferring it if an update group is open.
    pub(crate) fn store_value<T: Clone + PartialEq + 'static>(
        &self,
        cell: CellId,
        storage: &Rc<RefCell<T>>,
        value: T,
    ) -> Stored {
        let shadow = self.state().group.shadow::<T>(cell);
        if let Some(shadow) = shadow {
            if *shadow.borrow() == value {
                return Stored::Unchanged;
            }
            let old = mem::replace(&mut *shadow.borrow_mut(), value);
            drop(old);
            return Stored::Deferred;
        }

        if *storage.borrow() == value {
            return Stored::Unchanged;
        }

        let value = {
            let mut state = self.state_mut();
            let proxied = if state.group.phase == GroupPhase::Open {
                state
                    .cells
                    .get_mut(cell)
                    .map(|slot| mem::replace(&mut slot.metadata, BindingMetadata::Proxy))
            } else {
                None
            };
            match proxied {
                Some(original) => {
                    let redirect = ProxyRedirect::new(original, storage, value);
                    state.group.pending.insert(cell, redirect);
                    cov_mark::hit!(proxy_installed);
                    trace!(?cell, "deferring write until the update group closes");
                    return Stored::Deferred;
                }
                None => value,
            }
        };

        let old = mem::replace(&mut *storage.borrow_mut(), value);
        drop(old);
        Stored::Changed
    }

    /// A user write: drops a non-sticky binding, stores and notifies.
    pub(crate) fn write<T: Clone + PartialEq + 'static>(
        &self,
        cell: CellId,
        storage: &Rc<RefCell<T>>,
        value: T,
    ) {
        self.break_read_write_cycle(cell);
        let removed = {
            let mut state = self.state_mut();
            let sticky = state
                .binding_of(cell)
                .and_then(|binding| state.bindings.get(binding))
                .is_some_and(|slot| slot.sticky);
            if sticky {
                cov_mark::hit!(sticky_binding_kept);
                None
            } else {
                state.take_binding(cell)
            }
        };
        drop(removed);

        if self.store_value(cell, storage, value) == Stored::Changed {
            self.notify_observers(cell);
        }
        self.flush_pending();
    }

    /// A binding that writes a cell it also depends on would re-trigger
    /// itself forever; its read of that cell is treated as untracked.
    fn break_read_write_cycle(&self, cell: CellId) {
        let mut state = self.state_mut();
        let Some(current) = state.current_binding() else {
            return;
        };
        let Some(slot) = state.bindings.get_mut(current) else {
            return;
        };
        let Some(node) = slot.dependencies.shift_remove(&cell) else {
            return;
        };
        let location = slot.location;
        state.unlink_observer(node);

        cov_mark::hit!(read_write_cycle_broken);
        warn!(
            ?cell,
            %location,
            "binding both reads and writes a property; the read is treated as untracked"
        );
    }

    /// Evaluate `binding` now. Returns whether its value changed.
    pub(crate) fn evaluate(&self, binding: BindingId) -> bool {
        let (function, owner) = {
            let mut state = self.state_mut();
            let depth = state.evaluation_depth();
            let max_depth = state.config.max_evaluation_depth;
            let Some(slot) = state.bindings.get_mut(binding) else {
                return false;
            };

            if slot.updating {
                drop(state);
                self.report_loop(binding);
                return false;
            }
            if depth >= max_depth {
                cov_mark::hit!(evaluation_depth_exceeded);
                let error = BindingError::DepthExceeded {
                    max_depth,
                    location: slot.location,
                };
                warn!("{error}");
                slot.error = Some(error);
                slot.state = ReactiveState::Dirty;
                // Every binding waiting on this one would cache a stale result.
                let waiting: Vec<BindingId> = state.evaluation.iter().flatten().copied().collect();
                for binding in waiting {
                    if let Some(slot) = state.bindings.get_mut(binding) {
                        if slot.error.is_none() {
                            slot.error = Some(BindingError::DepthExceeded {
                                max_depth,
                                location: slot.location,
                            });
                        }
                    }
                }
                return false;
            }
            let Some(function) = slot.function.take() else {
                return false;
            };

            slot.updating = true;
            slot.state = ReactiveState::Clean;
            slot.error = None;
            let owner = slot.owner;
            let location = slot.location;
            let dependencies: Vec<ObserverId> =
                slot.dependencies.drain(..).map(|(_, node)| node).collect();
            for node in dependencies {
                state.unlink_observer(node);
            }
            state.pending_eager.shift_remove(&binding);
            state.evaluation.push(Some(binding));
            trace!(?binding, %location, "evaluating binding");
            (function, owner)
        };

        // Still updating while the change propagates, so a dependent that
        // leads back here is caught as a loop.
        let _updating = UpdatingGuard {
            runtime: self,
            binding,
        };
        let mut guard = EvaluationGuard {
            runtime: self,
            binding,
            function: Some(function),
        };
        let stored = guard.run();
        drop(guard);

        {
            let mut state = self.state_mut();
            if let Some(slot) = state.bindings.get_mut(binding) {
                if matches!(slot.error, Some(BindingError::DepthExceeded { .. })) {
                    slot.state = ReactiveState::Dirty;
                }
            }
        }

        if stored == Stored::Changed {
            self.notify_observers(owner);
            return true;
        }
        false
    }

    /// Pull `binding` up to date: verify Check sources, recompute if Dirty.
    pub(crate) fn update_if_necessary(&self, binding: BindingId) -> bool {
        let current = self.state().binding_state(binding);
        match current {
            ReactiveState::Clean => false,
            ReactiveState::Check => {
                let sources: Vec<CellId> = self
                    .state()
                    .bindings
                    .get(binding)
                    .map(|slot| slot.dependencies.keys().copied().collect())
                    .unwrap_or_default();

                for cell in sources {
                    let upstream = {
                        let state = self.state();
                        state
                            .binding_of(cell)
                            .map(|upstream| (upstream, state.activity(upstream)))
                    };
                    match upstream {
                        // The source is evaluating and is waiting on us.
                        Some((upstream, Activity::Running)) => self.report_loop(upstream),
                        Some((upstream, Activity::Idle)) => {
                            self.update_if_necessary(upstream);
                            // An aborted source cannot vouch for us; stay Check.
                            if self.state().binding_state(upstream) == ReactiveState::Dirty {
                                return false;
                            }
                        }
                        Some((_, Activity::Notifying)) | None => {}
                    }
                    if self.state().binding_state(binding) == ReactiveState::Dirty {
                        cov_mark::hit!(check_upgraded_to_dirty_by_pull);
                        break;
                    }
                }

                let mut state = self.state_mut();
                match state.bindings.get_mut(binding) {
                    Some(slot) if slot.state == ReactiveState::Check => {
                        cov_mark::hit!(check_verified_clean);
                        slot.state = ReactiveState::Clean;
                        false
                    }
                    Some(slot) if slot.state == ReactiveState::Dirty => {
                        drop(state);
                        self.evaluate(binding)
                    }
                    _ => false,
                }
            }
            ReactiveState::Dirty => self.evaluate(binding),
        }
    }

    /// Deliver a change of `cell` to its observers in registration order.
    pub(crate) fn notify_observers(&self, cell: CellId) {
        let observers = self.state().observer_snapshot(cell);
        for id in observers {
            let delivery = {
                let mut state = self.state_mut();
                match state.observers.get_mut(id).map(|node| &mut node.kind) {
                    Some(ObserverKind::Binding(binding)) => Delivery::MarkDirty(*binding),
                    Some(ObserverKind::Handler(handler)) => match handler.take() {
                        Some(handler) => Delivery::Call(handler),
                        // Already running further up the stack.
                        None => continue,
                    },
                    None => continue,
                }
            };
            match delivery {
                Delivery::MarkDirty(binding) => self.state_mut().mark_dirty(binding),
                Delivery::Call(handler) => HandlerGuard::new(self, id, handler).run(),
            }
        }
        // Eager dependents run once every sibling has been marked.
        self.flush_pending();
    }

    /// Evaluate queued eager bindings unless a binding function is running or
    /// an update group is active.
    pub(crate) fn flush_pending(&self) {
        loop {
            let next = {
                let mut state = self.state_mut();
                if state.evaluation_depth() > 0
                    || state.group.depth > 0
                    || state.group.phase != GroupPhase::Idle
                {
                    return;
                }
                state.pending_eager.shift_remove_index(0)
            };
            let Some(binding) = next else {
                return;
            };
            self.update_if_necessary(binding);
        }
    }

    /// Install `binding` on `cell` and evaluate it; returns the one it replaced.
    pub(crate) fn install_binding<T: Clone + PartialEq + 'static>(
        &self,
        cell: CellId,
        storage: &Rc<RefCell<T>>,
        binding: PropertyBinding<T>,
    ) -> Option<PropertyBinding<T>> {
        let eager = binding.is_eager();
        let sticky = binding.is_sticky();
        let location = binding.location();
        let function = Box::new(TypedBinding::new(binding, cell, Rc::clone(storage)));

        let (id, replaced) = {
            let mut state = self.state_mut();
            if !state.cells.contains(cell) {
                drop(state);
                return TypedBinding::recover(function);
            }
            let replaced = state.take_binding(cell);
            let eager = eager.unwrap_or(state.config.eager_by_default);
            let id = state
                .bindings
                .insert(BindingSlot::new(cell, function, eager, sticky, location));
            let previous = state
                .metadata_mut(cell)
                .map(|metadata| mem::replace(metadata, BindingMetadata::Binding(id)));
            if let Some(BindingMetadata::Observers(list)) = previous {
                if let Some(slot) = state.bindings.get_mut(id) {
                    slot.observers = list;
                }
            }
            (id, replaced)
        };

        let replaced = replaced
            .and_then(|slot| slot.function)
            .and_then(TypedBinding::recover);
        self.evaluate(id);
        self.flush_pending();
        replaced
    }

    /// Remove the binding of `cell`, keeping its last value. Returns whether
    /// one was installed, even if its function is running right now.
    pub(crate) fn remove_binding(&self, cell: CellId) -> bool {
        let removed = self.state_mut().take_binding(cell);
        let found = removed.is_some();
        drop(removed);
        found
    }

    /// Detach the binding of `cell`, keeping its last value.
    pub(crate) fn detach_binding<T: Clone + PartialEq + 'static>(
        &self,
        cell: CellId,
    ) -> Option<PropertyBinding<T>> {
        let slot = self.state_mut().take_binding(cell)?;
        slot.function.and_then(TypedBinding::recover)
    }

    /// Tear down a dropped property.
    pub(crate) fn destroy_cell(&self, cell: CellId) {
        let (redirect, binding, nodes) = {
            let mut state = self.state_mut();
            let redirect = state.group.pending.shift_remove(&cell).map(|redirect| {
                if let Some(slot) = state.cells.get_mut(cell) {
                    slot.metadata = redirect.original;
                }
                (redirect.shadow, redirect.commit)
            });
            let binding = state.take_binding(cell);

            let mut nodes = Vec::new();
            for node in state.unlink_all_observers(cell) {
                match node.kind {
                    ObserverKind::Binding(dependent) => {
                        if let Some(slot) = state.bindings.get_mut(dependent) {
                            cov_mark::hit!(stale_subscription_removed);
                            slot.dependencies.shift_remove(&cell);
                        }
                    }
                    ObserverKind::Handler(_) => nodes.push(node),
                }
            }
            state.cells.remove(cell);
            (redirect, binding, nodes)
        };
        drop(redirect);
        drop(binding);
        drop(nodes);
    }

    /// Register `handler` to run whenever `cell` changes.
    pub(crate) fn add_handler(&self, cell: CellId, handler: Box<dyn FnMut()>) -> Option<ObserverId> {
        let result = self
            .state_mut()
            .append_observer(cell, ObserverKind::Handler(Some(handler)));
        result.ok()
    }

    /// Unregister a change handler.
    pub(crate) fn remove_handler(&self, id: ObserverId) {
        let node = self.state_mut().unlink_observer(id);
        drop(node);
    }
}

enum Delivery {
    MarkDirty(BindingId),
    Call(Box<dyn FnMut()>),
}

/// Pops an evaluation frame on drop.
struct FrameGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> FrameGuard<'a> {
    fn push(runtime: &'a Runtime, frame: Option<BindingId>) -> Self {
        runtime.state_mut().evaluation.push(frame);
        Self { runtime }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.runtime.state_mut().evaluation.pop();
    }
}

/// Clears a binding's `updating` flag on drop.
struct UpdatingGuard<'a> {
    runtime: &'a Runtime,
    binding: BindingId,
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.runtime.state_mut().bindings.get_mut(self.binding) {
            slot.updating = false;
        }
    }
}

/// Owns a binding function while it runs.
///
/// On drop (even on panic) the frame is popped and the function put back. If
/// the binding was removed meanwhile the function is dropped instead, after
/// the state borrow is released.
struct EvaluationGuard<'a> {
    runtime: &'a Runtime,
    binding: BindingId,
    function: Option<Box<dyn BindingFunction>>,
}

impl EvaluationGuard<'_> {
    fn run(&mut self) -> Stored {
        match self.function.as_mut() {
            Some(function) => function.evaluate(self.runtime, self.binding),
            None => Stored::Unchanged,
        }
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        let orphan = {
            let mut state = self.runtime.state_mut();
            state.evaluation.pop();
            match state.bindings.get_mut(self.binding) {
                Some(slot) => {
                    slot.function = self.function.take();
                    None
                }
                None => self.function.take(),
            }
        };
        drop(orphan);
    }
}

/// Owns a change handler while it runs with tracking suspended.
struct HandlerGuard<'a> {
    frame: FrameGuard<'a>,
    id: ObserverId,
    handler: Option<Box<dyn FnMut()>>,
}

impl<'a> HandlerGuard<'a> {
    fn new(runtime: &'a Runtime, id: ObserverId, handler: Box<dyn FnMut()>) -> Self {
        Self {
            frame: FrameGuard::push(runtime, None),
            id,
            handler: Some(handler),
        }
    }

    fn run(mut self) {
        if let Some(handler) = self.handler.as_mut() {
            handler();
        }
    }
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        let mut state = self.frame.runtime.state_mut();
        if let Some(ObserverKind::Handler(slot)) =
            state.observers.get_mut(self.id).map(|node| &mut node.kind)
        {
            *slot = Some(handler);
            return;
        }
        drop(state);
        drop(handler);
    }
}
