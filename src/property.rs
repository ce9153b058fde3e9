use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::arena::{BindingSlot, CellId};
use crate::binding::PropertyBinding;
use crate::error::BindingError;
use crate::observer::ChangeHandler;
use crate::runtime::Runtime;

/// A property: a value that bindings can compute and observers can watch.
///
/// `Property<T>` owns its cell. Dropping it removes its binding, detaches its
/// change handlers and unsubscribes every binding that read it; those
/// bindings keep their last value.
///
/// All operations live on [`Bindable<T>`], which `Property<T>` dereferences
/// to. Closures that need to read or write the property capture a bindable
/// obtained from [`bindable`](Bindable::bindable).
///
/// `T` needs `PartialEq`: writing a value equal to the current one does
/// nothing, so no observer hears about it. Types without a meaningful
/// equality can be wrapped in a newtype whose `eq` always returns `false`.
pub struct Property<T> {
    bindable: Bindable<T>,
}

impl<T: Clone + PartialEq + 'static> Property<T> {
    /// Create a property holding `value` in `runtime`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            bindable: Bindable {
                id: runtime.insert_cell(),
                storage: Rc::new(RefCell::new(value)),
                runtime: runtime.clone(),
            },
        }
    }
}

impl<T> Deref for Property<T> {
    type Target = Bindable<T>;

    fn deref(&self) -> &Bindable<T> {
        &self.bindable
    }
}

impl<T> Drop for Property<T> {
    fn drop(&mut self) {
        self.bindable.runtime.destroy_cell(self.bindable.id);
    }
}

impl<T: fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Property").field(&self.bindable).finish()
    }
}

/// A non-owning handle to a [`Property`].
///
/// Bindables are cheap to clone and are what binding functions and handlers
/// capture. Once the property is dropped, a bindable keeps working on a
/// detached copy of the value: reads and writes succeed but nothing is
/// tracked or notified.
pub struct Bindable<T> {
    id: CellId,
    storage: Rc<RefCell<T>>,
    runtime: Runtime,
}

impl<T> Clone for Bindable<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            storage: Rc::clone(&self.storage),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Bindable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindable")
            .field("id", &self.id)
            .field("value", &self.storage.borrow())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Bindable<T> {
    /// Identity of the property inside its runtime.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// The runtime the property belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Another handle to the same property.
    pub fn bindable(&self) -> Bindable<T> {
        self.clone()
    }

    /// Read the value.
    ///
    /// A stale binding is brought up to date first. Inside a binding function
    /// the read also records the property as a dependency of that binding.
    pub fn get(&self) -> T {
        self.runtime.track_read(self.id);
        self.runtime.read_value(self.id, &self.storage)
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.runtime.untracked(|| self.get())
    }

    /// Write the value, removing the binding first unless it is
    /// [`sticky`](PropertyBinding::sticky).
    ///
    /// Observers are notified only if the value differs from the current one.
    pub fn set(&self, value: T) {
        self.runtime.write(self.id, &self.storage, value);
    }

    /// Install a binding and evaluate it.
    ///
    /// Returns the binding it replaced, if any.
    pub fn set_binding(&self, binding: PropertyBinding<T>) -> Option<PropertyBinding<T>> {
        self.runtime.install_binding(self.id, &self.storage, binding)
    }

    /// Bind the property to `f`.
    ///
    /// Shorthand for `set_binding(PropertyBinding::new(f))`.
    #[track_caller]
    pub fn bind(&self, f: impl FnMut() -> T + 'static) -> Option<PropertyBinding<T>> {
        self.set_binding(PropertyBinding::new(f))
    }

    /// Remove the binding, keeping its last value. Returns whether one was
    /// installed.
    pub fn remove_binding(&self) -> bool {
        self.runtime.remove_binding(self.id)
    }

    /// Remove the binding and hand it back, keeping its last value.
    pub fn take_binding(&self) -> Option<PropertyBinding<T>> {
        self.runtime.detach_binding(self.id)
    }

    /// Whether a binding computes this property.
    pub fn has_binding(&self) -> bool {
        self.runtime.state().binding_of(self.id).is_some()
    }

    /// Whether the binding's cached value may be stale.
    pub fn is_dirty(&self) -> bool {
        let state = self.runtime.state();
        state
            .binding_of(self.id)
            .and_then(|binding| state.bindings.get(binding))
            .is_some_and(BindingSlot::needs_work)
    }

    /// Why the last evaluation of the binding failed, if it did.
    pub fn binding_error(&self) -> Option<BindingError> {
        let state = self.runtime.state();
        let binding = state.binding_of(self.id)?;
        state.bindings.get(binding)?.error.clone()
    }

    /// Whether the binding was caught in a loop during its last evaluation.
    pub fn has_binding_loop(&self) -> bool {
        matches!(self.binding_error(), Some(BindingError::BindingLoop { .. }))
    }

    /// Number of bindings and handlers observing this property.
    pub fn observer_count(&self) -> usize {
        self.runtime
            .state()
            .observer_list(self.id)
            .map_or(0, |list| list.len())
    }

    /// Number of properties the binding read during its last evaluation.
    pub fn dependency_count(&self) -> usize {
        let state = self.runtime.state();
        state
            .binding_of(self.id)
            .and_then(|binding| state.bindings.get(binding))
            .map_or(0, |slot| slot.dependencies.len())
    }

    /// Call `f` with the new value every time the property changes.
    ///
    /// Handlers run in registration order, without dependency tracking. The
    /// registration lasts as long as the returned [`ChangeHandler`].
    pub fn on_value_changed(&self, mut f: impl FnMut(&T) + 'static) -> ChangeHandler {
        let storage = Rc::downgrade(&self.storage);
        let handler = Box::new(move || {
            let Some(storage) = storage.upgrade() else {
                return;
            };
            let value = storage.borrow().clone();
            f(&value);
        });
        ChangeHandler::new(&self.runtime, self.runtime.add_handler(self.id, handler))
    }

    /// Like [`on_value_changed`](Self::on_value_changed), but also calls `f`
    /// once right away with the current value.
    pub fn subscribe(&self, mut f: impl FnMut(&T) + 'static) -> ChangeHandler {
        let current = self.get_untracked();
        f(&current);
        self.on_value_changed(f)
    }
}
