use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;

use crate::arena::{BindingId, CellId};
use crate::runtime::{Runtime, Stored};

/// A reusable binding: the function that computes a property's value.
///
/// A binding is inert until it is installed with
/// [`Bindable::set_binding`](crate::Bindable::set_binding). Installing it
/// evaluates it once and from then on every property it reads is tracked as
/// a dependency. Removing a binding with
/// [`Bindable::take_binding`](crate::Bindable::take_binding) hands it back so
/// it can be installed on another property of the same type.
///
/// By default a binding is lazy: when a dependency changes it is only marked
/// dirty and recomputes on the next read. [`eager`](Self::eager) bindings
/// recompute as soon as the outermost mutation finishes.
///
/// A plain [`set`](crate::Bindable::set) removes the binding unless it is
/// [`sticky`](Self::sticky).
///
/// # Example
///
/// ```
/// use propgraph::{PropertyBinding, Runtime};
///
/// let runtime = Runtime::new();
/// let celsius = runtime.property(20.0);
/// let fahrenheit = runtime.property(0.0);
///
/// let c = celsius.bindable();
/// fahrenheit.set_binding(PropertyBinding::new(move || c.get() * 9.0 / 5.0 + 32.0));
/// assert_eq!(fahrenheit.get(), 68.0);
/// ```
pub struct PropertyBinding<T> {
    function: Box<dyn FnMut() -> T>,
    location: &'static Location<'static>,
    eager: Option<bool>,
    sticky: bool,
}

impl<T: 'static> PropertyBinding<T> {
    /// Wrap `function`, recording the caller's location for diagnostics.
    #[track_caller]
    pub fn new(function: impl FnMut() -> T + 'static) -> Self {
        Self {
            function: Box::new(function),
            location: Location::caller(),
            eager: None,
            sticky: false,
        }
    }

    /// Recompute as soon as a dependency changes instead of on the next read.
    pub fn eager(mut self) -> Self {
        self.eager = Some(true);
        self
    }

    /// Recompute on the next read, even if the runtime defaults to eager.
    pub fn lazy(mut self) -> Self {
        self.eager = Some(false);
        self
    }

    /// Keep the binding installed when the property is written directly.
    ///
    /// The written value holds until a dependency changes and the binding
    /// recomputes. [`take_binding`](crate::Bindable::take_binding) and
    /// [`remove_binding`](crate::Bindable::remove_binding) still remove it.
    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    /// Whether the binding survives direct writes.
    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// Where this binding was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The explicit evaluation policy, if one was chosen.
    pub fn is_eager(&self) -> Option<bool> {
        self.eager
    }
}

impl<T> fmt::Debug for PropertyBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBinding")
            .field("location", &self.location)
            .field("eager", &self.eager)
            .field("sticky", &self.sticky)
            .finish_non_exhaustive()
    }
}

/// Type-erased evaluation function stored in a binding record.
pub(crate) trait BindingFunction {
    /// Run the user function and store its result into the owning cell.
    fn evaluate(&mut self, runtime: &Runtime, binding: BindingId) -> Stored;

    /// Recover the concrete type, used to hand a removed binding back.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// The binding function of a `Property<T>`.
pub(crate) struct TypedBinding<T> {
    binding: PropertyBinding<T>,
    owner: CellId,
    storage: Rc<RefCell<T>>,
}

impl<T: Clone + PartialEq + 'static> TypedBinding<T> {
    pub(crate) fn new(binding: PropertyBinding<T>, owner: CellId, storage: Rc<RefCell<T>>) -> Self {
        Self {
            binding,
            owner,
            storage,
        }
    }

    /// Turn a removed binding function back into the user's binding.
    pub(crate) fn recover(function: Box<dyn BindingFunction>) -> Option<PropertyBinding<T>> {
        function
            .into_any()
            .downcast::<TypedBinding<T>>()
            .ok()
            .map(|typed| typed.binding)
    }
}

impl<T: Clone + PartialEq + 'static> BindingFunction for TypedBinding<T> {
    fn evaluate(&mut self, runtime: &Runtime, binding: BindingId) -> Stored {
        let value = (self.binding.function)();
        // A loop detected during the pass invalidates its result.
        if runtime.evaluation_failed(binding) {
            return Stored::Unchanged;
        }
        runtime.store_value(self.owner, &self.storage, value)
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_records_creation_site() {
        let binding = PropertyBinding::new(|| 1);
        assert_eq!(binding.location().file(), file!());
        assert_eq!(binding.is_eager(), None);
        assert_eq!(binding.eager().is_eager(), Some(true));
        assert_eq!(PropertyBinding::new(|| 1).lazy().is_eager(), Some(false));
    }

    #[test]
    fn recover_checks_the_value_type() {
        let runtime = Runtime::new();
        let cell = runtime.property(0u32);
        let function: Box<dyn BindingFunction> = Box::new(TypedBinding::new(
            PropertyBinding::new(|| 3u32),
            cell.id(),
            Rc::new(RefCell::new(0u32)),
        ));
        assert!(TypedBinding::<i64>::recover(function).is_none());

        let function: Box<dyn BindingFunction> = Box::new(TypedBinding::new(
            PropertyBinding::new(|| 3u32),
            cell.id(),
            Rc::new(RefCell::new(0u32)),
        ));
        let mut binding = TypedBinding::<u32>::recover(function).unwrap();
        assert_eq!((binding.function)(), 3);
    }
}
