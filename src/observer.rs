use std::fmt;

use crate::arena::ObserverId;
use crate::runtime::Runtime;

/// Registration of a change handler.
///
/// Created by [`Bindable::on_value_changed`](crate::Bindable::on_value_changed)
/// and [`Bindable::subscribe`](crate::Bindable::subscribe). The handler stays
/// registered until this value is dropped or [`detach`](Self::detach)ed, or
/// until the observed property is dropped.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use propgraph::Runtime;
///
/// let runtime = Runtime::new();
/// let value = runtime.property(0);
/// let last = Rc::new(Cell::new(0));
///
/// let seen = Rc::clone(&last);
/// let handler = value.on_value_changed(move |v| seen.set(*v));
/// value.set(3);
/// assert_eq!(last.get(), 3);
///
/// drop(handler);
/// value.set(4);
/// assert_eq!(last.get(), 3);
/// ```
#[must_use = "the handler is removed as soon as this is dropped"]
pub struct ChangeHandler {
    runtime: Runtime,
    id: Option<ObserverId>,
}

impl ChangeHandler {
    pub(crate) fn new(runtime: &Runtime, id: Option<ObserverId>) -> Self {
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    /// Whether the handler is still registered.
    pub fn is_attached(&self) -> bool {
        self.id
            .is_some_and(|id| self.runtime.state().observers.contains(id))
    }

    /// Unregister the handler now.
    pub fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.remove_handler(id);
        }
    }
}

impl Drop for ChangeHandler {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ChangeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeHandler")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let runtime = Runtime::new();
        let value = runtime.property(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let handlers: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let order = Rc::clone(&order);
                value.on_value_changed(move |_| order.borrow_mut().push(name))
            })
            .collect();
        value.set(1);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
        drop(handlers);
    }

    #[test]
    fn detach_is_idempotent() {
        let runtime = Runtime::new();
        let value = runtime.property(0);
        let mut handler = value.on_value_changed(|_| {});
        assert!(handler.is_attached());
        handler.detach();
        handler.detach();
        assert!(!handler.is_attached());
        assert_eq!(value.observer_count(), 0);
    }

    #[test]
    fn dropping_the_property_detaches_handlers() {
        let runtime = Runtime::new();
        let value = runtime.property(0);
        let handler = value.on_value_changed(|_| {});
        drop(value);
        assert!(!handler.is_attached());
    }

    #[test]
    fn handler_may_detach_itself() {
        let runtime = Runtime::new();
        let value = runtime.property(0);
        let slot: Rc<RefCell<Option<ChangeHandler>>> = Rc::default();
        let calls = Rc::new(RefCell::new(0));

        let (own, counter) = (Rc::clone(&slot), Rc::clone(&calls));
        let handler = value.on_value_changed(move |_| {
            *counter.borrow_mut() += 1;
            own.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(handler);

        value.set(1);
        value.set(2);
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(value.observer_count(), 0);
    }
}
