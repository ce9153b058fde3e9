//! Error values reported by bindings and update groups.
//!
//! Nothing in the engine panics on a recoverable condition. A failed binding
//! pass keeps the previous value and records why it failed on the binding,
//! where [`Bindable::binding_error`](crate::Bindable::binding_error) exposes it.

use std::panic::Location;

use thiserror::Error;

/// Why the last evaluation of a binding was aborted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The binding was re-entered while it was already being evaluated.
    #[error("binding loop detected for binding created at {location}")]
    BindingLoop {
        /// Where the binding was created.
        location: &'static Location<'static>,
    },
    /// Evaluating the binding would nest deeper than the configured limit.
    #[error("evaluation depth exceeded {max_depth} for binding created at {location}")]
    DepthExceeded {
        /// The configured maximum nesting depth.
        max_depth: usize,
        /// Where the binding was created.
        location: &'static Location<'static>,
    },
    /// The binding function reported a failure with
    /// [`Runtime::report_binding_error`](crate::Runtime::report_binding_error).
    #[error("binding created at {location} failed: {message}")]
    Evaluation {
        /// What the binding function reported.
        message: String,
        /// Where the binding was created.
        location: &'static Location<'static>,
    },
}

impl BindingError {
    /// Source location of the binding that failed.
    pub fn location(&self) -> &'static Location<'static> {
        match self {
            BindingError::BindingLoop { location } => location,
            BindingError::DepthExceeded { location, .. } => location,
            BindingError::Evaluation { location, .. } => location,
        }
    }
}

/// Errors returned when closing an update group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum UpdateGroupError {
    /// `close` was called on a group that already closed.
    #[error("update group already closed")]
    AlreadyClosed,
}
