#![deny(missing_docs)]

//! A standalone reactive property and binding engine.
//!
//! Properties hold values. A property can instead be computed by a binding, a
//! function whose reads of other properties are recorded automatically. When
//! any of those properties changes, the binding is marked stale and its value
//! recomputed: lazily on the next read by default, or right away for eager
//! bindings. Writing an equal value is a no-op, so change propagation stops
//! as soon as a value settles.
//!
//! # Quick Start
//!
//! ```
//! use propgraph::Runtime;
//!
//! let runtime = Runtime::new();
//! let width = runtime.property(4.0_f64);
//! let height = runtime.property(3.0_f64);
//! let ratio = runtime.property(0.0_f64);
//!
//! let (w, h) = (width.bindable(), height.bindable());
//! ratio.bind(move || w.get() / h.get());
//! assert_eq!(ratio.get(), 4.0 / 3.0);
//!
//! // Observers hear about every committed change.
//! let _handler = ratio.on_value_changed(|ratio| println!("ratio: {ratio}"));
//!
//! // Group writes so observers see one consistent change.
//! runtime.batch(|| {
//!     width.set(16.0);
//!     height.set(9.0);
//! });
//! assert_eq!(ratio.get(), 16.0 / 9.0);
//! ```
//!
//! # Core Types
//!
//! - [`Runtime`] - One engine instance. Owns the dependency graph.
//! - [`Property<T>`] - A value that can be bound and observed.
//! - [`Bindable<T>`] - Cloneable handle to a property, captured by bindings.
//! - [`PropertyBinding<T>`] - A reusable binding function.
//! - [`ChangeHandler`] - Registration of a change callback.
//! - [`UpdateGroup`] - A delayed update session.
//!
//! # Bindings
//!
//! ```
//! # use propgraph::{PropertyBinding, Runtime};
//! # let runtime = Runtime::new();
//! # let input = runtime.property(1);
//! # let output = runtime.property(0);
//! let i = input.bindable();
//! output.bind(move || i.get() * 2);                       // lazy
//!
//! let i = input.bindable();
//! output.set_binding(PropertyBinding::new(move || i.get() * 3).eager());
//!
//! output.take_binding();                                 // keep last value
//! # assert_eq!(output.get(), 3);
//! ```
//!
//! # Errors
//!
//! A binding that ends up reading itself, directly or through other
//! bindings, keeps its previous value and reports
//! [`BindingError::BindingLoop`]. A chain of bindings nesting deeper than
//! [`RuntimeBuilder::max_evaluation_depth`] reports
//! [`BindingError::DepthExceeded`] and stays dirty. A binding function can
//! fail its own pass with [`Runtime::report_binding_error`], which reports
//! [`BindingError::Evaluation`]. All of them are queried with
//! [`Bindable::binding_error`]; none panics.
//!
//! # Logging
//!
//! Diagnostics are emitted through [`tracing`]: binding loops, depth
//! overflows and read/write cycles at `warn`, update group commits at
//! `debug`, individual evaluations at `trace`.

// Internal modules
pub(crate) mod arena;
mod binding;
mod error;
mod hash;
mod observer;
mod property;
mod runtime;
mod update_group;

// Core types
pub use binding::PropertyBinding;
pub use observer::ChangeHandler;
pub use property::{Bindable, Property};
pub use runtime::{DEFAULT_EAGER, DEFAULT_MAX_EVALUATION_DEPTH, Runtime, RuntimeBuilder, RuntimeConfig};
pub use update_group::{SessionState, UpdateGroup};

// Errors
pub use error::{BindingError, UpdateGroupError};

// Identity
pub use arena::CellId;
