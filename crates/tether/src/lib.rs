#![forbid(unsafe_code)]

//! Reactive data-binding core.
//!
//! tether keeps derived values synchronized with a mutating data tree and
//! notifies consumers exactly when an observed value actually changes. The
//! facade re-exports the two halves:
//!
//! - [`tether_observe`]: observable objects and arrays, path observers
//!   that re-link as intermediate containers are replaced, and the
//!   per-view [`Context`].
//! - [`tether_bind`]: the `target | formatter args < watched.paths`
//!   expression language and its compiler into get/set/notify
//!   [`Observer`]s.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use tether::{
//!     Context, Formatter, FormatterRegistry, ObjectRef, Value, compile, parse,
//! };
//!
//! let model: ObjectRef = [("value".to_string(), Value::from(3))]
//!     .into_iter()
//!     .collect();
//! let ctx = Context::new(Value::from(model.clone())).unwrap();
//! let registry = FormatterRegistry::new().with(
//!     "double",
//!     Formatter::pair(
//!         |v, _| Value::Number(v.coerce_number() * 2.0),
//!         |v, _| Value::Number(v.coerce_number() / 2.0),
//!     ),
//! );
//!
//! let observer = compile(&parse("value | double").unwrap(), &ctx, &registry).unwrap();
//! assert_eq!(observer.get(), Value::from(6));
//!
//! observer.notify(Rc::new(|new, _old| {
//!     assert_eq!(new, &Value::from(10));
//! }));
//! model.set("value", Value::from(5));
//!
//! observer.set(Value::from(10)).unwrap();
//! assert_eq!(model.get("value"), Value::from(5));
//! ```

pub use tether_bind::{
    CompileError, Expression, Formatter, FormatterFn, FormatterInvocation, FormatterRegistry,
    Observer, ObserverCallback, ParseError, SetError, Target, compile, parse,
};
pub use tether_observe::{
    AccessError, ArrayListener, ArrayRef, Context, ContextCallback, Getter, ObjectRef,
    PathDescriptor, PathNotifier, PathObserver, PropertyListener, Setter, Slot, SlotFlags, Value,
    assign, resolve,
};

/// Everything a directive implementation typically needs.
pub mod prelude {
    pub use tether_bind::{Formatter, FormatterRegistry, Observer, compile, parse};
    pub use tether_observe::{ArrayRef, Context, ObjectRef, PathDescriptor, Value};
}
