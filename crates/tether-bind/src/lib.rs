#![forbid(unsafe_code)]

//! Expression language and binding compiler for tether.
//!
//! The upper half of the engine: a small declarative expression language
//! (`target | formatter args < watched.paths`), a per-view formatter
//! registry, and the compiler that turns parsed expressions into the
//! get/set/notify [`Observer`] contract directives consume.
//!
//! Parsing is pure; dependency tracking and value access go through a
//! [`tether_observe::Context`].

pub mod expr;
pub mod formatter;
pub mod observer;

pub use expr::{Expression, FormatterInvocation, ParseError, Target, parse};
pub use formatter::{Formatter, FormatterFn, FormatterRegistry};
pub use observer::{CompileError, Observer, ObserverCallback, SetError, compile};
