#![forbid(unsafe_code)]

//! Formatter registry.
//!
//! A formatter is a pull transform and an optional push inverse. Pull runs
//! on reads, left-to-right along the expression's chain; push runs on
//! writes, right-to-left. A formatter registered from a bare pull function
//! is read-only: a write traversing it fails at the observer layer.
//!
//! Registries are explicit per-view configuration, never global state.
//! [`FormatterRegistry::merged`] combines two registries into a third
//! without mutating either, so views can layer app-wide defaults under
//! view-specific additions while sharing nothing mutable.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use tether_observe::Value;

/// Transform applied to the running value; extra slice holds the values of
/// the invocation's argument targets.
pub type FormatterFn = Rc<dyn Fn(Value, &[Value]) -> Value>;

/// A named transform pair.
#[derive(Clone)]
pub struct Formatter {
    pull: FormatterFn,
    push: Option<FormatterFn>,
}

impl Formatter {
    /// A read-only formatter from a bare pull function.
    pub fn pull(pull: impl Fn(Value, &[Value]) -> Value + 'static) -> Self {
        Self {
            pull: Rc::new(pull),
            push: None,
        }
    }

    /// A two-way formatter.
    pub fn pair(
        pull: impl Fn(Value, &[Value]) -> Value + 'static,
        push: impl Fn(Value, &[Value]) -> Value + 'static,
    ) -> Self {
        Self {
            pull: Rc::new(pull),
            push: Some(Rc::new(push)),
        }
    }

    #[must_use]
    pub fn has_push(&self) -> bool {
        self.push.is_some()
    }

    #[must_use]
    pub fn apply_pull(&self, value: Value, args: &[Value]) -> Value {
        (self.pull)(value, args)
    }

    /// `None` when the formatter is read-only.
    #[must_use]
    pub fn apply_push(&self, value: Value, args: &[Value]) -> Option<Value> {
        self.push.as_ref().map(|push| push(value, args))
    }
}

impl std::fmt::Debug for Formatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Formatter")
            .field("two_way", &self.has_push())
            .finish()
    }
}

/// Name-to-formatter mapping, resolved eagerly at compile time.
#[derive(Clone, Default)]
pub struct FormatterRegistry {
    map: FxHashMap<String, Formatter>,
}

impl FormatterRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in formatters. Opt-in: nothing installs these implicitly.
    ///
    /// - `not`: boolean negation of truthiness (read-only)
    /// - `negate`: numeric negation (two-way, its own inverse)
    /// - `length`: array length, string length in characters (read-only)
    /// - `default`: first argument when the value is undefined/null
    ///   (read-only)
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with("not", Formatter::pull(|v, _| Value::Bool(!v.is_truthy())))
            .with(
                "negate",
                Formatter::pair(
                    |v, _| Value::Number(-v.coerce_number()),
                    |v, _| Value::Number(-v.coerce_number()),
                ),
            )
            .with(
                "length",
                Formatter::pull(|v, _| match &v {
                    Value::Array(arr) => Value::from(arr.len()),
                    Value::Str(s) => Value::from(s.chars().count()),
                    _ => Value::Undefined,
                }),
            )
            .with(
                "default",
                Formatter::pull(|v, args| {
                    if matches!(v, Value::Undefined | Value::Null) {
                        args.first().cloned().unwrap_or(Value::Undefined)
                    } else {
                        v
                    }
                }),
            )
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, formatter: Formatter) -> Self {
        self.insert(name, formatter);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, formatter: Formatter) {
        self.map.insert(name.into(), formatter);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Formatter> {
        self.map.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// A new registry holding both sides' entries; `other` wins name
    /// collisions. Neither input is touched.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut map = self.map.clone();
        for (name, formatter) in &other.map {
            map.insert(name.clone(), formatter.clone());
        }
        Self { map }
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.map.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FormatterRegistry")
            .field("names", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
