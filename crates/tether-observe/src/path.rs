#![forbid(unsafe_code)]

//! Path descriptors and the path observer.
//!
//! # Design
//!
//! A [`PathDescriptor`] is the immutable token list of a dotted/bracketed
//! path (`a.b[c].d` → `a`, `b`, `c`, `d`). A [`PathObserver`] realizes the
//! path against a root value into *boundary values* `v[0..=n]` (`v[0]` is
//! the root, `v[n]` the leaf) and holds one store subscription per boundary
//! whose value is a container, every subscription pointing at one shared
//! update callback.
//!
//! # Invariants
//!
//! 1. At every moment, exactly the live chain of intermediate containers is
//!    subscribed: an update unsubscribes each boundary whose value was
//!    swapped out and subscribes its replacement, so a replaced
//!    intermediate neither leaks a stale subscription nor misses writes to
//!    the new object.
//! 2. Registered notifiers fire with `(new, old)` only when the leaf value
//!    changed by identity, except that an array-typed leaf always notifies
//!    on a triggering update (in-place mutation defeats identity checks).
//! 3. The cached boundary vector is replaced on every update, whether or
//!    not the leaf changed.
//! 4. Multiple notifiers share the one subscription chain; the chain is
//!    torn down when the observer is dropped.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Read through a broken chain | intermediate not a container | `get()` yields `Undefined` |
//! | Write through a broken chain | intermediate not a container | `set()` fails with `InvalidTarget` |
//! | Observe a primitive root | root not object/array | `NotAnObject` |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::trace;

use crate::array::{ArrayListener, ArrayRef};
use crate::object::{ObjectRef, PropertyListener};
use crate::value::Value;

/// Notifier invoked with `(new, old)` when a path's leaf value changes.
pub type PathNotifier = Rc<dyn Fn(&Value, &Value)>;

/// Errors from observing or writing through a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Observation was rooted at a value that is not an object or array.
    NotAnObject,
    /// A write's intermediate segment is not a container; the target does
    /// not exist and is not silently created.
    InvalidTarget { path: String, segment: usize },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "observation root is not an object or array"),
            Self::InvalidTarget { path, segment } => {
                write!(f, "cannot write through '{path}': segment {segment} is not a container")
            }
        }
    }
}

impl std::error::Error for AccessError {}

/// Immutable token sequence of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathDescriptor {
    tokens: SmallVec<[String; 4]>,
}

impl PathDescriptor {
    /// Parse a dotted/bracketed path. `.`, `[`, and `]` all delimit;
    /// empty segments are skipped, so `a.b[0]` and `a.b.0` are the same
    /// descriptor.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let tokens = path
            .split(['.', '[', ']'])
            .filter(|seg| !seg.is_empty())
            .map(str::to_string)
            .collect();
        Self { tokens }
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// First token, if any; the context uses it to pick the path's root.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }
}

/// Canonical dotted rendering; bracket segments print as dot segments.
impl fmt::Display for PathDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join("."))
    }
}

/// Read one path step. Arrays answer numeric indexes and `length`;
/// anything else, and any step off a non-container, is `Undefined`.
#[must_use]
pub fn read_step(value: &Value, token: &str) -> Value {
    match value {
        Value::Object(obj) => obj.get(token),
        Value::Array(arr) => {
            if token == "length" {
                Value::from(arr.len())
            } else {
                match token.parse::<usize>() {
                    Ok(index) => arr.get(index),
                    Err(_) => Value::Undefined,
                }
            }
        }
        _ => Value::Undefined,
    }
}

/// Walk a whole path from `root`, yielding `Undefined` past any break.
#[must_use]
pub fn resolve(root: &Value, path: &PathDescriptor) -> Value {
    let mut current = root.clone();
    for token in path.tokens() {
        current = read_step(&current, token);
    }
    current
}

/// Write through a path from `root`. All intermediate segments must be
/// containers; the final token is assigned on the last one.
pub fn assign(root: &Value, path: &PathDescriptor, value: Value) -> Result<(), AccessError> {
    let tokens = path.tokens();
    let Some((last, walk)) = tokens.split_last() else {
        return Err(AccessError::InvalidTarget {
            path: String::new(),
            segment: 0,
        });
    };
    let mut current = root.clone();
    for (i, token) in walk.iter().enumerate() {
        current = read_step(&current, token);
        if !current.is_container() {
            return Err(AccessError::InvalidTarget {
                path: path.to_string(),
                segment: i + 1,
            });
        }
    }
    match &current {
        Value::Object(obj) => {
            obj.set(last, value);
            Ok(())
        }
        Value::Array(arr) => {
            if last == "length" {
                match value.as_number() {
                    Some(n) if n >= 0.0 && n.fract() == 0.0 => {
                        arr.set_len(n as usize);
                        Ok(())
                    }
                    _ => Err(AccessError::InvalidTarget {
                        path: path.to_string(),
                        segment: tokens.len(),
                    }),
                }
            } else {
                match last.parse::<usize>() {
                    Ok(index) => {
                        arr.set_index(index, value);
                        Ok(())
                    }
                    Err(_) => Err(AccessError::InvalidTarget {
                        path: path.to_string(),
                        segment: tokens.len(),
                    }),
                }
            }
        }
        // Reachable only when the walk is empty and the root itself is not
        // a container.
        _ => Err(AccessError::InvalidTarget {
            path: path.to_string(),
            segment: 0,
        }),
    }
}

/// A store subscription installed for one boundary.
enum BoundarySub {
    Property(ObjectRef),
    Array(ArrayRef),
}

struct PathInner {
    root: Value,
    path: PathDescriptor,
    /// Boundary values, length `tokens + 1`.
    boundaries: Vec<Value>,
    /// Store subscriptions, length `tokens`; `None` where the boundary
    /// value is not a container (or an array read by a non-index token).
    subs: Vec<Option<BoundarySub>>,
    notifiers: SmallVec<[PathNotifier; 1]>,
    /// The single shared update callbacks handed to every boundary store.
    prop_cb: Option<PropertyListener>,
    arr_cb: Option<ArrayListener>,
}

/// Observes one path rooted at one value. Single-owner: dropping the
/// observer tears the whole subscription chain down.
pub struct PathObserver {
    inner: Rc<RefCell<PathInner>>,
}

impl PathObserver {
    /// Subscribe to `path` under `root`. Fails with `NotAnObject` unless
    /// the root is a container.
    pub fn new(root: Value, path: PathDescriptor) -> Result<Self, AccessError> {
        if !root.is_container() {
            return Err(AccessError::NotAnObject);
        }
        let n = path.len();
        let inner = Rc::new(RefCell::new(PathInner {
            root,
            path,
            boundaries: Vec::new(),
            subs: (0..n).map(|_| None).collect(),
            notifiers: SmallVec::new(),
            prop_cb: None,
            arr_cb: None,
        }));

        let weak = Rc::downgrade(&inner);
        let prop_cb: PropertyListener = Rc::new(move |_| Self::trigger(&weak));
        let weak = Rc::downgrade(&inner);
        let arr_cb: ArrayListener = Rc::new(move || Self::trigger(&weak));

        {
            let mut state = inner.borrow_mut();
            state.prop_cb = Some(prop_cb);
            state.arr_cb = Some(arr_cb);
            let boundaries = realize(&state.root, &state.path);
            for i in 0..n {
                link(&mut state, i, &boundaries[i]);
            }
            state.boundaries = boundaries;
        }
        Ok(Self { inner })
    }

    /// The observed path.
    #[must_use]
    pub fn path(&self) -> PathDescriptor {
        self.inner.borrow().path.clone()
    }

    /// Register a notifier. A second notifier shares the existing chain;
    /// no store subscriptions are added.
    pub fn observe(&self, notifier: PathNotifier) {
        self.inner.borrow_mut().notifiers.push(notifier);
    }

    /// Remove a notifier by `Rc` identity. Returns whether anything was
    /// removed. Other notifiers are unaffected.
    pub fn unobserve(&self, notifier: &PathNotifier) -> bool {
        let mut state = self.inner.borrow_mut();
        match state
            .notifiers
            .iter()
            .position(|n| Rc::ptr_eq(n, notifier))
        {
            Some(i) => {
                state.notifiers.remove(i);
                true
            }
            None => false,
        }
    }

    /// Number of registered notifiers.
    #[must_use]
    pub fn notifier_count(&self) -> usize {
        self.inner.borrow().notifiers.len()
    }

    /// Walk the path live against the current root; never fails.
    #[must_use]
    pub fn get(&self) -> Value {
        let (root, path) = {
            let state = self.inner.borrow();
            (state.root.clone(), state.path.clone())
        };
        resolve(&root, &path)
    }

    /// Write through the path; `InvalidTarget` when an intermediate is not
    /// a container.
    pub fn set(&self, value: Value) -> Result<(), AccessError> {
        let (root, path) = {
            let state = self.inner.borrow();
            (state.root.clone(), state.path.clone())
        };
        assign(&root, &path, value)
    }

    /// The shared update callback: re-realize every boundary, re-link the
    /// ones whose value changed, then notify when the leaf moved.
    fn trigger(weak: &Weak<RefCell<PathInner>>) {
        let Some(inner) = weak.upgrade() else { return };

        // Realize outside the borrow: reads may run user accessors, which
        // may re-enter this observer. Last write wins.
        let (root, path) = {
            let state = inner.borrow();
            (state.root.clone(), state.path.clone())
        };
        let fresh = realize(&root, &path);

        let fired = {
            let mut state = inner.borrow_mut();
            let n = state.path.len();
            for i in 0..n {
                if !state.boundaries[i].identical(&fresh[i]) {
                    trace!(
                        target: "tether::observe",
                        path = %state.path,
                        boundary = i,
                        "re-link boundary"
                    );
                    unlink(&mut state, i);
                    let value = fresh[i].clone();
                    link(&mut state, i, &value);
                }
            }
            let old_leaf = state.boundaries[n].clone();
            let new_leaf = fresh[n].clone();
            state.boundaries = fresh;
            // An array leaf defeats identity comparison when mutated in
            // place, so it always notifies.
            if !new_leaf.identical(&old_leaf) || new_leaf.is_array() {
                Some((state.notifiers.clone(), new_leaf, old_leaf))
            } else {
                None
            }
        };

        if let Some((notifiers, new_leaf, old_leaf)) = fired {
            for notifier in &notifiers {
                notifier(&new_leaf, &old_leaf);
            }
        }
    }

    /// Tear down every boundary subscription. Also runs on drop.
    pub fn teardown(&self) {
        let (detached, prop_cb, arr_cb, tokens) = {
            let mut state = self.inner.borrow_mut();
            let detached: Vec<(usize, BoundarySub)> = state
                .subs
                .iter_mut()
                .enumerate()
                .filter_map(|(i, slot)| slot.take().map(|sub| (i, sub)))
                .collect();
            (
                detached,
                state.prop_cb.clone(),
                state.arr_cb.clone(),
                state.path.clone(),
            )
        };
        for (i, sub) in detached {
            match sub {
                BoundarySub::Property(obj) => {
                    if let Some(cb) = &prop_cb {
                        obj.unobserve(&tokens.tokens()[i], cb);
                    }
                }
                BoundarySub::Array(arr) => {
                    if let Some(cb) = &arr_cb {
                        arr.unobserve(cb);
                    }
                }
            }
        }
    }
}

impl Drop for PathObserver {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for PathObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("PathObserver")
            .field("path", &state.path.to_string())
            .field("notifiers", &state.notifiers.len())
            .finish()
    }
}

/// Realize all boundary values for `path` under `root`.
fn realize(root: &Value, path: &PathDescriptor) -> Vec<Value> {
    let mut boundaries = Vec::with_capacity(path.len() + 1);
    boundaries.push(root.clone());
    for token in path.tokens() {
        let next = read_step(boundaries.last().expect("non-empty"), token);
        boundaries.push(next);
    }
    boundaries
}

/// Install the store subscription for boundary `i` rooted at `value`.
fn link(state: &mut PathInner, i: usize, value: &Value) {
    let token = state.path.tokens()[i].clone();
    let sub = match value {
        Value::Object(obj) => {
            let cb = state.prop_cb.clone().expect("callbacks set at construction");
            obj.observe(&token, cb);
            Some(BoundarySub::Property(obj.clone()))
        }
        Value::Array(arr) => {
            if token == "length" || token.parse::<usize>().is_ok() {
                let cb = state.arr_cb.clone().expect("callbacks set at construction");
                arr.observe(cb);
                Some(BoundarySub::Array(arr.clone()))
            } else {
                None
            }
        }
        _ => None,
    };
    state.subs[i] = sub;
}

/// Remove the store subscription for boundary `i`, if any.
fn unlink(state: &mut PathInner, i: usize) {
    let Some(sub) = state.subs[i].take() else { return };
    match sub {
        BoundarySub::Property(obj) => {
            let cb = state.prop_cb.clone().expect("callbacks set at construction");
            obj.unobserve(&state.path.tokens()[i], &cb);
        }
        BoundarySub::Array(arr) => {
            let cb = state.arr_cb.clone().expect("callbacks set at construction");
            arr.unobserve(&cb);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
