#![forbid(unsafe_code)]

//! Per-view observation context.
//!
//! # Design
//!
//! A [`Context`] wraps one user data value and hands out a stable
//! `observe`/`unobserve` surface over dotted paths. Views that need a few
//! local-only values (loop indices, component inputs) build the context
//! with *locals*: an allow-list of own properties layered over the shared
//! source object, which stays the root for every other path. A path whose
//! head token is a local resolves against the scope layer; all other paths
//! resolve against the source directly, so mutations of the shared model
//! are seen no matter which handle performed them.
//!
//! Path subscriptions are shared per path: a second callback on an
//! already-observed path installs no new store subscriptions, and the
//! underlying chain is torn down only when the last callback leaves.
//!
//! `start`/`stop` gate delivery without touching the subscriptions: while
//! stopped, path observers keep their boundary caches current but consumer
//! callbacks are swallowed, so a view can unmount and remount without
//! rebuilding its subscription graph.
//!
//! Cloning a `Context` clones a handle; one context is built per bound
//! view and shared by its clones.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::object::ObjectRef;
use crate::path::{AccessError, PathDescriptor, PathNotifier, PathObserver, assign, resolve};
use crate::value::Value;

/// Consumer callback: `(new, old)` leaf values.
pub type ContextCallback = Rc<dyn Fn(&Value, &Value)>;

struct PathEntry {
    observer: PathObserver,
    /// Each consumer and the gating notifier registered on its behalf.
    consumers: SmallVec<[(ContextCallback, PathNotifier); 1]>,
}

struct ContextInner {
    source: Value,
    /// Local-only properties, delegating reads to the source.
    scope: Option<ObjectRef>,
    running: bool,
    entries: FxHashMap<String, PathEntry>,
}

/// Shared observation context handle.
#[derive(Clone)]
pub struct Context {
    inner: Rc<RefCell<ContextInner>>,
}

impl Context {
    /// Wrap a data value. Fails with `NotAnObject` unless the value is an
    /// object or array.
    pub fn new(source: Value) -> Result<Self, AccessError> {
        Self::with_locals(source, std::iter::empty())
    }

    /// Wrap a data value with local-only properties layered over it.
    pub fn with_locals(
        source: Value,
        locals: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, AccessError> {
        if !source.is_container() {
            return Err(AccessError::NotAnObject);
        }
        let mut locals = locals.into_iter().peekable();
        let scope = if locals.peek().is_some() {
            let scope = match source.as_object() {
                Some(obj) => ObjectRef::with_proto(obj.clone()),
                None => ObjectRef::new(),
            };
            for (name, value) in locals {
                scope.set(&name, value);
            }
            Some(scope)
        } else {
            None
        };
        Ok(Self {
            inner: Rc::new(RefCell::new(ContextInner {
                source,
                scope,
                running: true,
                entries: FxHashMap::default(),
            })),
        })
    }

    /// The wrapped source value.
    #[must_use]
    pub fn source(&self) -> Value {
        self.inner.borrow().source.clone()
    }

    /// The root a path resolves against: the scope layer when the path's
    /// head names a local, otherwise the source.
    #[must_use]
    pub fn root_for(&self, path: &PathDescriptor) -> Value {
        let inner = self.inner.borrow();
        if let Some(scope) = &inner.scope {
            match path.head() {
                Some(head) if scope.has_own(head) => return Value::Object(scope.clone()),
                _ => {}
            }
        }
        inner.source.clone()
    }

    /// Read a path's current value; `Undefined` through broken chains.
    #[must_use]
    pub fn value_of(&self, path: &PathDescriptor) -> Value {
        let root = self.root_for(path);
        resolve(&root, path)
    }

    /// Write through a path.
    pub fn assign(&self, path: &PathDescriptor, value: Value) -> Result<(), AccessError> {
        let root = self.root_for(path);
        assign(&root, path, value)
    }

    /// Register `callback` for changes of `path`. The first callback on a
    /// path builds its path observer; later ones share it.
    pub fn observe(&self, path: &str, callback: ContextCallback) {
        let descriptor = PathDescriptor::parse(path);
        let key = descriptor.to_string();
        let root = self.root_for(&descriptor);

        let gate = self.gated(Rc::clone(&callback));

        {
            let mut inner = self.inner.borrow_mut();
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.observer.observe(Rc::clone(&gate));
                entry.consumers.push((callback, gate));
                return;
            }
        }

        // Built with no borrow held: realizing the path may run accessors.
        debug!(target: "tether::observe", path = %key, "context subscribes path");
        let observer = PathObserver::new(root, descriptor)
            .expect("context root is a container by construction");
        observer.observe(Rc::clone(&gate));

        let mut inner = self.inner.borrow_mut();
        match inner.entries.get_mut(&key) {
            // An accessor re-entered observe for this same path; fold into
            // the entry it created and let our fresh chain tear down.
            Some(entry) => {
                entry.observer.observe(Rc::clone(&gate));
                entry.consumers.push((callback, gate));
            }
            None => {
                let mut consumers = SmallVec::new();
                consumers.push((callback, gate));
                inner.entries.insert(key, PathEntry { observer, consumers });
            }
        }
    }

    /// Remove a callback from a path, matched by `Rc` identity. The last
    /// removal tears down the path's subscription chain. Returns whether
    /// anything was removed.
    pub fn unobserve(&self, path: &str, callback: &ContextCallback) -> bool {
        let key = PathDescriptor::parse(path).to_string();
        let mut inner = self.inner.borrow_mut();
        let Some(entry) = inner.entries.get_mut(&key) else {
            return false;
        };
        let Some(index) = entry
            .consumers
            .iter()
            .position(|(consumer, _)| Rc::ptr_eq(consumer, callback))
        else {
            return false;
        };
        let (_, gate) = entry.consumers.remove(index);
        entry.observer.unobserve(&gate);
        if entry.consumers.is_empty() {
            debug!(target: "tether::observe", path = %key, "context releases path");
            inner.entries.remove(&key);
        }
        true
    }

    /// Resume delivering notifications to consumer callbacks.
    pub fn start(&self) {
        self.inner.borrow_mut().running = true;
    }

    /// Stop delivering notifications. Subscriptions stay installed and
    /// boundary caches stay current.
    pub fn stop(&self) {
        self.inner.borrow_mut().running = false;
    }

    /// Whether notifications are currently delivered.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    /// Number of live path subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Wrap a consumer callback in the start/stop gate.
    fn gated(&self, callback: ContextCallback) -> PathNotifier {
        let weak: Weak<RefCell<ContextInner>> = Rc::downgrade(&self.inner);
        Rc::new(move |new: &Value, old: &Value| {
            let Some(inner) = weak.upgrade() else { return };
            let running = inner.borrow().running;
            if running {
                callback(new, old);
            }
        })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Context")
            .field("running", &inner.running)
            .field("paths", &inner.entries.len())
            .field("locals", &inner.scope.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
