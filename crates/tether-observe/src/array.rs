#![forbid(unsafe_code)]

//! Observable array façade.
//!
//! # Design
//!
//! [`ArrayRef`] is a shared, reference-counted vector of [`Value`]s whose
//! seven mutating operations (`push`, `pop`, `shift`, `unshift`, `sort`,
//! `reverse`, `splice`) notify registered listeners after performing the
//! mutation. Observation is opt-in per array handle; nothing is patched on
//! types the caller does not own.
//!
//! Mutation events carry no payload: listeners learn that *the collection
//! changed*, not what changed. Per-element diffing is a consumer concern.
//!
//! # Invariants
//!
//! 1. Every mutating operation performs the true mutation first, then
//!    notifies each listener exactly once, then returns the operation's
//!    own result unchanged.
//! 2. Non-mutating access (`get`, `len`, `to_vec`, index writes via
//!    [`ArrayRef::set_index`]) never notifies.
//! 3. The listener list is snapshotted before fan-out: listeners added
//!    during a notification run first fire on the next mutation; removals
//!    during a run never skip or double-invoke a remaining listener.
//! 4. An array with zero listeners behaves exactly like a plain vector.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::value::Value;

/// Listener invoked after any of the seven mutating operations.
pub type ArrayListener = Rc<dyn Fn()>;

struct ArrayInner {
    items: Vec<Value>,
    listeners: SmallVec<[ArrayListener; 2]>,
}

/// Shared observable array handle. Cloning aliases the same storage.
#[derive(Clone)]
pub struct ArrayRef {
    inner: Rc<RefCell<ArrayInner>>,
}

impl ArrayRef {
    /// Create an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create an array from existing items.
    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ArrayInner {
                items,
                listeners: SmallVec::new(),
            })),
        }
    }

    /// Handle identity; the engine's change predicate for arrays.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable address of the backing storage, for diagnostics.
    #[must_use]
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    // -- non-mutating surface (never intercepted) ---------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Read by index; out-of-range reads are `Undefined`.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.inner
            .borrow()
            .items
            .get(index)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    /// Clone the items out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    /// Run `f` against the items without cloning them.
    pub fn with_items<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.inner.borrow().items)
    }

    /// Direct index write. Writing past the end grows the array with
    /// `Undefined` holes. Not one of the intercepted operations, so no
    /// listener fires.
    pub fn set_index(&self, index: usize, value: Value) {
        let mut inner = self.inner.borrow_mut();
        if index >= inner.items.len() {
            inner.items.resize(index + 1, Value::Undefined);
        }
        inner.items[index] = value;
    }

    /// Direct length write: truncates, or grows with `Undefined` holes.
    /// Like [`ArrayRef::set_index`], silent.
    pub fn set_len(&self, len: usize) {
        self.inner.borrow_mut().items.resize(len, Value::Undefined);
    }

    // -- the seven intercepted operations -----------------------------------

    /// Append at the end. Returns the new length.
    pub fn push(&self, value: Value) -> usize {
        let len = {
            let mut inner = self.inner.borrow_mut();
            inner.items.push(value);
            inner.items.len()
        };
        self.notify();
        len
    }

    /// Remove from the end; `Undefined` when empty.
    pub fn pop(&self) -> Value {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            inner.items.pop().unwrap_or(Value::Undefined)
        };
        self.notify();
        removed
    }

    /// Remove from the front; `Undefined` when empty.
    pub fn shift(&self) -> Value {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            if inner.items.is_empty() {
                Value::Undefined
            } else {
                inner.items.remove(0)
            }
        };
        self.notify();
        removed
    }

    /// Insert at the front. Returns the new length.
    pub fn unshift(&self, value: Value) -> usize {
        let len = {
            let mut inner = self.inner.borrow_mut();
            inner.items.insert(0, value);
            inner.items.len()
        };
        self.notify();
        len
    }

    /// In-place sort using the engine's default ordering: elements compare
    /// by their `Display` rendering, mirroring a comparator-less sort.
    pub fn sort(&self) {
        self.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    }

    /// In-place sort with a caller-supplied comparator.
    ///
    /// The items are detached while the comparator runs, so a comparator
    /// that reads back through the same handle sees an empty array.
    pub fn sort_by(&self, mut cmp: impl FnMut(&Value, &Value) -> Ordering) {
        let mut items = std::mem::take(&mut self.inner.borrow_mut().items);
        items.sort_by(&mut cmp);
        self.inner.borrow_mut().items = items;
        self.notify();
    }

    /// In-place reversal.
    pub fn reverse(&self) {
        self.inner.borrow_mut().items.reverse();
        self.notify();
    }

    /// Remove `delete_count` items at `start` (both clamped to the current
    /// length) and insert `items` in their place. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let len = inner.items.len();
            let start = start.min(len);
            let end = start.saturating_add(delete_count).min(len);
            inner.items.splice(start..end, items).collect()
        };
        self.notify();
        removed
    }

    // -- observation --------------------------------------------------------

    /// Register a mutation listener.
    pub fn observe(&self, listener: ArrayListener) {
        self.inner.borrow_mut().listeners.push(listener);
    }

    /// Remove a previously registered listener, matched by `Rc` identity.
    /// Returns whether anything was removed.
    pub fn unobserve(&self, listener: &ArrayListener) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner
            .listeners
            .iter()
            .position(|l| Rc::ptr_eq(l, listener))
        {
            Some(i) => {
                inner.listeners.remove(i);
                true
            }
            None => false,
        }
    }

    /// Whether at least one listener is registered.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        !self.inner.borrow().listeners.is_empty()
    }

    /// Snapshot the listener list, then invoke each entry with no borrow
    /// held, so listeners may freely mutate this array or its observers.
    fn notify(&self) {
        let listeners = {
            let inner = self.inner.borrow();
            if inner.listeners.is_empty() {
                return;
            }
            inner.listeners.clone()
        };
        for listener in &listeners {
            listener();
        }
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for ArrayRef {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, ArrayListener) {
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        (count, Rc::new(move || c.set(c.get() + 1)))
    }

    #[test]
    fn one_notification_per_mutating_call() {
        let arr = ArrayRef::new();
        let (count, listener) = counter();
        arr.observe(listener);

        arr.push(Value::from(1));
        arr.pop();
        assert_eq!(count.get(), 2);

        arr.splice(0, 0, vec![Value::from(1), Value::from(2), Value::from(3)]);
        // Three elements inserted, one event.
        assert_eq!(count.get(), 3);

        arr.sort();
        arr.reverse();
        arr.shift();
        arr.unshift(Value::from(9));
        assert_eq!(count.get(), 7);
    }

    #[test]
    fn results_match_plain_vector_semantics() {
        let arr = ArrayRef::from_vec(vec![Value::from(1), Value::from(2)]);
        assert_eq!(arr.push(Value::from(3)), 3);
        assert_eq!(arr.pop(), Value::from(3));
        assert_eq!(arr.shift(), Value::from(1));
        assert_eq!(arr.unshift(Value::from(0)), 2);
        assert_eq!(arr.to_vec(), vec![Value::from(0), Value::from(2)]);
        assert_eq!(ArrayRef::new().pop(), Value::Undefined);
        assert_eq!(ArrayRef::new().shift(), Value::Undefined);
    }

    #[test]
    fn splice_removes_and_inserts() {
        let arr = ArrayRef::from_vec(vec![
            Value::from(1),
            Value::from(2),
            Value::from(3),
            Value::from(4),
        ]);
        let removed = arr.splice(1, 2, vec![Value::str("a")]);
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(
            arr.to_vec(),
            vec![Value::from(1), Value::str("a"), Value::from(4)]
        );
    }

    #[test]
    fn splice_clamps_out_of_range() {
        let arr = ArrayRef::from_vec(vec![Value::from(1)]);
        let removed = arr.splice(5, 10, vec![Value::from(2)]);
        assert!(removed.is_empty());
        assert_eq!(arr.to_vec(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn index_and_length_writes_are_silent() {
        let arr = ArrayRef::new();
        let (count, listener) = counter();
        arr.observe(listener);

        arr.set_index(2, Value::from(7));
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(0), Value::Undefined);
        assert_eq!(arr.get(2), Value::from(7));

        arr.set_len(1);
        assert_eq!(arr.len(), 1);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn unobserve_restores_plain_behavior() {
        let arr = ArrayRef::new();
        let (count, listener) = counter();
        arr.observe(listener.clone());
        assert!(arr.is_observed());

        arr.push(Value::from(1));
        assert_eq!(count.get(), 1);

        assert!(arr.unobserve(&listener));
        assert!(!arr.unobserve(&listener));
        assert!(!arr.is_observed());

        arr.push(Value::from(2));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn second_listener_is_independent() {
        let arr = ArrayRef::new();
        let (a, la) = counter();
        let (b, lb) = counter();
        arr.observe(la.clone());
        arr.observe(lb);

        arr.push(Value::from(1));
        assert_eq!((a.get(), b.get()), (1, 1));

        arr.unobserve(&la);
        arr.push(Value::from(2));
        assert_eq!((a.get(), b.get()), (1, 2));
    }

    #[test]
    fn listener_added_during_fanout_waits_for_next_mutation() {
        let arr = ArrayRef::new();
        let late_count = Rc::new(Cell::new(0u32));

        let arr2 = arr.clone();
        let lc = Rc::clone(&late_count);
        let recruiter: ArrayListener = Rc::new(move || {
            let lc = Rc::clone(&lc);
            arr2.observe(Rc::new(move || lc.set(lc.get() + 1)));
        });
        arr.observe(recruiter);

        arr.push(Value::from(1));
        assert_eq!(late_count.get(), 0);

        arr.push(Value::from(2));
        assert_eq!(late_count.get(), 1);
    }

    #[test]
    fn listener_removing_neighbor_does_not_skip_others() {
        let arr = ArrayRef::new();
        let (seen, lb) = counter();

        // First listener removes itself mid-fanout; the neighbor still runs.
        let arr2 = arr.clone();
        let self_slot: Rc<RefCell<Option<ArrayListener>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&self_slot);
        let la: ArrayListener = Rc::new(move || {
            if let Some(me) = slot.borrow().as_ref() {
                arr2.unobserve(me);
            }
        });
        *self_slot.borrow_mut() = Some(la.clone());
        arr.observe(la);
        arr.observe(lb);

        arr.push(Value::from(1));
        assert_eq!(seen.get(), 1);

        arr.push(Value::from(2));
        assert_eq!(seen.get(), 2);
        assert!(arr.is_observed());
    }

    #[test]
    fn sort_default_orders_by_rendering() {
        let arr = ArrayRef::from_vec(vec![
            Value::from(10),
            Value::from(2),
            Value::str("apple"),
        ]);
        arr.sort();
        // "10" < "2" < "apple" lexicographically.
        assert_eq!(
            arr.to_vec(),
            vec![Value::from(10), Value::from(2), Value::str("apple")]
        );
    }

    #[test]
    fn sort_by_comparator() {
        let arr = ArrayRef::from_vec(vec![Value::from(3), Value::from(1), Value::from(2)]);
        arr.sort_by(|a, b| {
            a.coerce_number()
                .partial_cmp(&b.coerce_number())
                .unwrap_or(Ordering::Equal)
        });
        assert_eq!(
            arr.to_vec(),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
    }
}
