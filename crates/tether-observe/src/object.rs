#![forbid(unsafe_code)]

//! Observable object and its per-property listener registry.
//!
//! # Design
//!
//! [`ObjectRef`] is a shared string-keyed container whose property slots
//! are a discriminated descriptor: plain data, or an accessor pair. The
//! property store lives *inside* the object (no global side tables): the
//! first [`ObjectRef::observe`] on a property captures the slot's current
//! descriptor and installs an interception overlay; the last
//! [`ObjectRef::unobserve`] restores the original descriptor shape, leaving
//! the object indistinguishable from one that was never observed.
//!
//! The overlay is invisible to the data surface: [`ObjectRef::keys`]
//! enumerates slots only, and [`ObjectRef::clone_shallow`] copies slots but
//! never listener state, so a shallow copy of an observed object is not
//! itself observed.
//!
//! # Interception rules
//!
//! | Captured descriptor        | Interception installed                       |
//! |----------------------------|----------------------------------------------|
//! | data slot                  | cached value; identity-compared writes       |
//! | accessor with setter       | original getter kept; setter wrapped         |
//! | accessor without setter    | none; listeners never fire from writes       |
//!
//! Data-slot interception bridges array values to the array store: the
//! cached array's mutation events re-emit as property notifications, and
//! replacing the cached value re-targets the bridge.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Write to read-only property | captured accessor has no setter | silent no-op |
//! | Write of identical value | identity compare | no-op, no notification |
//! | Delete of non-configurable slot | CONFIGURABLE flag clear | returns `false` |

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::array::{ArrayListener, ArrayRef};
use crate::value::Value;

bitflags! {
    /// Attributes of a property slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u8 {
        const WRITABLE = 1;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

impl Default for SlotFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Computed-property getter. Receives the owning object.
pub type Getter = Rc<dyn Fn(&ObjectRef) -> Value>;
/// Computed-property setter. Receives the owning object and the new value.
pub type Setter = Rc<dyn Fn(&ObjectRef, Value)>;

/// Listener invoked with the property's new value after a tracked write.
pub type PropertyListener = Rc<dyn Fn(&Value)>;

/// A property slot: the discriminated descriptor the engine branches on.
#[derive(Clone)]
pub enum Slot {
    Data {
        value: Value,
        flags: SlotFlags,
    },
    Accessor {
        get: Getter,
        set: Option<Setter>,
        flags: SlotFlags,
    },
}

impl Slot {
    /// A writable, enumerable, configurable data slot.
    #[must_use]
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            flags: SlotFlags::default(),
        }
    }
}

/// What the first `observe` captured, so the last `unobserve` can restore
/// the original descriptor shape.
enum Saved {
    /// The object owned a data slot; restore it with the current cache and
    /// the original flags.
    OwnData { flags: SlotFlags },
    /// The slot (own or inherited accessor) was left in place; nothing to
    /// restore beyond dropping the overlay.
    Untouched,
    /// Captured from the delegate chain or absent everywhere. Restore
    /// writes an own slot only if the cache diverged from what was
    /// captured, mirroring what an unobserved write would have created.
    Synthetic { original: Value },
}

/// The interception overlay installed for an observed property.
enum Intercept {
    /// Captured data descriptor: reads hit the cache, writes identity-
    /// compare against it.
    Data {
        cache: Value,
        bridge: Option<ArrayBridge>,
    },
    /// Captured accessor with a setter: writes delegate, read back, fire.
    Accessor { get: Getter, set: Setter },
    /// Captured accessor without a setter: no interception; listeners are
    /// registered but never fire from writes.
    ReadOnly,
}

/// Forwarding subscription on an array-valued cached property.
struct ArrayBridge {
    array: ArrayRef,
    listener: ArrayListener,
}

struct PropertyRecord {
    listeners: SmallVec<[PropertyListener; 2]>,
    intercept: Intercept,
    saved: Saved,
}

struct ObjectInner {
    slots: FxHashMap<String, Slot>,
    /// Delegate for reads of properties this object does not own.
    proto: Option<ObjectRef>,
    /// Hidden listener registry; invisible to `keys` and `clone_shallow`,
    /// unreachable through the property surface.
    observed: FxHashMap<String, PropertyRecord>,
}

/// Shared observable object handle. Cloning aliases the same storage.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Rc<RefCell<ObjectInner>>,
}

/// Outcome of the first borrow phase of a read, so accessors run with no
/// borrow held.
enum ReadStep {
    Done(Value),
    Getter(Getter),
    Proto(ObjectRef),
}

/// Outcome of the first borrow phase of a write.
enum WriteStep {
    Done,
    /// Cache updated; fire these listeners with the new value.
    Fire(SmallVec<[PropertyListener; 2]>, Value),
    /// Observed accessor: call setter, read back, fire.
    Wrapped { get: Getter, set: Setter },
    /// Plain accessor slot with a setter.
    Plain(Setter),
    /// No own slot or record; continue along the delegate chain.
    Chain(Option<ObjectRef>),
}

/// How an ancestor participates in a delegated write.
enum Probe {
    /// Ancestor has a record or an accessor slot; it handles the write.
    Handles,
    /// Ancestor owns a plain data slot; the writer creates an own slot
    /// (unless the ancestor's slot forbids writes).
    PlainData { writable: bool },
    Miss(Option<ObjectRef>),
}

impl ObjectRef {
    /// Create an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::build(FxHashMap::default(), None)
    }

    /// Create an empty object that reads through to `proto` for properties
    /// it does not own.
    #[must_use]
    pub fn with_proto(proto: ObjectRef) -> Self {
        Self::build(FxHashMap::default(), Some(proto))
    }

    fn build(slots: FxHashMap<String, Slot>, proto: Option<ObjectRef>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObjectInner {
                slots,
                proto,
                observed: FxHashMap::default(),
            })),
        }
    }

    /// Handle identity; the engine's change predicate for objects.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable address of the backing storage, for diagnostics.
    #[must_use]
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.inner).cast()
    }

    /// The delegate object, if any.
    #[must_use]
    pub fn proto(&self) -> Option<ObjectRef> {
        self.inner.borrow().proto.clone()
    }

    /// Whether the object itself carries this property (slot or overlay),
    /// without consulting the delegate chain.
    #[must_use]
    pub fn has_own(&self, prop: &str) -> bool {
        let inner = self.inner.borrow();
        inner.slots.contains_key(prop) || inner.observed.contains_key(prop)
    }

    /// Own enumerable property names. Hidden listener state never appears.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        inner
            .slots
            .iter()
            .filter(|(_, slot)| match slot {
                Slot::Data { flags, .. } | Slot::Accessor { flags, .. } => {
                    flags.contains(SlotFlags::ENUMERABLE)
                }
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Define (or redefine) an own slot. If the property is currently
    /// observed, the overlay is re-captured from the new slot and existing
    /// listeners carry over.
    pub fn define(&self, prop: impl Into<String>, slot: Slot) {
        let prop = prop.into();
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            let previous = inner.observed.remove(&prop);
            inner.slots.insert(prop.clone(), slot);
            previous
        };
        if let Some(record) = listeners {
            if let Intercept::Data {
                bridge: Some(bridge),
                ..
            } = record.intercept
            {
                bridge.array.unobserve(&bridge.listener);
            }
            for listener in record.listeners {
                self.observe(&prop, listener);
            }
        }
    }

    /// Remove an own slot. Fails on non-configurable slots. Removing an
    /// observed property also discards its listeners.
    pub fn delete(&self, prop: &str) -> bool {
        let (removed, bridge) = {
            let mut inner = self.inner.borrow_mut();
            match inner.slots.get(prop) {
                Some(Slot::Data { flags, .. }) | Some(Slot::Accessor { flags, .. })
                    if !flags.contains(SlotFlags::CONFIGURABLE) =>
                {
                    return false;
                }
                _ => {}
            }
            let had_slot = inner.slots.remove(prop).is_some();
            let record = inner.observed.remove(prop);
            let had_record = record.is_some();
            let bridge = record.and_then(|rec| match rec.intercept {
                Intercept::Data { bridge, .. } => bridge,
                _ => None,
            });
            (had_slot || had_record, bridge)
        };
        if let Some(bridge) = bridge {
            bridge.array.unobserve(&bridge.listener);
        }
        removed
    }

    /// Shallow copy: same delegate link, same slots (observed data
    /// properties copy their current cached value), no listener state.
    #[must_use]
    pub fn clone_shallow(&self) -> Self {
        let inner = self.inner.borrow();
        let mut slots = FxHashMap::default();
        for (name, slot) in &inner.slots {
            let enumerable = match slot {
                Slot::Data { flags, .. } | Slot::Accessor { flags, .. } => {
                    flags.contains(SlotFlags::ENUMERABLE)
                }
            };
            if !enumerable {
                continue;
            }
            let copied = match (slot, inner.observed.get(name)) {
                (
                    Slot::Data { flags, .. },
                    Some(PropertyRecord {
                        intercept: Intercept::Data { cache, .. },
                        ..
                    }),
                ) => Slot::Data {
                    value: cache.clone(),
                    flags: *flags,
                },
                _ => slot.clone(),
            };
            slots.insert(name.clone(), copied);
        }
        Self::build(slots, inner.proto.clone())
    }

    // -- reads --------------------------------------------------------------

    /// Read a property. Observed data properties read from the interception
    /// cache; accessors run with no internal borrow held; misses fall
    /// through the delegate chain and bottom out at `Undefined`.
    #[must_use]
    pub fn get(&self, prop: &str) -> Value {
        let step = {
            let inner = self.inner.borrow();
            match inner.observed.get(prop) {
                Some(PropertyRecord {
                    intercept: Intercept::Data { cache, .. },
                    ..
                }) => ReadStep::Done(cache.clone()),
                _ => match inner.slots.get(prop) {
                    Some(Slot::Data { value, .. }) => ReadStep::Done(value.clone()),
                    Some(Slot::Accessor { get, .. }) => ReadStep::Getter(Rc::clone(get)),
                    None => match &inner.proto {
                        Some(p) => ReadStep::Proto(p.clone()),
                        None => ReadStep::Done(Value::Undefined),
                    },
                },
            }
        };
        match step {
            ReadStep::Done(v) => v,
            ReadStep::Getter(g) => g(self),
            ReadStep::Proto(p) => p.get(prop),
        }
    }

    // -- writes -------------------------------------------------------------

    /// Write a property.
    ///
    /// Observed data slots identity-compare against the cache (no-op when
    /// identical) and fan out to listeners; observed accessors delegate to
    /// the original setter, read back through the original getter, and fan
    /// out with that value. Unobserved writes land in the own slot, an
    /// ancestor's accessor or interception, or create a fresh own slot.
    pub fn set(&self, prop: &str, value: Value) {
        let step = self.local_write(prop, value.clone());
        match step {
            WriteStep::Done => {}
            WriteStep::Fire(listeners, value) => {
                for listener in &listeners {
                    listener(&value);
                }
            }
            WriteStep::Wrapped { get, set } => {
                set(self, value);
                let seen = get(self);
                let listeners = {
                    let inner = self.inner.borrow();
                    match inner.observed.get(prop) {
                        Some(record) => record.listeners.clone(),
                        None => SmallVec::new(),
                    }
                };
                for listener in &listeners {
                    listener(&seen);
                }
            }
            WriteStep::Plain(set) => set(self, value),
            WriteStep::Chain(start) => {
                let mut cursor = start;
                while let Some(ancestor) = cursor {
                    match ancestor.probe(prop) {
                        Probe::Handles => {
                            ancestor.set(prop, value);
                            return;
                        }
                        Probe::PlainData { writable } => {
                            if writable {
                                self.insert_data(prop, value);
                            }
                            return;
                        }
                        Probe::Miss(next) => cursor = next,
                    }
                }
                self.insert_data(prop, value);
            }
        }
    }

    /// First borrow phase of a write: mutate what can be mutated under the
    /// borrow and report what must happen after it is released.
    fn local_write(&self, prop: &str, value: Value) -> WriteStep {
        let mut inner = self.inner.borrow_mut();
        if let Some(record) = inner.observed.get_mut(prop) {
            match &mut record.intercept {
                Intercept::Data { cache, bridge } => {
                    if cache.identical(&value) {
                        return WriteStep::Done;
                    }
                    *cache = value.clone();
                    let listeners = record.listeners.clone();
                    let stale = bridge.take();
                    let fresh = value
                        .as_array()
                        .map(|arr| bridge_for(&self.inner, prop, arr));
                    *bridge = fresh;
                    drop(inner);
                    if let Some(stale) = stale {
                        stale.array.unobserve(&stale.listener);
                    }
                    return WriteStep::Fire(listeners, value);
                }
                Intercept::Accessor { get, set } => {
                    return WriteStep::Wrapped {
                        get: Rc::clone(get),
                        set: Rc::clone(set),
                    };
                }
                Intercept::ReadOnly => return WriteStep::Done,
            }
        }
        match inner.slots.get_mut(prop) {
            Some(Slot::Data { value: stored, flags }) => {
                if flags.contains(SlotFlags::WRITABLE) {
                    *stored = value;
                }
                WriteStep::Done
            }
            Some(Slot::Accessor { set: Some(s), .. }) => WriteStep::Plain(Rc::clone(s)),
            Some(Slot::Accessor { set: None, .. }) => WriteStep::Done,
            None => WriteStep::Chain(inner.proto.clone()),
        }
    }

    /// How this object would participate in a write delegated from below.
    fn probe(&self, prop: &str) -> Probe {
        let inner = self.inner.borrow();
        if inner.observed.contains_key(prop) {
            return Probe::Handles;
        }
        match inner.slots.get(prop) {
            Some(Slot::Accessor { .. }) => Probe::Handles,
            Some(Slot::Data { flags, .. }) => Probe::PlainData {
                writable: flags.contains(SlotFlags::WRITABLE),
            },
            None => Probe::Miss(inner.proto.clone()),
        }
    }

    fn insert_data(&self, prop: &str, value: Value) {
        self.inner
            .borrow_mut()
            .slots
            .insert(prop.to_string(), Slot::data(value));
    }

    // -- observation --------------------------------------------------------

    /// Register a listener for a property. The first registration captures
    /// the property's descriptor (walking the delegate chain; defaulting to
    /// an absent `Undefined` data descriptor) and installs interception;
    /// later registrations share it.
    pub fn observe(&self, prop: &str, listener: PropertyListener) {
        let mut inner = self.inner.borrow_mut();
        if let Some(record) = inner.observed.get_mut(prop) {
            record.listeners.push(listener);
            return;
        }

        let (intercept, saved) = match inner.slots.get(prop) {
            Some(Slot::Data { value, flags }) => {
                let bridge = value
                    .as_array()
                    .map(|arr| bridge_for(&self.inner, prop, arr));
                (
                    Intercept::Data {
                        cache: value.clone(),
                        bridge,
                    },
                    Saved::OwnData { flags: *flags },
                )
            }
            Some(Slot::Accessor { get, set: Some(set), .. }) => (
                Intercept::Accessor {
                    get: Rc::clone(get),
                    set: Rc::clone(set),
                },
                Saved::Untouched,
            ),
            Some(Slot::Accessor { set: None, .. }) => (Intercept::ReadOnly, Saved::Untouched),
            None => {
                let mut cursor = inner.proto.clone();
                let mut captured = None;
                while let Some(ancestor) = cursor {
                    match ancestor.capture(prop) {
                        Some(c) => {
                            captured = Some(c);
                            break;
                        }
                        None => cursor = ancestor.proto(),
                    }
                }
                match captured {
                    Some(Capture::Data(value)) => {
                        let bridge = value
                            .as_array()
                            .map(|arr| bridge_for(&self.inner, prop, arr));
                        (
                            Intercept::Data {
                                cache: value.clone(),
                                bridge,
                            },
                            Saved::Synthetic { original: value },
                        )
                    }
                    Some(Capture::Accessor { get, set: Some(set) }) => (
                        Intercept::Accessor { get, set },
                        Saved::Untouched,
                    ),
                    Some(Capture::Accessor { set: None, .. }) => {
                        (Intercept::ReadOnly, Saved::Untouched)
                    }
                    None => (
                        Intercept::Data {
                            cache: Value::Undefined,
                            bridge: None,
                        },
                        Saved::Synthetic {
                            original: Value::Undefined,
                        },
                    ),
                }
            }
        };

        trace!(target: "tether::observe", property = prop, "install interception");
        let mut listeners = SmallVec::new();
        listeners.push(listener);
        inner.observed.insert(
            prop.to_string(),
            PropertyRecord {
                listeners,
                intercept,
                saved,
            },
        );
    }

    /// What an ancestor contributes to a descendant's descriptor capture:
    /// its interception cache, or its own slot.
    fn capture(&self, prop: &str) -> Option<Capture> {
        let inner = self.inner.borrow();
        if let Some(record) = inner.observed.get(prop) {
            if let Intercept::Data { cache, .. } = &record.intercept {
                return Some(Capture::Data(cache.clone()));
            }
        }
        match inner.slots.get(prop) {
            Some(Slot::Data { value, .. }) => Some(Capture::Data(value.clone())),
            Some(Slot::Accessor { get, set, .. }) => Some(Capture::Accessor {
                get: Rc::clone(get),
                set: set.clone(),
            }),
            None => None,
        }
    }

    /// Remove a property listener, matched by `Rc` identity. Removing the
    /// last listener restores the original descriptor shape. Returns
    /// whether anything was removed.
    pub fn unobserve(&self, prop: &str, listener: &PropertyListener) -> bool {
        let bridge = {
            let mut inner = self.inner.borrow_mut();
            let Some(record) = inner.observed.get_mut(prop) else {
                return false;
            };
            let Some(index) = record
                .listeners
                .iter()
                .position(|l| Rc::ptr_eq(l, listener))
            else {
                return false;
            };
            record.listeners.remove(index);
            if !record.listeners.is_empty() {
                return true;
            }

            trace!(target: "tether::observe", property = prop, "restore descriptor");
            let record = inner
                .observed
                .remove(prop)
                .expect("record existed under this borrow");
            let (cache, bridge) = match record.intercept {
                Intercept::Data { cache, bridge } => (Some(cache), bridge),
                _ => (None, None),
            };
            match record.saved {
                Saved::OwnData { flags } => {
                    let value = cache.expect("data interception carries a cache");
                    inner.slots.insert(prop.to_string(), Slot::Data { value, flags });
                }
                Saved::Synthetic { original } => {
                    let value = cache.expect("data interception carries a cache");
                    if !value.identical(&original) {
                        inner.slots.insert(prop.to_string(), Slot::data(value));
                    }
                }
                Saved::Untouched => {}
            }
            bridge
        };
        if let Some(bridge) = bridge {
            bridge.array.unobserve(&bridge.listener);
        }
        true
    }

    /// Whether a property (or, with `None`, any property) is observed.
    #[must_use]
    pub fn is_observed(&self, prop: Option<&str>) -> bool {
        let inner = self.inner.borrow();
        match prop {
            Some(p) => inner.observed.contains_key(p),
            None => !inner.observed.is_empty(),
        }
    }
}

/// What an ancestor yields during descriptor capture.
enum Capture {
    Data(Value),
    Accessor { get: Getter, set: Option<Setter> },
}

/// Build the forwarding subscription that re-emits an array's mutation
/// events as notifications of the property holding it.
fn bridge_for(owner: &Rc<RefCell<ObjectInner>>, prop: &str, array: &ArrayRef) -> ArrayBridge {
    let weak: Weak<RefCell<ObjectInner>> = Rc::downgrade(owner);
    let name = prop.to_string();
    let listener: ArrayListener = Rc::new(move || {
        let Some(owner) = weak.upgrade() else { return };
        let (listeners, value) = {
            let inner = owner.borrow();
            let Some(record) = inner.observed.get(&name) else {
                return;
            };
            let Intercept::Data { cache, .. } = &record.intercept else {
                return;
            };
            (record.listeners.clone(), cache.clone())
        };
        for listener in &listeners {
            listener(&value);
        }
    });
    array.observe(Rc::clone(&listener));
    ArrayBridge {
        array: array.clone(),
        listener,
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(String, Value)> for ObjectRef {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let slots = iter
            .into_iter()
            .map(|(name, value)| (name, Slot::data(value)))
            .collect();
        Self::build(slots, None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn obj(pairs: &[(&str, Value)]) -> ObjectRef {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, PropertyListener) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        (seen, Rc::new(move |v: &Value| s.borrow_mut().push(v.clone())))
    }

    #[test]
    fn get_set_roundtrip() {
        let o = obj(&[("name", Value::str("ada"))]);
        assert_eq!(o.get("name"), Value::str("ada"));
        o.set("name", Value::str("grace"));
        assert_eq!(o.get("name"), Value::str("grace"));
        assert_eq!(o.get("missing"), Value::Undefined);
    }

    #[test]
    fn set_fires_listener_with_new_value_only_on_change() {
        let o = obj(&[("n", Value::from(1))]);
        let (seen, listener) = recorder();
        o.observe("n", listener);

        o.set("n", Value::from(2));
        o.set("n", Value::from(2)); // identical: swallowed
        o.set("n", Value::from(3));
        assert_eq!(*seen.borrow(), vec![Value::from(2), Value::from(3)]);
    }

    #[test]
    fn reads_go_through_cache_while_observed() {
        let o = obj(&[("n", Value::from(1))]);
        let (_, listener) = recorder();
        o.observe("n", listener);
        o.set("n", Value::from(5));
        assert_eq!(o.get("n"), Value::from(5));
    }

    #[test]
    fn observe_unobserve_restores_pristine_state() {
        let o = obj(&[("n", Value::from(1))]);
        let (_, listener) = recorder();

        o.observe("n", listener.clone());
        assert!(o.is_observed(Some("n")));
        o.set("n", Value::from(2));

        assert!(o.unobserve("n", &listener));
        assert!(!o.is_observed(Some("n")));
        assert!(!o.is_observed(None));
        // Current value survives restoration.
        assert_eq!(o.get("n"), Value::from(2));
        assert_eq!(o.keys(), vec!["n".to_string()]);
    }

    #[test]
    fn unobserve_returns_false_for_unknown_listener() {
        let o = obj(&[("n", Value::from(1))]);
        let (_, a) = recorder();
        let (_, b) = recorder();
        o.observe("n", a);
        assert!(!o.unobserve("n", &b));
        assert!(o.is_observed(Some("n")));
    }

    #[test]
    fn n_listeners_one_interception() {
        let o = obj(&[("n", Value::from(1))]);
        let (seen_a, a) = recorder();
        let (seen_b, b) = recorder();
        o.observe("n", a.clone());
        o.observe("n", b);

        o.set("n", Value::from(2));
        assert_eq!(seen_a.borrow().len(), 1);
        assert_eq!(seen_b.borrow().len(), 1);

        // Removing one leaves the other firing.
        assert!(o.unobserve("n", &a));
        assert!(o.is_observed(Some("n")));
        o.set("n", Value::from(3));
        assert_eq!(seen_a.borrow().len(), 1);
        assert_eq!(seen_b.borrow().len(), 2);
    }

    #[test]
    fn absent_property_observed_then_written() {
        let o = ObjectRef::new();
        let (seen, listener) = recorder();
        o.observe("ghost", listener.clone());
        assert_eq!(o.get("ghost"), Value::Undefined);

        o.set("ghost", Value::from(1));
        assert_eq!(*seen.borrow(), vec![Value::from(1)]);

        o.unobserve("ghost", &listener);
        // The write materialized an own slot on restore.
        assert_eq!(o.get("ghost"), Value::from(1));
        assert!(o.has_own("ghost"));
    }

    #[test]
    fn absent_property_observed_never_written_restores_to_absent() {
        let o = ObjectRef::new();
        let (_, listener) = recorder();
        o.observe("ghost", listener.clone());
        o.unobserve("ghost", &listener);
        assert!(!o.has_own("ghost"));
        assert!(o.keys().is_empty());
    }

    #[test]
    fn accessor_with_setter_preserves_getter_identity() {
        let o = ObjectRef::new();
        let store = Rc::new(Cell::new(10.0));
        let s1 = Rc::clone(&store);
        let s2 = Rc::clone(&store);
        let get: Getter = Rc::new(move |_| Value::Number(s1.get()));
        o.define(
            "temp",
            Slot::Accessor {
                get: Rc::clone(&get),
                set: Some(Rc::new(move |_, v| {
                    s2.set(v.coerce_number().clamp(0.0, 100.0));
                })),
                flags: SlotFlags::default(),
            },
        );

        let (seen, listener) = recorder();
        o.observe("temp", listener.clone());

        // Listener fires with the value read back through the original
        // getter, not the raw written value.
        o.set("temp", Value::from(250));
        assert_eq!(*seen.borrow(), vec![Value::from(100)]);
        assert_eq!(o.get("temp"), Value::from(100));

        o.unobserve("temp", &listener);
        // Original accessor still in place.
        o.set("temp", Value::from(50));
        assert_eq!(o.get("temp"), Value::from(50));
    }

    #[test]
    fn getter_only_property_never_fires() {
        let o = ObjectRef::new();
        o.define(
            "ro",
            Slot::Accessor {
                get: Rc::new(|_| Value::from(7)),
                set: None,
                flags: SlotFlags::default(),
            },
        );
        let (seen, listener) = recorder();
        o.observe("ro", listener);
        o.set("ro", Value::from(9));
        assert!(seen.borrow().is_empty());
        assert_eq!(o.get("ro"), Value::from(7));
    }

    #[test]
    fn non_writable_slot_ignores_writes() {
        let o = ObjectRef::new();
        o.define(
            "pi",
            Slot::Data {
                value: Value::from(3.14),
                flags: SlotFlags::ENUMERABLE | SlotFlags::CONFIGURABLE,
            },
        );
        o.set("pi", Value::from(3));
        assert_eq!(o.get("pi"), Value::from(3.14));
    }

    #[test]
    fn delete_honors_configurability() {
        let o = ObjectRef::new();
        o.define(
            "keep",
            Slot::Data {
                value: Value::from(1),
                flags: SlotFlags::WRITABLE | SlotFlags::ENUMERABLE,
            },
        );
        assert!(!o.delete("keep"));
        assert_eq!(o.get("keep"), Value::from(1));

        o.define("drop", Slot::data(Value::from(2)));
        assert!(o.delete("drop"));
        assert_eq!(o.get("drop"), Value::Undefined);
    }

    #[test]
    fn proto_reads_fall_through_and_writes_shadow() {
        let base = obj(&[("shared", Value::from(1)), ("plain", Value::from(2))]);
        let child = ObjectRef::with_proto(base.clone());
        assert_eq!(child.get("shared"), Value::from(1));

        // Plain data on the delegate: the write creates an own shadow slot.
        child.set("plain", Value::from(9));
        assert_eq!(child.get("plain"), Value::from(9));
        assert_eq!(base.get("plain"), Value::from(2));
    }

    #[test]
    fn write_reaches_observed_delegate_property() {
        let base = obj(&[("n", Value::from(1))]);
        let (seen, listener) = recorder();
        base.observe("n", listener);

        let child = ObjectRef::with_proto(base.clone());
        child.set("n", Value::from(4));
        assert_eq!(*seen.borrow(), vec![Value::from(4)]);
        assert_eq!(base.get("n"), Value::from(4));
        assert!(!child.has_own("n"));
    }

    #[test]
    fn observing_inherited_property_captures_current_value() {
        let base = obj(&[("n", Value::from(6))]);
        let child = ObjectRef::with_proto(base.clone());
        let (seen, listener) = recorder();
        child.observe("n", listener.clone());
        assert_eq!(child.get("n"), Value::from(6));

        child.set("n", Value::from(7));
        assert_eq!(*seen.borrow(), vec![Value::from(7)]);
        // Shadowed on the child; the delegate is untouched.
        assert_eq!(base.get("n"), Value::from(6));

        child.unobserve("n", &listener);
        assert_eq!(child.get("n"), Value::from(7));
        assert!(child.has_own("n"));
    }

    #[test]
    fn hidden_registry_survives_nothing_in_shallow_clone() {
        let o = obj(&[("n", Value::from(1))]);
        let (seen, listener) = recorder();
        o.observe("n", listener);
        o.set("n", Value::from(2));

        let copy = o.clone_shallow();
        assert!(!copy.is_observed(None));
        // The copy sees the current (cached) value.
        assert_eq!(copy.get("n"), Value::from(2));

        copy.set("n", Value::from(3));
        // Writes to the copy notify nobody and leave the original alone.
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(o.get("n"), Value::from(2));
    }

    #[test]
    fn keys_never_expose_observation_state() {
        let o = obj(&[("a", Value::from(1))]);
        let (_, listener) = recorder();
        o.observe("a", listener.clone());
        o.observe("phantom", listener);
        let mut keys = o.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string()]);
    }

    #[test]
    fn array_valued_property_forwards_mutations() {
        let arr = ArrayRef::new();
        let o = obj(&[("items", Value::from(arr.clone()))]);
        let (seen, listener) = recorder();
        o.observe("items", listener);

        arr.push(Value::from(1));
        arr.push(Value::from(2));
        assert_eq!(seen.borrow().len(), 2);
        // Forwarded events carry the property's (array) value.
        assert!(seen.borrow()[0].is_array());
    }

    #[test]
    fn replacing_array_rewires_bridge() {
        let first = ArrayRef::new();
        let second = ArrayRef::new();
        let o = obj(&[("items", Value::from(first.clone()))]);
        let (seen, listener) = recorder();
        o.observe("items", listener);

        o.set("items", Value::from(second.clone()));
        assert_eq!(seen.borrow().len(), 1);

        // The old array is detached.
        first.push(Value::from(1));
        assert_eq!(seen.borrow().len(), 1);
        assert!(!first.is_observed());

        second.push(Value::from(1));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn unobserve_detaches_bridge() {
        let arr = ArrayRef::new();
        let o = obj(&[("items", Value::from(arr.clone()))]);
        let (_, listener) = recorder();
        o.observe("items", listener.clone());
        assert!(arr.is_observed());
        o.unobserve("items", &listener);
        assert!(!arr.is_observed());
    }

    #[test]
    fn listener_mutating_object_reenters_safely() {
        let o = obj(&[("a", Value::from(1)), ("b", Value::from(10))]);
        let (seen_b, lb) = recorder();
        o.observe("b", lb);

        let o2 = o.clone();
        let cascade: PropertyListener = Rc::new(move |v: &Value| {
            let n = v.coerce_number();
            o2.set("b", Value::from(n * 10.0));
        });
        o.observe("a", cascade);

        o.set("a", Value::from(2));
        assert_eq!(*seen_b.borrow(), vec![Value::from(20)]);
        assert_eq!(o.get("b"), Value::from(20));
    }

    #[test]
    fn define_over_observed_property_keeps_listeners() {
        let o = obj(&[("n", Value::from(1))]);
        let (seen, listener) = recorder();
        o.observe("n", listener);

        o.define("n", Slot::data(Value::from(5)));
        assert_eq!(o.get("n"), Value::from(5));
        assert!(o.is_observed(Some("n")));

        o.set("n", Value::from(6));
        assert_eq!(seen.borrow().last().cloned(), Some(Value::from(6)));
    }
}
