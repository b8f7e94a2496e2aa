//! Objects: insertion-ordered fields behind a shared handle.
//!
//! Before an object is observed its fields are plain data. Observing it
//! swaps every field for a reactive cell, after which reads and writes
//! through [`Object::get`] and [`Object::set`] are intercepted. Code that
//! uses the object does not change.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::cell::ReactiveCell;
use super::{Observer, Value};
use crate::reactive::{untracked, DepId};

/// Getter half of an accessor field.
pub type AccessorGet = Arc<dyn Fn() -> Value + Send + Sync>;

/// Setter half of an accessor field.
pub type AccessorSet = Arc<dyn Fn(Value) + Send + Sync>;

/// A field computed by functions instead of stored.
#[derive(Clone)]
pub struct Accessor {
    pub get: AccessorGet,
    pub set: Option<AccessorSet>,
}

/// How far an object or array is locked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Integrity {
    /// Fields may be added, removed, and written.
    Extensible = 0,
    /// No new fields.
    NonExtensible = 1,
    /// No new fields, and existing fields cannot be removed or redefined.
    Sealed = 2,
    /// Sealed, and plain data fields are read-only.
    Frozen = 3,
}

impl Integrity {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Integrity::Extensible,
            1 => Integrity::NonExtensible,
            2 => Integrity::Sealed,
            _ => Integrity::Frozen,
        }
    }

    /// Whether existing fields may still be redefined or removed.
    pub fn is_configurable(self) -> bool {
        self < Integrity::Sealed
    }
}

#[derive(Clone)]
pub(crate) enum Slot {
    Data(Value),
    Accessor(Accessor),
    Reactive(Arc<ReactiveCell>),
}

pub(crate) struct ObjectInner {
    fields: RwLock<IndexMap<String, Slot>>,
    /// Hidden marker linking back to the observer.
    pub(crate) marker: OnceLock<Observer>,
    integrity: AtomicU8,
    /// Set on root framework objects, which are never observed.
    component: AtomicBool,
}

/// A shared, insertion-ordered map of fields.
#[derive(Clone)]
pub struct Object(pub(crate) Arc<ObjectInner>);

impl Object {
    pub fn new() -> Self {
        Self(Arc::new(ObjectInner {
            fields: RwLock::new(IndexMap::new()),
            marker: OnceLock::new(),
            integrity: AtomicU8::new(Integrity::Extensible as u8),
            component: AtomicBool::new(false),
        }))
    }

    /// Read a field. Missing fields read as `Undefined`.
    ///
    /// Reading a reactive field subscribes the evaluating watcher.
    pub fn get(&self, key: &str) -> Value {
        match self.slot(key) {
            Some(Slot::Data(value)) => value,
            Some(Slot::Accessor(accessor)) => (accessor.get)(),
            Some(Slot::Reactive(cell)) => cell.get(),
            None => Value::Undefined,
        }
    }

    /// Read a field without subscribing anyone.
    pub fn peek(&self, key: &str) -> Value {
        untracked(|| self.get(key))
    }

    /// Assign a field.
    ///
    /// Reactive fields notify when the value changes. Missing fields are
    /// added as plain, unobserved data; use [`crate::observer::set`] to add
    /// a reactive field. Frozen data fields and missing fields on a
    /// non-extensible object ignore the write.
    pub fn set(&self, key: &str, value: Value) {
        let slot = self.slot(key);
        match slot {
            Some(Slot::Reactive(cell)) => cell.set(value),
            Some(Slot::Accessor(accessor)) => {
                if let Some(set) = accessor.set {
                    set(value);
                }
            }
            Some(Slot::Data(_)) => {
                if self.integrity() != Integrity::Frozen {
                    self.0.fields.write().insert(key.to_string(), Slot::Data(value));
                }
            }
            None => {
                if self.is_extensible() {
                    self.0.fields.write().insert(key.to_string(), Slot::Data(value));
                }
            }
        }
    }

    /// Remove a field without notifying anyone.
    ///
    /// Returns the last value, or `None` when the field is missing or the
    /// object is sealed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        if !self.integrity().is_configurable() {
            return None;
        }
        let slot = self.0.fields.write().shift_remove(key)?;
        Some(match slot {
            Slot::Data(value) => value,
            Slot::Accessor(accessor) => untracked(|| (accessor.get)()),
            Slot::Reactive(cell) => cell.peek(),
        })
    }

    /// Define an accessor field. Fails on sealed objects, and for new fields
    /// on non-extensible objects.
    pub fn define_accessor(&self, key: &str, accessor: Accessor) -> bool {
        if !self.integrity().is_configurable() {
            return false;
        }
        let mut fields = self.0.fields.write();
        if !fields.contains_key(key) && !self.is_extensible() {
            return false;
        }
        fields.insert(key.to_string(), Slot::Accessor(accessor));
        true
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.fields.read().contains_key(key)
    }

    /// Field names in insertion order. Not tracked.
    pub fn keys(&self) -> Vec<String> {
        self.0.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the field is intercepted.
    pub fn is_reactive(&self, key: &str) -> bool {
        matches!(self.slot(key), Some(Slot::Reactive(_)))
    }

    /// Dep of a reactive field.
    pub fn field_dep_id(&self, key: &str) -> Option<DepId> {
        match self.slot(key)? {
            Slot::Reactive(cell) => Some(cell.dep_id()),
            _ => None,
        }
    }

    pub fn integrity(&self) -> Integrity {
        Integrity::from_u8(self.0.integrity.load(Ordering::Acquire))
    }

    pub fn is_extensible(&self) -> bool {
        self.integrity() == Integrity::Extensible
    }

    pub fn is_frozen(&self) -> bool {
        self.integrity() == Integrity::Frozen
    }

    pub fn prevent_extensions(&self) {
        self.raise_integrity(Integrity::NonExtensible);
    }

    pub fn seal(&self) {
        self.raise_integrity(Integrity::Sealed);
    }

    pub fn freeze(&self) {
        self.raise_integrity(Integrity::Frozen);
    }

    fn raise_integrity(&self, level: Integrity) {
        self.0.integrity.fetch_max(level as u8, Ordering::AcqRel);
    }

    /// Tag this object as a root framework object (a component instance).
    pub fn mark_component(&self) {
        self.0.component.store(true, Ordering::Release);
    }

    pub fn is_component(&self) -> bool {
        self.0.component.load(Ordering::Acquire)
    }

    /// The observer attached to this object, if any.
    pub fn observer(&self) -> Option<Observer> {
        self.0.marker.get().cloned()
    }

    pub fn ptr_eq(a: &Object, b: &Object) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn slot(&self, key: &str) -> Option<Slot> {
        self.0.fields.read().get(key).cloned()
    }

    /// Put `slot` under `key`, keeping the position of an existing field.
    pub(crate) fn install(&self, key: &str, slot: Slot) {
        self.0.fields.write().insert(key.to_string(), slot);
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let obj = Object::new();
        {
            let mut fields = obj.0.fields.write();
            for (key, value) in iter {
                fields.insert(key.into(), Slot::Data(value));
            }
        }
        obj
    }
}

impl Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("integrity", &self.integrity())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_read_and_write() {
        let obj = Object::from_iter([("a", Value::from(1))]);
        assert_eq!(obj.get("a"), Value::from(1));
        assert_eq!(obj.get("missing"), Value::Undefined);

        obj.set("a", Value::from(2));
        obj.set("b", Value::from(3));
        assert_eq!(obj.keys(), vec!["a", "b"]);
        assert!(!obj.is_reactive("a"));
    }

    #[test]
    fn frozen_object_ignores_data_writes() {
        let obj = Object::from_iter([("a", Value::from(1))]);
        obj.freeze();

        obj.set("a", Value::from(2));
        obj.set("b", Value::from(3));
        assert_eq!(obj.get("a"), Value::from(1));
        assert!(!obj.contains_key("b"));
        assert_eq!(obj.remove("a"), None);
    }

    #[test]
    fn integrity_only_increases() {
        let obj = Object::new();
        obj.freeze();
        obj.prevent_extensions();
        assert_eq!(obj.integrity(), Integrity::Frozen);
    }

    #[test]
    fn sealed_object_allows_writes_but_not_additions() {
        let obj = Object::from_iter([("a", Value::from(1))]);
        obj.seal();

        obj.set("a", Value::from(2));
        obj.set("b", Value::from(3));
        assert_eq!(obj.get("a"), Value::from(2));
        assert!(!obj.contains_key("b"));
    }

    #[test]
    fn accessor_fields_delegate() {
        let store = Arc::new(RwLock::new(Value::from(0)));
        let read = store.clone();
        let write = store.clone();

        let obj = Object::new();
        assert!(obj.define_accessor(
            "x",
            Accessor {
                get: Arc::new(move || read.read().clone()),
                set: Some(Arc::new(move |v| *write.write() = v)),
            },
        ));

        obj.set("x", Value::from(9));
        assert_eq!(obj.get("x"), Value::from(9));
        assert_eq!(*store.read(), Value::from(9));
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let obj = Object::from_iter([
            ("a", Value::from(1)),
            ("b", Value::from(2)),
            ("c", Value::from(3)),
        ]);
        assert_eq!(obj.remove("b"), Some(Value::from(2)));
        assert_eq!(obj.keys(), vec!["a", "c"]);
    }
}
