//! Arrays and their tracked mutators.
//!
//! Element reads are plain. Every structural change goes through one of the
//! mutators below, which observe inserted elements and notify the array's
//! own dep once the array is observed.

use std::cmp::Ordering as CmpOrdering;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::object::Integrity;
use super::{Observer, Value};

pub(crate) struct ArrayInner {
    items: RwLock<Vec<Value>>,
    pub(crate) marker: OnceLock<Observer>,
    integrity: AtomicU8,
}

/// A shared, ordered list of values.
#[derive(Clone)]
pub struct Array(pub(crate) Arc<ArrayInner>);

impl Array {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(ArrayInner {
            items: RwLock::new(items),
            marker: OnceLock::new(),
            integrity: AtomicU8::new(Integrity::Extensible as u8),
        }))
    }

    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, or `Undefined` past the end.
    pub fn get(&self, index: usize) -> Value {
        self.0.items.read().get(index).cloned().unwrap_or_default()
    }

    /// Snapshot of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.read().clone()
    }

    /// Append `value` and return the new length.
    pub fn push(&self, value: Value) -> usize {
        if !self.check_mutable("push", true) {
            return self.len();
        }
        let len = {
            let mut items = self.0.items.write();
            items.push(value.clone());
            items.len()
        };
        self.after_mutation("push", &[value]);
        len
    }

    pub fn pop(&self) -> Option<Value> {
        if !self.check_mutable("pop", true) {
            return None;
        }
        let popped = self.0.items.write().pop();
        self.after_mutation("pop", &[]);
        popped
    }

    pub fn shift(&self) -> Option<Value> {
        if !self.check_mutable("shift", true) {
            return None;
        }
        let shifted = {
            let mut items = self.0.items.write();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.after_mutation("shift", &[]);
        shifted
    }

    /// Prepend `values` in order and return the new length.
    pub fn unshift(&self, values: Vec<Value>) -> usize {
        if !self.check_mutable("unshift", true) {
            return self.len();
        }
        let len = {
            let mut items = self.0.items.write();
            items.splice(0..0, values.iter().cloned());
            items.len()
        };
        self.after_mutation("unshift", &values);
        len
    }

    /// Remove `delete_count` elements from `start`, insert `insert` in their
    /// place, and return the removed elements. `start` is clamped to the
    /// length. A splice that keeps the length is allowed on non-extensible
    /// arrays.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Vec<Value> {
        let resizes = {
            let len = self.len();
            let start = start.min(len);
            let end = start.saturating_add(delete_count).min(len);
            end - start != insert.len()
        };
        if !self.check_mutable("splice", resizes) {
            return Vec::new();
        }
        let removed = {
            let mut items = self.0.items.write();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, insert.iter().cloned()).collect()
        };
        self.after_mutation("splice", &insert);
        removed
    }

    /// Sort in place. The comparator runs without any lock held.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> CmpOrdering,
    {
        if !self.check_mutable("sort", false) {
            return;
        }
        let mut items = self.to_vec();
        items.sort_by(compare);
        *self.0.items.write() = items;
        self.after_mutation("sort", &[]);
    }

    pub fn reverse(&self) {
        if !self.check_mutable("reverse", false) {
            return;
        }
        self.0.items.write().reverse();
        self.after_mutation("reverse", &[]);
    }

    /// Write `value` at `index`, padding with `Undefined` past the end.
    ///
    /// Returns `false` when the array's integrity forbids the write. Callers
    /// bound `index` first.
    pub(crate) fn assign(&self, index: usize, value: Value) -> bool {
        let resizes = index >= self.len();
        if !self.check_mutable("set", resizes) {
            return false;
        }
        {
            let mut items = self.0.items.write();
            if items.len() <= index {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value.clone();
        }
        self.after_mutation("set", &[value]);
        true
    }

    pub fn integrity(&self) -> Integrity {
        match self.0.integrity.load(Ordering::Acquire) {
            0 => Integrity::Extensible,
            1 => Integrity::NonExtensible,
            2 => Integrity::Sealed,
            _ => Integrity::Frozen,
        }
    }

    pub fn is_extensible(&self) -> bool {
        self.integrity() == Integrity::Extensible
    }

    pub fn is_frozen(&self) -> bool {
        self.integrity() == Integrity::Frozen
    }

    pub fn prevent_extensions(&self) {
        self.0
            .integrity
            .fetch_max(Integrity::NonExtensible as u8, Ordering::AcqRel);
    }

    pub fn freeze(&self) {
        self.0.integrity.fetch_max(Integrity::Frozen as u8, Ordering::AcqRel);
    }

    /// The observer attached to this array, if any.
    pub fn observer(&self) -> Option<Observer> {
        self.0.marker.get().cloned()
    }

    pub fn ptr_eq(a: &Array, b: &Array) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Length-changing mutators need an extensible array; reordering ones
    /// only need it not frozen.
    fn check_mutable(&self, method: &'static str, resizes: bool) -> bool {
        let integrity = self.integrity();
        let allowed = if resizes {
            integrity == Integrity::Extensible
        } else {
            integrity != Integrity::Frozen
        };
        if !allowed {
            tracing::warn!(method, ?integrity, "array mutation rejected");
        }
        allowed
    }

    fn after_mutation(&self, method: &'static str, inserted: &[Value]) {
        let Some(ob) = self.observer() else {
            return;
        };
        for value in inserted {
            super::observe(value, false);
        }
        tracing::trace!(method, dep = %ob.dep().id(), "array mutated");
        ob.dep().notify();
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.len())
            .field("integrity", &self.integrity())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}
