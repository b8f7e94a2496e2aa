//! The reactive property interceptor.
//!
//! A [`ReactiveCell`] replaces a plain field once its object is observed.
//! Reads go through [`ReactiveCell::get`], which subscribes the evaluating
//! watcher; writes go through [`ReactiveCell::set`], which notifies.

use std::sync::Arc;

use parking_lot::RwLock;

use super::object::Accessor;
use super::{depend_array, observe, Observer, Value};
use crate::reactive::{untracked, Dep, DepId, ReactiveContext};

/// Hook invoked with the incoming value before a changing write is stored.
pub type CustomSetter = Arc<dyn Fn(&Value) + Send + Sync>;

pub(crate) enum CellStorage {
    Value(RwLock<Value>),
    Accessor(Accessor),
}

pub(crate) struct ReactiveCell {
    storage: CellStorage,
    dep: Dep,
    /// Observer of the current value, unless the field is shallow.
    child_ob: RwLock<Option<Observer>>,
    shallow: bool,
    custom_setter: Option<CustomSetter>,
}

impl ReactiveCell {
    pub(crate) fn new(
        storage: CellStorage,
        child_ob: Option<Observer>,
        shallow: bool,
        custom_setter: Option<CustomSetter>,
    ) -> Self {
        Self {
            storage,
            dep: Dep::new(),
            child_ob: RwLock::new(child_ob),
            shallow,
            custom_setter,
        }
    }

    pub(crate) fn dep_id(&self) -> DepId {
        self.dep.id()
    }

    fn current(&self) -> Value {
        match &self.storage {
            CellStorage::Value(value) => value.read().clone(),
            CellStorage::Accessor(accessor) => (accessor.get)(),
        }
    }

    /// Read without subscribing anyone.
    pub(crate) fn peek(&self) -> Value {
        untracked(|| self.current())
    }

    /// Tracked read.
    pub(crate) fn get(&self) -> Value {
        let value = self.current();

        if ReactiveContext::is_tracking() {
            self.dep.depend();
            let child_ob = self.child_ob.read().clone();
            if let Some(child_ob) = child_ob {
                // Whole-value replacement and add/delete on the child both
                // notify through the child's own dep.
                child_ob.dep().depend();
                if let Value::Array(items) = &value {
                    depend_array(items);
                }
            }
        }

        value
    }

    /// Intercepted write. Unchanged values (including `NaN` over `NaN`) do
    /// not notify.
    pub(crate) fn set(&self, new_value: Value) {
        let current = self.peek();
        if new_value.same_value(&current) {
            return;
        }

        if let Some(custom_setter) = &self.custom_setter {
            custom_setter(&new_value);
        }

        match &self.storage {
            CellStorage::Value(value) => *value.write() = new_value.clone(),
            CellStorage::Accessor(accessor) => match &accessor.set {
                Some(set) => set(new_value.clone()),
                // Read-only accessor.
                None => return,
            },
        }

        let child_ob = if self.shallow {
            None
        } else {
            observe(&new_value, false)
        };
        *self.child_ob.write() = child_ob;

        self.dep.notify();
    }
}
