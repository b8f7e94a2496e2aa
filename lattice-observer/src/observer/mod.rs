//! Observation
//!
//! Turns plain values into reactive ones. [`observe`] attaches an
//! [`Observer`] to an object or array and intercepts its fields, so later
//! reads subscribe the evaluating watcher and later writes notify.
//!
//! # Concepts
//!
//! ## Field deps and container deps
//!
//! Every intercepted field owns a dep of its own. Every observed container
//! additionally owns the dep inside its [`Observer`]. The container dep
//! fires on changes the field deps cannot see: fields added with [`set`],
//! fields removed with [`delete`], and array mutators.
//!
//! ## Markers
//!
//! An observed container carries a hidden marker pointing at its observer.
//! Observing the same container again returns the existing observer, which
//! keeps observation idempotent and cyclic graphs finite.

mod array;
mod cell;
mod object;
mod traverse;
mod value;

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

pub use array::Array;
pub use cell::CustomSetter;
pub use object::{Accessor, AccessorGet, AccessorSet, Integrity, Object};
pub use traverse::traverse;
pub use value::Value;

use cell::{CellStorage, ReactiveCell};
use object::Slot;

use crate::error::{ReactiveError, Result};
use crate::reactive::{untracked, Dep};

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Enable or disable creation of new observers on this thread.
///
/// Already observed containers are unaffected.
pub fn toggle_observing(value: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(value));
}

/// Whether [`observe`] currently creates new observers on this thread.
pub fn should_observe() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

struct ObserverInner {
    dep: Dep,
    /// Number of component instances using this value as root data.
    vm_count: AtomicUsize,
}

/// Per-container observation record.
#[derive(Clone)]
pub struct Observer(Arc<ObserverInner>);

impl Observer {
    fn new() -> Self {
        Self(Arc::new(ObserverInner {
            dep: Dep::new(),
            vm_count: AtomicUsize::new(0),
        }))
    }

    /// The container dep.
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    pub fn vm_count(&self) -> usize {
        self.0.vm_count.load(Ordering::Acquire)
    }

    pub fn ptr_eq(a: &Observer, b: &Observer) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Intercept every field of `obj`.
    fn walk(&self, obj: &Object) {
        for key in obj.keys() {
            define_reactive(obj, &key, None, FieldOptions::default());
        }
    }

    fn observe_array(&self, arr: &Array) {
        for item in arr.to_vec() {
            observe(&item, false);
        }
    }
}

impl Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep.id())
            .field("vm_count", &self.vm_count())
            .finish()
    }
}

/// Attach an observer to `value`, or return the one it already has.
///
/// Returns `None` for primitives, and for containers that are not
/// extensible, are component instances, or arrive while observation is
/// switched off. `as_root` marks the value as a component's root data.
pub fn observe(value: &Value, as_root: bool) -> Option<Observer> {
    let ob = match value {
        Value::Object(obj) => observe_object(obj),
        Value::Array(arr) => observe_array(arr),
        _ => None,
    }?;

    if as_root {
        ob.0.vm_count.fetch_add(1, Ordering::AcqRel);
    }
    Some(ob)
}

fn observe_object(obj: &Object) -> Option<Observer> {
    if let Some(ob) = obj.observer() {
        return Some(ob);
    }
    if !should_observe() || !obj.is_extensible() || obj.is_component() {
        return None;
    }

    let mut created = false;
    let ob = obj
        .0
        .marker
        .get_or_init(|| {
            created = true;
            Observer::new()
        })
        .clone();

    // The marker is set before walking, so a cycle back to `obj` stops here.
    if created {
        tracing::debug!(dep = %ob.dep().id(), fields = obj.len(), "observing object");
        ob.walk(obj);
    }
    Some(ob)
}

fn observe_array(arr: &Array) -> Option<Observer> {
    if let Some(ob) = arr.observer() {
        return Some(ob);
    }
    if !should_observe() || !arr.is_extensible() {
        return None;
    }

    let mut created = false;
    let ob = arr
        .0
        .marker
        .get_or_init(|| {
            created = true;
            Observer::new()
        })
        .clone();

    if created {
        tracing::debug!(dep = %ob.dep().id(), len = arr.len(), "observing array");
        ob.observe_array(arr);
    }
    Some(ob)
}

/// Options for [`define_reactive`].
#[derive(Clone, Default)]
pub struct FieldOptions {
    /// Called with the incoming value on every changing write.
    pub custom_setter: Option<CustomSetter>,
    /// Do not observe the field's value.
    pub shallow: bool,
}

impl Debug for FieldOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldOptions")
            .field("custom_setter", &self.custom_setter.is_some())
            .field("shallow", &self.shallow)
            .finish()
    }
}

/// Intercept `key` on `obj`.
///
/// Sealed and frozen objects are left alone. A field that is already
/// intercepted is not wrapped twice; an explicit `initial` value is written
/// through it instead. Accessor fields keep delegating to their functions.
pub fn define_reactive(obj: &Object, key: &str, initial: Option<Value>, options: FieldOptions) {
    if !obj.integrity().is_configurable() {
        return;
    }

    let (storage, value) = match obj.slot(key) {
        Some(Slot::Reactive(cell)) => {
            if let Some(value) = initial {
                cell.set(value);
            }
            return;
        }
        Some(Slot::Accessor(accessor)) => {
            // A getter without setter is never deep-observed up front.
            let value = match (&initial, &accessor.set) {
                (Some(value), _) => value.clone(),
                (None, Some(_)) => untracked(|| (accessor.get)()),
                (None, None) => Value::Undefined,
            };
            (CellStorage::Accessor(accessor), value)
        }
        Some(Slot::Data(current)) => {
            let value = initial.unwrap_or(current);
            (CellStorage::Value(RwLock::new(value.clone())), value)
        }
        None => {
            if !obj.is_extensible() {
                return;
            }
            let value = initial.unwrap_or_default();
            (CellStorage::Value(RwLock::new(value.clone())), value)
        }
    };

    let child_ob = if options.shallow {
        None
    } else {
        observe(&value, false)
    };

    let cell = ReactiveCell::new(storage, child_ob, options.shallow, options.custom_setter);
    obj.install(key, Slot::Reactive(Arc::new(cell)));
}

/// Key for [`set`] and [`delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKey {
    Name(String),
    Index(usize),
}

impl FieldKey {
    fn index(&self) -> Option<usize> {
        match self {
            FieldKey::Index(index) => Some(*index),
            FieldKey::Name(name) => name.parse().ok(),
        }
    }

    fn name(&self) -> String {
        match self {
            FieldKey::Index(index) => index.to_string(),
            FieldKey::Name(name) => name.clone(),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        FieldKey::Name(value.to_string())
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        FieldKey::Name(value)
    }
}

impl From<usize> for FieldKey {
    fn from(value: usize) -> Self {
        FieldKey::Index(value)
    }
}

/// Largest index [`set`] accepts on an array: array lengths stop at
/// `u32::MAX`.
pub const MAX_ARRAY_INDEX: usize = u32::MAX as usize - 1;

fn invalid_target(operation: &'static str, target: &Value) -> ReactiveError {
    ReactiveError::InvalidTarget {
        operation,
        value: target.type_name().to_string(),
    }
}

/// Add or assign a field so that watchers of the container see it.
///
/// Returns the assigned value. Array indices above [`MAX_ARRAY_INDEX`] are
/// rejected; writes an array's integrity forbids are ignored with a warning.
pub fn set(target: &Value, key: impl Into<FieldKey>, value: Value) -> Result<Value> {
    let key = key.into();
    match target {
        Value::Array(arr) => {
            let index = key
                .index()
                .filter(|index| *index <= MAX_ARRAY_INDEX)
                .ok_or_else(|| invalid_target("set", target))?;
            arr.assign(index, value.clone());
            Ok(value)
        }
        Value::Object(obj) => {
            let name = key.name();
            if obj.contains_key(&name) {
                obj.set(&name, value.clone());
                return Ok(value);
            }

            let ob = obj.observer();
            if obj.is_component() || ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                tracing::warn!(
                    key = %name,
                    "avoid adding reactive fields to a component instance or its root data at runtime"
                );
                return Ok(value);
            }

            let Some(ob) = ob else {
                obj.set(&name, value.clone());
                return Ok(value);
            };

            if !obj.is_extensible() {
                tracing::warn!(key = %name, "cannot add a field to a non-extensible object");
                return Ok(value);
            }

            define_reactive(obj, &name, Some(value.clone()), FieldOptions::default());
            ob.dep().notify();
            Ok(value)
        }
        _ => Err(invalid_target("set", target)),
    }
}

/// Remove a field and notify watchers of the container.
pub fn delete(target: &Value, key: impl Into<FieldKey>) -> Result<()> {
    let key = key.into();
    match target {
        Value::Array(arr) => {
            let index = key.index().ok_or_else(|| invalid_target("delete", target))?;
            arr.splice(index, 1, Vec::new());
            Ok(())
        }
        Value::Object(obj) => {
            let name = key.name();
            let ob = obj.observer();
            if obj.is_component() || ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                tracing::warn!(
                    key = %name,
                    "avoid deleting fields of a component instance or its root data"
                );
                return Ok(());
            }
            if !obj.contains_key(&name) {
                return Ok(());
            }

            if obj.remove(&name).is_none() {
                tracing::warn!(key = %name, "cannot delete a field of a sealed object");
                return Ok(());
            }
            if let Some(ob) = ob {
                ob.dep().notify();
            }
            Ok(())
        }
        _ => Err(invalid_target("delete", target)),
    }
}

/// Subscribe the evaluating watcher to every observed element of `arr`,
/// recursing into nested arrays.
pub(crate) fn depend_array(arr: &Array) {
    let mut seen = HashSet::new();
    depend_array_inner(arr, &mut seen);
}

fn depend_array_inner(arr: &Array, seen: &mut HashSet<usize>) {
    if !seen.insert(arr.addr()) {
        return;
    }
    for item in arr.to_vec() {
        if let Some(ob) = item.observer() {
            ob.dep().depend();
        }
        if let Value::Array(inner) = &item {
            depend_array_inner(inner, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Runtime, Watcher, WatcherOptions};

    fn observed(fields: &[(&str, Value)]) -> (Object, Value) {
        let obj: Object = fields.iter().cloned().collect();
        let value = Value::Object(obj.clone());
        observe(&value, false);
        (obj, value)
    }

    fn lazy_reader<F>(read: F) -> Watcher
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let watcher = Watcher::new(move || Ok(read()), WatcherOptions::default().lazy()).unwrap();
        watcher.evaluate().unwrap();
        watcher
    }

    #[test]
    fn primitives_are_not_observed() {
        assert!(observe(&Value::from(1), false).is_none());
        assert!(observe(&Value::from("x"), true).is_none());
    }

    #[test]
    fn observe_is_idempotent() {
        let (obj, value) = observed(&[("a", Value::from(1))]);
        let dep_a = obj.field_dep_id("a").unwrap();

        let first = obj.observer().unwrap();
        let second = observe(&value, false).unwrap();
        assert!(Observer::ptr_eq(&first, &second));
        assert_eq!(obj.field_dep_id("a"), Some(dep_a));
    }

    #[test]
    fn nested_containers_are_observed() {
        let inner = Object::from_iter([("x", Value::from(1))]);
        let list = Array::from_iter([Value::Object(Object::new())]);
        let (_, _) = observed(&[
            ("inner", Value::Object(inner.clone())),
            ("list", Value::Array(list.clone())),
        ]);

        assert!(inner.is_reactive("x"));
        assert!(list.observer().is_some());
        assert!(list.get(0).observer().is_some());
    }

    #[test]
    fn frozen_and_component_objects_are_skipped() {
        let frozen = Object::new();
        frozen.freeze();
        assert!(observe(&Value::Object(frozen), false).is_none());

        let component = Object::new();
        component.mark_component();
        assert!(observe(&Value::Object(component), false).is_none());
    }

    #[test]
    fn as_root_counts_component_uses() {
        let value = Value::Object(Object::new());
        observe(&value, true);
        let ob = observe(&value, true).unwrap();
        assert_eq!(ob.vm_count(), 2);
    }

    #[test]
    fn toggle_observing_suppresses_new_observers() {
        toggle_observing(false);
        let value = Value::Object(Object::new());
        let result = observe(&value, false);
        toggle_observing(true);

        assert!(result.is_none());
        assert!(observe(&value, false).is_some());
    }

    #[test]
    fn define_reactive_does_not_double_wrap() {
        let (obj, _) = observed(&[("a", Value::from(1))]);
        let dep_a = obj.field_dep_id("a").unwrap();

        define_reactive(&obj, "a", Some(Value::from(2)), FieldOptions::default());
        assert_eq!(obj.field_dep_id("a"), Some(dep_a));
        assert_eq!(obj.peek("a"), Value::from(2));
    }

    #[test]
    fn shallow_field_does_not_observe_value() {
        let obj = Object::new();
        let child = Object::from_iter([("x", Value::from(1))]);
        define_reactive(
            &obj,
            "child",
            Some(Value::Object(child.clone())),
            FieldOptions {
                shallow: true,
                ..FieldOptions::default()
            },
        );

        assert!(obj.is_reactive("child"));
        assert!(child.observer().is_none());
    }

    #[test]
    fn accessor_without_setter_is_wrapped_but_not_observed() {
        let child = Object::from_iter([("x", Value::from(1))]);
        let exposed = child.clone();
        let obj = Object::new();
        obj.define_accessor(
            "computed",
            Accessor {
                get: Arc::new(move || Value::Object(exposed.clone())),
                set: None,
            },
        );

        define_reactive(&obj, "computed", None, FieldOptions::default());
        assert!(obj.is_reactive("computed"));
        assert!(child.observer().is_none());

        obj.set("computed", Value::from(3));
        assert!(obj.peek("computed").as_object().is_some());
    }

    #[test]
    fn reading_an_array_field_depends_on_its_elements() {
        let element = Object::new();
        let list = Array::from_iter([Value::Object(element.clone())]);
        let (obj, _) = observed(&[("list", Value::Array(list.clone()))]);

        let source = obj.clone();
        let watcher = lazy_reader(move || source.get("list"));

        let deps = watcher.dep_ids();
        assert!(deps.contains(&obj.field_dep_id("list").unwrap()));
        assert!(deps.contains(&list.observer().unwrap().dep().id()));
        assert!(deps.contains(&element.observer().unwrap().dep().id()));
    }

    #[test]
    fn set_adds_reactive_field_and_notifies_container() {
        let (obj, value) = observed(&[("a", Value::from(1))]);
        let container_dep = obj.observer().unwrap().dep().id();

        // Reading the field that holds `obj` subscribes to its container dep.
        let parent = Object::from_iter([("child", value.clone())]);
        observe(&Value::Object(parent.clone()), false);
        let reader = parent.clone();
        let parent_reader = lazy_reader(move || reader.get("child"));
        assert!(parent_reader.dep_ids().contains(&container_dep));

        set(&value, "b", Value::from(2)).unwrap();
        assert!(obj.is_reactive("b"));
        assert!(parent_reader.is_dirty());
    }

    #[test]
    fn set_on_existing_key_writes_through() {
        let (obj, value) = observed(&[("a", Value::from(1))]);
        let source = obj.clone();
        let watcher = lazy_reader(move || source.get("a"));

        set(&value, "a", Value::from(5)).unwrap();
        assert!(watcher.is_dirty());
        assert_eq!(obj.peek("a"), Value::from(5));
    }

    #[test]
    fn set_on_unobserved_target_is_plain() {
        let obj = Object::new();
        set(&Value::Object(obj.clone()), "a", Value::from(1)).unwrap();
        assert_eq!(obj.get("a"), Value::from(1));
        assert!(!obj.is_reactive("a"));
    }

    #[test]
    fn set_refuses_root_data() {
        let obj = Object::new();
        let value = Value::Object(obj.clone());
        observe(&value, true);

        set(&value, "late", Value::from(1)).unwrap();
        assert!(!obj.contains_key("late"));
    }

    #[test]
    fn set_on_array_index_extends_and_notifies() {
        let arr = Array::new();
        let value = Value::Array(arr.clone());
        let ob = observe(&value, false).unwrap();
        let dep = ob.dep().id();

        let holder = Object::from_iter([("list", value.clone())]);
        observe(&Value::Object(holder.clone()), false);
        let reader = holder.clone();
        let watcher = lazy_reader(move || reader.get("list"));
        assert!(Runtime::subscribers(dep).contains(&watcher.id()));

        set(&value, 2, Value::from("c")).unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(2), Value::from("c"));
        assert!(watcher.is_dirty());
    }

    #[test]
    fn set_leaves_locked_arrays_unchanged() {
        let frozen = Array::from_iter([Value::from(1)]);
        frozen.freeze();
        set(&Value::Array(frozen.clone()), 4, Value::from(9)).unwrap();
        set(&Value::Array(frozen.clone()), 0, Value::from(9)).unwrap();
        assert_eq!(frozen.to_vec(), vec![Value::from(1)]);

        let fixed = Array::from_iter([Value::from(1)]);
        let value = Value::Array(fixed.clone());
        observe(&value, false);
        fixed.prevent_extensions();
        set(&value, 3, Value::from(9)).unwrap();
        set(&value, 0, Value::from(2)).unwrap();
        assert_eq!(fixed.to_vec(), vec![Value::from(2)]);
    }

    #[test]
    fn set_rejects_out_of_range_array_index() {
        let arr = Array::new();
        let value = Value::Array(arr.clone());

        for key in [FieldKey::Index(usize::MAX), FieldKey::from("18446744073709551615")] {
            assert!(matches!(
                set(&value, key, Value::from(1)),
                Err(ReactiveError::InvalidTarget { operation: "set", .. })
            ));
        }
        assert!(matches!(
            set(&value, MAX_ARRAY_INDEX + 1, Value::from(1)),
            Err(ReactiveError::InvalidTarget { .. })
        ));
        assert!(arr.is_empty());
    }

    #[test]
    fn set_and_delete_reject_primitives() {
        assert!(matches!(
            set(&Value::from(1), "a", Value::Null),
            Err(ReactiveError::InvalidTarget { operation: "set", .. })
        ));
        assert!(matches!(
            delete(&Value::Null, "a"),
            Err(ReactiveError::InvalidTarget { operation: "delete", .. })
        ));
    }

    #[test]
    fn delete_removes_and_notifies_container() {
        let (obj, value) = observed(&[("a", Value::from(1)), ("b", Value::from(2))]);
        let parent = Object::from_iter([("child", value.clone())]);
        observe(&Value::Object(parent.clone()), false);
        let reader = parent.clone();
        let watcher = lazy_reader(move || reader.get("child"));

        delete(&value, "missing").unwrap();
        assert!(!watcher.is_dirty());

        delete(&value, "a").unwrap();
        assert!(!obj.contains_key("a"));
        assert!(watcher.is_dirty());
    }

    #[test]
    fn delete_on_array_index_splices() {
        let arr = Array::from_iter([Value::from(1), Value::from(2), Value::from(3)]);
        delete(&Value::Array(arr.clone()), 1).unwrap();
        assert_eq!(arr.to_vec(), vec![Value::from(1), Value::from(3)]);
    }

    #[test]
    fn delete_refuses_root_data() {
        let obj = Object::from_iter([("a", Value::from(1))]);
        let value = Value::Object(obj.clone());
        observe(&value, true);

        delete(&value, "a").unwrap();
        assert!(obj.contains_key("a"));
    }
}
