//! Watcher Implementation
//!
//! A Watcher is a tracked computation. It evaluates a getter inside a
//! reactive context, subscribes to every dep read during that pass, and
//! reacts when any of them notifies.
//!
//! # Modes
//!
//! - **lazy**: computed-style. Never evaluated at construction; a notify only
//!   marks it dirty and [`Watcher::evaluate`] recomputes on demand.
//! - **sync**: re-runs inline inside the notify that invalidated it.
//! - **user**: wraps a caller callback. Getter failures are reported through
//!   the error hook instead of being returned.
//! - **deep**: deep-traverses the getter's result, so a result that keeps
//!   its identity but mutates internally still fires the callback.
//!
//! Everything else is deferred to the scheduler.
//!
//! # Dependency reconciliation
//!
//! Each pass collects deps into `new_deps`. When the pass ends, deps held
//! from the previous pass but not read this time are unsubscribed, and
//! `new_deps` becomes the current set. A dep is subscribed at most once
//! per pass and never again while it stays in the current set.

use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::{untracked, ReactiveContext};
use super::ids::{DepId, WatcherId};
use super::runtime::Runtime;
use crate::error::{handle_error, ReactiveError, Result};
use crate::observer::{traverse, Value};
use crate::scheduler::queue_watcher;

/// The tracked function of a watcher.
pub type Getter = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// Reaction to a changed value, called with `(new, old)`.
pub type Callback = Arc<dyn Fn(&Value, &Value) -> Result<()> + Send + Sync>;

/// A scheduler hook without arguments.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Construction options for a [`Watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    pub deep: bool,
    pub user: bool,
    pub lazy: bool,
    pub sync: bool,
    /// Called by the scheduler right before `run()`.
    pub before: Option<Hook>,
    /// Called after a flush in which this watcher was queued.
    pub updated: Option<Hook>,
    /// Label used in diagnostics.
    pub expression: Option<String>,
}

impl WatcherOptions {
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    pub fn updated<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.updated = Some(Arc::new(hook));
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

impl Debug for WatcherOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("deep", &self.deep)
            .field("user", &self.user)
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("before", &self.before.is_some())
            .field("updated", &self.updated.is_some())
            .field("expression", &self.expression)
            .finish()
    }
}

/// Mutable part of a watcher.
struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    /// Deps subscribed as of the last completed pass.
    deps: IndexSet<DepId>,
    /// Deps collected by the pass in progress.
    new_deps: IndexSet<DepId>,
}

pub(crate) struct WatcherInner {
    pub(crate) id: WatcherId,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    before: Option<Hook>,
    updated: Option<Hook>,
    state: Mutex<WatcherState>,
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
        let state = self.state.get_mut();
        for dep in state.deps.iter().chain(state.new_deps.iter()) {
            Runtime::remove_subscriber(*dep, self.id);
        }
    }
}

/// A tracked computation with a re-run policy and a reconciled dependency set.
///
/// `Watcher` is a cheap handle; clones share the same computation. The
/// watcher lives as long as its last handle. Deps only hold its id.
#[derive(Clone)]
pub struct Watcher(Arc<WatcherInner>);

/// Reconciles subscriptions when an evaluation pass ends, however it ends.
struct PassCleanup<'a>(&'a Watcher);

impl Drop for PassCleanup<'_> {
    fn drop(&mut self) {
        self.0.cleanup_deps();
    }
}

impl Watcher {
    /// Create a watcher without a callback.
    ///
    /// Non-lazy watchers evaluate immediately. A getter failure in a
    /// non-user watcher is returned and the watcher is discarded.
    pub fn new<G>(getter: G, options: WatcherOptions) -> Result<Self>
    where
        G: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), None, options)
    }

    /// Create a watcher that calls `callback(new, old)` when its value changes.
    pub fn with_callback<G, C>(getter: G, callback: C, options: WatcherOptions) -> Result<Self>
    where
        G: Fn() -> Result<Value> + Send + Sync + 'static,
        C: Fn(&Value, &Value) -> Result<()> + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), Some(Arc::new(callback)), options)
    }

    /// Create a watcher from already shared getter and callback.
    pub fn build(
        getter: Getter,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let lazy = options.lazy;
        let watcher = Self::construct(getter, callback, options);

        if !lazy {
            let value = watcher.get()?;
            watcher.0.state.lock().value = value;
        }

        Ok(watcher)
    }

    /// Allocate and register a watcher without evaluating it.
    pub(crate) fn construct(
        getter: Getter,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        let id = WatcherId::next();
        let inner = Arc::new(WatcherInner {
            id,
            expression: options.expression.unwrap_or_else(|| id.to_string()),
            getter,
            callback,
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            before: options.before,
            updated: options.updated,
            state: Mutex::new(WatcherState {
                value: Value::Undefined,
                dirty: options.lazy,
                active: true,
                deps: IndexSet::new(),
                new_deps: IndexSet::new(),
            }),
        });

        Runtime::register(&inner);
        Self(inner)
    }

    pub(crate) fn from_inner(inner: Arc<WatcherInner>) -> Self {
        Self(inner)
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    /// Diagnostic label.
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    /// Evaluate the getter and re-collect dependencies.
    pub fn get(&self) -> Result<Value> {
        // Declared first so it runs after the context guard has popped.
        let _cleanup = PassCleanup(self);
        let _ctx = ReactiveContext::enter(self.clone());

        let value = match (self.0.getter)() {
            Ok(value) => value,
            Err(err) if self.0.user => {
                handle_error(self.evaluation_error(&err));
                Value::Undefined
            }
            Err(err) => return Err(err),
        };

        // Touch every nested field so all of them are tracked.
        if self.0.deep {
            traverse(&value);
        }

        Ok(value)
    }

    /// Subscribe to `dep` for the pass in progress.
    pub fn add_dep(&self, dep: DepId) {
        let subscribe = {
            let mut state = self.0.state.lock();
            state.new_deps.insert(dep) && !state.deps.contains(&dep)
        };

        if subscribe {
            Runtime::add_subscriber(dep, self.0.id);
        }
    }

    /// Drop subscriptions that the last pass did not renew.
    fn cleanup_deps(&self) {
        let stale: SmallVec<[DepId; 8]> = {
            let mut guard = self.0.state.lock();
            let state = &mut *guard;

            let mut stale: SmallVec<[DepId; 8]> = state
                .deps
                .iter()
                .filter(|dep| !state.new_deps.contains(*dep))
                .copied()
                .collect();

            std::mem::swap(&mut state.deps, &mut state.new_deps);
            state.new_deps.clear();

            // Torn down mid-pass: nothing collected may stay subscribed.
            if !state.active {
                stale.extend(state.deps.drain(..));
            }
            stale
        };

        for dep in stale {
            Runtime::remove_subscriber(dep, self.0.id);
        }
    }

    /// Subscriber interface, called when a dependency changes.
    pub fn update(&self) {
        if self.0.lazy {
            self.0.state.lock().dirty = true;
        } else if self.0.sync {
            if let Err(err) = self.run() {
                handle_error(err);
            }
        } else {
            queue_watcher(self.clone());
        }
    }

    /// Scheduler job interface: re-evaluate and fire the callback.
    ///
    /// The callback fires when the value changed by identity, when the new
    /// value is an object or array (its contents may have changed), or in
    /// deep mode. Callback errors are reported, never returned.
    pub fn run(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let value = self.get()?;

        let old = {
            let mut state = self.0.state.lock();
            let changed =
                !value.strict_equals(&state.value) || value.is_container() || self.0.deep;
            if !changed {
                return Ok(());
            }
            std::mem::replace(&mut state.value, value.clone())
        };

        if let Some(callback) = &self.0.callback {
            if let Err(err) = callback(&value, &old) {
                handle_error(self.callback_error(&err));
            }
        }

        Ok(())
    }

    /// Re-evaluate a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) -> Result<()> {
        let value = self.get()?;
        let mut state = self.0.state.lock();
        state.value = value;
        state.dirty = false;
        Ok(())
    }

    /// Make the active watcher depend on everything this watcher read.
    ///
    /// Lets a render read a computed value and still be invalidated by the
    /// computed's sources, without re-running the computed body.
    pub fn depend(&self) {
        let deps: SmallVec<[DepId; 8]> = self.0.state.lock().deps.iter().copied().collect();
        for dep in deps.iter().rev() {
            Runtime::depend(*dep);
        }
    }

    /// Unsubscribe from every dep and stop reacting. Idempotent.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.0.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            std::mem::take(&mut state.deps)
        };

        for dep in deps.iter().rev() {
            Runtime::remove_subscriber(*dep, self.0.id);
        }

        tracing::debug!(watcher = %self.0.id, expression = %self.0.expression, "watcher torn down");
    }

    /// Last evaluated value.
    pub fn value(&self) -> Value {
        self.0.state.lock().value.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.0.state.lock().dirty
    }

    pub fn is_active(&self) -> bool {
        self.0.state.lock().active
    }

    pub fn is_lazy(&self) -> bool {
        self.0.lazy
    }

    pub fn is_deep(&self) -> bool {
        self.0.deep
    }

    pub fn is_user(&self) -> bool {
        self.0.user
    }

    pub fn is_sync(&self) -> bool {
        self.0.sync
    }

    /// Deps subscribed as of the last completed pass.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.0.state.lock().deps.iter().copied().collect()
    }

    /// Check whether two handles refer to the same watcher.
    pub fn ptr_eq(a: &Watcher, b: &Watcher) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.0.before {
            untracked(|| before());
        }
    }

    pub(crate) fn call_updated(&self) {
        if let Some(updated) = &self.0.updated {
            untracked(|| updated());
        }
    }

    fn evaluation_error(&self, err: &ReactiveError) -> ReactiveError {
        ReactiveError::Evaluation {
            watcher: self.0.id,
            expression: self.0.expression.clone(),
            message: err.to_string(),
        }
    }

    fn callback_error(&self, err: &ReactiveError) -> ReactiveError {
        ReactiveError::Callback {
            watcher: self.0.id,
            expression: self.0.expression.clone(),
            message: err.to_string(),
        }
    }
}

impl Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("lazy", &self.0.lazy)
            .field("dirty", &state.dirty)
            .field("active", &state.active)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{clear_error_handler, set_error_handler};
    use crate::observer::{observe, Object};
    use serial_test::serial;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn state() -> Object {
        let obj = Object::from_iter([("a", Value::from(1)), ("b", Value::from(2))]);
        observe(&Value::Object(obj.clone()), false);
        obj
    }

    #[test]
    fn watcher_evaluates_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let watcher = Watcher::new(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(42))
            },
            WatcherOptions::default(),
        )
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.value(), Value::from(42));
    }

    #[test]
    fn lazy_watcher_waits_for_evaluate() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let obj = state();
        let source = obj.clone();

        let watcher = Watcher::new(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(source.get("a"))
            },
            WatcherOptions::default().lazy(),
        )
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(watcher.is_dirty());

        watcher.evaluate().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!watcher.is_dirty());
        assert_eq!(watcher.value(), Value::from(1));

        // Upstream mutation marks dirty without re-evaluating
        obj.set("a", Value::from(5));
        assert!(watcher.is_dirty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependencies_are_pruned_between_passes() {
        let obj = state();
        let source = obj.clone();
        let read_b = Arc::new(AtomicI32::new(0));
        let read_b_clone = read_b.clone();

        let watcher = Watcher::new(
            move || {
                if read_b_clone.load(Ordering::SeqCst) == 0 {
                    Ok(source.get("a"))
                } else {
                    Ok(source.get("b"))
                }
            },
            WatcherOptions::default().lazy(),
        )
        .unwrap();

        let dep_a = obj.field_dep_id("a").unwrap();
        let dep_b = obj.field_dep_id("b").unwrap();

        watcher.evaluate().unwrap();
        assert_eq!(watcher.dep_ids(), vec![dep_a]);

        read_b.store(1, Ordering::SeqCst);
        watcher.evaluate().unwrap();
        assert_eq!(watcher.dep_ids(), vec![dep_b]);
        assert!(!Runtime::subscribers(dep_a).contains(&watcher.id()));
        assert!(Runtime::subscribers(dep_b).contains(&watcher.id()));

        // An A-only mutation no longer invalidates
        obj.set("a", Value::from(10));
        assert!(!watcher.is_dirty());
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let obj = state();
        let source = obj.clone();

        let watcher = Watcher::new(
            move || {
                source.get("a");
                source.get("a");
                Ok(source.get("a"))
            },
            WatcherOptions::default().lazy(),
        )
        .unwrap();

        watcher.evaluate().unwrap();
        watcher.evaluate().unwrap();

        let dep_a = obj.field_dep_id("a").unwrap();
        assert_eq!(Runtime::subscribers(dep_a).as_slice(), &[watcher.id()]);
    }

    #[test]
    fn sync_watcher_runs_inline() {
        let obj = state();
        let source = obj.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _watcher = Watcher::with_callback(
            move || Ok(source.get("a")),
            move |new, old| {
                seen_clone.lock().push((new.clone(), old.clone()));
                Ok(())
            },
            WatcherOptions::default().sync(),
        )
        .unwrap();

        obj.set("a", Value::from(7));
        assert_eq!(*seen.lock(), vec![(Value::from(7), Value::from(1))]);
    }

    #[test]
    fn run_skips_callback_for_identical_primitive() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let watcher = Watcher::with_callback(
            || Ok(Value::from("same")),
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            WatcherOptions::default(),
        )
        .unwrap();

        watcher.run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_fires_for_containers_even_when_identical() {
        let obj = state();
        let returned = obj.clone();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let watcher = Watcher::with_callback(
            move || Ok(Value::Object(returned.clone())),
            move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            WatcherOptions::default(),
        )
        .unwrap();

        watcher.run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_user_getter_errors_are_returned() {
        let result = Watcher::new(
            || Err(ReactiveError::custom("bad getter")),
            WatcherOptions::default(),
        );
        assert_eq!(result.unwrap_err(), ReactiveError::custom("bad getter"));
    }

    #[test]
    #[serial]
    fn user_getter_errors_are_reported() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let reported_clone = reported.clone();
        set_error_handler(move |err| reported_clone.lock().push(err.clone()));

        let watcher = Watcher::new(
            || Err(ReactiveError::custom("bad getter")),
            WatcherOptions::default().user().expression("broken"),
        )
        .unwrap();
        clear_error_handler();

        assert_eq!(watcher.value(), Value::Undefined);
        let reported = reported.lock();
        assert_eq!(reported.len(), 1);
        assert!(matches!(
            &reported[0],
            ReactiveError::Evaluation { expression, .. } if expression == "broken"
        ));
    }

    #[test]
    #[serial]
    fn callback_errors_are_reported_not_returned() {
        let reported = Arc::new(AtomicI32::new(0));
        let reported_clone = reported.clone();
        set_error_handler(move |err| {
            assert!(matches!(err, ReactiveError::Callback { .. }));
            reported_clone.fetch_add(1, Ordering::SeqCst);
        });

        let watcher = Watcher::with_callback(
            || Ok(Value::Object(Object::new())),
            |_, _| Err(ReactiveError::custom("bad callback")),
            WatcherOptions::default(),
        )
        .unwrap();

        assert!(watcher.run().is_ok());
        clear_error_handler();
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn teardown_unsubscribes_and_is_idempotent() {
        let obj = state();
        let source = obj.clone();

        let watcher = Watcher::new(
            move || Ok(source.get("a")),
            WatcherOptions::default().lazy(),
        )
        .unwrap();
        watcher.evaluate().unwrap();

        let dep_a = obj.field_dep_id("a").unwrap();
        assert!(Runtime::subscribers(dep_a).contains(&watcher.id()));

        watcher.teardown();
        watcher.teardown();

        assert!(!watcher.is_active());
        assert!(!Runtime::subscribers(dep_a).contains(&watcher.id()));
        assert!(watcher.dep_ids().is_empty());
    }

    #[test]
    fn depend_propagates_to_active_watcher() {
        let obj = state();
        let source = obj.clone();

        let computed = Watcher::new(
            move || Ok(source.get("a")),
            WatcherOptions::default().lazy(),
        )
        .unwrap();
        computed.evaluate().unwrap();

        let computed_clone = computed.clone();
        let outer = Watcher::new(
            move || {
                computed_clone.depend();
                Ok(computed_clone.value())
            },
            WatcherOptions::default().lazy(),
        )
        .unwrap();
        outer.evaluate().unwrap();

        assert_eq!(outer.dep_ids(), vec![obj.field_dep_id("a").unwrap()]);
    }

    #[test]
    fn dropping_last_handle_unsubscribes() {
        let obj = state();
        let source = obj.clone();
        let watcher = Watcher::new(
            move || Ok(source.get("b")),
            WatcherOptions::default().lazy(),
        )
        .unwrap();
        watcher.evaluate().unwrap();

        let dep_b = obj.field_dep_id("b").unwrap();
        let id = watcher.id();
        drop(watcher);

        assert!(!Runtime::subscribers(dep_b).contains(&id));
    }
}
