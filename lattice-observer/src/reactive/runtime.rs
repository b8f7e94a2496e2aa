//! Reactive Runtime
//!
//! The runtime connects deps and watchers without either owning the other.
//! It keeps two process-wide tables:
//!
//! 1. A registry from [`WatcherId`] to a weak reference to the watcher.
//! 2. For every dep, the ordered list of subscribed watcher ids.
//!
//! A dep notifies by snapshotting its subscriber list, resolving each id
//! through the registry, and calling `update()` on the watchers that are
//! still alive. Nothing is locked while `update()` runs, so a watcher may
//! freely subscribe, unsubscribe, or tear down during notification.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::ids::{DepId, WatcherId};
use super::watcher::{Watcher, WatcherInner};

/// Snapshot of a dep's subscribers, in subscription order.
pub type Subscribers = SmallVec<[WatcherId; 8]>;

/// The global reactive runtime.
pub struct Runtime;

// Weak references so the registry never keeps a watcher alive.
static REGISTRY: OnceLock<DashMap<WatcherId, Weak<WatcherInner>>> = OnceLock::new();
static DEP_SUBSCRIBERS: OnceLock<DashMap<DepId, Vec<WatcherId>>> = OnceLock::new();

fn registry() -> &'static DashMap<WatcherId, Weak<WatcherInner>> {
    REGISTRY.get_or_init(DashMap::new)
}

fn dep_subscribers() -> &'static DashMap<DepId, Vec<WatcherId>> {
    DEP_SUBSCRIBERS.get_or_init(DashMap::new)
}

impl Runtime {
    /// Register a watcher so deps can resolve its id.
    pub(crate) fn register(inner: &Arc<WatcherInner>) {
        registry().insert(inner.id, Arc::downgrade(inner));
    }

    /// Remove a watcher from the registry.
    pub(crate) fn unregister(id: WatcherId) {
        registry().remove(&id);
    }

    /// Resolve a watcher id to a live watcher.
    pub fn resolve(id: WatcherId) -> Option<Watcher> {
        let weak = registry().get(&id).map(|entry| entry.value().clone())?;
        weak.upgrade().map(Watcher::from_inner)
    }

    /// Number of live registered watchers.
    pub fn watcher_count() -> usize {
        registry()
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Append `watcher` to the subscriber list of `dep`.
    ///
    /// There is no dedup here; watchers guard against double subscription
    /// themselves.
    pub(crate) fn add_subscriber(dep: DepId, watcher: WatcherId) {
        dep_subscribers().entry(dep).or_default().push(watcher);
    }

    /// Remove `watcher` from the subscriber list of `dep`.
    pub(crate) fn remove_subscriber(dep: DepId, watcher: WatcherId) {
        if let Some(mut subs) = dep_subscribers().get_mut(&dep) {
            if let Some(pos) = subs.iter().position(|s| *s == watcher) {
                subs.remove(pos);
            }
        }
        dep_subscribers().remove_if(&dep, |_, subs| subs.is_empty());
    }

    /// Forget every subscription of a dep that is going away.
    pub(crate) fn release_dep(dep: DepId) {
        dep_subscribers().remove(&dep);
    }

    /// Current subscribers of `dep`, in subscription order.
    pub fn subscribers(dep: DepId) -> Subscribers {
        dep_subscribers()
            .get(&dep)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Subscribe the active watcher, if any, to `dep`.
    pub fn depend(dep: DepId) {
        if let Some(watcher) = ReactiveContext::current_watcher() {
            watcher.add_dep(dep);
        }
    }

    /// Notify every subscriber of `dep` that it changed.
    ///
    /// Works on a snapshot, so subscription changes made by the notified
    /// watchers only take effect on the next notification.
    pub fn notify(dep: DepId) {
        let subscribers = Self::subscribers(dep);
        if subscribers.is_empty() {
            return;
        }

        tracing::trace!(%dep, count = subscribers.len(), "notifying subscribers");

        for id in subscribers {
            if let Some(watcher) = Self::resolve(id) {
                watcher.update();
            }
        }
    }

    /// Check if a watcher is collecting dependencies on this thread.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_tracking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Value;
    use crate::reactive::WatcherOptions;

    fn lazy_watcher() -> Watcher {
        Watcher::new(|| Ok(Value::Undefined), WatcherOptions::default().lazy()).unwrap()
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let watcher = lazy_watcher();
        let id = watcher.id();

        assert!(Runtime::resolve(id).is_some());

        drop(watcher);

        assert!(Runtime::resolve(id).is_none());
    }

    #[test]
    fn runtime_notifies_subscribers() {
        let watcher = lazy_watcher();
        watcher.evaluate().unwrap();
        assert!(!watcher.is_dirty());

        let dep = DepId::next();
        Runtime::add_subscriber(dep, watcher.id());

        Runtime::notify(dep);

        // Lazy watchers only get marked dirty
        assert!(watcher.is_dirty());
    }

    #[test]
    fn runtime_removes_subscribers() {
        let dep = DepId::next();
        let first = WatcherId::next();
        let second = WatcherId::next();

        Runtime::add_subscriber(dep, first);
        Runtime::add_subscriber(dep, second);
        assert_eq!(Runtime::subscribers(dep).as_slice(), &[first, second]);

        Runtime::remove_subscriber(dep, first);
        assert_eq!(Runtime::subscribers(dep).as_slice(), &[second]);

        Runtime::release_dep(dep);
        assert!(Runtime::subscribers(dep).is_empty());
    }

    #[test]
    fn notify_skips_dead_watchers() {
        let dep = DepId::next();
        Runtime::add_subscriber(dep, WatcherId::next());

        // Resolves nothing; must not panic.
        Runtime::notify(dep);
    }
}
