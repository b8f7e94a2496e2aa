//! Dep Implementation
//!
//! A [`Dep`] is the publish point of one reactive unit: a single field, or a
//! whole container for "container changed" signals. Reading the unit inside
//! a watcher calls [`Dep::depend`]; writing it calls [`Dep::notify`].
//!
//! The subscriber list itself lives in the [`Runtime`], keyed by [`DepId`].
//! A `Dep` is therefore just an id with a drop hook that releases its list.

use std::fmt::Debug;

use super::ids::{DepId, WatcherId};
use super::runtime::{Runtime, Subscribers};

/// A publish point holding an ordered list of subscribed watchers.
pub struct Dep {
    id: DepId,
}

impl Dep {
    /// Create a new dep with no subscribers.
    pub fn new() -> Self {
        Self { id: DepId::next() }
    }

    /// Get the dep's unique ID.
    pub fn id(&self) -> DepId {
        self.id
    }

    /// Append a subscriber. Callers must not subscribe the same watcher twice.
    pub fn add_sub(&self, watcher: WatcherId) {
        Runtime::add_subscriber(self.id, watcher);
    }

    /// Remove a subscriber.
    pub fn remove_sub(&self, watcher: WatcherId) {
        Runtime::remove_subscriber(self.id, watcher);
    }

    /// Register the active watcher, if any, as a dependent.
    pub fn depend(&self) {
        Runtime::depend(self.id);
    }

    /// Call `update()` on every subscriber, in subscription order.
    pub fn notify(&self) {
        Runtime::notify(self.id);
    }

    /// Current subscribers, in subscription order.
    pub fn subscribers(&self) -> Subscribers {
        Runtime::subscribers(self.id)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dep {
    fn drop(&mut self) {
        Runtime::release_dep(self.id);
    }
}

impl Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
