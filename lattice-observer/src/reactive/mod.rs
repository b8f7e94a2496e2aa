//! Reactive Primitives
//!
//! This module implements dependency tracking: deps, watchers, and the
//! runtime that connects them.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A [`Dep`] is the publish point of one reactive unit. Reading the unit
//! inside a watcher subscribes the watcher; writing it notifies every
//! subscriber.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a tracked computation. Its subscription set is rebuilt on
//! every evaluation, so it always equals exactly the deps read in the last
//! pass. Depending on its mode, a notified watcher marks itself dirty (lazy),
//! re-runs inline (sync), or is queued on the scheduler.
//!
//! ## Computed values and watches
//!
//! [`Computed`] wraps a lazy watcher as a cached derived value. [`watch`]
//! registers a user watcher over a getter or a path.
//!
//! # Implementation Notes
//!
//! Deps and watchers never own each other: deps store watcher ids, and the
//! [`Runtime`] resolves them through a weak registry. The evaluating watcher
//! is found through a thread-local stack ([`ReactiveContext`]).

mod computed;
mod context;
mod dep;
mod ids;
mod runtime;
mod watch;
mod watcher;

pub use computed::Computed;
pub use context::{current_watcher, untracked, ReactiveContext};
pub use dep::Dep;
pub use ids::{DepId, WatcherId};
pub use runtime::{Runtime, Subscribers};
pub use watch::{parse_path, watch, WatchHandle, WatchOptions, WatchSource};
pub use watcher::{Callback, Getter, Hook, Watcher, WatcherOptions};
