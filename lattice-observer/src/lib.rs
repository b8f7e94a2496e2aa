//! Lattice Observer
//!
//! This crate provides the data-binding runtime for the Lattice UI framework.
//! It implements:
//!
//! - Observation of nested objects and arrays, with intercepted fields
//! - Watchers that track the fields they read and re-run when those change
//! - Computed values and explicit watches
//! - A batching scheduler that flushes queued watchers once per tick
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observer`: values, observation, and the field interceptor
//! - `reactive`: deps, watchers, and dependency tracking
//! - `scheduler`: the watcher queue and the tick host
//! - `config`: scheduler knobs
//! - `error`: error types and the reporting hook
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use lattice_observer::observer::{observe, Object, Value};
//! use lattice_observer::reactive::{Watcher, WatcherOptions};
//!
//! // Make some state reactive
//! let state = Object::from_iter([("count", Value::from(1))]);
//! observe(&Value::Object(state.clone()), true);
//!
//! // Watch it
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = seen.clone();
//! let source = state.clone();
//! let _watcher = Watcher::with_callback(
//!     move || Ok(source.get("count")),
//!     move |new, old| {
//!         log.lock().push((new.clone(), old.clone()));
//!         Ok(())
//!     },
//!     WatcherOptions::default().sync(),
//! )
//! .unwrap();
//!
//! // Update the field; the sync watcher reacts inline
//! state.set("count", Value::from(5));
//! assert_eq!(*seen.lock(), vec![(Value::from(5), Value::from(1))]);
//! ```

pub mod config;
pub mod error;
pub mod observer;
pub mod reactive;
pub mod scheduler;

pub use config::{configure, SchedulerConfig};
pub use error::{handle_error, set_error_handler, ReactiveError, Result};
pub use observer::{delete, observe, set, traverse, Array, Object, Value};
pub use reactive::{watch, Computed, Dep, WatchOptions, WatchSource, Watcher, WatcherOptions};
pub use scheduler::{next_tick, queue_watcher};
