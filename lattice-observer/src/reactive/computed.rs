//! Computed Values
//!
//! A [`Computed`] is a lazy watcher with a cached value. It recomputes only
//! when read after one of its sources notified. A watcher that reads a
//! computed value inherits the computed's dependencies, so it is invalidated
//! directly by the sources instead of by the computed itself.

use std::fmt::Debug;
use std::sync::Arc;

use super::context::ReactiveContext;
use super::watcher::{Watcher, WatcherOptions};
use crate::error::{handle_error, Result};
use crate::observer::{Accessor, Object, Value};

/// A cached derived value backed by a lazy watcher.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Create a computed value. The getter does not run until first read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self::with_expression(getter, "computed")
    }

    /// Create a computed value with a diagnostic label.
    pub fn with_expression<F>(getter: F, expression: impl Into<String>) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        let options = WatcherOptions::default().lazy().expression(expression);
        Self {
            watcher: Watcher::construct(Arc::new(getter), None, options),
        }
    }

    /// Read the value, recomputing if a source changed since the last read.
    ///
    /// Getter errors are returned; the computed stays dirty and retries on
    /// the next read.
    pub fn get(&self) -> Result<Value> {
        if self.watcher.is_dirty() {
            self.watcher.evaluate()?;
        }

        if ReactiveContext::is_tracking() {
            self.watcher.depend();
        }

        Ok(self.watcher.value())
    }

    /// Check if the next read recomputes.
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// The lazy watcher behind this value.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Expose this computed as a read-only accessor field of `object`.
    ///
    /// Reads through the field behave like [`Computed::get`]; getter errors
    /// are reported and read as `Undefined`.
    pub fn install(&self, object: &Object, key: &str) -> bool {
        let computed = self.clone();
        let get = Arc::new(move || match computed.get() {
            Ok(value) => value,
            Err(err) => {
                handle_error(err);
                Value::Undefined
            }
        });

        object.define_accessor(key, Accessor { get, set: None })
    }

    /// Stop tracking sources.
    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

impl Debug for Computed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.watcher.id())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
