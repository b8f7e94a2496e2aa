//! Explicit watch registration.
//!
//! [`watch`] is the user-facing way to react to state: it creates a user
//! watcher over a getter or a dot-delimited path and returns a handle that
//! tears the watcher down when released.

use std::fmt::Debug;
use std::sync::Arc;

use super::watcher::{Callback, Getter, Watcher, WatcherOptions};
use crate::error::{handle_error, ReactiveError, Result};
use crate::observer::Value;

/// What a [`watch`] call observes.
#[derive(Clone)]
pub enum WatchSource {
    /// An arbitrary tracked function.
    Getter(Getter),
    /// A dot-delimited path read from a root value, e.g. `"user.address.city"`.
    Path { root: Value, path: String },
}

impl WatchSource {
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self::Getter(Arc::new(getter))
    }

    pub fn path(root: &Value, path: impl Into<String>) -> Self {
        Self::Path {
            root: root.clone(),
            path: path.into(),
        }
    }
}

impl Debug for WatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Getter(_) => f.write_str("WatchSource::Getter"),
            Self::Path { path, .. } => write!(f, "WatchSource::Path({path:?})"),
        }
    }
}

/// Options for [`watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Also fire on nested mutations of the watched value.
    pub deep: bool,
    /// Fire the callback once right away with the initial value.
    pub immediate: bool,
    /// React inline instead of through the scheduler.
    pub sync: bool,
}

/// Owns a user watcher; dropping it stops the watch.
#[derive(Debug)]
pub struct WatchHandle {
    watcher: Watcher,
}

impl WatchHandle {
    /// Stop watching.
    pub fn unwatch(self) {
        self.watcher.teardown();
    }

    /// The underlying watcher.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.watcher.teardown();
    }
}

/// Split a watch path into segments.
///
/// Only word characters, `$` and `.` are accepted.
pub fn parse_path(path: &str) -> Result<Vec<String>> {
    let valid = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return Err(ReactiveError::InvalidWatchPath(path.to_string()));
    }

    Ok(path.split('.').map(str::to_string).collect())
}

/// Read `segments` from `root`. Object fields are read through their
/// interceptors, so the reads are tracked.
fn read_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();
    for segment in segments {
        current = match &current {
            Value::Object(obj) => obj.get(segment),
            Value::Array(arr) if segment == "length" => Value::from(arr.len()),
            Value::Array(arr) => match segment.parse::<usize>() {
                Ok(index) => arr.get(index),
                Err(_) => Value::Undefined,
            },
            _ => return Value::Undefined,
        };
    }
    current
}

/// Watch `source` and call `callback(new, old)` when it changes.
pub fn watch<C>(source: WatchSource, callback: C, options: WatchOptions) -> Result<WatchHandle>
where
    C: Fn(&Value, &Value) -> Result<()> + Send + Sync + 'static,
{
    let (getter, expression): (Getter, String) = match source {
        WatchSource::Getter(getter) => (getter, "getter".to_string()),
        WatchSource::Path { root, path } => {
            let segments = parse_path(&path)?;
            (Arc::new(move || Ok(read_path(&root, &segments))), path)
        }
    };

    let mut watcher_options = WatcherOptions::default().user().expression(expression);
    watcher_options.deep = options.deep;
    watcher_options.sync = options.sync;

    let callback: Callback = Arc::new(callback);
    let watcher = Watcher::build(getter, Some(callback.clone()), watcher_options)?;

    if options.immediate {
        if let Err(err) = callback(&watcher.value(), &Value::Undefined) {
            handle_error(ReactiveError::Callback {
                watcher: watcher.id(),
                expression: format!("immediate {}", watcher.expression()),
                message: err.to_string(),
            });
        }
    }

    Ok(WatchHandle { watcher })
}
