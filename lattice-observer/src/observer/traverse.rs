//! Deep traversal.

use std::collections::HashSet;

use super::Value;

/// Read every nested field of `value` so the evaluating watcher subscribes
/// to all of them.
///
/// Frozen containers are skipped. Each container is visited once per call,
/// so cyclic graphs terminate.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    visit(value, &mut seen);
}

fn visit(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(obj) => {
            if obj.is_frozen() {
                return;
            }
            if !seen.insert(obj.addr()) {
                return;
            }
            for key in obj.keys() {
                visit(&obj.get(&key), seen);
            }
        }
        Value::Array(arr) => {
            if arr.is_frozen() {
                return;
            }
            if !seen.insert(arr.addr()) {
                return;
            }
            for item in arr.to_vec() {
                visit(&item, seen);
            }
        }
        _ => {}
    }
}
