//! Watcher queue and flush.
//!
//! # Algorithm
//!
//! Watchers notified outside a flush are appended and deduplicated by id.
//! The first enqueue posts one flush to the tick host. The flush:
//!
//! 1. Sorts the queue by watcher id, so parents (created first) run before
//!    children and user watchers run before the render they feed.
//! 2. Walks the queue with a live cursor. Watchers queued during the flush
//!    are inserted by id after the cursor, so they still run in this pass.
//! 3. Clears each watcher's pending marker before running it, so a watcher
//!    may re-queue itself. Re-entries are counted when cycle detection is
//!    on, and a runaway watcher aborts the flush.
//! 4. Resets all state, then calls activated callbacks and `updated` hooks.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;

use super::tick::{next_tick, Task};
use crate::config::config;
use crate::error::{handle_error, ReactiveError};
use crate::reactive::{Watcher, WatcherId};

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    /// Ids currently pending in `queue`.
    has: HashSet<WatcherId>,
    /// Re-entry counts for the flush in progress.
    circular: HashMap<WatcherId, usize>,
    activated: Vec<Task>,
    /// A flush has been posted and not yet finished.
    waiting: bool,
    flushing: bool,
    /// Cursor into `queue` while flushing.
    index: usize,
    flush_timestamp: Option<Instant>,
}

impl SchedulerState {
    fn reset(&mut self) {
        self.queue.clear();
        self.has.clear();
        self.circular.clear();
        self.activated.clear();
        self.waiting = false;
        self.flushing = false;
        self.index = 0;
    }
}

/// Resets the scheduler when a flush unwinds, so later flushes still run.
struct FlushReset;

impl Drop for FlushReset {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::warn!("flush unwound; dropping queued watchers");
            scheduler().lock().reset();
        }
    }
}

static SCHEDULER: OnceLock<Mutex<SchedulerState>> = OnceLock::new();

fn scheduler() -> &'static Mutex<SchedulerState> {
    SCHEDULER.get_or_init(|| Mutex::new(SchedulerState::default()))
}

/// Queue `watcher` for the next flush.
///
/// A watcher already pending is skipped. During a flush the watcher is
/// inserted by id after the cursor, or right after the cursor when its id
/// has already been passed.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();

    let post = {
        let mut state = scheduler().lock();
        if !state.has.insert(id) {
            return;
        }

        if !state.flushing {
            state.queue.push(watcher);
        } else {
            let mut at = state.queue.len();
            while at > state.index + 1 && state.queue[at - 1].id() > id {
                at -= 1;
            }
            state.queue.insert(at, watcher);
        }
        tracing::trace!(watcher = %id, flushing = state.flushing, "watcher queued");

        !std::mem::replace(&mut state.waiting, true)
    };

    if post {
        if config().async_flush {
            next_tick(flush_scheduler_queue);
        } else {
            flush_scheduler_queue();
        }
    }
}

/// Queue a callback to run after the main pass of the next flush.
pub fn queue_activated<F>(callback: F)
where
    F: FnOnce() + Send + 'static,
{
    scheduler().lock().activated.push(Box::new(callback));
}

/// Run every queued watcher.
///
/// Called by the tick host; also safe to call directly. No error escapes.
pub fn flush_scheduler_queue() {
    let config = config();

    let queued = {
        let mut state = scheduler().lock();
        if state.flushing {
            return;
        }
        state.flushing = true;
        state.flush_timestamp = Some(Instant::now());
        state.queue.sort_by_key(|watcher| watcher.id());
        state.queue.len()
    };
    tracing::trace!(queued, "flush started");
    let _reset = FlushReset;

    loop {
        let watcher = {
            let state = scheduler().lock();
            match state.queue.get(state.index) {
                Some(watcher) => watcher.clone(),
                None => break,
            }
        };
        let id = watcher.id();

        watcher.call_before();
        scheduler().lock().has.remove(&id);

        if let Err(err) = watcher.run() {
            handle_error(err);
        }

        let mut state = scheduler().lock();
        if config.detect_cycles && state.has.contains(&id) {
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            if *count > config.max_update_count {
                let count = *count;
                drop(state);
                handle_error(ReactiveError::InfiniteUpdateLoop {
                    watcher: id,
                    expression: watcher.expression().to_string(),
                    count,
                });
                break;
            }
        }
        state.index += 1;
    }

    let (activated, ran) = {
        let mut state = scheduler().lock();
        let activated = std::mem::take(&mut state.activated);
        let ran = std::mem::take(&mut state.queue);
        state.reset();
        (activated, ran)
    };

    for callback in activated {
        callback();
    }
    for watcher in ran.iter().rev() {
        if watcher.is_active() {
            watcher.call_updated();
        }
    }

    tracing::trace!(ran = ran.len(), "flush finished");
}

/// When the most recent flush started.
pub fn current_flush_timestamp() -> Option<Instant> {
    scheduler().lock().flush_timestamp
}

pub fn is_flushing() -> bool {
    scheduler().lock().flushing
}

/// Watchers waiting for a flush.
pub fn pending_count() -> usize {
    let state = scheduler().lock();
    state.queue.len().saturating_sub(state.index)
}
