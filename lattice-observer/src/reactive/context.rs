//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating. When
//! a reactive field is read, the field's dep registers that watcher as a
//! subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack. Evaluating a watcher pushes a frame and the
//! returned guard pops it when dropped, so the outer frame is restored on
//! every exit path: normal return, `?` early returns, and panics.
//!
//! A frame may also hold no watcher at all. Such frames come from
//! [`untracked`] and hide the outer watcher, which is how lifecycle hooks run
//! without collecting dependencies.

use std::cell::RefCell;

use super::watcher::Watcher;
use super::WatcherId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Clone)]
struct ContextEntry {
    /// The evaluating watcher, or `None` for an untracked frame.
    watcher: Option<Watcher>,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    watcher_id: Option<WatcherId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given watcher.
    ///
    /// While the guard is alive, every reactive read subscribes `watcher`.
    pub fn enter(watcher: Watcher) -> Self {
        let watcher_id = Some(watcher.id());
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                watcher: Some(watcher),
            });
        });

        Self { watcher_id }
    }

    /// Enter a frame in which reads are not tracked.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry { watcher: None });
        });

        Self { watcher_id: None }
    }

    /// Check if any frame is on the stack, tracked or not.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Check if reads are currently being collected by a watcher.
    pub fn is_tracking() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.watcher.is_some())
        })
    }

    /// The watcher collecting dependencies right now, if any.
    pub fn current_watcher() -> Option<Watcher> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.watcher.clone())
        })
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        // The stack may already be gone during thread teardown.
        let _ = CONTEXT_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.watcher.as_ref().map(Watcher::id),
                    self.watcher_id,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

/// The watcher currently collecting dependencies, if any.
///
/// Lifecycle code reads this for diagnostics.
pub fn current_watcher() -> Option<Watcher> {
    ReactiveContext::current_watcher()
}

/// Run `f` without collecting dependencies for the current watcher.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}
