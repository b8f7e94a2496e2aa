//! Next-tick deferral.
//!
//! Callbacks passed to [`next_tick`] are collected and drained together by
//! one task posted to the installed [`TickHost`]. Without a host the
//! callbacks wait until [`flush_ticks`] is called, which is how tests and
//! hosts with their own event loop drive the scheduler.

use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks "soon", after the current synchronous work.
pub trait TickHost: Send + Sync {
    fn post(&self, task: Task);
}

/// Any `Fn(Task)` closure is a host.
impl<F> TickHost for F
where
    F: Fn(Task) + Send + Sync,
{
    fn post(&self, task: Task) {
        (self)(task)
    }
}

/// Posts ticks onto a tokio runtime.
#[derive(Clone)]
pub struct TokioHost {
    handle: tokio::runtime::Handle,
}

impl TokioHost {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Host for the runtime the caller is running on, if any.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl TickHost for TokioHost {
    fn post(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

impl Debug for TokioHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioHost")
            .field("flavor", &self.handle.runtime_flavor())
            .finish()
    }
}

#[derive(Default)]
struct TickState {
    callbacks: Vec<Task>,
    /// A drain has been requested and has not started yet.
    pending: bool,
}

static TICKS: OnceLock<Mutex<TickState>> = OnceLock::new();
static HOST: RwLock<Option<Arc<dyn TickHost>>> = RwLock::new(None);

fn ticks() -> &'static Mutex<TickState> {
    TICKS.get_or_init(|| Mutex::new(TickState::default()))
}

/// Install the host that drives ticks.
///
/// Callbacks already waiting are handed to the new host.
pub fn set_tick_host<H>(host: H)
where
    H: TickHost + 'static,
{
    let host: Arc<dyn TickHost> = Arc::new(host);
    *HOST.write() = Some(host.clone());

    if ticks().lock().pending {
        host.post(Box::new(|| {
            flush_ticks();
        }));
    }
}

/// Remove the tick host; callbacks then wait for [`flush_ticks`].
pub fn clear_tick_host() {
    *HOST.write() = None;
}

/// Defer `callback` to the next tick.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() + Send + 'static,
{
    let request = {
        let mut state = ticks().lock();
        state.callbacks.push(Box::new(callback));
        !std::mem::replace(&mut state.pending, true)
    };
    if !request {
        return;
    }

    let host = HOST.read().clone();
    if let Some(host) = host {
        host.post(Box::new(|| {
            flush_ticks();
        }));
    }
}

/// Run every waiting callback and return how many ran.
///
/// Callbacks deferred while draining wait for the next tick.
pub fn flush_ticks() -> usize {
    let callbacks = {
        let mut state = ticks().lock();
        state.pending = false;
        std::mem::take(&mut state.callbacks)
    };

    let count = callbacks.len();
    for callback in callbacks {
        callback();
    }
    count
}

/// Whether callbacks are waiting for a tick.
pub fn has_pending_ticks() -> bool {
    !ticks().lock().callbacks.is_empty()
}
