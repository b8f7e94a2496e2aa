//! Update Scheduler
//!
//! Watchers that are neither lazy nor sync do not re-run inside the write
//! that invalidated them. They are queued here, deduplicated, and run
//! together once per tick in creation order.
//!
//! [`queue`] holds the watcher queue and the flush. [`tick`] decides when a
//! flush happens: the embedding host installs a [`TickHost`] (for example
//! [`TokioHost`]), or drives ticks itself with [`flush_ticks`].

pub mod queue;
pub mod tick;

pub use queue::{
    current_flush_timestamp, flush_scheduler_queue, is_flushing, pending_count, queue_activated,
    queue_watcher,
};
pub use tick::{
    clear_tick_host, flush_ticks, has_pending_ticks, next_tick, set_tick_host, Task, TickHost,
    TokioHost,
};
