//! Dispatcher metrics.
//!
//! Per-worker sharded counters for component lifecycle, channel hand-offs,
//! resolution, and task execution. Registered with metriken for exposition.

use metriken::metric;

use crate::counter::{Counter, CounterGroup};

// Counter groups (sharded storage -- one shard per worker).
static COMP: CounterGroup = CounterGroup::new();
static CHAN: CounterGroup = CounterGroup::new();
static RESOLVE: CounterGroup = CounterGroup::new();
static EXEC: CounterGroup = CounterGroup::new();

/// Counter slot indices for component metrics.
pub mod comp {
    pub const ADDED: usize = 0;
    pub const CLOSED: usize = 1;
}

/// Counter slot indices for channel metrics.
pub mod chan {
    pub const ACCEPTED: usize = 0;
    pub const ESTABLISHED: usize = 1;
    pub const CONNECT_FAILED: usize = 2;
}

/// Counter slot indices for resolution metrics.
pub mod resolve {
    pub const COMPLETED: usize = 0;
    pub const DROPPED: usize = 1;
}

/// Counter slot indices for execution metrics.
pub mod exec {
    pub const TASKS: usize = 0;
    pub const REJECTED: usize = 1;
    pub const TIMERS: usize = 2;
    pub const SYNCS: usize = 3;
}

// ── Component lifecycle ──────────────────────────────────────────

#[metric(
    name = "fanline/components/added",
    description = "Total I/O components registered"
)]
pub static COMPONENTS_ADDED: Counter = Counter::new(&COMP, comp::ADDED);

#[metric(
    name = "fanline/components/closed",
    description = "Total I/O components closed"
)]
pub static COMPONENTS_CLOSED: Counter = Counter::new(&COMP, comp::CLOSED);

// ── Channels ─────────────────────────────────────────────────────

#[metric(
    name = "fanline/channels/accepted",
    description = "Inbound channels handed to server adapters"
)]
pub static CHANNELS_ACCEPTED: Counter = Counter::new(&CHAN, chan::ACCEPTED);

#[metric(
    name = "fanline/channels/established",
    description = "Outbound channels handed to connect handlers"
)]
pub static CHANNELS_ESTABLISHED: Counter = Counter::new(&CHAN, chan::ESTABLISHED);

#[metric(
    name = "fanline/channels/connect_failed",
    description = "Outbound connects that failed or timed out"
)]
pub static CONNECTS_FAILED: Counter = Counter::new(&CHAN, chan::CONNECT_FAILED);

// ── Resolution ───────────────────────────────────────────────────

#[metric(
    name = "fanline/resolves/completed",
    description = "Resolutions delivered to a live handler"
)]
pub static RESOLVES_COMPLETED: Counter = Counter::new(&RESOLVE, resolve::COMPLETED);

#[metric(
    name = "fanline/resolves/dropped",
    description = "Resolutions skipped because the handler was dropped"
)]
pub static RESOLVES_DROPPED: Counter = Counter::new(&RESOLVE, resolve::DROPPED);

// ── Execution ────────────────────────────────────────────────────

#[metric(
    name = "fanline/exec/tasks",
    description = "Tasks run via execute"
)]
pub static TASKS_EXECUTED: Counter = Counter::new(&EXEC, exec::TASKS);

#[metric(
    name = "fanline/exec/rejected",
    description = "Tasks rejected because the worker had shut down"
)]
pub static EXECUTES_REJECTED: Counter = Counter::new(&EXEC, exec::REJECTED);

#[metric(
    name = "fanline/exec/timers",
    description = "Scheduled tasks fired by worker loops"
)]
pub static TIMERS_FIRED: Counter = Counter::new(&EXEC, exec::TIMERS);

#[metric(
    name = "fanline/exec/syncs",
    description = "Sync round-trip markers acknowledged"
)]
pub static SYNCS_ACKED: Counter = Counter::new(&EXEC, exec::SYNCS);
