//! The worker contract.
//!
//! A transport is a facade over a pool of event-loop workers. The pool is
//! generic over this trait: the crate ships one implementation
//! ([`WorkerThread`](crate::thread::WorkerThread)), and tests substitute
//! instrumented stand-ins. All operations must be safe to invoke from any
//! thread.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::handler::{CompToken, ConnectHandler, IoComponent, ServerAdapter, Task};
use crate::scheduler::{Scheduler, TimeSampler};

/// One event-loop worker owning a slice of I/O components.
pub trait TransportThread: Send + Sync {
    /// Listener component type returned by [`listen`](Self::listen).
    type Listener: IoComponent;
    /// Outbound component type returned by [`connect`](Self::connect).
    type Connection: IoComponent;

    /// Create a listener for `spec` (`tcp/host:port`). Accepted channels are
    /// handed to `adapter` on the worker's thread.
    fn listen(
        &self,
        spec: &str,
        adapter: Arc<dyn ServerAdapter>,
    ) -> Result<Arc<Self::Listener>, Error>;

    /// Initiate an outbound connection to `spec`. The outcome is delivered
    /// to `handler` on the worker's thread.
    fn connect(
        &self,
        spec: &str,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<Self::Connection>, Error>;

    /// Number of live I/O components owned by this worker.
    fn num_io_components(&self) -> usize;

    // ── Tuning ───────────────────────────────────────────────────────

    /// Set the idle timeout for pending outbound connects. `None` disables.
    fn set_ioc_timeout(&self, timeout: Option<Duration>);
    /// Set the SO_RCVBUF hint for future channels.
    fn set_max_input_buffer_size(&self, bytes: u32);
    /// Set the SO_SNDBUF hint for future channels.
    fn set_max_output_buffer_size(&self, bytes: u32);
    /// Set the direct-write tuning hint for future channels.
    fn set_direct_write(&self, enabled: bool);
    /// Enable or disable TCP_NODELAY on future sockets.
    fn set_tcp_nodelay(&self, enabled: bool);
    /// Enable or disable the periodic stats line.
    fn set_log_stats(&self, enabled: bool);

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Block until the event loop has processed a round-trip marker.
    /// Returns immediately if the worker is not running. Must not be called
    /// from the worker's own thread.
    fn sync(&self);

    /// Handle for scheduling deferred tasks onto this worker's loop.
    fn scheduler(&self) -> Scheduler;

    /// Queue `task` for execution on the next loop iteration. Returns false
    /// once the worker has shut down.
    fn execute(&self, task: Task) -> bool;

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the worker's thread. Returns false if it was already started
    /// or the thread could not be spawned.
    fn start(&self) -> bool;

    /// Signal shutdown. With `wait`, blocks until the worker has quiesced.
    ///
    /// # Deadlock
    ///
    /// In single-thread mode the caller is the loop, so `shut_down(true)`
    /// would wait on itself. Use `shut_down(false)`, drive the loop until
    /// [`event_loop_iteration`](Self::event_loop_iteration) returns false,
    /// then call [`wait_finished`](Self::wait_finished).
    fn shut_down(&self, wait: bool);

    /// Block until the worker has terminated. Returns immediately if the
    /// worker was never started.
    ///
    /// # Deadlock
    ///
    /// In single-thread mode this returns only once the caller has driven
    /// the loop to completion; calling it from the loop-driving thread
    /// before the loop has finished blocks forever.
    fn wait_finished(&self);

    // ── Component operations ─────────────────────────────────────────

    /// Re-assert a component's registration. Idempotent for workers that
    /// register components at creation time.
    fn add(&self, comp: CompToken);
    /// Enable read/accept interest for a component.
    fn enable_read(&self, comp: CompToken);
    /// Disable read/accept interest for a component.
    fn disable_read(&self, comp: CompToken);
    /// Enable write/connect-progress interest for a component.
    fn enable_write(&self, comp: CompToken);
    /// Disable write/connect-progress interest for a component.
    fn disable_write(&self, comp: CompToken);
    /// Close a component. Closing a pending connect cancels delivery.
    fn close(&self, comp: CompToken);

    // ── Single-thread mode ───────────────────────────────────────────

    /// The worker's cached clock, updated once per loop iteration.
    fn time_sampler(&self) -> TimeSampler;

    /// Claim the event loop for the calling thread instead of spawning one.
    /// Returns false if the loop was already claimed or started.
    fn init_event_loop(&self) -> bool;

    /// Run one iteration of the event loop on the calling thread. Returns
    /// false once the loop has finished.
    fn event_loop_iteration(&self) -> bool;

    /// Drive the event loop on the calling thread until shutdown.
    fn run_event_loop(&self);
}
