//! fanline — sharded multi-threaded network transport dispatcher.
//!
//! fanline fronts a fixed pool of event-loop worker threads with a single
//! facade. Listeners and outbound connections are sharded across workers by
//! a salted hash of the endpoint spec; tuning and lifecycle operations fan
//! out to every worker; asynchronous DNS resolution runs off the event loops
//! with weakly-held result handlers. With a pool of one, the same API can
//! drive the event loop in the caller's thread.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanline::{AsyncResolver, Channel, Config, ServerAdapter, Transport};
//!
//! struct Echo;
//!
//! impl ServerAdapter for Echo {
//!     fn on_channel(&self, channel: Channel) {
//!         // The accepted stream is yours: frame it, speak your protocol.
//!         let _ = channel.stream.peer_addr();
//!     }
//! }
//!
//! fn main() -> Result<(), fanline::Error> {
//!     let resolver = AsyncResolver::new(2)?;
//!     let transport = Transport::new(resolver, Config::default())?;
//!     transport.start();
//!
//!     let listener = transport.listen("tcp/127.0.0.1:7878", Arc::new(Echo))?;
//!     println!("listening on {}", listener.local_addr());
//!
//!     transport.shut_down(true);
//!     transport.wait_finished();
//!     Ok(())
//! }
//! ```
//!
//! # Teardown
//!
//! Shut workers down before releasing the facade: `shut_down(true)`, then
//! `wait_finished()`, then drop. Dropping the transport blocks until every
//! pending resolution has been delivered or dropped, so no resolver
//! callback ever fires after the facade is gone.
//!
//! # Platform
//!
//! Linux only. Workers wake on eventfds and multiplex with `poll(2)`.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod driver;
pub(crate) mod waker;
pub(crate) mod xxhash;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod counter;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod resolver;
pub mod scheduler;
pub mod select;
pub mod thread;
pub mod transport;
pub mod worker;

// ── Re-exports: Facade ──────────────────────────────────────────────────

/// The pool facade multiplexing the event-loop workers.
pub use transport::Transport;
/// The worker contract the facade is generic over.
pub use worker::TransportThread;

// ── Re-exports: Configuration ───────────────────────────────────────────

/// Dispatcher configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Worker pool configuration.
pub use config::WorkerConfig;
/// Dispatcher errors.
pub use error::Error;

// ── Re-exports: Collaborator contracts ──────────────────────────────────

/// An established byte channel handed off by a worker.
pub use handler::Channel;
/// Tuning snapshot attached to a channel at hand-off time.
pub use handler::ChannelTuning;
/// Opaque component token carrying the owner back-reference.
pub use handler::CompToken;
/// Observer for the outcome of an outbound connect.
pub use handler::ConnectHandler;
/// An I/O component tied to exactly one worker.
pub use handler::IoComponent;
/// Receiver of accepted inbound channels.
pub use handler::ServerAdapter;
/// A unit of work accepted by `execute`.
pub use handler::Task;
/// Index of a worker within the pool.
pub use handler::WorkerId;

// ── Re-exports: Resolution ──────────────────────────────────────────────

/// Shared asynchronous resolver.
pub use resolver::AsyncResolver;
/// Receiver of asynchronous resolution outcomes, held weakly.
pub use resolver::ResolveHandler;

// ── Re-exports: Scheduling ──────────────────────────────────────────────

/// Worker-side timer queue drained by an event loop.
pub use scheduler::ScheduleQueue;
/// Handle for scheduling deferred tasks onto a worker's loop.
pub use scheduler::Scheduler;
/// Cached per-worker clock, sampled once per loop iteration.
pub use scheduler::TimeSampler;
/// Create a connected scheduler handle / queue pair.
pub use scheduler::scheduler_pair;

// ── Re-exports: Default worker ──────────────────────────────────────────

/// Outbound component created by [`WorkerThread::connect`](thread::WorkerThread).
pub use thread::Connection;
/// Listening component created by [`WorkerThread::listen`](thread::WorkerThread).
pub use thread::Listener;
/// The default event-loop worker.
pub use thread::WorkerThread;

// ── Re-exports: Sharding ────────────────────────────────────────────────

/// Select a worker index for a shard key.
pub use select::select_index;
