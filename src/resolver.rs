//! Asynchronous endpoint resolution.
//!
//! Name lookups block, so they run on a small pool of resolver threads fed
//! by an unbounded queue instead of on the event loops. Requests carry their
//! result handler weakly: dropping the handler cancels delivery. Teardown is
//! cooperative -- [`AsyncResolver::wait_for_pending_resolves`] blocks until
//! every queued resolution has been delivered or dropped.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};

use crate::metrics;

/// Receives the outcome of an asynchronous resolution.
///
/// The resolver holds the handler weakly; if the owner drops it before
/// resolution completes, the callback is silently skipped.
pub trait ResolveHandler: Send + Sync {
    /// Receive the resolved address or the lookup failure.
    fn on_resolved(&self, result: io::Result<SocketAddr>);
}

struct ResolveRequest {
    spec: String,
    handler: Weak<dyn ResolveHandler>,
}

/// Pending-resolution accounting shared with the lookup threads.
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn inc(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn dec(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.done.notify_all();
        }
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.done.wait(count).unwrap();
        }
    }
}

/// Shared asynchronous resolver.
///
/// Held by `Arc`; the transport keeps one for its whole lifetime and drains
/// it on drop. Dropping the resolver itself closes the queue and joins the
/// lookup threads.
pub struct AsyncResolver {
    tx: Option<Sender<ResolveRequest>>,
    pending: Arc<Pending>,
    threads: Vec<JoinHandle<()>>,
}

impl AsyncResolver {
    /// Create a resolver backed by `threads` lookup threads (at least one).
    pub fn new(threads: usize) -> io::Result<Arc<AsyncResolver>> {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<ResolveRequest>();
        let pending = Arc::new(Pending {
            count: Mutex::new(0),
            done: Condvar::new(),
        });

        let mut joins = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let pending = pending.clone();
            let handle = thread::Builder::new()
                .name(format!("fanline-resolver-{i}"))
                .spawn(move || {
                    for req in rx.iter() {
                        let result = resolve_spec(&req.spec);
                        match req.handler.upgrade() {
                            Some(handler) => {
                                handler.on_resolved(result);
                                metrics::RESOLVES_COMPLETED.increment();
                            }
                            None => metrics::RESOLVES_DROPPED.increment(),
                        }
                        pending.dec();
                    }
                })?;
            joins.push(handle);
        }

        Ok(Arc::new(AsyncResolver {
            tx: Some(tx),
            pending,
            threads: joins,
        }))
    }

    /// Queue an asynchronous resolution of `spec`.
    ///
    /// The handler is held weakly; drop the owning `Arc` to cancel.
    pub fn resolve_async(&self, spec: &str, handler: Weak<dyn ResolveHandler>) {
        self.pending.inc();
        let request = ResolveRequest {
            spec: spec.to_owned(),
            handler,
        };
        // tx is only None during Drop; a failed send means the queue is
        // gone, so the request counts as dropped.
        match &self.tx {
            Some(tx) if tx.send(request).is_ok() => {}
            _ => {
                metrics::RESOLVES_DROPPED.increment();
                self.pending.dec();
            }
        }
    }

    /// Block until every queued resolution has been delivered or dropped.
    pub fn wait_for_pending_resolves(&self) {
        self.pending.wait_zero();
    }
}

impl Drop for AsyncResolver {
    fn drop(&mut self) {
        // Closing the queue lets each lookup thread drain what remains and
        // exit its receive loop.
        self.tx.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Resolve a `tcp/host:port` endpoint spec to its first address.
pub(crate) fn resolve_spec(spec: &str) -> io::Result<SocketAddr> {
    let authority = parse_spec(spec).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid endpoint spec: {spec:?}"),
        )
    })?;
    authority.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {spec}"))
    })
}

/// Split a `tcp/host:port` spec into its `host:port` authority.
pub(crate) fn parse_spec(spec: &str) -> Option<&str> {
    match spec.strip_prefix("tcp/") {
        Some(rest) if rest.rsplit_once(':').is_some_and(|(host, port)| {
            !host.is_empty() && port.parse::<u16>().is_ok()
        }) =>
        {
            Some(rest)
        }
        _ => None,
    }
}
