//! The default event-loop worker.
//!
//! [`WorkerThread`] implements the [`TransportThread`] contract with a
//! command mailbox, an eventfd-wakeable `poll` loop, and components created
//! on the calling thread. Started normally it runs on its own named OS
//! thread; in single-thread mode the caller drives the same loop core via
//! `init_event_loop` / `event_loop_iteration`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};

use crate::config::Config;
use crate::driver::{self, Command, LoopCore, RegKind, Registration};
use crate::error::Error;
use crate::handler::{
    ChannelTuning, CompToken, ConnectHandler, IoComponent, ServerAdapter, Task, WorkerId,
};
use crate::metrics;
use crate::resolver::{AsyncResolver, parse_spec};
use crate::scheduler::{Scheduler, TimeSampler, scheduler_pair};
use crate::waker::Waker;
use crate::worker::TransportThread;

/// State shared between the worker handle and its event loop.
pub(crate) struct Shared {
    pub(crate) id: WorkerId,
    pub(crate) tx: Sender<Command>,
    pub(crate) wake: Arc<Waker>,
    pub(crate) resolver: Arc<AsyncResolver>,
    pub(crate) time: TimeSampler,

    started: AtomicBool,
    shutdown: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,

    pub(crate) num_components: AtomicUsize,
    next_comp_id: AtomicU64,

    pub(crate) backlog: i32,
    pub(crate) tick_timeout_ms: u64,
    pub(crate) stats_interval: Duration,
    pub(crate) ioc_timeout_ms: AtomicU64,
    pub(crate) max_input_buffer_size: AtomicU32,
    pub(crate) max_output_buffer_size: AtomicU32,
    pub(crate) direct_write: AtomicBool,
    pub(crate) tcp_nodelay: AtomicBool,
    pub(crate) log_stats: AtomicBool,
}

impl Shared {
    pub(crate) fn channel_tuning(&self) -> ChannelTuning {
        ChannelTuning {
            direct_write: self.direct_write.load(Ordering::Relaxed),
            max_input_buffer_size: self.max_input_buffer_size.load(Ordering::Relaxed),
            max_output_buffer_size: self.max_output_buffer_size.load(Ordering::Relaxed),
        }
    }

    fn mark_finished(&self) {
        *self.finished.lock().unwrap() = true;
        self.finished_cv.notify_all();
    }

    fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap()
    }
}

/// Listening component created by [`WorkerThread::listen`].
pub struct Listener {
    token: CompToken,
    local_addr: SocketAddr,
}

impl Listener {
    /// The bound local address. With a `:0` spec this carries the kernel's
    /// ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl IoComponent for Listener {
    fn token(&self) -> CompToken {
        self.token
    }
}

/// Outbound component created by [`WorkerThread::connect`].
///
/// Lives until the connect completes, fails, or is closed; the established
/// channel itself is handed to the [`ConnectHandler`].
pub struct Connection {
    token: CompToken,
    spec: String,
}

impl Connection {
    /// The endpoint spec this connect targets.
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

impl IoComponent for Connection {
    fn token(&self) -> CompToken {
        self.token
    }
}

/// An event-loop worker owning a slice of I/O components.
pub struct WorkerThread {
    shared: Arc<Shared>,
    scheduler: Scheduler,
    core: Mutex<Option<LoopCore>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerThread {
    /// Create a worker with the given pool index. The worker does not run
    /// until [`start`](TransportThread::start) or the single-thread hooks.
    pub fn new(
        id: WorkerId,
        config: &Config,
        resolver: Arc<AsyncResolver>,
    ) -> Result<WorkerThread, Error> {
        let (scheduler, sched_queue) = scheduler_pair()?;
        let wake = sched_queue.waker().clone();
        let (tx, rx) = unbounded();

        let shared = Arc::new(Shared {
            id,
            tx,
            wake,
            resolver,
            time: TimeSampler::new(),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
            num_components: AtomicUsize::new(0),
            next_comp_id: AtomicU64::new(0),
            backlog: config.backlog,
            tick_timeout_ms: config.tick_timeout_ms,
            stats_interval: config.stats_interval,
            ioc_timeout_ms: AtomicU64::new(ioc_timeout_ms(config.ioc_timeout)),
            max_input_buffer_size: AtomicU32::new(config.max_input_buffer_size),
            max_output_buffer_size: AtomicU32::new(config.max_output_buffer_size),
            direct_write: AtomicBool::new(config.direct_write),
            tcp_nodelay: AtomicBool::new(config.tcp_nodelay),
            log_stats: AtomicBool::new(config.log_stats),
        });

        Ok(WorkerThread {
            shared,
            scheduler,
            core: Mutex::new(Some(LoopCore::new(rx, sched_queue))),
            join: Mutex::new(None),
        })
    }

    /// This worker's pool index.
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    fn send(&self, cmd: Command) {
        if self.shared.tx.send(cmd).is_ok() {
            self.shared.wake.wake();
        }
    }

    fn register(&self, id: u64, kind: RegKind) -> Result<(), Error> {
        self.shared.num_components.fetch_add(1, Ordering::Relaxed);
        metrics::COMPONENTS_ADDED.increment();
        if self
            .shared
            .tx
            .send(Command::Register(Registration { id, kind }))
            .is_err()
        {
            self.shared.num_components.fetch_sub(1, Ordering::Relaxed);
            metrics::COMPONENTS_CLOSED.increment();
            return Err(Error::NotRunning);
        }
        self.shared.wake.wake();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.started.load(Ordering::Acquire) && !self.shared.is_finished()
    }
}

impl TransportThread for WorkerThread {
    type Listener = Listener;
    type Connection = Connection;

    fn listen(
        &self,
        spec: &str,
        adapter: Arc<dyn ServerAdapter>,
    ) -> Result<Arc<Listener>, Error> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::NotRunning);
        }
        let authority = parse_spec(spec).ok_or_else(|| Error::InvalidSpec(spec.to_owned()))?;
        let addr = authority
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::InvalidSpec(spec.to_owned()))?;

        let fd = driver::create_listener(addr, self.shared.backlog)?;
        let local_addr = driver::local_addr(fd).unwrap_or(addr);
        let id = self.shared.next_comp_id.fetch_add(1, Ordering::Relaxed);
        let comp = Arc::new(Listener {
            token: CompToken::new(self.shared.id, id),
            local_addr,
        });

        if let Err(err) = self.register(id, RegKind::Listener { fd, adapter }) {
            driver::close_fd(fd);
            return Err(err);
        }
        Ok(comp)
    }

    fn connect(
        &self,
        spec: &str,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<Connection>, Error> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::NotRunning);
        }
        parse_spec(spec).ok_or_else(|| Error::InvalidSpec(spec.to_owned()))?;

        let id = self.shared.next_comp_id.fetch_add(1, Ordering::Relaxed);
        let comp = Arc::new(Connection {
            token: CompToken::new(self.shared.id, id),
            spec: spec.to_owned(),
        });

        self.register(
            id,
            RegKind::Outbound {
                spec: spec.to_owned(),
                handler,
            },
        )?;
        Ok(comp)
    }

    fn num_io_components(&self) -> usize {
        self.shared.num_components.load(Ordering::Relaxed)
    }

    // ── Tuning ───────────────────────────────────────────────────────

    fn set_ioc_timeout(&self, timeout: Option<Duration>) {
        self.shared
            .ioc_timeout_ms
            .store(ioc_timeout_ms(timeout), Ordering::Relaxed);
    }

    fn set_max_input_buffer_size(&self, bytes: u32) {
        self.shared
            .max_input_buffer_size
            .store(bytes, Ordering::Relaxed);
    }

    fn set_max_output_buffer_size(&self, bytes: u32) {
        self.shared
            .max_output_buffer_size
            .store(bytes, Ordering::Relaxed);
    }

    fn set_direct_write(&self, enabled: bool) {
        self.shared.direct_write.store(enabled, Ordering::Relaxed);
    }

    fn set_tcp_nodelay(&self, enabled: bool) {
        self.shared.tcp_nodelay.store(enabled, Ordering::Relaxed);
    }

    fn set_log_stats(&self, enabled: bool) {
        self.shared.log_stats.store(enabled, Ordering::Relaxed);
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn sync(&self) {
        if !self.is_running() {
            return;
        }
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.shared.tx.send(Command::Sync(ack_tx)).is_ok() {
            self.shared.wake.wake();
            // An Err means the loop terminated before the marker was
            // processed; either way the worker is quiesced.
            let _ = ack_rx.recv();
        }
    }

    fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    fn execute(&self, task: Task) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire)
            || self.shared.tx.send(Command::Execute(task)).is_err()
        {
            metrics::EXECUTES_REJECTED.increment();
            return false;
        }
        self.shared.wake.wake();
        true
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    fn start(&self) -> bool {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(core) = self.core.lock().unwrap().take() else {
            return false;
        };
        let shared = self.shared.clone();
        let name = format!("fanline-worker-{}", self.shared.id.index());
        match thread::Builder::new().name(name).spawn(move || run_loop(core, shared)) {
            Ok(handle) => {
                *self.join.lock().unwrap() = Some(handle);
                true
            }
            Err(_) => {
                // The loop core died with the closure; unblock waiters.
                self.shared.mark_finished();
                false
            }
        }
    }

    fn shut_down(&self, wait: bool) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            let _ = self.shared.tx.send(Command::Shutdown);
            self.shared.wake.wake();
        }
        if wait {
            self.wait_finished();
        }
    }

    fn wait_finished(&self) {
        if !self.shared.started.load(Ordering::Acquire) {
            return;
        }
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
            return;
        }
        let mut done = self.shared.finished.lock().unwrap();
        while !*done {
            done = self.shared.finished_cv.wait(done).unwrap();
        }
    }

    // ── Component operations ─────────────────────────────────────────

    fn add(&self, comp: CompToken) {
        self.send(Command::Add(comp));
    }

    fn enable_read(&self, comp: CompToken) {
        self.send(Command::EnableRead(comp));
    }

    fn disable_read(&self, comp: CompToken) {
        self.send(Command::DisableRead(comp));
    }

    fn enable_write(&self, comp: CompToken) {
        self.send(Command::EnableWrite(comp));
    }

    fn disable_write(&self, comp: CompToken) {
        self.send(Command::DisableWrite(comp));
    }

    fn close(&self, comp: CompToken) {
        self.send(Command::Close(comp));
    }

    // ── Single-thread mode ───────────────────────────────────────────

    fn time_sampler(&self) -> TimeSampler {
        self.shared.time.clone()
    }

    fn init_event_loop(&self) -> bool {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.core.lock().unwrap().is_none() {
            return false;
        }
        crate::counter::set_worker_shard(self.shared.id.index());
        true
    }

    fn event_loop_iteration(&self) -> bool {
        let mut slot = self.core.lock().unwrap();
        let Some(core) = slot.as_mut() else {
            return false;
        };
        if driver::iterate(core, &self.shared) {
            return true;
        }
        driver::teardown(core, &self.shared);
        *slot = None;
        drop(slot);
        self.shared.mark_finished();
        false
    }

    fn run_event_loop(&self) {
        self.init_event_loop();
        while self.event_loop_iteration() {}
    }
}

fn run_loop(mut core: LoopCore, shared: Arc<Shared>) {
    crate::counter::set_worker_shard(shared.id.index());
    while driver::iterate(&mut core, &shared) {}
    driver::teardown(&mut core, &shared);
    shared.mark_finished();
}

fn ioc_timeout_ms(timeout: Option<Duration>) -> u64 {
    match timeout {
        Some(timeout) => (timeout.as_millis() as u64).max(1),
        None => 0,
    }
}

/// Number of available CPU cores.
pub(crate) fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 { 1 } else { ret as usize }
}
