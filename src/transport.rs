//! The transport facade.
//!
//! A [`Transport`] multiplexes a fixed pool of event-loop workers behind one
//! surface. Endpoint operations pick a worker through the salted shard
//! selector; component operations route through the component's owner
//! back-reference; tuning and lifecycle operations broadcast to every worker
//! in index order. The facade keeps no hot-path state of its own, so calls
//! from any number of threads proceed in parallel.
//!
//! Teardown contract: the caller invokes `shut_down(true)`, then
//! `wait_finished`, then drops the facade; dropping blocks until every
//! pending resolution has been delivered or dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::handler::{ConnectHandler, IoComponent, ServerAdapter, Task, WorkerId};
use crate::resolver::{AsyncResolver, ResolveHandler};
use crate::scheduler::{Scheduler, TimeSampler};
use crate::select::select_index;
use crate::thread::{WorkerThread, num_cpus};
use crate::worker::TransportThread;

/// A pool of event-loop workers behind a single dispatching facade.
pub struct Transport<T: TransportThread = WorkerThread> {
    resolver: Arc<AsyncResolver>,
    workers: Vec<T>,
}

impl Transport<WorkerThread> {
    /// Create a transport with [`WorkerThread`] workers. A worker count of 0
    /// in `config` means one worker per CPU.
    pub fn new(resolver: Arc<AsyncResolver>, config: Config) -> Result<Self, Error> {
        config.validate()?;
        let count = if config.worker.threads == 0 {
            num_cpus()
        } else {
            config.worker.threads
        };
        let workers = (0..count)
            .map(|i| WorkerThread::new(WorkerId(i), &config, resolver.clone()))
            .collect::<Result<Vec<_>, Error>>()?;
        Self::with_workers(resolver, workers)
    }
}

impl<T: TransportThread> Transport<T> {
    /// Create a transport over an existing ordered worker pool.
    pub fn with_workers(resolver: Arc<AsyncResolver>, workers: Vec<T>) -> Result<Self, Error> {
        if workers.is_empty() {
            return Err(Error::Config(
                "worker pool must have at least one worker".into(),
            ));
        }
        Ok(Transport { resolver, workers })
    }

    /// Number of workers in the pool. Fixed at construction.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn select_worker(&self, key: &[u8]) -> &T {
        &self.workers[select_index(key, self.workers.len())]
    }

    fn owner_of(&self, comp: &dyn IoComponent) -> &T {
        &self.workers[comp.owner().index()]
    }

    // ── Endpoint operations ──────────────────────────────────────────

    /// Queue an asynchronous resolution of `spec`. The handler is held
    /// weakly; drop the owning `Arc` to cancel delivery.
    pub fn resolve_async(&self, spec: &str, handler: Weak<dyn ResolveHandler>) {
        self.resolver.resolve_async(spec, handler);
    }

    /// Create a listener for `spec` on the worker selected for it. The
    /// worker's own result is returned untranslated.
    pub fn listen(
        &self,
        spec: &str,
        adapter: Arc<dyn ServerAdapter>,
    ) -> Result<Arc<T::Listener>, Error> {
        self.select_worker(spec.as_bytes()).listen(spec, adapter)
    }

    /// Initiate an outbound connection to `spec` on the worker selected for
    /// it. The worker's own result is returned untranslated.
    pub fn connect(
        &self,
        spec: &str,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<T::Connection>, Error> {
        self.select_worker(spec.as_bytes()).connect(spec, handler)
    }

    // ── Aggregation ──────────────────────────────────────────────────

    /// Total live I/O components across the pool. A non-atomic snapshot:
    /// each worker's count may be read at a slightly different instant.
    pub fn num_io_components(&self) -> usize {
        self.workers
            .iter()
            .map(|worker| worker.num_io_components())
            .sum()
    }

    // ── Broadcast tuning ─────────────────────────────────────────────

    /// Set the pending-connect timeout on every worker.
    pub fn set_ioc_timeout(&self, timeout: Option<Duration>) {
        for worker in &self.workers {
            worker.set_ioc_timeout(timeout);
        }
    }

    /// Set the input buffer hint on every worker.
    pub fn set_max_input_buffer_size(&self, bytes: u32) {
        for worker in &self.workers {
            worker.set_max_input_buffer_size(bytes);
        }
    }

    /// Set the output buffer hint on every worker.
    pub fn set_max_output_buffer_size(&self, bytes: u32) {
        for worker in &self.workers {
            worker.set_max_output_buffer_size(bytes);
        }
    }

    /// Set the direct-write hint on every worker.
    pub fn set_direct_write(&self, enabled: bool) {
        for worker in &self.workers {
            worker.set_direct_write(enabled);
        }
    }

    /// Set TCP_NODELAY on every worker.
    pub fn set_tcp_nodelay(&self, enabled: bool) {
        for worker in &self.workers {
            worker.set_tcp_nodelay(enabled);
        }
    }

    /// Enable or disable the stats line on every worker.
    pub fn set_log_stats(&self, enabled: bool) {
        for worker in &self.workers {
            worker.set_log_stats(enabled);
        }
    }

    // ── Drain ────────────────────────────────────────────────────────

    /// Wait for every worker, in index order, to acknowledge a round-trip
    /// marker. Returns once all have. Concurrent callers are not serialized
    /// against each other.
    pub fn sync(&self) {
        for worker in &self.workers {
            worker.sync();
        }
    }

    // ── Non-endpoint dispatch ────────────────────────────────────────

    /// A scheduler handle from a selector-chosen worker. Callers must not
    /// assume which worker backs it.
    pub fn scheduler(&self) -> Scheduler {
        self.select_worker(&[]).scheduler()
    }

    /// Run `task` on a selector-chosen worker. Returns false if that worker
    /// has shut down.
    pub fn execute(&self, task: Task) -> bool {
        self.select_worker(&[]).execute(task)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start every worker. Returns the logical AND of the per-worker
    /// results; a failure does not stop the remaining workers from being
    /// started.
    pub fn start(&self) -> bool {
        let mut all = true;
        for worker in &self.workers {
            all &= worker.start();
        }
        all
    }

    /// Signal every worker to shut down. With `wait`, each call blocks
    /// until its worker has quiesced.
    ///
    /// # Deadlock
    ///
    /// In single-thread mode the caller is the loop, so `shut_down(true)`
    /// would wait on itself. Use `shut_down(false)`, drive the loop until
    /// [`event_loop_iteration`](Self::event_loop_iteration) returns false,
    /// then call [`wait_finished`](Self::wait_finished).
    pub fn shut_down(&self, wait: bool) {
        for worker in &self.workers {
            worker.shut_down(wait);
        }
    }

    /// Join every worker.
    ///
    /// # Deadlock
    ///
    /// In single-thread mode this returns only once the caller has driven
    /// the loop to completion; calling it from the loop-driving thread
    /// before the loop has finished blocks forever.
    pub fn wait_finished(&self) {
        for worker in &self.workers {
            worker.wait_finished();
        }
    }

    // ── Component routing ────────────────────────────────────────────
    //
    // These route to the component's owning worker, never through the
    // selector: a component is only ever manipulated by the worker that
    // created it.

    /// Re-assert a component's registration with its owner.
    pub fn add(&self, comp: &dyn IoComponent) {
        self.owner_of(comp).add(comp.token());
    }

    /// Enable read/accept interest on the component's owner.
    pub fn enable_read(&self, comp: &dyn IoComponent) {
        self.owner_of(comp).enable_read(comp.token());
    }

    /// Disable read/accept interest on the component's owner.
    pub fn disable_read(&self, comp: &dyn IoComponent) {
        self.owner_of(comp).disable_read(comp.token());
    }

    /// Enable write/connect-progress interest on the component's owner.
    pub fn enable_write(&self, comp: &dyn IoComponent) {
        self.owner_of(comp).enable_write(comp.token());
    }

    /// Disable write/connect-progress interest on the component's owner.
    pub fn disable_write(&self, comp: &dyn IoComponent) {
        self.owner_of(comp).disable_write(comp.token());
    }

    /// Close the component on its owner.
    pub fn close(&self, comp: &dyn IoComponent) {
        self.owner_of(comp).close(comp.token());
    }

    // ── Single-thread mode ───────────────────────────────────────────

    /// The single worker's cached clock.
    ///
    /// # Panics
    ///
    /// Panics unless the pool has exactly one worker.
    pub fn time_sampler(&self) -> TimeSampler {
        self.assert_single();
        self.workers[0].time_sampler()
    }

    /// Claim the single worker's event loop for the calling thread.
    ///
    /// # Panics
    ///
    /// Panics unless the pool has exactly one worker.
    pub fn init_event_loop(&self) -> bool {
        self.assert_single();
        self.workers[0].init_event_loop()
    }

    /// Run one iteration of the single worker's loop on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics unless the pool has exactly one worker.
    pub fn event_loop_iteration(&self) -> bool {
        self.assert_single();
        self.workers[0].event_loop_iteration()
    }

    /// Drive the single worker's loop on the calling thread until shutdown.
    ///
    /// # Panics
    ///
    /// Panics unless the pool has exactly one worker.
    pub fn run_event_loop(&self) {
        self.assert_single();
        self.workers[0].run_event_loop();
    }

    fn assert_single(&self) {
        assert_eq!(
            self.workers.len(),
            1,
            "single-thread mode requires exactly one worker"
        );
    }
}

impl<T: TransportThread> Drop for Transport<T> {
    fn drop(&mut self) {
        // Workers are the caller's to shut down first; the facade only
        // guarantees that no resolver callback fires after destruction.
        self.resolver.wait_for_pending_resolves();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CompToken;
    use crate::scheduler::scheduler_pair;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockComponent {
        token: CompToken,
    }

    impl IoComponent for MockComponent {
        fn token(&self) -> CompToken {
            self.token
        }
    }

    /// Instrumented stand-in for a worker. Records every operation.
    struct MockThread {
        id: WorkerId,
        start_ok: bool,
        starts: AtomicUsize,
        shutdown: AtomicBool,
        listens: AtomicUsize,
        connects: AtomicUsize,
        executes: AtomicUsize,
        components: AtomicUsize,
        next_id: AtomicUsize,
        tcp_nodelay: Mutex<Option<bool>>,
        ioc_timeout: Mutex<Option<Option<Duration>>>,
        ops: Mutex<Vec<(&'static str, u64)>>,
        sync_log: Arc<Mutex<Vec<usize>>>,
        scheduler: Scheduler,
        _queue: Mutex<crate::scheduler::ScheduleQueue>,
    }

    impl MockThread {
        fn new(id: usize, sync_log: Arc<Mutex<Vec<usize>>>) -> MockThread {
            let (scheduler, queue) = scheduler_pair().unwrap();
            MockThread {
                id: WorkerId(id),
                start_ok: true,
                starts: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                listens: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                executes: AtomicUsize::new(0),
                components: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                tcp_nodelay: Mutex::new(None),
                ioc_timeout: Mutex::new(None),
                ops: Mutex::new(Vec::new()),
                sync_log,
                scheduler,
                _queue: Mutex::new(queue),
            }
        }

        fn component(&self) -> Arc<MockComponent> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
            self.components.fetch_add(1, Ordering::SeqCst);
            Arc::new(MockComponent {
                token: CompToken::new(self.id, id),
            })
        }

        fn record(&self, op: &'static str, id: u64) {
            self.ops.lock().unwrap().push((op, id));
        }
    }

    impl TransportThread for MockThread {
        type Listener = MockComponent;
        type Connection = MockComponent;

        fn listen(
            &self,
            _spec: &str,
            _adapter: Arc<dyn ServerAdapter>,
        ) -> Result<Arc<MockComponent>, Error> {
            self.listens.fetch_add(1, Ordering::SeqCst);
            Ok(self.component())
        }

        fn connect(
            &self,
            _spec: &str,
            _handler: Arc<dyn ConnectHandler>,
        ) -> Result<Arc<MockComponent>, Error> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.component())
        }

        fn num_io_components(&self) -> usize {
            self.components.load(Ordering::SeqCst)
        }

        fn set_ioc_timeout(&self, timeout: Option<Duration>) {
            *self.ioc_timeout.lock().unwrap() = Some(timeout);
        }
        fn set_max_input_buffer_size(&self, _bytes: u32) {}
        fn set_max_output_buffer_size(&self, _bytes: u32) {}
        fn set_direct_write(&self, _enabled: bool) {}
        fn set_tcp_nodelay(&self, enabled: bool) {
            *self.tcp_nodelay.lock().unwrap() = Some(enabled);
        }
        fn set_log_stats(&self, _enabled: bool) {}

        fn sync(&self) {
            self.sync_log.lock().unwrap().push(self.id.index());
        }

        fn scheduler(&self) -> Scheduler {
            self.scheduler.clone()
        }

        fn execute(&self, task: Task) -> bool {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            task();
            self.executes.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn start(&self) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.start_ok
        }

        fn shut_down(&self, _wait: bool) {
            self.shutdown.store(true, Ordering::SeqCst);
        }

        fn wait_finished(&self) {}

        fn add(&self, comp: CompToken) {
            self.record("add", comp.id());
        }
        fn enable_read(&self, comp: CompToken) {
            self.record("enable_read", comp.id());
        }
        fn disable_read(&self, comp: CompToken) {
            self.record("disable_read", comp.id());
        }
        fn enable_write(&self, comp: CompToken) {
            self.record("enable_write", comp.id());
        }
        fn disable_write(&self, comp: CompToken) {
            self.record("disable_write", comp.id());
        }
        fn close(&self, comp: CompToken) {
            self.record("close", comp.id());
        }

        fn time_sampler(&self) -> TimeSampler {
            TimeSampler::new()
        }
        fn init_event_loop(&self) -> bool {
            true
        }
        fn event_loop_iteration(&self) -> bool {
            false
        }
        fn run_event_loop(&self) {}
    }

    struct NullAdapter;
    impl ServerAdapter for NullAdapter {
        fn on_channel(&self, _channel: crate::handler::Channel) {}
    }

    struct NullConnect;
    impl ConnectHandler for NullConnect {
        fn on_established(&self, _result: io::Result<crate::handler::Channel>) {}
    }

    fn mock_pool(n: usize) -> (Transport<MockThread>, Arc<Mutex<Vec<usize>>>) {
        let sync_log = Arc::new(Mutex::new(Vec::new()));
        let workers: Vec<MockThread> =
            (0..n).map(|i| MockThread::new(i, sync_log.clone())).collect();
        let transport =
            Transport::with_workers(AsyncResolver::new(1).unwrap(), workers).unwrap();
        (transport, sync_log)
    }

    #[test]
    fn empty_pool_rejected() {
        let resolver = AsyncResolver::new(1).unwrap();
        let workers: Vec<MockThread> = Vec::new();
        assert!(matches!(
            Transport::with_workers(resolver, workers),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn connect_fans_out_uniformly() {
        let (transport, _) = mock_pool(4);
        for i in 0..10_000u32 {
            let spec = format!("tcp/host-{i}.example.com:19101");
            transport.connect(&spec, Arc::new(NullConnect)).unwrap();
        }
        // Each of 4 workers should see 2500 +/- 200 connects.
        for (i, worker) in transport.workers.iter().enumerate() {
            let count = worker.connects.load(Ordering::SeqCst);
            assert!(
                (2300..=2700).contains(&count),
                "worker {i} got {count} connects"
            );
        }
    }

    #[test]
    fn component_ops_route_to_owner() {
        let (transport, _) = mock_pool(4);
        let listener = transport
            .listen("tcp/127.0.0.1:0", Arc::new(NullAdapter))
            .unwrap();
        let owner = listener.owner().index();
        let total_listens: usize = transport
            .workers
            .iter()
            .map(|worker| worker.listens.load(Ordering::SeqCst))
            .sum();
        assert_eq!(total_listens, 1);

        // Route from a different thread, as any caller may.
        let comp = listener.clone();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                transport.enable_read(&*comp);
                transport.disable_write(&*comp);
                transport.close(&*comp);
            });
        });

        for (i, worker) in transport.workers.iter().enumerate() {
            let ops = worker.ops.lock().unwrap();
            if i == owner {
                let kinds: Vec<&str> = ops.iter().map(|(kind, _)| *kind).collect();
                assert_eq!(kinds, vec!["enable_read", "disable_write", "close"]);
                for (_, id) in ops.iter() {
                    assert_eq!(*id, listener.token().id());
                }
            } else {
                assert!(ops.is_empty(), "worker {i} saw ops for a foreign component");
            }
        }
    }

    #[test]
    fn broadcast_tuning_reaches_every_worker() {
        let (transport, _) = mock_pool(3);
        transport.set_tcp_nodelay(true);
        transport.set_ioc_timeout(Some(Duration::from_secs(5)));
        for worker in &transport.workers {
            assert_eq!(*worker.tcp_nodelay.lock().unwrap(), Some(true));
            assert_eq!(
                *worker.ioc_timeout.lock().unwrap(),
                Some(Some(Duration::from_secs(5)))
            );
        }
    }

    #[test]
    fn aggregate_component_count_sums_workers() {
        let (transport, _) = mock_pool(3);
        for worker in &transport.workers {
            for _ in 0..worker.id.index() + 1 {
                worker.component();
            }
        }
        // 1 + 2 + 3
        assert_eq!(transport.num_io_components(), 6);
    }

    #[test]
    fn partial_start_failure_still_starts_the_rest() {
        let sync_log = Arc::new(Mutex::new(Vec::new()));
        let mut workers: Vec<MockThread> =
            (0..3).map(|i| MockThread::new(i, sync_log.clone())).collect();
        workers[1].start_ok = false;
        let transport =
            Transport::with_workers(AsyncResolver::new(1).unwrap(), workers).unwrap();

        assert!(!transport.start());
        for worker in &transport.workers {
            assert_eq!(worker.starts.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn sync_visits_workers_in_index_order() {
        let (transport, sync_log) = mock_pool(3);
        transport.sync();
        assert_eq!(*sync_log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn execute_rejected_after_shutdown() {
        let (transport, _) = mock_pool(2);
        assert!(transport.execute(Box::new(|| {})));
        let ran: usize = transport
            .workers
            .iter()
            .map(|worker| worker.executes.load(Ordering::SeqCst))
            .sum();
        assert_eq!(ran, 1);

        transport.shut_down(true);
        transport.wait_finished();
        assert!(!transport.execute(Box::new(|| {})));
    }

    #[test]
    fn scheduler_comes_from_the_pool() {
        let (transport, _) = mock_pool(4);
        let scheduler = transport.scheduler();
        assert!(scheduler.schedule_now(Box::new(|| {})));
    }

    #[test]
    fn drop_waits_for_pending_resolves() {
        struct CountingHandler {
            delivered: Arc<AtomicUsize>,
        }
        impl ResolveHandler for CountingHandler {
            fn on_resolved(&self, _result: io::Result<SocketAddr>) {
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
        }

        let delivered = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn ResolveHandler> = Arc::new(CountingHandler {
            delivered: delivered.clone(),
        });

        let sync_log = Arc::new(Mutex::new(Vec::new()));
        let workers: Vec<MockThread> =
            (0..2).map(|i| MockThread::new(i, sync_log.clone())).collect();
        let transport =
            Transport::with_workers(AsyncResolver::new(1).unwrap(), workers).unwrap();

        for i in 0..100 {
            let port = 2000 + i;
            let weak: Weak<dyn ResolveHandler> = Arc::downgrade(&handler);
            transport.resolve_async(&format!("tcp/127.0.0.1:{port}"), weak);
        }
        drop(transport);

        // Drop returned, so every resolution was delivered or dropped; the
        // handler is still alive, so all 100 were delivered.
        assert_eq!(delivered.load(Ordering::SeqCst), 100);
    }

    #[test]
    #[should_panic(expected = "single-thread mode requires exactly one worker")]
    fn single_thread_hooks_assert_pool_size() {
        let (transport, _) = mock_pool(2);
        transport.init_event_loop();
    }

    #[test]
    fn single_thread_hooks_delegate_with_one_worker() {
        let (transport, _) = mock_pool(1);
        assert!(transport.init_event_loop());
        assert!(!transport.event_loop_iteration());
        let _sampler = transport.time_sampler();
    }
}
