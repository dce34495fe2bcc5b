//! Event-loop core for the default worker.
//!
//! One iteration: run due timers, drain the command mailbox, `poll(2)` the
//! wake eventfd plus every enabled component fd, service readiness, evict
//! stale pending connects. Listener readiness accepts and hands channels to
//! the server adapter; outbound readiness completes nonblocking connects.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::handler::{Channel, CompToken, ConnectHandler, ServerAdapter, Task};
use crate::metrics;
use crate::resolver::ResolveHandler;
use crate::scheduler::ScheduleQueue;
use crate::thread::Shared;
use crate::waker::Waker;

/// Mailbox commands processed by the event loop.
pub(crate) enum Command {
    Register(Registration),
    Add(CompToken),
    EnableRead(CompToken),
    DisableRead(CompToken),
    EnableWrite(CompToken),
    DisableWrite(CompToken),
    Close(CompToken),
    Execute(Task),
    Sync(Sender<()>),
    Resolved { id: u64, result: io::Result<SocketAddr> },
    Shutdown,
}

pub(crate) struct Registration {
    pub(crate) id: u64,
    pub(crate) kind: RegKind,
}

pub(crate) enum RegKind {
    Listener {
        fd: RawFd,
        adapter: Arc<dyn ServerAdapter>,
    },
    Outbound {
        spec: String,
        handler: Arc<dyn ConnectHandler>,
    },
}

struct ListenerEntry {
    fd: RawFd,
    adapter: Arc<dyn ServerAdapter>,
    read_enabled: bool,
}

enum OutboundState {
    // The strong reference keeps the weak handler in the resolver queue
    // upgradeable; dropping it (component close) cancels delivery.
    Resolving(#[allow(dead_code)] Arc<LoopResolveHandler>),
    Connecting(RawFd),
}

struct OutboundEntry {
    handler: Arc<dyn ConnectHandler>,
    state: OutboundState,
    write_enabled: bool,
    created: Instant,
}

enum CompEntry {
    Listener(ListenerEntry),
    Outbound(OutboundEntry),
}

/// Posts resolution results back to the owning loop's mailbox.
struct LoopResolveHandler {
    tx: Sender<Command>,
    wake: Arc<Waker>,
    id: u64,
}

impl ResolveHandler for LoopResolveHandler {
    fn on_resolved(&self, result: io::Result<SocketAddr>) {
        if self.tx.send(Command::Resolved { id: self.id, result }).is_ok() {
            self.wake.wake();
        }
    }
}

/// Loop-owned state: the mailbox receiver, the timer queue, and the
/// component table. Lives on the worker thread (or, in single-thread mode,
/// is driven by the caller).
pub(crate) struct LoopCore {
    rx: Receiver<Command>,
    sched: ScheduleQueue,
    comps: HashMap<u64, CompEntry>,
    pollfds: Vec<libc::pollfd>,
    poll_ids: Vec<u64>,
    running: bool,
    accepted: u64,
    established: u64,
    iterations: u64,
    last_stats: Instant,
}

impl LoopCore {
    pub(crate) fn new(rx: Receiver<Command>, sched: ScheduleQueue) -> LoopCore {
        LoopCore {
            rx,
            sched,
            comps: HashMap::new(),
            pollfds: Vec::new(),
            poll_ids: Vec::new(),
            running: true,
            accepted: 0,
            established: 0,
            iterations: 0,
            last_stats: Instant::now(),
        }
    }
}

/// Run one loop iteration. Returns false once shutdown has been observed.
pub(crate) fn iterate(core: &mut LoopCore, shared: &Shared) -> bool {
    core.iterations += 1;
    shared.time.sample();

    // Timers first: anything already due runs before we block.
    core.sched.drain_new();
    let now = Instant::now();
    let fired = core.sched.run_due(now);
    if fired > 0 {
        metrics::TIMERS_FIRED.add(fired as u64);
    }

    // Commands queued since the last iteration.
    if !drain_commands(core, shared) {
        return false;
    }

    let timeout = poll_timeout(core, shared, now);
    build_pollfds(core);
    let ret = unsafe {
        libc::poll(
            core.pollfds.as_mut_ptr(),
            core.pollfds.len() as libc::nfds_t,
            timeout,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            log::warn!("worker {}: poll failed: {err}", shared.id.index());
        }
        return core.running;
    }

    if core.pollfds[0].revents != 0 {
        core.sched.waker().drain();
    }
    for i in 1..core.pollfds.len() {
        if core.pollfds[i].revents != 0 {
            let id = core.poll_ids[i - 1];
            service_ready(core, shared, id);
        }
    }

    // Commands that arrived while we were in poll.
    if !drain_commands(core, shared) {
        return false;
    }

    evict_stale(core, shared, Instant::now());
    maybe_log_stats(core, shared);
    core.running
}

/// Close whatever is left once the loop has stopped: acknowledge stray sync
/// markers, release never-processed registrations, close every component.
pub(crate) fn teardown(core: &mut LoopCore, shared: &Shared) {
    while let Ok(cmd) = core.rx.try_recv() {
        match cmd {
            Command::Sync(ack) => {
                let _ = ack.send(());
            }
            Command::Register(reg) => {
                if let RegKind::Listener { fd, .. } = reg.kind {
                    close_fd(fd);
                }
                shared.num_components.fetch_sub(1, Ordering::Relaxed);
                metrics::COMPONENTS_CLOSED.increment();
            }
            _ => {}
        }
    }

    let ids: Vec<u64> = core.comps.keys().copied().collect();
    for id in ids {
        close_component(core, shared, id);
    }
}

fn drain_commands(core: &mut LoopCore, shared: &Shared) -> bool {
    while let Ok(cmd) = core.rx.try_recv() {
        handle_command(core, shared, cmd);
    }
    core.running
}

fn handle_command(core: &mut LoopCore, shared: &Shared, cmd: Command) {
    match cmd {
        Command::Register(reg) => register(core, shared, reg),
        Command::Add(_token) => {
            // Components register at creation time; re-adding is idempotent.
        }
        Command::EnableRead(token) => {
            if let Some(CompEntry::Listener(entry)) = core.comps.get_mut(&token.id()) {
                entry.read_enabled = true;
            }
        }
        Command::DisableRead(token) => {
            if let Some(CompEntry::Listener(entry)) = core.comps.get_mut(&token.id()) {
                entry.read_enabled = false;
            }
        }
        Command::EnableWrite(token) => {
            if let Some(CompEntry::Outbound(entry)) = core.comps.get_mut(&token.id()) {
                entry.write_enabled = true;
            }
        }
        Command::DisableWrite(token) => {
            if let Some(CompEntry::Outbound(entry)) = core.comps.get_mut(&token.id()) {
                entry.write_enabled = false;
            }
        }
        Command::Close(token) => close_component(core, shared, token.id()),
        Command::Execute(task) => {
            task();
            metrics::TASKS_EXECUTED.increment();
        }
        Command::Sync(ack) => {
            let _ = ack.send(());
            metrics::SYNCS_ACKED.increment();
        }
        Command::Resolved { id, result } => advance_outbound(core, shared, id, result),
        Command::Shutdown => core.running = false,
    }
}

fn register(core: &mut LoopCore, shared: &Shared, reg: Registration) {
    match reg.kind {
        RegKind::Listener { fd, adapter } => {
            core.comps.insert(
                reg.id,
                CompEntry::Listener(ListenerEntry {
                    fd,
                    adapter,
                    read_enabled: true,
                }),
            );
        }
        RegKind::Outbound { spec, handler } => {
            let resolve = Arc::new(LoopResolveHandler {
                tx: shared.tx.clone(),
                wake: shared.wake.clone(),
                id: reg.id,
            });
            let resolve_dyn: Arc<dyn ResolveHandler> = resolve.clone();
            let weak: std::sync::Weak<dyn ResolveHandler> = Arc::downgrade(&resolve_dyn);
            core.comps.insert(
                reg.id,
                CompEntry::Outbound(OutboundEntry {
                    handler,
                    state: OutboundState::Resolving(resolve),
                    write_enabled: true,
                    created: Instant::now(),
                }),
            );
            shared.resolver.resolve_async(&spec, weak);
        }
    }
}

/// Drop a component and release its socket. Pending connects are cancelled
/// silently, the same contract as dropping a resolve handler.
fn close_component(core: &mut LoopCore, shared: &Shared, id: u64) {
    let Some(entry) = core.comps.remove(&id) else {
        return;
    };
    match entry {
        CompEntry::Listener(listener) => close_fd(listener.fd),
        CompEntry::Outbound(outbound) => {
            if let OutboundState::Connecting(fd) = outbound.state {
                close_fd(fd);
            }
        }
    }
    shared.num_components.fetch_sub(1, Ordering::Relaxed);
    metrics::COMPONENTS_CLOSED.increment();
}

/// A resolution came back for outbound component `id`: start the
/// nonblocking connect, or fail the component.
fn advance_outbound(core: &mut LoopCore, shared: &Shared, id: u64, result: io::Result<SocketAddr>) {
    let mut outbound = match core.comps.remove(&id) {
        Some(CompEntry::Outbound(outbound)) => outbound,
        Some(other) => {
            core.comps.insert(id, other);
            return;
        }
        None => return,
    };

    match result.and_then(connect_nonblocking) {
        Ok((fd, established)) => {
            if established {
                finish_outbound(core, shared, outbound.handler, fd);
            } else {
                outbound.state = OutboundState::Connecting(fd);
                core.comps.insert(id, CompEntry::Outbound(outbound));
            }
        }
        Err(err) => {
            outbound.handler.on_established(Err(err));
            metrics::CONNECTS_FAILED.increment();
            shared.num_components.fetch_sub(1, Ordering::Relaxed);
            metrics::COMPONENTS_CLOSED.increment();
        }
    }
}

fn service_ready(core: &mut LoopCore, shared: &Shared, id: u64) {
    match core.comps.get(&id) {
        Some(CompEntry::Listener(_)) => service_listener(core, shared, id),
        Some(CompEntry::Outbound(_)) => service_outbound(core, shared, id),
        None => {}
    }
}

fn service_listener(core: &mut LoopCore, shared: &Shared, id: u64) {
    let (fd, adapter) = match core.comps.get(&id) {
        Some(CompEntry::Listener(entry)) if entry.read_enabled => {
            (entry.fd, entry.adapter.clone())
        }
        _ => return,
    };

    let tuning = shared.channel_tuning();
    let nodelay = shared.tcp_nodelay.load(Ordering::Relaxed);
    let mut accepted = 0u64;
    let mut broken = false;

    loop {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut addr_len =
            std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let conn_fd = unsafe {
            libc::accept4(
                fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut addr_len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };

        if conn_fd < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => break,
                Some(libc::EINTR) | Some(libc::ECONNABORTED) => continue,
                // Out of fds: keep the listener, retry on the next tick.
                Some(libc::EMFILE) | Some(libc::ENFILE) => break,
                _ => {
                    // A broken listener would report POLLERR forever.
                    log::warn!("worker {}: accept failed: {err}", shared.id.index());
                    broken = true;
                    break;
                }
            }
        }

        apply_socket_tuning(conn_fd, &tuning, nodelay);
        let peer_addr = sockaddr_to_socket_addr(&storage)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let stream = unsafe { TcpStream::from_raw_fd(conn_fd) };
        adapter.on_channel(Channel {
            stream,
            peer_addr,
            tuning,
        });
        accepted += 1;
        metrics::CHANNELS_ACCEPTED.increment();
    }

    core.accepted += accepted;
    if broken {
        close_component(core, shared, id);
    }
}

fn service_outbound(core: &mut LoopCore, shared: &Shared, id: u64) {
    // Only a connecting component has a pollable socket; anything else
    // stays put.
    match core.comps.get(&id) {
        Some(CompEntry::Outbound(outbound)) => match outbound.state {
            OutboundState::Connecting(_) => {}
            _ => return,
        },
        _ => return,
    }
    let Some(CompEntry::Outbound(outbound)) = core.comps.remove(&id) else {
        return;
    };
    let OutboundState::Connecting(fd) = outbound.state else {
        return;
    };

    match take_socket_error(fd) {
        Ok(()) => finish_outbound(core, shared, outbound.handler, fd),
        Err(err) => {
            close_fd(fd);
            outbound.handler.on_established(Err(err));
            metrics::CONNECTS_FAILED.increment();
            shared.num_components.fetch_sub(1, Ordering::Relaxed);
            metrics::COMPONENTS_CLOSED.increment();
        }
    }
}

/// Hand the connected socket off to the handler. The entry is already
/// removed: after hand-off the channel belongs to the caller, not the loop.
fn finish_outbound(
    core: &mut LoopCore,
    shared: &Shared,
    handler: Arc<dyn ConnectHandler>,
    fd: RawFd,
) {
    let tuning = shared.channel_tuning();
    apply_socket_tuning(fd, &tuning, shared.tcp_nodelay.load(Ordering::Relaxed));
    let peer_addr =
        peer_addr(fd).unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    handler.on_established(Ok(Channel {
        stream,
        peer_addr,
        tuning,
    }));
    core.established += 1;
    metrics::CHANNELS_ESTABLISHED.increment();
    shared.num_components.fetch_sub(1, Ordering::Relaxed);
    metrics::COMPONENTS_CLOSED.increment();
}

fn evict_stale(core: &mut LoopCore, shared: &Shared, now: Instant) {
    let timeout_ms = shared.ioc_timeout_ms.load(Ordering::Relaxed);
    if timeout_ms == 0 {
        return;
    }
    let timeout = Duration::from_millis(timeout_ms);

    let stale: Vec<u64> = core
        .comps
        .iter()
        .filter_map(|(&id, entry)| match entry {
            CompEntry::Outbound(outbound)
                if now.saturating_duration_since(outbound.created) > timeout =>
            {
                Some(id)
            }
            _ => None,
        })
        .collect();

    for id in stale {
        let Some(CompEntry::Outbound(outbound)) = core.comps.remove(&id) else {
            continue;
        };
        if let OutboundState::Connecting(fd) = outbound.state {
            close_fd(fd);
        }
        outbound.handler.on_established(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connect timed out",
        )));
        metrics::CONNECTS_FAILED.increment();
        shared.num_components.fetch_sub(1, Ordering::Relaxed);
        metrics::COMPONENTS_CLOSED.increment();
    }
}

fn poll_timeout(core: &LoopCore, shared: &Shared, now: Instant) -> libc::c_int {
    let mut timeout = shared.tick_timeout_ms;
    if let Some(deadline) = core.sched.next_deadline() {
        let until = deadline.saturating_duration_since(now).as_millis() as u64;
        timeout = timeout.min(until);
    }
    timeout.min(i32::MAX as u64) as libc::c_int
}

fn build_pollfds(core: &mut LoopCore) {
    let LoopCore {
        comps,
        pollfds,
        poll_ids,
        sched,
        ..
    } = core;

    pollfds.clear();
    poll_ids.clear();
    pollfds.push(libc::pollfd {
        fd: sched.waker().fd(),
        events: libc::POLLIN,
        revents: 0,
    });

    for (&id, entry) in comps.iter() {
        let pfd = match entry {
            CompEntry::Listener(listener) if listener.read_enabled => libc::pollfd {
                fd: listener.fd,
                events: libc::POLLIN,
                revents: 0,
            },
            CompEntry::Outbound(outbound) => match outbound.state {
                OutboundState::Connecting(fd) if outbound.write_enabled => libc::pollfd {
                    fd,
                    events: libc::POLLOUT,
                    revents: 0,
                },
                _ => continue,
            },
            _ => continue,
        };
        pollfds.push(pfd);
        poll_ids.push(id);
    }
}

fn maybe_log_stats(core: &mut LoopCore, shared: &Shared) {
    if !shared.log_stats.load(Ordering::Relaxed) {
        return;
    }
    let now = Instant::now();
    if now.saturating_duration_since(core.last_stats) < shared.stats_interval {
        return;
    }
    core.last_stats = now;
    log::info!(
        "worker {}: components={} accepted={} established={} iterations={}",
        shared.id.index(),
        core.comps.len(),
        core.accepted,
        core.established,
        core.iterations
    );
}

// ── Socket helpers ──────────────────────────────────────────────────

pub(crate) fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Create a nonblocking TCP listener bound to `addr`.
pub(crate) fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<RawFd> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let fd = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let addr_len = socket_addr_to_sockaddr(addr, &mut storage);

    let ret =
        unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, addr_len) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        close_fd(fd);
        return Err(err);
    }

    let ret = unsafe { libc::listen(fd, backlog) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        close_fd(fd);
        return Err(err);
    }

    Ok(fd)
}

/// Start a nonblocking connect. Returns the socket and whether the connect
/// already completed (loopback connects can succeed immediately).
fn connect_nonblocking(addr: SocketAddr) -> io::Result<(RawFd, bool)> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let fd = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let addr_len = socket_addr_to_sockaddr(addr, &mut storage);

    let ret =
        unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, addr_len) };
    if ret == 0 {
        return Ok((fd, true));
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EINTR) => Ok((fd, false)),
        _ => {
            close_fd(fd);
            Err(err)
        }
    }
}

/// Fetch and clear SO_ERROR after a connect completes.
fn take_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if err != 0 {
        return Err(io::Error::from_raw_os_error(err));
    }
    Ok(())
}

/// Best-effort socket tuning: TCP_NODELAY and kernel buffer hints.
fn apply_socket_tuning(fd: RawFd, tuning: &crate::handler::ChannelTuning, nodelay: bool) {
    let optval: libc::c_int = nodelay as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let rcv: libc::c_int = tuning.max_input_buffer_size.min(i32::MAX as u32) as libc::c_int;
    let snd: libc::c_int = tuning.max_output_buffer_size.min(i32::MAX as u32) as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &rcv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &snd as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

/// Write `addr` into a `sockaddr_storage`, returning the address length.
fn socket_addr_to_sockaddr(
    addr: SocketAddr,
    storage: &mut libc::sockaddr_storage,
) -> libc::socklen_t {
    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(storage as *mut _ as *mut libc::sockaddr_in) };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(storage as *mut _ as *mut libc::sockaddr_in6) };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_scope_id = v6.scope_id();
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}

/// Convert a kernel-filled `sockaddr_storage` to a Rust `SocketAddr`.
fn sockaddr_to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
            let port = u16::from_be(sa.sin_port);
            Some(SocketAddr::from((ip, port)))
        }
        libc::AF_INET6 => {
            let sa = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(sa.sin6_addr.s6_addr);
            let port = u16::from_be(sa.sin6_port);
            Some(SocketAddr::from((ip, port)))
        }
        _ => None,
    }
}

/// Local address of a bound socket (useful after binding port 0).
pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    sockaddr_to_socket_addr(&storage)
        .ok_or_else(|| io::Error::other("unsupported address family"))
}

/// Peer address of a connected socket.
fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    sockaddr_to_socket_addr(&storage)
        .ok_or_else(|| io::Error::other("unsupported address family"))
}
