//! Non-blocking connection sockets.
//!
//! An [`AsyncSocket`] is bound to exactly one reactor for its lifetime
//! and driven entirely by that reactor's thread. The public handle is
//! cheap to clone and safe to share once [`AsyncSocket::start`] has
//! been called.
//!
//! Thread-safety of the surface, by cost:
//! - `write`/`write_all`/`flush`/`write_and_flush`: safe from any
//!   thread, fire-and-forget (an enqueue plus, off the reactor thread,
//!   one wake syscall).
//! - `set_readable`: safe from any thread; instantaneous on the
//!   reactor thread, blocking until acknowledged from foreign threads.
//! - `unsafe_write_and_flush`: reactor-thread-only, skips the
//!   cross-thread scheduling overhead on the hot path.
//! - `options` get/set: read and write the live kernel values through
//!   the socket's own handle, safe from any thread.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Interest, Token};
use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Socket, Type};

use crate::error::{CorewireError, Result};
use crate::metrics::SocketMetrics;
use crate::options::SocketOptions;
use crate::protocol::Frame;
use crate::reactor::backend::IoBackend;
use crate::reactor::{ReactorShared, Task};

use super::reader::AsyncReader;

/// Read chunk size per `read` syscall.
const READ_CHUNK: usize = 64 * 1024;

/// Maximum frames batched into one vectored write.
const MAX_WRITE_BATCH: usize = 64;

/// What a socket is waiting for before it can be driven.
enum PendingIo {
    /// Client socket built but not yet connected.
    Client {
        sock: Socket,
        reader: Box<dyn AsyncReader>,
    },
    /// Accepted socket not yet started.
    Accepted {
        stream: TcpStream,
        reader: Box<dyn AsyncReader>,
    },
}

pub(crate) struct SocketShared {
    reactor: Arc<ReactorShared>,
    token: Token,
    client_side: bool,
    started: AtomicBool,
    closed: AtomicBool,
    readable: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    remote_addr: Mutex<Option<SocketAddr>>,
    write_queue: Mutex<VecDeque<Frame>>,
    pending: Mutex<Option<PendingIo>>,
    metrics: SocketMetrics,
    options: SocketOptions,
}

impl SocketShared {
    /// Flip to closed and drop address/queue state. Idempotent; called
    /// from the handle's `close` and from driver teardown.
    pub(crate) fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.local_addr.lock().take();
        self.remote_addr.lock().take();
        self.write_queue.lock().clear();
        self.pending.lock().take();
    }
}

/// A non-blocking socket driven by a [`Reactor`](crate::Reactor).
#[derive(Clone)]
pub struct AsyncSocket {
    shared: Arc<SocketShared>,
}

impl AsyncSocket {
    /// This socket's option store.
    pub fn options(&self) -> &SocketOptions {
        &self.shared.options
    }

    /// This socket's I/O counters.
    pub fn metrics(&self) -> &SocketMetrics {
        &self.shared.metrics
    }

    /// Whether this socket was created by a client connect (as opposed
    /// to being accepted by a server socket).
    pub fn is_client_side(&self) -> bool {
        self.shared.client_side
    }

    /// The local address, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// The remote address, once connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.shared.remote_addr.lock()
    }

    /// Check the readable flag. See [`set_readable`](Self::set_readable).
    pub fn is_readable(&self) -> bool {
        self.shared.readable.load(Ordering::Acquire)
    }

    /// Toggle whether received data schedules this socket on its
    /// reactor.
    ///
    /// This is the backpressure primitive: while not readable, the
    /// receive buffer is left to fill up and TCP flow control
    /// propagates the pressure to the remote sender without closing
    /// the connection. A no-op when the requested state equals the
    /// current state.
    ///
    /// Safe from any thread. On the reactor thread the change is
    /// instantaneous; a foreign thread blocks until the reactor has
    /// applied it.
    pub fn set_readable(&self, readable: bool) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CorewireError::IllegalState(
                "socket is closed".to_string(),
            ));
        }
        if self.shared.readable.swap(readable, Ordering::AcqRel) == readable {
            return Ok(());
        }
        let token = self.shared.token;
        if self.shared.reactor.is_reactor_thread() {
            // Applied when the loop drains its tasks, before the next
            // poll, so no readiness event is observed in between.
            self.shared.reactor.submit(Task::Run(Box::new(move |core| {
                if let Err(e) = core.sync_socket_interest(token) {
                    tracing::error!(error = %e, "failed to update read interest");
                }
            })))
        } else {
            self.shared
                .reactor
                .invoke(move |core| core.sync_socket_interest(token))
        }
    }

    /// Activate the socket. Must be called exactly once; sharing the
    /// socket with other threads before this call is undefined.
    pub fn start(&self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(CorewireError::IllegalState(
                "socket was already started".to_string(),
            ));
        }
        let pending = self.shared.pending.lock().take();
        match pending {
            // Accepted sockets go live immediately.
            Some(PendingIo::Accepted { stream, reader }) => {
                let driver = SocketDriver::new(stream, self.shared.clone(), reader, true, None);
                self.shared
                    .reactor
                    .submit(Task::Run(Box::new(move |core| {
                        core.install_socket(driver)
                    })))
            }
            // Client sockets wait for connect().
            Some(pending @ PendingIo::Client { .. }) => {
                *self.shared.pending.lock() = Some(pending);
                Ok(())
            }
            None => Err(CorewireError::IllegalState(
                "socket has no connection state".to_string(),
            )),
        }
    }

    /// Connect asynchronously to `addr`.
    ///
    /// The socket must have been started. The returned handle resolves
    /// once the reactor observes the outcome; on success the local and
    /// remote addresses are populated.
    pub fn connect(&self, addr: SocketAddr) -> ConnectFuture {
        let cell = Arc::new(ConnectCell {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        });
        let future = ConnectFuture { cell: cell.clone() };
        if let Err(e) = self.connect_inner(addr, cell.clone()) {
            *cell.slot.lock() = Some(Err(e));
            cell.cond.notify_all();
        }
        future
    }

    fn connect_inner(&self, addr: SocketAddr, cell: Arc<ConnectCell>) -> Result<()> {
        if !self.shared.started.load(Ordering::Acquire) {
            return Err(CorewireError::IllegalState(
                "socket must be started before connect".to_string(),
            ));
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CorewireError::IllegalState(
                "socket is closed".to_string(),
            ));
        }
        let taken = self.shared.pending.lock().take();
        let (sock, reader) = match taken {
            Some(PendingIo::Client { sock, reader }) => (sock, reader),
            other => {
                *self.shared.pending.lock() = other;
                return Err(CorewireError::IllegalState(
                    "socket is not awaiting a connect".to_string(),
                ));
            }
        };
        match sock.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => {
                return Err(CorewireError::Connection(format!(
                    "connect to {} failed: {}",
                    addr, e
                )))
            }
        }
        let std_stream: std::net::TcpStream = sock.into();
        let stream = TcpStream::from_std(std_stream);
        let pending = PendingConnect { cell, done: false };
        let driver = SocketDriver::new(stream, self.shared.clone(), reader, false, Some(pending));
        self.shared
            .reactor
            .submit(Task::Run(Box::new(move |core| core.install_socket(driver))))
    }

    /// Enqueue a frame without flushing.
    ///
    /// Acceptance is atomic with respect to close: returns `false`
    /// (dropping the frame back to its pool) once the socket is
    /// closed. Acceptance implies no delivery guarantee.
    pub fn write(&self, frame: Frame) -> bool {
        let mut queue = self.shared.write_queue.lock();
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        queue.push_back(frame);
        true
    }

    /// Enqueue a batch of frames without flushing. Same semantics as
    /// [`write`](Self::write), applied to the whole batch atomically.
    pub fn write_all(&self, frames: Vec<Frame>) -> bool {
        let mut queue = self.shared.write_queue.lock();
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        queue.extend(frames);
        true
    }

    /// Schedule this socket on its reactor so queued frames get
    /// drained to the wire. Idempotent; ignored once closed.
    pub fn flush(&self) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.shared.reactor.submit(Task::Schedule(self.shared.token)) {
            tracing::debug!(error = %e, "flush ignored");
        }
    }

    /// [`write`](Self::write) followed by [`flush`](Self::flush).
    pub fn write_and_flush(&self, frame: Frame) -> bool {
        let accepted = self.write(frame);
        if accepted {
            self.flush();
        }
        accepted
    }

    /// Write and flush without cross-thread scheduling overhead.
    ///
    /// Must only be called from the owning reactor thread; no
    /// thread-safety is enforced beyond a debug assertion.
    pub fn unsafe_write_and_flush(&self, frame: Frame) -> bool {
        debug_assert!(
            self.shared.reactor.is_reactor_thread(),
            "unsafe_write_and_flush called off the reactor thread"
        );
        self.write_and_flush(frame)
    }

    /// Check whether the socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the socket.
    ///
    /// Idempotent and infallible: teardown errors are logged, never
    /// propagated. Queued-but-unflushed frames are discarded (their
    /// buffers return to their pools) and any partially reconstructed
    /// inbound frame is abandoned.
    pub fn close(&self) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        tracing::debug!(socket = %self, "closing socket");
        self.shared.mark_closed();
        let token = self.shared.token;
        if let Err(e) = self
            .shared
            .reactor
            .submit(Task::Run(Box::new(move |core| core.close_socket(token))))
        {
            // Reactor already gone; its shutdown tore the driver down.
            tracing::debug!(error = %e, "close after reactor termination");
        }
    }
}

impl fmt::Display for AsyncSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_addr = |addr: Option<SocketAddr>| match addr {
            Some(addr) => addr.to_string(),
            None => "?".to_string(),
        };
        write!(
            f,
            "AsyncSocket[{}->{}]",
            fmt_addr(self.local_addr()),
            fmt_addr(self.remote_addr())
        )
    }
}

impl fmt::Debug for AsyncSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSocket")
            .field("client_side", &self.shared.client_side)
            .field("local", &self.local_addr())
            .field("remote", &self.remote_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for an [`AsyncSocket`], scoped to one reactor.
pub struct AsyncSocketBuilder {
    reactor: Arc<ReactorShared>,
    reader: Option<Box<dyn AsyncReader>>,
    accepted: Option<(TcpStream, SocketAddr, Socket)>,
}

impl AsyncSocketBuilder {
    pub(crate) fn client(reactor: Arc<ReactorShared>) -> Self {
        Self {
            reactor,
            reader: None,
            accepted: None,
        }
    }

    pub(crate) fn accepted(
        reactor: Arc<ReactorShared>,
        stream: TcpStream,
        peer: SocketAddr,
        options_sock: Socket,
    ) -> Self {
        Self {
            reactor,
            reader: None,
            accepted: Some((stream, peer, options_sock)),
        }
    }

    /// Set the reader that consumes inbound bytes. Required.
    pub fn reader(mut self, reader: impl AsyncReader + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Build the socket. Client sockets connect afterwards via
    /// [`AsyncSocket::connect`]; accepted sockets go live on
    /// [`AsyncSocket::start`].
    pub fn build(self) -> Result<AsyncSocket> {
        let reader = self.reader.ok_or_else(|| {
            CorewireError::InvalidArgument("socket builder requires a reader".to_string())
        })?;
        let token = self.reactor.alloc_token();

        let (client_side, options, pending, local, remote) = match self.accepted {
            Some((stream, peer, options_sock)) => {
                let local = stream.local_addr().ok();
                (
                    false,
                    SocketOptions::new(options_sock),
                    PendingIo::Accepted { stream, reader },
                    local,
                    Some(peer),
                )
            }
            None => {
                let sock = Socket::new(Domain::IPV4, Type::STREAM, None)?;
                sock.set_nonblocking(true)?;
                let options_sock = sock.try_clone()?;
                (
                    true,
                    SocketOptions::new(options_sock),
                    PendingIo::Client { sock, reader },
                    None,
                    None,
                )
            }
        };

        let shared = Arc::new(SocketShared {
            reactor: self.reactor,
            token,
            client_side,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            readable: AtomicBool::new(true),
            local_addr: Mutex::new(local),
            remote_addr: Mutex::new(remote),
            write_queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(Some(pending)),
            metrics: SocketMetrics::new(),
            options,
        });
        Ok(AsyncSocket { shared })
    }
}

struct ConnectCell {
    slot: Mutex<Option<Result<()>>>,
    cond: Condvar,
}

/// Handle resolving to the outcome of [`AsyncSocket::connect`].
pub struct ConnectFuture {
    cell: Arc<ConnectCell>,
}

impl ConnectFuture {
    /// Block until the connect attempt resolves.
    pub fn wait(self) -> Result<()> {
        let mut slot = self.cell.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.cell.cond.wait(&mut slot);
        }
    }

    /// Block until the connect attempt resolves or `timeout` elapses.
    pub fn wait_timeout(self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.cell.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            if self.cell.cond.wait_until(&mut slot, deadline).timed_out() {
                return Err(CorewireError::Connection(format!(
                    "connect timed out after {:?}",
                    timeout
                )));
            }
        }
    }

    /// Non-blocking check; consumes the result when available.
    pub fn try_result(&self) -> Option<Result<()>> {
        self.cell.slot.lock().take()
    }
}

/// Completion side of a pending connect. Dropping it unresolved (close
/// or reactor shutdown before the connect finished) fails the waiter.
pub(crate) struct PendingConnect {
    cell: Arc<ConnectCell>,
    done: bool,
}

impl PendingConnect {
    fn complete(&mut self, result: Result<()>) {
        self.done = true;
        *self.cell.slot.lock() = Some(result);
        self.cell.cond.notify_all();
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        if !self.done {
            *self.cell.slot.lock() = Some(Err(CorewireError::Connection(
                "socket closed before connect completed".to_string(),
            )));
            self.cell.cond.notify_all();
        }
    }
}

/// Outcome of a driver callback.
pub(crate) enum Next {
    Continue,
    Close,
}

/// Reactor-side state of one socket. Lives in the reactor's socket
/// table; all methods run on the reactor thread.
pub(crate) struct SocketDriver {
    stream: TcpStream,
    shared: Arc<SocketShared>,
    reader: Box<dyn AsyncReader>,
    recv_buf: BytesMut,
    read_chunk: Vec<u8>,
    send_queue: VecDeque<Frame>,
    send_offset: usize,
    connected: bool,
    connect: Option<PendingConnect>,
    registered: Option<Interest>,
}

impl SocketDriver {
    fn new(
        stream: TcpStream,
        shared: Arc<SocketShared>,
        reader: Box<dyn AsyncReader>,
        connected: bool,
        connect: Option<PendingConnect>,
    ) -> Self {
        Self {
            stream,
            shared,
            reader,
            recv_buf: BytesMut::with_capacity(READ_CHUNK),
            read_chunk: vec![0u8; READ_CHUNK],
            send_queue: VecDeque::new(),
            send_offset: 0,
            connected,
            connect,
            registered: None,
        }
    }

    pub(crate) fn token(&self) -> Token {
        self.shared.token
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        !self.shared.write_queue.lock().is_empty() || !self.send_queue.is_empty()
    }

    fn handle(&self) -> AsyncSocket {
        AsyncSocket {
            shared: self.shared.clone(),
        }
    }

    fn desired_interest(&self) -> Option<Interest> {
        if !self.connected {
            return Some(Interest::WRITABLE);
        }
        let want_write = !self.send_queue.is_empty();
        let want_read = self.shared.readable.load(Ordering::Acquire);
        match (want_read, want_write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    pub(crate) fn register(&mut self, backend: &dyn IoBackend) -> io::Result<()> {
        if let Some(interest) = self.desired_interest() {
            backend.register(&mut self.stream, self.shared.token, interest)?;
            self.registered = Some(interest);
        }
        Ok(())
    }

    /// Bring the backend registration in line with what the socket
    /// currently wants to hear about.
    pub(crate) fn sync_interest(&mut self, backend: &dyn IoBackend) -> io::Result<()> {
        let desired = self.desired_interest();
        match (self.registered, desired) {
            (None, Some(interest)) => {
                backend.register(&mut self.stream, self.shared.token, interest)?;
                self.registered = Some(interest);
            }
            (Some(_), None) => {
                backend.deregister(&mut self.stream)?;
                self.registered = None;
            }
            (Some(current), Some(interest)) if current != interest => {
                backend.reregister(&mut self.stream, self.shared.token, interest)?;
                self.registered = Some(interest);
            }
            _ => {}
        }
        Ok(())
    }

    /// Drain the kernel receive buffer and feed the reader.
    pub(crate) fn handle_readable(&mut self) -> Result<Next> {
        if !self.connected {
            return Ok(Next::Continue);
        }
        if !self.shared.readable.load(Ordering::Acquire) {
            // Backpressured: leave the kernel buffer to fill up.
            return Ok(Next::Continue);
        }
        self.shared.metrics.inc_read_events();

        let mut eof = false;
        loop {
            match self.stream.read(&mut self.read_chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    self.shared.metrics.add_bytes_read(n as u64);
                    self.recv_buf.extend_from_slice(&self.read_chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(socket = %self.handle(), error = %e, "read failed");
                    return Ok(Next::Close);
                }
            }
        }

        if !self.recv_buf.is_empty() {
            let socket = self.handle();
            self.reader.on_read(&mut self.recv_buf, &socket)?;
        }

        if eof {
            tracing::debug!(socket = %self.handle(), "connection closed by peer");
            return Ok(Next::Close);
        }
        Ok(Next::Continue)
    }

    /// Writable readiness: finish a pending connect, then drain.
    pub(crate) fn handle_writable(&mut self, backend: &dyn IoBackend) -> Result<Next> {
        if let Some(mut pending) = self.connect.take() {
            match self.stream.take_error() {
                Ok(None) => {}
                Ok(Some(e)) | Err(e) => {
                    pending.complete(Err(CorewireError::Connection(format!(
                        "connect failed: {}",
                        e
                    ))));
                    return Ok(Next::Close);
                }
            }
            match self.stream.peer_addr() {
                Ok(peer) => {
                    self.connected = true;
                    *self.shared.remote_addr.lock() = Some(peer);
                    *self.shared.local_addr.lock() = self.stream.local_addr().ok();
                    pending.complete(Ok(()));
                    tracing::debug!(socket = %self.handle(), "connected");
                    self.sync_interest(backend)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                    // Spurious wakeup; the connect is still in flight.
                    self.connect = Some(pending);
                    return Ok(Next::Continue);
                }
                Err(e) => {
                    pending.complete(Err(CorewireError::Connection(format!(
                        "connect failed: {}",
                        e
                    ))));
                    return Ok(Next::Close);
                }
            }
        }
        self.shared.metrics.inc_write_events();
        self.drain_writes(backend)
    }

    /// Flush request from any thread.
    pub(crate) fn handle_flush(&mut self, backend: &dyn IoBackend) -> Result<Next> {
        if !self.connected {
            // Frames stay queued; the connect completion drains them.
            return Ok(Next::Continue);
        }
        self.shared.metrics.inc_write_events();
        self.drain_writes(backend)
    }

    /// Write queued frames to the wire, in call order, batching frames
    /// into vectored writes.
    fn drain_writes(&mut self, backend: &dyn IoBackend) -> Result<Next> {
        {
            let mut queue = self.shared.write_queue.lock();
            self.send_queue.extend(queue.drain(..));
        }

        while !self.send_queue.is_empty() {
            let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(self.send_queue.len().min(MAX_WRITE_BATCH));
            for (i, frame) in self.send_queue.iter().take(MAX_WRITE_BATCH).enumerate() {
                let wire = frame.wire_bytes();
                if i == 0 {
                    slices.push(IoSlice::new(&wire[self.send_offset..]));
                } else {
                    slices.push(IoSlice::new(wire));
                }
            }
            let result = self.stream.write_vectored(&slices);
            drop(slices);
            match result {
                Ok(0) => {
                    tracing::debug!(socket = %self.handle(), "write returned zero");
                    return Ok(Next::Close);
                }
                Ok(n) => {
                    self.shared.metrics.add_bytes_written(n as u64);
                    self.advance_send(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.sync_interest(backend)?;
                    return Ok(Next::Continue);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(socket = %self.handle(), error = %e, "write failed");
                    return Ok(Next::Close);
                }
            }
        }
        self.send_offset = 0;
        self.sync_interest(backend)?;
        Ok(Next::Continue)
    }

    fn advance_send(&mut self, mut written: usize) {
        while written > 0 {
            let Some(head) = self.send_queue.front() else {
                break;
            };
            let remaining = head.wire_bytes().len() - self.send_offset;
            if written >= remaining {
                written -= remaining;
                self.send_offset = 0;
                self.shared.metrics.inc_frames_written();
                self.send_queue.pop_front();
            } else {
                self.send_offset += written;
                written = 0;
            }
        }
    }

    /// Deregister and mark the socket closed. Errors are logged only.
    pub(crate) fn teardown(&mut self, backend: &dyn IoBackend) {
        if self.registered.take().is_some() {
            if let Err(e) = backend.deregister(&mut self.stream) {
                tracing::debug!(error = %e, "deregister failed during close");
            }
        }
        self.shared.mark_closed();
        // Dropping the driver releases queued frames and any partially
        // reconstructed inbound frame back to their pools; an
        // unresolved connect promise resolves to an error.
    }
}

impl Drop for SocketDriver {
    fn drop(&mut self) {
        self.shared.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::reader::DevNullReader;
    use crate::reactor::Reactor;

    fn test_reactor() -> Reactor {
        Reactor::builder().name("socket-test").build().unwrap()
    }

    #[test]
    fn test_builder_requires_reader() {
        let reactor = test_reactor();
        let result = reactor.socket_builder().unwrap().build();
        assert!(matches!(result, Err(CorewireError::InvalidArgument(_))));
    }

    #[test]
    fn test_new_socket_defaults() {
        let reactor = test_reactor();
        let socket = reactor
            .socket_builder()
            .unwrap()
            .reader(DevNullReader::new())
            .build()
            .unwrap();

        assert!(socket.is_client_side());
        assert!(socket.is_readable());
        assert!(!socket.is_closed());
        assert!(socket.local_addr().is_none());
        assert!(socket.remote_addr().is_none());
        assert_eq!(format!("{}", socket), "AsyncSocket[?->?]");
    }

    #[test]
    fn test_connect_before_start_fails() {
        let reactor = test_reactor();
        let socket = reactor
            .socket_builder()
            .unwrap()
            .reader(DevNullReader::new())
            .build()
            .unwrap();

        let result = socket.connect("127.0.0.1:1".parse().unwrap()).try_result();
        assert!(matches!(
            result,
            Some(Err(CorewireError::IllegalState(_)))
        ));
    }

    #[test]
    fn test_write_accepts_until_closed() {
        let reactor = test_reactor();
        let socket = reactor
            .socket_builder()
            .unwrap()
            .reader(DevNullReader::new())
            .build()
            .unwrap();

        assert!(socket.write(Frame::request(b"queued")));
        assert!(socket.write_all(vec![Frame::request(b"a"), Frame::request(b"b")]));

        socket.close();
        assert!(socket.is_closed());
        assert!(!socket.write(Frame::request(b"rejected")));
    }

    #[test]
    fn test_options_reachable_before_connect() {
        let reactor = test_reactor();
        let socket = reactor
            .socket_builder()
            .unwrap()
            .reader(DevNullReader::new())
            .build()
            .unwrap();

        assert!(socket
            .options()
            .set(&crate::options::TCP_NODELAY, true)
            .unwrap());
        assert_eq!(
            socket.options().get(&crate::options::TCP_NODELAY).unwrap(),
            Some(true)
        );
    }
}
