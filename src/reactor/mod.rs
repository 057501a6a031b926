//! The per-core event loop.
//!
//! A [`Reactor`] owns a dedicated thread and a disjoint set of sockets.
//! All readiness callbacks, scheduled tasks and socket teardown execute
//! exclusively on that thread, cooperatively: no preemption between
//! callbacks, and a slow callback stalls every socket the reactor owns.
//! Sockets never migrate between reactors.
//!
//! Cross-thread work arrives through a task channel. The loop drains
//! the channel before every poll, so tasks submitted from the reactor
//! thread itself (e.g. from inside a read callback) are picked up
//! without a wake syscall; foreign threads wake the poll through the
//! backend's waker.
//!
//! ```text
//! foreign thread ──submit──► task channel ──► ┌─────────────────┐
//!                                 ▲           │  reactor thread │
//! foreign thread ──invoke──┐      │           │  drain tasks    │
//!        (blocks on result)└──────┘           │  poll backend   │
//!                                             │  handle events  │
//!                                             └─────────────────┘
//! ```

pub mod backend;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::{Events, Token};
use parking_lot::{Condvar, Mutex};

use crate::error::{CorewireError, Result};
use crate::net::server::{AsyncServerSocketBuilder, ServerDriver};
use crate::net::socket::{AsyncSocketBuilder, SocketDriver, Next};

pub use backend::BackendKind;
use backend::{IoBackend, ReadinessBackend};

/// Token reserved for the backend waker.
pub(crate) const WAKER_TOKEN: Token = Token(0);

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_TERMINATED: u8 = 2;

const DEFAULT_EVENTS_CAPACITY: usize = 256;

/// Work marshalled onto the reactor thread.
pub(crate) enum Task {
    /// Run a closure against the loop state.
    Run(Box<dyn FnOnce(&mut Core) + Send>),
    /// Drain a socket's write queue to the wire.
    Schedule(Token),
}

/// State shared between the reactor handle, its sockets and the loop.
pub(crate) struct ReactorShared {
    name: String,
    state: AtomicU8,
    tx: Sender<Task>,
    waker: mio::Waker,
    next_token: AtomicUsize,
    thread_id: OnceLock<ThreadId>,
}

impl ReactorShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_reactor_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_TERMINATED
    }

    pub(crate) fn alloc_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Enqueue a task, waking the loop when called from a foreign
    /// thread. On the reactor thread the wake is skipped: the loop
    /// drains the channel before its next poll anyway.
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        if self.is_terminated() {
            return Err(CorewireError::IllegalState(format!(
                "reactor {} is terminated",
                self.name
            )));
        }
        self.tx.send(task).map_err(|_| {
            CorewireError::IllegalState(format!("reactor {} is terminated", self.name))
        })?;
        if !self.is_reactor_thread() {
            if let Err(e) = self.waker.wake() {
                tracing::warn!(reactor = %self.name, error = %e, "failed to wake reactor");
            }
        }
        Ok(())
    }

    /// Enqueue a task and block until the reactor thread has run it.
    ///
    /// Must not be called from the reactor thread (it would wait on
    /// itself); reactor-thread callers take the non-blocking
    /// [`submit`](Self::submit) path instead.
    pub(crate) fn invoke<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Core) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        debug_assert!(
            !self.is_reactor_thread(),
            "invoke must not be called from the reactor thread"
        );
        let cell = Arc::new(InvokeCell {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        });
        let guard = InvokeGuard {
            cell: cell.clone(),
            done: false,
        };
        self.submit(Task::Run(Box::new(move |core| {
            let mut guard = guard;
            let result = f(core);
            guard.complete(result);
        })))?;

        let mut slot = cell.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            cell.cond.wait(&mut slot);
        }
    }
}

struct InvokeCell<R> {
    slot: Mutex<Option<Result<R>>>,
    cond: Condvar,
}

/// Releases a blocked invoker even when the task never runs (the
/// channel is torn down at termination with tasks still queued).
struct InvokeGuard<R> {
    cell: Arc<InvokeCell<R>>,
    done: bool,
}

impl<R> InvokeGuard<R> {
    fn complete(&mut self, result: Result<R>) {
        self.done = true;
        *self.cell.slot.lock() = Some(result);
        self.cell.cond.notify_one();
    }
}

impl<R> Drop for InvokeGuard<R> {
    fn drop(&mut self) {
        if !self.done {
            *self.cell.slot.lock() = Some(Err(CorewireError::IllegalState(
                "reactor terminated before the task ran".to_string(),
            )));
            self.cell.cond.notify_one();
        }
    }
}

/// The loop state. Lives on the reactor thread once started.
pub(crate) struct Core {
    backend: Box<dyn IoBackend>,
    events: Events,
    rx: Receiver<Task>,
    sockets: HashMap<Token, SocketDriver>,
    servers: HashMap<Token, ServerDriver>,
    shared: Arc<ReactorShared>,
    shutdown: bool,
}

impl Core {
    fn run(mut self) {
        tracing::debug!(reactor = %self.shared.name, "reactor loop started");
        loop {
            self.drain_tasks();
            if self.shutdown {
                break;
            }
            if let Err(e) = self.backend.poll(&mut self.events, None) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(reactor = %self.shared.name, error = %e, "poll failed");
                break;
            }
            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|e| {
                    (
                        e.token(),
                        e.is_readable() || e.is_read_closed() || e.is_error(),
                        e.is_writable() || e.is_write_closed(),
                    )
                })
                .collect();
            for (token, readable, writable) in ready {
                self.handle_event(token, readable, writable);
            }
        }
        self.drain_tasks();
        let tokens: Vec<Token> = self.sockets.keys().copied().collect();
        for token in tokens {
            self.close_socket(token);
        }
        let tokens: Vec<Token> = self.servers.keys().copied().collect();
        for token in tokens {
            self.close_server(token);
        }
        tracing::debug!(reactor = %self.shared.name, "reactor loop stopped");
    }

    fn drain_tasks(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Task::Run(f)) => f(self),
                Ok(Task::Schedule(token)) => self.flush_socket(token),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_event(&mut self, token: Token, readable: bool, writable: bool) {
        if token == WAKER_TOKEN {
            return;
        }
        if self.servers.contains_key(&token) {
            if let Some(server) = self.servers.get_mut(&token) {
                server.handle_acceptable();
            }
            return;
        }
        let mut close = false;
        if writable {
            if let Some(driver) = self.sockets.get_mut(&token) {
                match driver.handle_writable(self.backend.as_ref()) {
                    Ok(Next::Continue) => {}
                    Ok(Next::Close) => close = true,
                    Err(e) => {
                        tracing::debug!(error = %e, "write handling failed");
                        close = true;
                    }
                }
            }
        }
        if readable && !close {
            if let Some(driver) = self.sockets.get_mut(&token) {
                match driver.handle_readable() {
                    Ok(Next::Continue) => {}
                    Ok(Next::Close) => close = true,
                    Err(e) => {
                        tracing::warn!(error = %e, "aborting connection");
                        close = true;
                    }
                }
            }
        }
        if close {
            self.close_socket(token);
        }
    }

    fn flush_socket(&mut self, token: Token) {
        if let Some(driver) = self.sockets.get_mut(&token) {
            match driver.handle_flush(self.backend.as_ref()) {
                Ok(Next::Continue) => {}
                Ok(Next::Close) => self.close_socket(token),
                Err(e) => {
                    tracing::debug!(error = %e, "flush failed");
                    self.close_socket(token);
                }
            }
        }
    }

    /// Register a socket driver built elsewhere and adopt it into the
    /// loop.
    pub(crate) fn install_socket(&mut self, mut driver: SocketDriver) {
        let token = driver.token();
        if let Err(e) = driver.register(self.backend.as_ref()) {
            tracing::error!(error = %e, "failed to register socket");
            return; // driver drop marks the socket closed
        }
        let pending_writes = driver.has_pending_writes();
        self.sockets.insert(token, driver);
        if pending_writes {
            self.flush_socket(token);
        }
    }

    pub(crate) fn install_server(&mut self, mut driver: ServerDriver) {
        let token = driver.token();
        if let Err(e) = driver.register(self.backend.as_ref()) {
            tracing::error!(error = %e, "failed to register server socket");
            return;
        }
        self.servers.insert(token, driver);
    }

    pub(crate) fn close_socket(&mut self, token: Token) {
        if let Some(mut driver) = self.sockets.remove(&token) {
            driver.teardown(self.backend.as_ref());
        }
    }

    pub(crate) fn close_server(&mut self, token: Token) {
        if let Some(mut driver) = self.servers.remove(&token) {
            driver.teardown(self.backend.as_ref());
        }
    }

    /// Re-derive and apply a socket's readiness interest after its
    /// readable flag changed. A socket that is not installed yet picks
    /// the flag up at registration.
    pub(crate) fn sync_socket_interest(&mut self, token: Token) -> Result<()> {
        match self.sockets.get_mut(&token) {
            Some(driver) => driver.sync_interest(self.backend.as_ref()).map_err(Into::into),
            None => Ok(()),
        }
    }
}

/// Builder for a [`Reactor`].
#[derive(Debug)]
pub struct ReactorBuilder {
    name: String,
    backend: BackendKind,
    events_capacity: usize,
}

impl ReactorBuilder {
    fn new() -> Self {
        Self {
            name: "reactor".to_string(),
            backend: BackendKind::default(),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }

    /// Name used for the reactor thread and in logging.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Select the I/O backend. The choice is fixed for the reactor's
    /// lifetime.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Capacity of the readiness event buffer.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Construct the reactor in created state; call
    /// [`Reactor::start`] to spin up its thread.
    pub fn build(self) -> Result<Reactor> {
        let backend: Box<dyn IoBackend> = match self.backend {
            BackendKind::Readiness => Box::new(ReadinessBackend::new()?),
        };
        let waker = backend.new_waker(WAKER_TOKEN)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(ReactorShared {
            name: self.name,
            state: AtomicU8::new(STATE_CREATED),
            tx,
            waker,
            next_token: AtomicUsize::new(WAKER_TOKEN.0 + 1),
            thread_id: OnceLock::new(),
        });
        let core = Core {
            backend,
            events: Events::with_capacity(self.events_capacity),
            rx,
            sockets: HashMap::new(),
            servers: HashMap::new(),
            shared: shared.clone(),
            shutdown: false,
        };
        Ok(Reactor {
            shared,
            core: Mutex::new(Some(core)),
            join: Mutex::new(None),
        })
    }
}

/// A single-threaded event loop owning a disjoint set of sockets.
pub struct Reactor {
    shared: Arc<ReactorShared>,
    core: Mutex<Option<Core>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Start building a reactor.
    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    /// The reactor's name.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Spin up the reactor thread. One-time transition; a second call
    /// fails.
    pub fn start(&self) -> Result<()> {
        self.shared
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| {
                CorewireError::IllegalState(format!(
                    "reactor {} was already started",
                    self.shared.name
                ))
            })?;
        let core = match self.core.lock().take() {
            Some(core) => core,
            None => {
                return Err(CorewireError::IllegalState(format!(
                    "reactor {} was already started",
                    self.shared.name
                )))
            }
        };
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || {
                let _ = shared.thread_id.set(thread::current().id());
                core.run();
            })
            .map_err(|e| {
                self.shared.state.store(STATE_TERMINATED, Ordering::Release);
                CorewireError::Io(e)
            })?;
        *self.join.lock() = Some(handle);
        Ok(())
    }

    /// Check whether the caller runs on this reactor's thread.
    pub fn is_reactor_thread(&self) -> bool {
        self.shared.is_reactor_thread()
    }

    /// Check whether the reactor has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Stop the loop, close every owned socket and join the thread.
    /// Idempotent; safe from any thread. Work submitted after this call
    /// is rejected rather than silently lost.
    pub fn terminate(&self) {
        let prev = self.shared.state.swap(STATE_TERMINATED, Ordering::AcqRel);
        match prev {
            STATE_CREATED => {
                *self.core.lock() = None;
            }
            STATE_RUNNING => {
                tracing::debug!(reactor = %self.shared.name, "terminating reactor");
                let _ = self
                    .shared
                    .tx
                    .send(Task::Run(Box::new(|core| core.shutdown = true)));
                if let Err(e) = self.shared.waker.wake() {
                    tracing::warn!(reactor = %self.shared.name, error = %e, "failed to wake reactor for termination");
                }
            }
            _ => {}
        }
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Builder for a client-side socket owned by this reactor.
    pub fn socket_builder(&self) -> Result<AsyncSocketBuilder> {
        if self.shared.is_terminated() {
            return Err(CorewireError::IllegalState(format!(
                "reactor {} is terminated",
                self.shared.name
            )));
        }
        Ok(AsyncSocketBuilder::client(self.shared.clone()))
    }

    /// Builder for a server socket owned by this reactor.
    pub fn server_builder(&self) -> Result<AsyncServerSocketBuilder> {
        if self.shared.is_terminated() {
            return Err(CorewireError::IllegalState(format!(
                "reactor {} is terminated",
                self.shared.name
            )));
        }
        Ok(AsyncServerSocketBuilder::new(self.shared.clone()))
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state.load(Ordering::Acquire))
            .finish()
    }
}
