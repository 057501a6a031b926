//! Listening sockets.
//!
//! An [`AsyncServerSocket`] is bound to exactly one reactor. The
//! lifecycle is `build` → `bind` → `listen` → `start`; once started,
//! accept readiness is handled on the reactor thread, which hands
//! every accepted connection to the user's [`AcceptHandler`] as a
//! pre-seeded [`AsyncSocketBuilder`] on the same reactor.
//!
//! Socket options are exposed as discrete best-effort methods here;
//! internally they hit the same live-fd path as
//! [`SocketOptions`](crate::options::SocketOptions).

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::Interest;
use mio::Token;
use parking_lot::Mutex;
use socket2::{Domain, SockAddr, Socket, Type};

use crate::error::{CorewireError, Result};
use crate::reactor::backend::IoBackend;
use crate::reactor::{ReactorShared, Task};

use super::socket::AsyncSocketBuilder;

/// Invoked on the reactor thread for every accepted connection.
///
/// The handler receives a socket builder pre-seeded with the accepted
/// stream; it attaches a reader, builds and starts the socket (or drops
/// the builder to reject the connection).
pub trait AcceptHandler: Send {
    fn accept(&mut self, builder: AsyncSocketBuilder) -> Result<()>;
}

impl<F> AcceptHandler for F
where
    F: FnMut(AsyncSocketBuilder) -> Result<()> + Send,
{
    fn accept(&mut self, builder: AsyncSocketBuilder) -> Result<()> {
        self(builder)
    }
}

struct ServerSeed {
    listener: Socket,
    handler: Box<dyn AcceptHandler>,
}

pub(crate) struct ServerShared {
    reactor: Arc<ReactorShared>,
    token: Token,
    started: AtomicBool,
    closed: AtomicBool,
    /// Dup of the listener fd for options and introspection.
    sock: Socket,
    seed: Mutex<Option<ServerSeed>>,
    context: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

/// A listening socket driven by a [`Reactor`](crate::Reactor).
#[derive(Clone)]
pub struct AsyncServerSocket {
    shared: Arc<ServerShared>,
}

impl AsyncServerSocket {
    /// Bind to a local address.
    pub fn bind(&self, addr: SocketAddr) -> Result<()> {
        self.shared
            .sock
            .bind(&SockAddr::from(addr))
            .map_err(|e| CorewireError::Connection(format!("bind to {} failed: {}", addr, e)))
    }

    /// Start listening with the given backlog.
    pub fn listen(&self, backlog: u32) -> Result<()> {
        self.shared
            .sock
            .listen(backlog as i32)
            .map_err(|e| CorewireError::Connection(format!("listen failed: {}", e)))
    }

    /// Register accept readiness with the reactor. One-time call.
    pub fn start(&self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(CorewireError::IllegalState(
                "server socket was already started".to_string(),
            ));
        }
        let seed = self.shared.seed.lock().take().ok_or_else(|| {
            CorewireError::IllegalState("server socket has no listener state".to_string())
        })?;
        let driver = ServerDriver {
            listener: seed.listener,
            handler: seed.handler,
            shared: self.shared.clone(),
        };
        self.shared
            .reactor
            .submit(Task::Run(Box::new(move |core| core.install_server(driver))))
    }

    /// The bound local address, or absent when introspection fails
    /// (the failure is swallowed and logged, never propagated).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.shared.sock.local_addr() {
            Ok(addr) => addr.as_socket(),
            Err(e) => {
                tracing::debug!(error = %e, "local address lookup failed");
                None
            }
        }
    }

    /// The bound local port, 0 when unbound.
    pub fn local_port(&self) -> u16 {
        self.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Enable or disable `SO_REUSEPORT`. Returns `Ok(false)` where the
    /// platform does not support it.
    pub fn set_reuse_port(&self, reuse: bool) -> Result<bool> {
        #[cfg(unix)]
        {
            self.shared.sock.set_reuse_port(reuse)?;
            Ok(true)
        }
        #[cfg(not(unix))]
        {
            let _ = reuse;
            Ok(false)
        }
    }

    /// Check `SO_REUSEPORT`; false where unsupported.
    pub fn is_reuse_port(&self) -> Result<bool> {
        #[cfg(unix)]
        {
            Ok(self.shared.sock.reuse_port()?)
        }
        #[cfg(not(unix))]
        {
            Ok(false)
        }
    }

    /// Enable or disable `SO_REUSEADDR`.
    pub fn set_reuse_address(&self, reuse: bool) -> Result<()> {
        self.shared.sock.set_reuse_address(reuse)?;
        Ok(())
    }

    /// Check `SO_REUSEADDR`.
    pub fn is_reuse_address(&self) -> Result<bool> {
        Ok(self.shared.sock.reuse_address()?)
    }

    /// Set the receive buffer size in bytes. The kernel may round the
    /// value; read it back to observe the effective size.
    pub fn set_receive_buffer_size(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(CorewireError::InvalidArgument(
                "receive buffer size must be positive".to_string(),
            ));
        }
        self.shared.sock.set_recv_buffer_size(size)?;
        Ok(())
    }

    /// The live receive buffer size in bytes.
    pub fn receive_buffer_size(&self) -> Result<usize> {
        Ok(self.shared.sock.recv_buffer_size()?)
    }

    /// Keyed context for attaching service lookups and other
    /// dependencies to this server socket.
    pub fn context(&self) -> &DashMap<String, Arc<dyn Any + Send + Sync>> {
        &self.shared.context
    }

    /// Check whether the server socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the server socket. One-way, idempotent; teardown errors
    /// are logged, never propagated.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(server = %self, "closing server socket");
        self.shared.seed.lock().take();
        let token = self.shared.token;
        if let Err(e) = self
            .shared
            .reactor
            .submit(Task::Run(Box::new(move |core| core.close_server(token))))
        {
            tracing::debug!(error = %e, "close after reactor termination");
        }
    }
}

impl fmt::Display for AsyncServerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr() {
            Some(addr) => write!(f, "AsyncServerSocket[{}]", addr),
            None => write!(f, "AsyncServerSocket[?]"),
        }
    }
}

impl fmt::Debug for AsyncServerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncServerSocket")
            .field("local", &self.local_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for an [`AsyncServerSocket`], scoped to one reactor.
pub struct AsyncServerSocketBuilder {
    reactor: Arc<ReactorShared>,
    handler: Option<Box<dyn AcceptHandler>>,
}

impl AsyncServerSocketBuilder {
    pub(crate) fn new(reactor: Arc<ReactorShared>) -> Self {
        Self {
            reactor,
            handler: None,
        }
    }

    /// Set the handler invoked for every accepted connection. Required.
    pub fn accept_handler(mut self, handler: impl AcceptHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Build the server socket in unbound state.
    pub fn build(self) -> Result<AsyncServerSocket> {
        let handler = self.handler.ok_or_else(|| {
            CorewireError::InvalidArgument(
                "server socket builder requires an accept handler".to_string(),
            )
        })?;
        let listener = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        listener.set_nonblocking(true)?;
        let sock = listener.try_clone()?;
        let token = self.reactor.alloc_token();

        let shared = Arc::new(ServerShared {
            reactor: self.reactor,
            token,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sock,
            seed: Mutex::new(Some(ServerSeed { listener, handler })),
            context: DashMap::new(),
        });
        Ok(AsyncServerSocket { shared })
    }
}

/// Reactor-side state of one listening socket.
pub(crate) struct ServerDriver {
    listener: Socket,
    handler: Box<dyn AcceptHandler>,
    shared: Arc<ServerShared>,
}

impl ServerDriver {
    pub(crate) fn token(&self) -> Token {
        self.shared.token
    }

    pub(crate) fn register(&mut self, backend: &dyn IoBackend) -> std::io::Result<()> {
        let fd = self.listener.as_raw_fd();
        backend.register(&mut SourceFd(&fd), self.shared.token, Interest::READABLE)
    }

    /// Accept every pending connection and hand each to the handler.
    pub(crate) fn handle_acceptable(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((sock, addr)) => {
                    if let Err(e) = self.accept_one(sock, addr) {
                        tracing::warn!(error = %e, "accepted connection was dropped");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(server = %self.shared.token.0, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn accept_one(&mut self, sock: Socket, addr: SockAddr) -> Result<()> {
        sock.set_nonblocking(true)?;
        let options_sock = sock.try_clone()?;
        let peer = addr.as_socket().ok_or_else(|| {
            CorewireError::Connection("accepted peer has no inet address".to_string())
        })?;
        let std_stream: std::net::TcpStream = sock.into();
        let stream = TcpStream::from_std(std_stream);
        tracing::debug!(peer = %peer, "accepted connection");

        let builder =
            AsyncSocketBuilder::accepted(self.shared.reactor.clone(), stream, peer, options_sock);
        self.handler.accept(builder)
    }

    pub(crate) fn teardown(&mut self, backend: &dyn IoBackend) {
        let fd = self.listener.as_raw_fd();
        if let Err(e) = backend.deregister(&mut SourceFd(&fd)) {
            tracing::debug!(error = %e, "deregister failed during close");
        }
        self.shared.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;

    fn new_server() -> (Reactor, AsyncServerSocket) {
        let reactor = Reactor::builder().name("server-test").build().unwrap();
        let server = reactor
            .server_builder()
            .unwrap()
            .accept_handler(|_builder: AsyncSocketBuilder| Ok(()))
            .build()
            .unwrap();
        (reactor, server)
    }

    #[test]
    fn test_builder_requires_accept_handler() {
        let reactor = Reactor::builder().build().unwrap();
        let result = reactor.server_builder().unwrap().build();
        assert!(matches!(result, Err(CorewireError::InvalidArgument(_))));
    }

    #[test]
    fn test_bind_populates_local_address() {
        let (_reactor, server) = new_server();
        server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        server.listen(16).unwrap();

        let addr = server.local_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(server.local_port(), 0);
    }

    #[test]
    fn test_bind_in_use_is_connection_error() {
        let (_reactor_a, first) = new_server();
        first.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        first.listen(16).unwrap();
        let addr = first.local_addr().unwrap();

        let (_reactor_b, second) = new_server();
        let result = second.bind(addr);
        assert!(matches!(result, Err(CorewireError::Connection(_))));
    }

    #[test]
    fn test_close_without_start_is_idempotent() {
        let (_reactor, server) = new_server();
        assert!(!server.is_closed());
        server.close();
        assert!(server.is_closed());
        server.close();
        assert!(server.is_closed());
    }
}
