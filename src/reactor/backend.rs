//! Pluggable I/O readiness backends.
//!
//! The reactor treats its I/O completion mechanism as an opaque
//! notifier with a small capability set: register/deregister interest,
//! wait for events, wake. The backend is selected once at reactor
//! construction, never per call. [`ReadinessBackend`] is the
//! readiness-based variant (epoll/kqueue via `mio`); a
//! completion-queue-based variant would implement the same contract.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

/// Backend selection for [`ReactorBuilder`](super::ReactorBuilder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Readiness-based polling (epoll on Linux, kqueue on BSD/macOS).
    #[default]
    Readiness,
}

/// The readiness contract a reactor drives its sockets through.
pub(crate) trait IoBackend: Send {
    fn register(&self, source: &mut dyn Source, token: Token, interest: Interest)
        -> io::Result<()>;
    fn reregister(
        &self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>;
    fn deregister(&self, source: &mut dyn Source) -> io::Result<()>;
    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()>;
    fn new_waker(&self, token: Token) -> io::Result<Waker>;
}

/// Readiness-based backend over `mio::Poll`.
pub(crate) struct ReadinessBackend {
    poll: Poll,
}

impl ReadinessBackend {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self { poll: Poll::new()? })
    }
}

impl IoBackend for ReadinessBackend {
    fn register(
        &self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    fn reregister(
        &self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    fn deregister(&self, source: &mut dyn Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(events, timeout)
    }

    fn new_waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), token)
    }
}
