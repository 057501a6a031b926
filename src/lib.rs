//! # corewire
//!
//! A thread-per-core, non-blocking networking engine: each [`Reactor`]
//! owns a disjoint set of sockets and drives them through a
//! single-threaded event loop, avoiding cross-thread synchronization on
//! the hot path.
//!
//! ## Architecture
//!
//! ```text
//! wire bytes ─► AsyncSocket recv buffer ─► Reactor read readiness
//!                                              │
//!                                   FrameReader reconstruction
//!                                   (pooled buffers, partial reads)
//!                                         ┌────┴────┐
//!                                  request frames   response chain
//!                                         │              │
//!                                 RequestScheduler  ResponseHandler
//!
//! outbound: write() queues frames ─► flush() schedules the socket
//!           ─► Reactor write readiness drains them in call order
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use corewire::{FrameAllocator, FrameReader, Frame, PoolRole, Reactor};
//!
//! let reactor = Reactor::builder().name("core-0").build()?;
//! reactor.start()?;
//!
//! let requests = FrameAllocator::new(PoolRole::Request);
//! let responses = FrameAllocator::new(PoolRole::RemoteResponse);
//!
//! let socket = reactor
//!     .socket_builder()?
//!     .reader(FrameReader::new(
//!         requests,
//!         responses,
//!         |frame: Frame| { /* schedule the request */ },
//!         |chain: Frame| { /* correlate responses */ },
//!     ))
//!     .build()?;
//! socket.start()?;
//! socket.connect("127.0.0.1:11000".parse()?).wait()?;
//! socket.write_and_flush(Frame::request(b"payload"));
//! ```

pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod net;
pub mod options;
pub mod protocol;
pub mod reactor;

pub use dispatch::{FrameReader, RequestScheduler, ResponseHandler};
pub use error::{CorewireError, Result};
pub use metrics::SocketMetrics;
pub use net::{
    AcceptHandler, AsyncReader, AsyncServerSocket, AsyncServerSocketBuilder, AsyncSocket,
    AsyncSocketBuilder, ConnectFuture, DevNullReader,
};
pub use options::{
    SocketOption, SocketOptions, SO_KEEPALIVE, SO_RCVBUF, SO_REUSEADDR, SO_SNDBUF, TCP_KEEPCOUNT,
    TCP_KEEPIDLE, TCP_KEEPINTERVAL, TCP_NODELAY,
};
pub use protocol::{
    Frame, FrameAllocator, FrameHeader, PoolRole, DEFAULT_MAX_FRAME_SIZE, FLAG_OP_RESPONSE,
    HEADER_SIZE,
};
pub use reactor::{BackendKind, Reactor, ReactorBuilder};
