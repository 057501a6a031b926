//! Reactor-bound sockets.

pub mod reader;
pub mod server;
pub mod socket;

pub use reader::{AsyncReader, DevNullReader};
pub use server::{AcceptHandler, AsyncServerSocket, AsyncServerSocketBuilder};
pub use socket::{AsyncSocket, AsyncSocketBuilder, ConnectFuture};
