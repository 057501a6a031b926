//! Inbound byte consumption.
//!
//! Every socket carries an [`AsyncReader`] that the reactor invokes
//! whenever received bytes are available. The production reader is
//! [`FrameReader`](crate::dispatch::FrameReader); [`DevNullReader`]
//! discards everything and is useful for lifecycle and option tests.

use bytes::BytesMut;

use super::socket::AsyncSocket;
use crate::error::Result;

/// Consumes bytes arriving on a socket.
///
/// Invoked on the reactor thread with all currently available bytes.
/// Bytes left in `recv` are retained and offered again, together with
/// newly arrived data, on the next read event.
///
/// Returning an error aborts the connection: the socket is closed and
/// no recovery is attempted.
pub trait AsyncReader: Send {
    fn on_read(&mut self, recv: &mut BytesMut, socket: &AsyncSocket) -> Result<()>;
}

/// A reader that discards everything it is given.
#[derive(Debug, Default)]
pub struct DevNullReader;

impl DevNullReader {
    pub fn new() -> Self {
        Self
    }
}

impl AsyncReader for DevNullReader {
    fn on_read(&mut self, recv: &mut BytesMut, _socket: &AsyncSocket) -> Result<()> {
        recv.clear();
        Ok(())
    }
}
