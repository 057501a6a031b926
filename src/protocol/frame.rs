//! Frame: the protocol's atomic transfer unit.
//!
//! A frame is either *building* (header parsed, body still arriving
//! across read events) or *complete* (all `size` bytes present, ready
//! for dispatch). The backing buffer is header-inclusive: the 8 header
//! bytes are written into it when the frame is allocated, so position
//! accounting matches the wire layout exactly.
//!
//! Pooled frames return their buffer to the originating
//! [`FrameAllocator`](super::FrameAllocator) slot on drop, which makes
//! use-after-release and double-release unrepresentable.

use std::fmt;
use std::io::Cursor;
use std::mem;

use bytes::{BufMut, Bytes, BytesMut};

use super::allocator::PoolTicket;
use super::wire_format::{copy_bounded, flags, FrameHeader, FLAG_OP_RESPONSE, HEADER_SIZE};
use crate::net::AsyncSocket;

/// A protocol frame: 8-byte header plus opaque body.
pub struct Frame {
    buf: BytesMut,
    size: usize,
    flags: u32,
    complete: bool,
    ticket: Option<PoolTicket>,
    socket: Option<AsyncSocket>,
    next: Option<Box<Frame>>,
}

impl Frame {
    /// Start a frame in building state with the header already written.
    pub(crate) fn building(
        size: usize,
        flags: u32,
        mut buf: BytesMut,
        ticket: Option<PoolTicket>,
    ) -> Self {
        buf.clear();
        buf.reserve(size);
        buf.put_i32(size as i32);
        buf.put_u32(flags);
        Self {
            buf,
            size,
            flags,
            complete: size == HEADER_SIZE,
            ticket,
            socket: None,
            next: None,
        }
    }

    /// Build a complete, unpooled request frame from a body.
    pub fn request(body: &[u8]) -> Self {
        Self::with_flags(0, body)
    }

    /// Build a complete, unpooled response frame from a body.
    pub fn response(body: &[u8]) -> Self {
        Self::with_flags(FLAG_OP_RESPONSE, body)
    }

    /// Build a complete, unpooled frame with the given flags and body.
    pub fn with_flags(flags: u32, body: &[u8]) -> Self {
        let size = HEADER_SIZE + body.len();
        let mut frame = Self::building(size, flags, BytesMut::with_capacity(size), None);
        frame.buf.extend_from_slice(body);
        frame.complete = true;
        frame
    }

    /// Total frame length in bytes, header included.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Flags bitmask.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Check if a specific flag is set.
    #[inline]
    pub fn is_flag_raised(&self, flag: u32) -> bool {
        flags::is_raised(self.flags, flag)
    }

    /// Check if this is a response frame.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.is_flag_raised(FLAG_OP_RESPONSE)
    }

    /// Number of bytes accumulated so far, header included.
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// True once all `size` bytes have been accumulated.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The body bytes (empty while the header is all that arrived).
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.buf[HEADER_SIZE.min(self.buf.len())..]
    }

    /// The full wire representation, header included.
    #[inline]
    pub fn wire_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The decoded header.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            size: self.size,
            flags: self.flags,
        }
    }

    /// The socket this frame arrived on, if any.
    pub fn socket(&self) -> Option<&AsyncSocket> {
        self.socket.as_ref()
    }

    pub(crate) fn bind_socket(&mut self, socket: AsyncSocket) {
        self.socket = Some(socket);
    }

    /// Append body bytes from `recv`, bounded by what the frame still
    /// needs. Consumes exactly the transferred bytes from `recv` and
    /// flips the frame to complete when the last byte lands.
    ///
    /// Returns the number of bytes transferred.
    pub(crate) fn fill_from(&mut self, recv: &mut BytesMut) -> usize {
        let needed = self.size - self.buf.len();
        let mut src = Cursor::new(&recv[..]);
        let n = copy_bounded(&mut src, &mut self.buf, needed);
        let _ = recv.split_to(n);
        if self.buf.len() == self.size {
            self.complete = true;
        }
        n
    }

    /// Link `next` behind this frame, returning any previous link.
    pub(crate) fn set_next(&mut self, next: Option<Frame>) {
        self.next = next.map(Box::new);
    }

    /// Detach and return the next frame in the response chain.
    pub fn take_next(&mut self) -> Option<Frame> {
        self.next.take().map(|b| *b)
    }

    /// Number of frames in this chain, this frame included.
    pub fn chain_len(&self) -> usize {
        let mut n = 1;
        let mut cur = self.next.as_deref();
        while let Some(f) = cur {
            n += 1;
            cur = f.next.as_deref();
        }
        n
    }

    /// Copy the body out as owned bytes.
    pub fn body_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.body())
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            ticket.release(mem::take(&mut self.buf));
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("position", &self.position())
            .field("complete", &self.complete)
            .field("pooled", &self.ticket.is_some())
            .field("chained", &self.next.is_some())
            .finish()
    }
}
