//! Wire format encoding and decoding.
//!
//! Implements the 8-byte frame header:
//! ```text
//! ┌───────────┬───────────┬──────────────┐
//! │ Size      │ Flags     │ Body         │
//! │ 4 bytes   │ 4 bytes   │ size-8 bytes │
//! │ int32 BE  │ int32 BE  │              │
//! └───────────┴───────────┴──────────────┘
//! ```
//!
//! `size` is the total frame length, header included, so the minimum
//! valid frame is exactly [`HEADER_SIZE`] bytes (empty body). All
//! multi-byte integers are Big Endian.

use std::io::Cursor;

use bytes::BytesMut;

use crate::error::{CorewireError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum frame size (1 GB). Larger sizes in a header are
/// treated as a framing error.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_073_741_824;

/// Flag constants for the protocol.
pub mod flags {
    /// Set on response frames; clear on request frames (bit 0).
    pub const FLAG_OP_RESPONSE: u32 = 1;

    /// Check if a specific flag is set.
    #[inline]
    pub fn is_raised(flags: u32, flag: u32) -> bool {
        flags & flag != 0
    }
}

pub use flags::FLAG_OP_RESPONSE;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length in bytes, header included.
    pub size: usize,
    /// Flags bitmask (see [`flags`]).
    pub flags: u32,
}

impl FrameHeader {
    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are available.
    /// A negative or undersized `size` field is a framing error.
    pub fn decode(buf: &[u8]) -> Option<Result<Self>> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let size = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let flags = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if size < HEADER_SIZE as i32 {
            return Some(Err(CorewireError::Protocol(format!(
                "Frame size {} is smaller than the header length {}",
                size, HEADER_SIZE
            ))));
        }
        Some(Ok(Self {
            size: size as usize,
            flags,
        }))
    }

    /// Encode the header into the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&(self.size as i32).to_be_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_be_bytes());
    }

    /// Check if the response flag is raised.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::is_raised(self.flags, FLAG_OP_RESPONSE)
    }
}

/// Copy bytes from `src` into `dst`, bounded by both sides.
///
/// Transfers `min(src remaining, room)` bytes, advances the source
/// position by exactly that amount and appends to `dst`. The source's
/// upper bound is never touched: copying never consumes more of the
/// source than the destination can currently hold.
///
/// Returns the number of bytes transferred.
pub fn copy_bounded(src: &mut Cursor<&[u8]>, dst: &mut BytesMut, room: usize) -> usize {
    let pos = src.position() as usize;
    let available = src.get_ref().len().saturating_sub(pos);
    let n = available.min(room);
    dst.extend_from_slice(&src.get_ref()[pos..pos + n]);
    src.set_position((pos + n) as u64);
    n
}
