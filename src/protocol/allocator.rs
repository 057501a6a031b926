//! Pooled buffer allocation for frames.
//!
//! A [`FrameAllocator`] is an index arena of reusable `BytesMut`
//! buffers. Each pool serves exactly one role — inbound requests or
//! inbound remote responses — so buffer reuse never mixes logically
//! distinct flows. Buffers are identified by slot index, and the
//! checked-out state of every slot is tracked explicitly so tests can
//! assert that allocations balance.
//!
//! Release happens through [`Frame`](super::Frame) ownership: dropping
//! a pooled frame returns its buffer to the originating slot. A pool is
//! shared by all connections with the same role on a reactor; the
//! interior mutex also makes release safe from consumer threads.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use super::frame::Frame;
use super::wire_format::HEADER_SIZE;
use crate::error::{CorewireError, Result};

/// The flow a pool serves. Buffers never migrate between roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    /// Inbound request frames.
    Request,
    /// Inbound responses from remote peers.
    RemoteResponse,
}

enum Slot {
    Idle(BytesMut),
    CheckedOut,
}

struct PoolState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    outstanding: usize,
}

pub(crate) struct PoolInner {
    role: PoolRole,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn release(&self, index: usize, buf: BytesMut) {
        let mut state = self.state.lock();
        match state.slots.get_mut(index) {
            Some(slot @ Slot::CheckedOut) => {
                *slot = Slot::Idle(buf);
                state.outstanding -= 1;
                state.free.push(index);
            }
            Some(Slot::Idle(_)) => {
                debug_assert!(false, "buffer released twice to slot {}", index);
                tracing::error!(index, role = ?self.role, "buffer released twice");
            }
            None => {
                debug_assert!(false, "release for unknown slot {}", index);
                tracing::error!(index, role = ?self.role, "release for unknown slot");
            }
        }
    }
}

/// Handle a pooled frame uses to return its buffer on drop.
pub(crate) struct PoolTicket {
    pool: Arc<PoolInner>,
    index: usize,
}

impl PoolTicket {
    pub(crate) fn release(self, buf: BytesMut) {
        self.pool.release(self.index, buf);
    }
}

/// A pool producing and recycling frame-backed buffers for one role.
#[derive(Clone)]
pub struct FrameAllocator {
    inner: Arc<PoolInner>,
}

impl FrameAllocator {
    /// Create a pool for the given role.
    pub fn new(role: PoolRole) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                role,
                state: Mutex::new(PoolState {
                    slots: Vec::new(),
                    free: Vec::new(),
                    outstanding: 0,
                }),
            }),
        }
    }

    /// The role this pool serves.
    pub fn role(&self) -> PoolRole {
        self.inner.role
    }

    /// Check out a buffer and start a frame of exactly `size` total
    /// bytes in building state, header written.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `size` is smaller than the header length.
    pub fn allocate(&self, size: usize, flags: u32) -> Result<Frame> {
        if size < HEADER_SIZE {
            return Err(CorewireError::InvalidArgument(format!(
                "Frame size {} is smaller than the header length {}",
                size, HEADER_SIZE
            )));
        }

        let (buf, index) = {
            let mut state = self.inner.state.lock();
            let index = match state.free.pop() {
                Some(index) => index,
                None => {
                    state.slots.push(Slot::Idle(BytesMut::new()));
                    state.slots.len() - 1
                }
            };
            let buf = match std::mem::replace(&mut state.slots[index], Slot::CheckedOut) {
                Slot::Idle(buf) => buf,
                Slot::CheckedOut => {
                    // free list and slot state always agree
                    unreachable!("free slot {} was checked out", index)
                }
            };
            state.outstanding += 1;
            (buf, index)
        };

        let ticket = PoolTicket {
            pool: self.inner.clone(),
            index,
        };
        Ok(Frame::building(size, flags, buf, Some(ticket)))
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    /// Number of idle buffers retained for reuse.
    pub fn pooled(&self) -> usize {
        self.inner.state.lock().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::FLAG_OP_RESPONSE;

    #[test]
    fn test_allocate_starts_building_frame() {
        let pool = FrameAllocator::new(PoolRole::Request);
        let frame = pool.allocate(HEADER_SIZE + 4, 0).unwrap();

        assert!(!frame.is_complete());
        assert_eq!(frame.size(), HEADER_SIZE + 4);
        assert_eq!(frame.position(), HEADER_SIZE);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_allocate_rejects_undersized() {
        let pool = FrameAllocator::new(PoolRole::Request);
        let result = pool.allocate(HEADER_SIZE - 1, 0);
        assert!(matches!(result, Err(CorewireError::InvalidArgument(_))));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_drop_returns_buffer_to_pool() {
        let pool = FrameAllocator::new(PoolRole::RemoteResponse);

        let frame = pool.allocate(HEADER_SIZE, FLAG_OP_RESPONSE).unwrap();
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.pooled(), 0);

        drop(frame);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_buffers_are_reused() {
        let pool = FrameAllocator::new(PoolRole::Request);

        drop(pool.allocate(HEADER_SIZE + 16, 0).unwrap());
        assert_eq!(pool.pooled(), 1);

        // Second allocation reuses the idle slot instead of growing.
        drop(pool.allocate(HEADER_SIZE + 32, 0).unwrap());
        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_allocations_balance_across_many_frames() {
        let pool = FrameAllocator::new(PoolRole::Request);

        let frames: Vec<_> = (0..10)
            .map(|i| pool.allocate(HEADER_SIZE + i, 0).unwrap())
            .collect();
        assert_eq!(pool.outstanding(), 10);

        drop(frames);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 10);
    }

    #[test]
    fn test_roles_are_distinct_pools() {
        let requests = FrameAllocator::new(PoolRole::Request);
        let responses = FrameAllocator::new(PoolRole::RemoteResponse);

        let _frame = requests.allocate(HEADER_SIZE, 0).unwrap();
        assert_eq!(requests.outstanding(), 1);
        assert_eq!(responses.outstanding(), 0);
    }

    #[test]
    fn test_dropping_chain_releases_every_buffer() {
        let pool = FrameAllocator::new(PoolRole::RemoteResponse);

        let mut head = pool.allocate(HEADER_SIZE, FLAG_OP_RESPONSE).unwrap();
        let mut mid = pool.allocate(HEADER_SIZE, FLAG_OP_RESPONSE).unwrap();
        let tail = pool.allocate(HEADER_SIZE, FLAG_OP_RESPONSE).unwrap();
        mid.set_next(Some(tail));
        head.set_next(Some(mid));
        assert_eq!(pool.outstanding(), 3);

        drop(head);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.pooled(), 3);
    }
}
