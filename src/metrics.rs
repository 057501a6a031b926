//! Per-socket I/O counters.
//!
//! Six monotonic counters per socket: bytes and frames in each direction,
//! plus the number of read and write readiness events handled. Increments
//! happen on the reactor thread with relaxed ordering; readers on any
//! thread observe with acquire ordering. No cross-socket aggregation is
//! done at this layer.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic I/O counters for a single socket.
#[derive(Debug, Default)]
pub struct SocketMetrics {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    frames_read: AtomicU64,
    frames_written: AtomicU64,
    read_events: AtomicU64,
    write_events: AtomicU64,
}

impl SocketMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_frames_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_frames_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_read_events(&self) {
        self.read_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_write_events(&self) {
        self.write_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of bytes read from the wire.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire)
    }

    /// Number of bytes written to the wire.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    /// Number of complete frames read.
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Acquire)
    }

    /// Number of frames fully written.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Acquire)
    }

    /// Number of read readiness events handled.
    pub fn read_events(&self) -> u64 {
        self.read_events.load(Ordering::Acquire)
    }

    /// Number of write readiness events handled.
    pub fn write_events(&self) -> u64 {
        self.write_events.load(Ordering::Acquire)
    }
}
