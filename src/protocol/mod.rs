//! Length-prefixed binary framing protocol.
//!
//! - [`wire_format`]: header layout, flags, bounded buffer copy
//! - [`Frame`]: the atomic transfer unit with partial-read state
//! - [`FrameAllocator`]: role-partitioned pooled buffers

pub mod allocator;
pub mod frame;
pub mod wire_format;

pub use allocator::{FrameAllocator, PoolRole};
pub use frame::Frame;
pub use wire_format::{FrameHeader, DEFAULT_MAX_FRAME_SIZE, FLAG_OP_RESPONSE, HEADER_SIZE};
