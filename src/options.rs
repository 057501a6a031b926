//! Typed, capability-gated socket options.
//!
//! A [`SocketOption`] is a typed, named configuration key; the
//! recognized keys are process-wide constants ([`SO_RCVBUF`],
//! [`TCP_NODELAY`], ...). Each socket owns one [`SocketOptions`]
//! instance which maps keys to typed read/write handlers over the
//! underlying platform socket.
//!
//! Unknown names and options the platform does not support are encoded
//! in return values (`Ok(false)` / `Ok(None)`), never as errors:
//! callers check, they don't catch. `get` always reads the live value
//! from the socket, so platform rounding (e.g. Linux doubling buffer
//! sizes) shows through.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use socket2::{Socket, TcpKeepalive};

use crate::error::{CorewireError, Result};

/// A typed, named socket configuration key.
///
/// Identity is the (name, value type) pair: two options are equal only
/// when both match.
pub struct SocketOption<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> SocketOption<T> {
    /// Define an option key. Recognized keys are the constants in this
    /// module; unrecognized keys are valid to construct and simply
    /// unsupported everywhere.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// The option name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> PartialEq for SocketOption<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for SocketOption<T> {}

impl<T> fmt::Debug for SocketOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketOption({})", self.name)
    }
}

/// Receive buffer size in bytes. Reads return the live kernel value,
/// which Linux reports doubled.
pub const SO_RCVBUF: SocketOption<usize> = SocketOption::new("SO_RCVBUF");
/// Send buffer size in bytes. Same platform rounding as [`SO_RCVBUF`].
pub const SO_SNDBUF: SocketOption<usize> = SocketOption::new("SO_SNDBUF");
/// Allow reuse of local addresses in TIME_WAIT.
pub const SO_REUSEADDR: SocketOption<bool> = SocketOption::new("SO_REUSEADDR");
/// Enable TCP keepalive probes.
pub const SO_KEEPALIVE: SocketOption<bool> = SocketOption::new("SO_KEEPALIVE");
/// Disable Nagle's algorithm.
pub const TCP_NODELAY: SocketOption<bool> = SocketOption::new("TCP_NODELAY");
/// Number of keepalive probes before the connection is dropped.
/// Platform-conditional.
pub const TCP_KEEPCOUNT: SocketOption<u32> = SocketOption::new("TCP_KEEPCOUNT");
/// Idle seconds before the first keepalive probe. Platform-conditional.
pub const TCP_KEEPIDLE: SocketOption<u32> = SocketOption::new("TCP_KEEPIDLE");
/// Seconds between keepalive probes. Platform-conditional.
pub const TCP_KEEPINTERVAL: SocketOption<u32> = SocketOption::new("TCP_KEEPINTERVAL");

/// Type tag carried by every value type an option can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptTag {
    Bool,
    Size,
    U32,
}

#[derive(Debug, Clone, Copy)]
enum OptValueKind {
    Bool(bool),
    Size(usize),
    U32(u32),
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for usize {}
    impl Sealed for u32 {}
}

/// Value types an option can hold. Sealed: the registry knows exactly
/// the tags it dispatches on.
pub trait OptValue: sealed::Sealed + Sized {
    #[doc(hidden)]
    fn tag() -> OptTagPub;
    #[doc(hidden)]
    fn into_kind(self) -> OptValueKindPub;
    #[doc(hidden)]
    fn from_kind(kind: OptValueKindPub) -> Option<Self>;
}

// The tag/kind enums stay private; these opaque wrappers keep the trait
// implementable only from inside the crate.
#[doc(hidden)]
pub struct OptTagPub(OptTag);
#[doc(hidden)]
pub struct OptValueKindPub(OptValueKind);

impl OptValue for bool {
    fn tag() -> OptTagPub {
        OptTagPub(OptTag::Bool)
    }
    fn into_kind(self) -> OptValueKindPub {
        OptValueKindPub(OptValueKind::Bool(self))
    }
    fn from_kind(kind: OptValueKindPub) -> Option<Self> {
        match kind.0 {
            OptValueKind::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl OptValue for usize {
    fn tag() -> OptTagPub {
        OptTagPub(OptTag::Size)
    }
    fn into_kind(self) -> OptValueKindPub {
        OptValueKindPub(OptValueKind::Size(self))
    }
    fn from_kind(kind: OptValueKindPub) -> Option<Self> {
        match kind.0 {
            OptValueKind::Size(v) => Some(v),
            _ => None,
        }
    }
}

impl OptValue for u32 {
    fn tag() -> OptTagPub {
        OptTagPub(OptTag::U32)
    }
    fn into_kind(self) -> OptValueKindPub {
        OptValueKindPub(OptValueKind::U32(self))
    }
    fn from_kind(kind: OptValueKindPub) -> Option<Self> {
        match kind.0 {
            OptValueKind::U32(v) => Some(v),
            _ => None,
        }
    }
}

/// Typed read/write handlers bound to the platform socket, one variant
/// per recognized (name, type) pair.
enum Handler {
    Bool {
        get: fn(&Socket) -> std::io::Result<bool>,
        set: fn(&Socket, bool) -> std::io::Result<()>,
    },
    Size {
        get: fn(&Socket) -> std::io::Result<usize>,
        set: fn(&Socket, usize) -> std::io::Result<()>,
    },
    U32 {
        get: fn(&Socket) -> std::io::Result<u32>,
        set: fn(&Socket, u32) -> std::io::Result<()>,
    },
}

impl Handler {
    fn tag(&self) -> OptTag {
        match self {
            Handler::Bool { .. } => OptTag::Bool,
            Handler::Size { .. } => OptTag::Size,
            Handler::U32 { .. } => OptTag::U32,
        }
    }
}

fn keepalive_count_supported() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos"))
}

fn keepalive_timing_supported() -> bool {
    cfg!(unix)
}

fn lookup(name: &str) -> Option<Handler> {
    match name {
        "SO_RCVBUF" => Some(Handler::Size {
            get: Socket::recv_buffer_size,
            set: |s, v| s.set_recv_buffer_size(v),
        }),
        "SO_SNDBUF" => Some(Handler::Size {
            get: Socket::send_buffer_size,
            set: |s, v| s.set_send_buffer_size(v),
        }),
        "SO_REUSEADDR" => Some(Handler::Bool {
            get: Socket::reuse_address,
            set: |s, v| s.set_reuse_address(v),
        }),
        "SO_KEEPALIVE" => Some(Handler::Bool {
            get: Socket::keepalive,
            set: |s, v| s.set_keepalive(v),
        }),
        "TCP_NODELAY" => Some(Handler::Bool {
            get: Socket::nodelay,
            set: |s, v| s.set_nodelay(v),
        }),
        "TCP_KEEPCOUNT" if keepalive_count_supported() => Some(Handler::U32 {
            get: get_keepalive_count,
            set: |s, v| s.set_tcp_keepalive(&TcpKeepalive::new().with_retries(v)),
        }),
        "TCP_KEEPIDLE" if keepalive_timing_supported() => Some(Handler::U32 {
            get: |s| s.keepalive_time().map(|d| d.as_secs() as u32),
            set: |s, v| {
                s.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(v as u64)))
            },
        }),
        "TCP_KEEPINTERVAL" if keepalive_timing_supported() => Some(Handler::U32 {
            get: get_keepalive_interval,
            set: set_keepalive_interval,
        }),
        _ => None,
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn get_keepalive_count(s: &Socket) -> std::io::Result<u32> {
    s.keepalive_retries()
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn get_keepalive_count(_s: &Socket) -> std::io::Result<u32> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

#[cfg(unix)]
fn get_keepalive_interval(s: &Socket) -> std::io::Result<u32> {
    s.keepalive_interval().map(|d| d.as_secs() as u32)
}

#[cfg(unix)]
fn set_keepalive_interval(s: &Socket, v: u32) -> std::io::Result<()> {
    s.set_tcp_keepalive(&TcpKeepalive::new().with_interval(Duration::from_secs(v as u64)))
}

#[cfg(not(unix))]
fn get_keepalive_interval(_s: &Socket) -> std::io::Result<u32> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

#[cfg(not(unix))]
fn set_keepalive_interval(_s: &Socket, _v: u32) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// The per-socket option store.
///
/// Holds its own handle to the underlying socket (a dup of the
/// connection's fd), so reads and writes go to the kernel directly and
/// are safe from any thread. No two sockets share an instance.
pub struct SocketOptions {
    socket: Socket,
}

impl SocketOptions {
    pub(crate) fn new(socket: Socket) -> Self {
        Self { socket }
    }

    /// Check whether an option is recognized and supported on this
    /// platform.
    pub fn is_supported<T: OptValue>(&self, option: &SocketOption<T>) -> bool {
        matches!(lookup(option.name), Some(h) if h.tag() == T::tag().0)
    }

    /// Apply an option value to the underlying socket.
    ///
    /// Returns `Ok(false)` without mutating anything when the option is
    /// unknown or unsupported on this platform. Invalid values fail
    /// with `InvalidArgument` before the socket is touched.
    pub fn set<T: OptValue>(&self, option: &SocketOption<T>, value: T) -> Result<bool> {
        let handler = match lookup(option.name) {
            Some(h) if h.tag() == T::tag().0 => h,
            _ => return Ok(false),
        };
        match (handler, value.into_kind().0) {
            (Handler::Bool { set, .. }, OptValueKind::Bool(v)) => set(&self.socket, v)?,
            (Handler::Size { set, .. }, OptValueKind::Size(v)) => {
                if v == 0 {
                    return Err(CorewireError::InvalidArgument(format!(
                        "{} must be positive",
                        option.name
                    )));
                }
                set(&self.socket, v)?;
            }
            (Handler::U32 { set, .. }, OptValueKind::U32(v)) => set(&self.socket, v)?,
            // tag equality above guarantees the pairs line up
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Read the live value of an option from the underlying socket.
    ///
    /// Returns `Ok(None)` when the option is unknown or unsupported.
    pub fn get<T: OptValue>(&self, option: &SocketOption<T>) -> Result<Option<T>> {
        let handler = match lookup(option.name) {
            Some(h) if h.tag() == T::tag().0 => h,
            _ => return Ok(None),
        };
        let kind = match handler {
            Handler::Bool { get, .. } => OptValueKind::Bool(get(&self.socket)?),
            Handler::Size { get, .. } => OptValueKind::Size(get(&self.socket)?),
            Handler::U32 { get, .. } => OptValueKind::U32(get(&self.socket)?),
        };
        Ok(T::from_kind(OptValueKindPub(kind)))
    }
}

impl fmt::Debug for SocketOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOptions").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Type};

    fn new_options() -> SocketOptions {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        SocketOptions::new(socket)
    }

    #[test]
    fn test_option_identity() {
        assert_eq!(SO_RCVBUF, SocketOption::<usize>::new("SO_RCVBUF"));
        assert_ne!(SO_RCVBUF, SocketOption::<usize>::new("SO_SNDBUF"));
        assert_eq!(SO_RCVBUF.name(), "SO_RCVBUF");
    }

    #[test]
    fn test_set_supported_option() {
        let options = new_options();
        assert!(options.set(&SO_KEEPALIVE, true).unwrap());
        assert_eq!(options.get(&SO_KEEPALIVE).unwrap(), Some(true));
        assert!(options.set(&SO_KEEPALIVE, false).unwrap());
        assert_eq!(options.get(&SO_KEEPALIVE).unwrap(), Some(false));
    }

    #[test]
    fn test_unknown_option_is_absent_not_error() {
        let options = new_options();
        let banana: SocketOption<bool> = SocketOption::new("banana");

        assert!(!options.is_supported(&banana));
        assert!(!options.set(&banana, true).unwrap());
        assert_eq!(options.get(&banana).unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_is_unsupported() {
        let options = new_options();
        // Known name, wrong value type: rejected at the call site, no
        // coercion attempted.
        let mistyped: SocketOption<bool> = SocketOption::new("SO_RCVBUF");

        assert!(!options.is_supported(&mistyped));
        assert!(!options.set(&mistyped, true).unwrap());
        assert_eq!(options.get(&mistyped).unwrap(), None);
    }

    #[test]
    fn test_rcvbuf_roundtrip_allows_platform_doubling() {
        let options = new_options();
        let requested = 64 * 1024;
        assert!(options.set(&SO_RCVBUF, requested).unwrap());

        let actual = options.get(&SO_RCVBUF).unwrap().unwrap();
        assert!(
            actual == requested || actual == 2 * requested,
            "actual size was {}",
            actual
        );
    }

    #[test]
    fn test_sndbuf_roundtrip_allows_platform_doubling() {
        let options = new_options();
        let requested = 64 * 1024;
        assert!(options.set(&SO_SNDBUF, requested).unwrap());

        let actual = options.get(&SO_SNDBUF).unwrap().unwrap();
        assert!(
            actual == requested || actual == 2 * requested,
            "actual size was {}",
            actual
        );
    }

    #[test]
    fn test_zero_buffer_size_is_invalid_argument() {
        let options = new_options();
        let result = options.set(&SO_RCVBUF, 0);
        assert!(matches!(result, Err(CorewireError::InvalidArgument(_))));
    }

    #[test]
    fn test_reuseaddr_roundtrip() {
        let options = new_options();
        assert!(options.set(&SO_REUSEADDR, true).unwrap());
        assert_eq!(options.get(&SO_REUSEADDR).unwrap(), Some(true));
        assert!(options.set(&SO_REUSEADDR, false).unwrap());
        assert_eq!(options.get(&SO_REUSEADDR).unwrap(), Some(false));
    }

    #[test]
    fn test_nodelay_roundtrip() {
        let options = new_options();
        assert!(options.set(&TCP_NODELAY, true).unwrap());
        assert_eq!(options.get(&TCP_NODELAY).unwrap(), Some(true));
        assert!(options.set(&TCP_NODELAY, false).unwrap());
        assert_eq!(options.get(&TCP_NODELAY).unwrap(), Some(false));
    }

    #[test]
    fn test_keepidle_follows_platform_support() {
        let options = new_options();
        if options.is_supported(&TCP_KEEPIDLE) {
            assert!(options.set(&TCP_KEEPIDLE, 100).unwrap());
            assert_eq!(options.get(&TCP_KEEPIDLE).unwrap(), Some(100));
        } else {
            assert!(!options.set(&TCP_KEEPIDLE, 100).unwrap());
            assert_eq!(options.get(&TCP_KEEPIDLE).unwrap(), None);
        }
    }

    #[test]
    fn test_keepinterval_follows_platform_support() {
        let options = new_options();
        if options.is_supported(&TCP_KEEPINTERVAL) {
            assert!(options.set(&TCP_KEEPINTERVAL, 100).unwrap());
            assert_eq!(options.get(&TCP_KEEPINTERVAL).unwrap(), Some(100));
        } else {
            assert!(!options.set(&TCP_KEEPINTERVAL, 100).unwrap());
            assert_eq!(options.get(&TCP_KEEPINTERVAL).unwrap(), None);
        }
    }

    #[test]
    fn test_keepcount_follows_platform_support() {
        let options = new_options();
        if options.is_supported(&TCP_KEEPCOUNT) {
            assert!(options.set(&TCP_KEEPCOUNT, 5).unwrap());
            assert_eq!(options.get(&TCP_KEEPCOUNT).unwrap(), Some(5));
        } else {
            assert!(!options.set(&TCP_KEEPCOUNT, 5).unwrap());
            assert_eq!(options.get(&TCP_KEEPCOUNT).unwrap(), None);
        }
    }
}
