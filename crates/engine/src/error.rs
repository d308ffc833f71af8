//! Engine error types
//!
//! Every failure is local to one request. The dispatcher turns errors into
//! the negative errno-style status the emulated driver returns.

use nix::errno::Errno;
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Parallel port error: {0}")]
    Parport(#[from] Errno),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Client memory fault at {addr:#x} ({len} bytes)")]
    Memory { addr: u64, len: usize },

    #[error("No USB device matched")]
    NoDevice,

    #[error("No interface {interface} alternate setting {alternate} in the first configuration")]
    InvalidSelection { interface: u64, alternate: u64 },

    #[error("Device data buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Negative errno reported to the client
    pub fn status(&self) -> i32 {
        let errno = match self {
            EngineError::Usb(e) => usb_errno(e),
            EngineError::Parport(e) => *e,
            EngineError::Io(e) => e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO),
            EngineError::Protocol(_) => Errno::EINVAL,
            EngineError::Memory { .. } => Errno::EFAULT,
            EngineError::NoDevice => Errno::ENODEV,
            EngineError::InvalidSelection { .. } => Errno::EINVAL,
            EngineError::BufferTooSmall { .. } => Errno::EINVAL,
            EngineError::PayloadTooLarge { .. } => Errno::E2BIG,
        };
        -(errno as i32)
    }
}

/// Errno equivalent of a libusb error
fn usb_errno(err: &rusb::Error) -> Errno {
    match err {
        rusb::Error::Timeout => Errno::ETIMEDOUT,
        rusb::Error::Pipe => Errno::EPIPE,
        rusb::Error::NoDevice => Errno::ENODEV,
        rusb::Error::NotFound => Errno::ENOENT,
        rusb::Error::Busy => Errno::EBUSY,
        rusb::Error::Overflow => Errno::EOVERFLOW,
        rusb::Error::InvalidParam => Errno::EINVAL,
        rusb::Error::Access => Errno::EACCES,
        rusb::Error::Interrupted => Errno::EINTR,
        rusb::Error::NoMem => Errno::ENOMEM,
        rusb::Error::NotSupported => Errno::ENOSYS,
        _ => Errno::EIO,
    }
}
