//! Parallel port backend
//!
//! The emulated card's I/O range is served by the kernel parallel-port
//! driver: each registration opens `/dev/parportN` exclusively, claims it
//! and negotiates compatibility mode, and every register access becomes one
//! driver call. [`ParallelPort`] is that driver surface; [`emulator`] maps
//! I/O addresses onto it.

pub mod emulator;
pub mod ppdev;

pub use emulator::{PortBases, PortEmulator, Register};
pub use ppdev::{PpdevOpener, PpdevPort};

use crate::error::Result;
use std::path::{Path, PathBuf};

/// IEEE 1284 compatibility mode
pub const IEEE1284_MODE_COMPAT: i32 = 1 << 8;

/// Default prefix of parallel-port device nodes
pub const DEFAULT_PATH_PREFIX: &str = "/dev/parport";

/// Register-level access to one claimed parallel port
pub trait ParallelPort: Send {
    /// Handle reported to the client as the card handle
    fn handle(&self) -> u64;
    fn claim(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
    fn negotiate(&mut self, mode: i32) -> Result<()>;
    fn write_data(&mut self, value: u8) -> Result<()>;
    fn read_status(&mut self) -> Result<u8>;
    fn read_control(&mut self) -> Result<u8>;
    fn write_control(&mut self, value: u8) -> Result<()>;
}

/// Opens parallel-port device nodes
pub trait PortOpener: Send {
    fn open(&self, path: &Path) -> Result<Box<dyn ParallelPort>>;
}

/// Device node serving the I/O range at `base`: one port per 0x10 of address space
pub fn parport_path(prefix: &str, base: u64) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix, base / 0x10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parport_path() {
        assert_eq!(parport_path(DEFAULT_PATH_PREFIX, 0), PathBuf::from("/dev/parport0"));
        assert_eq!(parport_path(DEFAULT_PATH_PREFIX, 0x10), PathBuf::from("/dev/parport1"));
        assert_eq!(parport_path(DEFAULT_PATH_PREFIX, 0x1f), PathBuf::from("/dev/parport1"));
        assert_eq!(parport_path(DEFAULT_PATH_PREFIX, 0x378), PathBuf::from("/dev/parport55"));
        assert_eq!(parport_path("/tmp/pp", 0x30), PathBuf::from("/tmp/pp3"));
    }
}
