//! Linux ppdev backend
//!
//! Register access through the `/dev/parportN` character devices. Each
//! register operation is a single ppdev ioctl.

use super::{ParallelPort, PortOpener};
use crate::error::Result;
use nix::libc::{O_EXCL, c_int};
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::debug;

mod ioctls {
    use nix::libc::c_int;

    nix::ioctl_read!(pprstatus, b'p', 0x81, u8);
    nix::ioctl_read!(pprcontrol, b'p', 0x83, u8);
    nix::ioctl_write_ptr!(ppwcontrol, b'p', 0x84, u8);
    nix::ioctl_write_ptr!(ppwdata, b'p', 0x86, u8);
    nix::ioctl_none!(ppclaim, b'p', 0x8b);
    nix::ioctl_none!(pprelease, b'p', 0x8c);
    nix::ioctl_write_ptr!(ppnegot, b'p', 0x91, c_int);
}

/// An exclusively opened ppdev node
#[derive(Debug)]
pub struct PpdevPort {
    file: File,
}

impl PpdevPort {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_EXCL)
            .open(path)?;
        debug!("Opened {} as fd {}", path.display(), file.as_raw_fd());
        Ok(Self { file })
    }

    fn fd(&self) -> c_int {
        self.file.as_raw_fd()
    }
}

// SAFETY (all ioctl calls below): `fd` is an open ppdev descriptor owned by
// `self.file`, and every pointer argument addresses a live local of the
// type the request expects.
impl ParallelPort for PpdevPort {
    fn handle(&self) -> u64 {
        self.fd() as u64
    }

    fn claim(&mut self) -> Result<()> {
        unsafe { ioctls::ppclaim(self.fd()) }?;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        unsafe { ioctls::pprelease(self.fd()) }?;
        Ok(())
    }

    fn negotiate(&mut self, mode: i32) -> Result<()> {
        let mode: c_int = mode;
        unsafe { ioctls::ppnegot(self.fd(), &mode) }?;
        Ok(())
    }

    fn write_data(&mut self, value: u8) -> Result<()> {
        unsafe { ioctls::ppwdata(self.fd(), &value) }?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<u8> {
        let mut value = 0u8;
        unsafe { ioctls::pprstatus(self.fd(), &mut value) }?;
        Ok(value)
    }

    fn read_control(&mut self) -> Result<u8> {
        let mut value = 0u8;
        unsafe { ioctls::pprcontrol(self.fd(), &mut value) }?;
        Ok(value)
    }

    fn write_control(&mut self, value: u8) -> Result<()> {
        unsafe { ioctls::ppwcontrol(self.fd(), &value) }?;
        Ok(())
    }
}

/// Opens real ppdev nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct PpdevOpener;

impl PortOpener for PpdevOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ParallelPort>> {
        Ok(Box::new(PpdevPort::open(path)?))
    }
}
