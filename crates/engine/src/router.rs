//! Request routing for an interposition harness
//!
//! The harness intercepts `open`, `ioctl`, `close`, `access` and reads of a
//! few `/proc` files, and asks the router whether each call belongs to the
//! emulated device. Opening the designated node opens a benign backing
//! node instead and records the descriptor in a virtual-device table;
//! control requests on recorded descriptors go to the [`Dispatcher`].
//! Everything else is left to the harness to pass through.

use crate::config::ShimConfig;
use crate::dispatcher::{Dispatcher, Reply};
use crate::memory::UserMemory;
use crate::parport::PpdevOpener;
use crate::procfs::VirtualProc;
use crate::session::Session;
use crate::usb::RusbBackend;
use anyhow::Context;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// The real driver call, for requests the engine does not handle
pub trait Passthrough: Send + Sync {
    fn ioctl(&self, fd: RawFd, request: u64, arg: u64) -> i32;
}

/// Forwards to the C library's `ioctl`
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcPassthrough;

impl Passthrough for LibcPassthrough {
    fn ioctl(&self, fd: RawFd, request: u64, arg: u64) -> i32 {
        // SAFETY: the request and argument are the caller's own, forwarded
        // unchanged to the descriptor they were issued on.
        unsafe {
            nix::libc::ioctl(
                fd,
                request as _,
                arg as usize as *mut nix::libc::c_void,
            )
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub device_node: PathBuf,
    pub backing_node: PathBuf,
    pub forward_unsupported: bool,
    pub enumerate_on_open: bool,
    pub virtual_port_count: u32,
}

impl From<&ShimConfig> for RouterOptions {
    fn from(config: &ShimConfig) -> Self {
        Self {
            device_node: config.shim.device_node.clone(),
            backing_node: config.shim.backing_node.clone(),
            forward_unsupported: config.shim.forward_unsupported,
            enumerate_on_open: config.usb.enumerate_on_open,
            virtual_port_count: config.parport.virtual_port_count,
        }
    }
}

pub struct Router {
    dispatcher: Dispatcher,
    passthrough: Box<dyn Passthrough>,
    options: RouterOptions,
    procfs: VirtualProc,
    /// Backing files of open virtual devices, by descriptor
    open: Mutex<HashMap<RawFd, File>>,
}

impl Router {
    pub fn new(
        dispatcher: Dispatcher,
        passthrough: Box<dyn Passthrough>,
        options: RouterOptions,
    ) -> Self {
        let procfs = VirtualProc::new(&options.device_node, options.virtual_port_count);
        Self {
            dispatcher,
            passthrough,
            options,
            procfs,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Router over real hardware: ppdev, libusb and the C library
    pub fn from_config(config: &ShimConfig) -> anyhow::Result<Self> {
        let backend = RusbBackend::new().context("Failed to initialize libusb")?;
        let session = Session::new(
            Box::new(PpdevOpener),
            Box::new(backend),
            config.session_options(),
        );
        Ok(Self::new(
            Dispatcher::new(session),
            Box::new(LibcPassthrough),
            RouterOptions::from(config),
        ))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RawFd, File>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_device_node(&self, path: &Path) -> bool {
        path == self.options.device_node
    }

    pub fn is_virtual(&self, fd: RawFd) -> bool {
        self.table().contains_key(&fd)
    }

    /// Open the device node, or `None` if `path` is not it
    pub fn open(&self, path: &Path) -> Option<io::Result<RawFd>> {
        if !self.is_device_node(path) {
            return None;
        }
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.options.backing_node)
        {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Can't open backing node {}: {}",
                    self.options.backing_node.display(),
                    e
                );
                return Some(Err(e));
            }
        };
        let fd = file.as_raw_fd();
        self.table().insert(fd, file);
        info!("Opened {} as fd {}", path.display(), fd);

        if self.options.enumerate_on_open
            && let Err(e) = self.dispatcher.session().enumerate()
        {
            warn!("USB enumeration failed: {}", e);
        }
        Some(Ok(fd))
    }

    /// Handle a control request, or `None` if `fd` is not a virtual device
    pub fn ioctl(&self, fd: RawFd, request: u64, arg: u64, mem: &mut dyn UserMemory) -> Option<i32> {
        if !self.is_virtual(fd) {
            return None;
        }
        let status = match self.dispatcher.handle(request, arg, mem) {
            Reply::Done(status) => status,
            Reply::Forward => self.passthrough.ioctl(fd, request, arg),
            Reply::Unsupported if self.options.forward_unsupported => {
                self.passthrough.ioctl(fd, request, arg)
            }
            Reply::Unsupported => 0,
        };
        Some(status)
    }

    /// Close a virtual device, releasing the USB device it was using
    ///
    /// Returns `false` when `fd` is not a virtual device. The backing
    /// descriptor is closed here.
    pub fn close(&self, fd: RawFd) -> bool {
        let Some(file) = self.table().remove(&fd) else {
            return false;
        };
        drop(file);
        self.dispatcher.session().release_usb();
        debug!("Closed virtual device fd {}", fd);
        true
    }

    /// Result of `access()` on `path`, or `None` if it is not the device node
    pub fn access(&self, path: &Path) -> Option<i32> {
        self.is_device_node(path).then_some(0)
    }

    /// Synthetic contents for a `/proc` file
    pub fn virtual_file(&self, path: &Path) -> Option<String> {
        self.procfs.contents(path)
    }
}
