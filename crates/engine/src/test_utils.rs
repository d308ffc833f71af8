//! Hardware doubles for the engine
//!
//! [`MockPortOpener`] and [`MockUsbBackend`] stand in for ppdev and libusb.
//! Every call they receive is appended to a shared log, so a test can hand
//! the doubles to a [`Session`](crate::session::Session), drive requests
//! through the dispatcher, and inspect what reached the hardware afterwards.

use crate::error::{EngineError, Result};
use crate::parport::{ParallelPort, PortOpener};
use crate::usb::{UsbBackend, UsbHandle};
use common::UsbBus;
use common::UsbDevice;
use nix::errno::Errno;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A call that reached a mock parallel port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortCall {
    Open(PathBuf),
    Claim,
    Release,
    Negotiate(i32),
    WriteData(u8),
    ReadStatus,
    ReadControl,
    WriteControl(u8),
}

/// Register contents, call log and injected failures of the mock ports
#[derive(Debug, Default)]
pub struct PortState {
    pub calls: Vec<PortCall>,
    pub status: u8,
    pub control: u8,
    pub fail_open: bool,
    pub fail_claim: bool,
    pub fail_negotiate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SharedPortState(Arc<Mutex<PortState>>);

impl SharedPortState {
    pub fn lock(&self) -> MutexGuard<'_, PortState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.lock().calls.clone()
    }

    fn record(&self, call: PortCall) {
        self.lock().calls.push(call);
    }
}

/// Opens [`MockPort`]s, handing out handles 3, 4, 5...
#[derive(Debug)]
pub struct MockPortOpener {
    state: SharedPortState,
    next_handle: AtomicU64,
}

impl MockPortOpener {
    pub fn new() -> (Self, SharedPortState) {
        let state = SharedPortState::default();
        let opener = Self {
            state: state.clone(),
            next_handle: AtomicU64::new(3),
        };
        (opener, state)
    }
}

impl PortOpener for MockPortOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ParallelPort>> {
        self.state.record(PortCall::Open(path.to_path_buf()));
        if self.state.lock().fail_open {
            return Err(EngineError::Parport(Errno::ENOENT));
        }
        Ok(Box::new(MockPort {
            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct MockPort {
    handle: u64,
    state: SharedPortState,
}

impl ParallelPort for MockPort {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn claim(&mut self) -> Result<()> {
        self.state.record(PortCall::Claim);
        if self.state.lock().fail_claim {
            return Err(EngineError::Parport(Errno::EBUSY));
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.state.record(PortCall::Release);
        Ok(())
    }

    fn negotiate(&mut self, mode: i32) -> Result<()> {
        self.state.record(PortCall::Negotiate(mode));
        if self.state.lock().fail_negotiate {
            return Err(EngineError::Parport(Errno::EIO));
        }
        Ok(())
    }

    fn write_data(&mut self, value: u8) -> Result<()> {
        self.state.record(PortCall::WriteData(value));
        Ok(())
    }

    fn read_status(&mut self) -> Result<u8> {
        self.state.record(PortCall::ReadStatus);
        Ok(self.state.lock().status)
    }

    fn read_control(&mut self) -> Result<u8> {
        self.state.record(PortCall::ReadControl);
        Ok(self.state.lock().control)
    }

    fn write_control(&mut self, value: u8) -> Result<()> {
        self.state.record(PortCall::WriteControl(value));
        self.state.lock().control = value;
        Ok(())
    }
}

/// A call that reached the mock USB backend or one of its handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbCall {
    Enumerate,
    Open { bus: u8, address: u8 },
    Claim(u8),
    Release(u8),
    SetAlternate { interface: u8, setting: u8 },
    ControlIn { request_type: u8, request: u8, value: u16, index: u16, len: usize },
    ControlOut { request_type: u8, request: u8, value: u16, index: u16, data: Vec<u8> },
    BulkIn { endpoint: u8, len: usize },
    BulkOut { endpoint: u8, data: Vec<u8> },
    Close,
}

/// Topology, canned IN data, call log and injected failures of the mock backend
#[derive(Debug, Default)]
pub struct UsbState {
    pub buses: Vec<UsbBus>,
    pub calls: Vec<UsbCall>,
    /// Returned by IN transfers, truncated to the buffer
    pub in_data: Vec<u8>,
    pub fail_enumerate: bool,
    pub fail_open: bool,
    pub fail_claim: bool,
    pub fail_transfer: Option<rusb::Error>,
}

#[derive(Debug, Clone, Default)]
pub struct SharedUsbState(Arc<Mutex<UsbState>>);

impl SharedUsbState {
    pub fn lock(&self) -> MutexGuard<'_, UsbState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<UsbCall> {
        self.lock().calls.clone()
    }

    fn record(&self, call: UsbCall) {
        self.lock().calls.push(call);
    }

    fn transfer_result(&self) -> rusb::Result<()> {
        match self.lock().fail_transfer {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fill(&self, buf: &mut [u8]) -> usize {
        let state = self.lock();
        let n = state.in_data.len().min(buf.len());
        buf[..n].copy_from_slice(&state.in_data[..n]);
        n
    }
}

#[derive(Debug)]
pub struct MockUsbBackend {
    state: SharedUsbState,
}

impl MockUsbBackend {
    pub fn new(buses: Vec<UsbBus>) -> (Self, SharedUsbState) {
        let state = SharedUsbState::default();
        state.lock().buses = buses;
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl UsbBackend for MockUsbBackend {
    fn enumerate(&mut self) -> rusb::Result<Vec<UsbBus>> {
        self.state.record(UsbCall::Enumerate);
        let state = self.state.lock();
        if state.fail_enumerate {
            return Err(rusb::Error::Access);
        }
        Ok(state.buses.clone())
    }

    fn open(&mut self, device: &UsbDevice) -> rusb::Result<Box<dyn UsbHandle>> {
        self.state.record(UsbCall::Open {
            bus: device.bus_number,
            address: device.address,
        });
        if self.state.lock().fail_open {
            return Err(rusb::Error::Access);
        }
        Ok(Box::new(MockUsbHandle {
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct MockUsbHandle {
    state: SharedUsbState,
}

impl Drop for MockUsbHandle {
    fn drop(&mut self) {
        self.state.record(UsbCall::Close);
    }
}

impl UsbHandle for MockUsbHandle {
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.state.record(UsbCall::Claim(interface));
        if self.state.lock().fail_claim {
            return Err(rusb::Error::Busy);
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.state.record(UsbCall::Release(interface));
        Ok(())
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> rusb::Result<()> {
        self.state.record(UsbCall::SetAlternate { interface, setting });
        Ok(())
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.state.record(UsbCall::ControlIn {
            request_type,
            request,
            value,
            index,
            len: buf.len(),
        });
        self.state.transfer_result()?;
        Ok(self.state.fill(buf))
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.state.record(UsbCall::ControlOut {
            request_type,
            request,
            value,
            index,
            data: buf.to_vec(),
        });
        self.state.transfer_result()?;
        Ok(buf.len())
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        self.state.record(UsbCall::BulkIn {
            endpoint,
            len: buf.len(),
        });
        self.state.transfer_result()?;
        Ok(self.state.fill(buf))
    }

    fn write_bulk(&mut self, endpoint: u8, buf: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        self.state.record(UsbCall::BulkOut {
            endpoint,
            data: buf.to_vec(),
        });
        self.state.transfer_result()?;
        Ok(buf.len())
    }
}
