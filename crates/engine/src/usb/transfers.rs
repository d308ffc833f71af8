//! USB transfer execution
//!
//! Turns a USB_TRANSFER payload into one synchronous control or bulk
//! transfer. Pipe 0 is the control pipe; any other pipe number is a bulk
//! endpoint whose direction bit is taken from the read flag.

use super::UsbHandle;
use protocol::{SetupPacket, UsbTransfer};
use std::time::Duration;
use tracing::{debug, warn};

/// Direction bit of an endpoint address
const ENDPOINT_IN: u8 = 0x80;

/// A decoded transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbRequest {
    Control { setup: SetupPacket },
    BulkRead { endpoint: u8 },
    BulkWrite { endpoint: u8 },
}

impl UsbRequest {
    pub fn from_transfer(transfer: &UsbTransfer) -> Self {
        if transfer.pipe == 0 {
            return UsbRequest::Control {
                setup: transfer.setup_packet(),
            };
        }
        let endpoint = (transfer.pipe & 0xff) as u8;
        if transfer.is_read() {
            UsbRequest::BulkRead {
                endpoint: endpoint | ENDPOINT_IN,
            }
        } else {
            UsbRequest::BulkWrite {
                endpoint: endpoint & !ENDPOINT_IN,
            }
        }
    }

    /// Bytes moved through the client buffer
    ///
    /// Control transfers use the setup packet length, bounded by the buffer
    /// so the data stage never runs past the client's allocation. The
    /// shortened length is what goes out as wLength.
    pub fn data_len(&self, transfer: &UsbTransfer) -> usize {
        let buffer = transfer.buffer_size as usize;
        match self {
            UsbRequest::Control { setup } => {
                let length = usize::from(setup.length);
                if length > buffer {
                    warn!(
                        "Control transfer wLength {} exceeds the {}-byte buffer, sending {}",
                        length, buffer, buffer
                    );
                }
                length.min(buffer)
            }
            _ => buffer,
        }
    }

    /// Data flows from the device into the client buffer
    pub fn is_in(&self) -> bool {
        match self {
            UsbRequest::Control { setup } => setup.is_in(),
            UsbRequest::BulkRead { .. } => true,
            UsbRequest::BulkWrite { .. } => false,
        }
    }
}

/// Execute a transfer on an open handle
///
/// For IN requests `buf` receives the data; for OUT requests it holds the
/// data to send. Returns the number of bytes transferred.
pub fn execute(
    handle: &mut dyn UsbHandle,
    request: &UsbRequest,
    buf: &mut [u8],
    timeout: Duration,
) -> rusb::Result<usize> {
    let result = match *request {
        UsbRequest::Control { setup } => {
            debug!(
                "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, length={}",
                setup.request_type, setup.request, setup.value, setup.index, setup.length
            );
            if setup.is_in() {
                handle.read_control(
                    setup.request_type,
                    setup.request,
                    setup.value,
                    setup.index,
                    buf,
                    timeout,
                )
            } else {
                handle.write_control(
                    setup.request_type,
                    setup.request,
                    setup.value,
                    setup.index,
                    buf,
                    timeout,
                )
            }
        }
        UsbRequest::BulkRead { endpoint } => {
            debug!(
                "Bulk read: endpoint={:#x}, len={}, timeout={}ms",
                endpoint,
                buf.len(),
                timeout.as_millis()
            );
            handle.read_bulk(endpoint, buf, timeout)
        }
        UsbRequest::BulkWrite { endpoint } => {
            debug!(
                "Bulk write: endpoint={:#x}, len={}, timeout={}ms",
                endpoint,
                buf.len(),
                timeout.as_millis()
            );
            handle.write_bulk(endpoint, buf, timeout)
        }
    };

    match &result {
        Ok(n) => debug!("Transfer succeeded: {} bytes", n),
        Err(e) => warn!("Transfer {:?} failed: {}", request, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_request_from_setup() {
        let transfer = UsbTransfer {
            pipe: 0,
            buffer_size: 64,
            setup: [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00],
            ..Default::default()
        };
        let request = UsbRequest::from_transfer(&transfer);
        let UsbRequest::Control { setup } = request else {
            panic!("expected a control request, got {:?}", request);
        };
        assert_eq!(setup.request_type, 0x80);
        assert_eq!(setup.request, 0x06);
        assert_eq!(setup.value, 0x0100);
        assert_eq!(setup.index, 0);
        assert_eq!(setup.length, 18);
        assert!(request.is_in());
        assert_eq!(request.data_len(&transfer), 18);
    }

    #[test]
    fn test_control_length_bounded_by_buffer() {
        let transfer = UsbTransfer {
            buffer_size: 8,
            setup: [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xff, 0x00],
            ..Default::default()
        };
        let request = UsbRequest::from_transfer(&transfer);
        assert_eq!(request.data_len(&transfer), 8);
    }

    #[test]
    fn test_bulk_direction_follows_read_flag() {
        let read = UsbTransfer {
            pipe: 0x86,
            read: 1,
            buffer_size: 512,
            ..Default::default()
        };
        assert_eq!(
            UsbRequest::from_transfer(&read),
            UsbRequest::BulkRead { endpoint: 0x86 }
        );
        assert_eq!(UsbRequest::from_transfer(&read).data_len(&read), 512);

        let write = UsbTransfer {
            pipe: 0x02,
            read: 0,
            ..Default::default()
        };
        let request = UsbRequest::from_transfer(&write);
        assert_eq!(request, UsbRequest::BulkWrite { endpoint: 0x02 });
        assert!(!request.is_in());
    }

    #[test]
    fn test_bulk_direction_bit_forced() {
        let read = UsbTransfer {
            pipe: 0x06,
            read: 1,
            ..Default::default()
        };
        assert_eq!(
            UsbRequest::from_transfer(&read),
            UsbRequest::BulkRead { endpoint: 0x86 }
        );

        let write = UsbTransfer {
            pipe: 0x82,
            read: 0,
            ..Default::default()
        };
        assert_eq!(
            UsbRequest::from_transfer(&write),
            UsbRequest::BulkWrite { endpoint: 0x02 }
        );
    }
}
