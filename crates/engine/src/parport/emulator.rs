//! Port transfer emulation
//!
//! Decodes the absolute port address of a transfer against the registered
//! bases and turns it into at most one driver call.

use super::ParallelPort;
use crate::error::{EngineError, Result};
use protocol::types::{CMD_READ_BYTE, CMD_WRITE_BYTE};
use protocol::{PortTransfer, ProtocolError};
use tracing::{debug, trace};

/// Register addressed by a port transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Base + 0, output only
    Data,
    /// Base + 1, input only
    Status,
    /// Base + 2
    Control,
    /// Offset into the auxiliary (ECP) range
    Ecp(u64),
    Unmapped,
}

/// Base addresses recorded by the last card registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBases {
    pub primary: u64,
    pub auxiliary: Option<u64>,
}

impl PortBases {
    pub fn decode(&self, port: u64) -> Register {
        match port.checked_sub(self.primary) {
            Some(0) => return Register::Data,
            Some(1) => return Register::Status,
            Some(2) => return Register::Control,
            _ => {}
        }
        match self.auxiliary.and_then(|aux| port.checked_sub(aux)) {
            Some(offset) if offset < 3 => Register::Ecp(offset),
            _ => Register::Unmapped,
        }
    }
}

/// Register-level state kept between transfers
#[derive(Debug, Default)]
pub struct PortEmulator {
    last_data_write: u8,
    force_pc3_ident: bool,
}

impl PortEmulator {
    pub fn new(force_pc3_ident: bool) -> Self {
        Self {
            last_data_write: 0,
            force_pc3_ident,
        }
    }

    /// Most recent byte written to the data register
    pub fn last_data_write(&self) -> u8 {
        self.last_data_write
    }

    /// Execute one transfer in place
    ///
    /// Without an open port (or without registered bases) the transfer is
    /// accepted and left untouched.
    pub fn transfer(
        &mut self,
        port: Option<&mut (dyn ParallelPort + '_)>,
        bases: Option<&PortBases>,
        tr: &mut PortTransfer,
    ) -> Result<()> {
        let write = match tr.command {
            CMD_READ_BYTE => false,
            CMD_WRITE_BYTE => true,
            other => {
                return Err(EngineError::Protocol(ProtocolError::UnsupportedCommand(other)));
            }
        };
        let (Some(port), Some(bases)) = (port, bases) else {
            debug!("Port transfer at {:#x} with no card registered", tr.port);
            return Ok(());
        };

        let register = bases.decode(tr.port);
        trace!(
            "{} {:?} at {:#x} value={:#04x}",
            if write { "write" } else { "read" },
            register,
            tr.port,
            tr.byte()
        );

        match (register, write) {
            (Register::Data, true) => {
                self.last_data_write = tr.byte();
                port.write_data(tr.byte())?;
            }
            (Register::Data, false) => {
                debug!("Read of output-only data register at {:#x} ignored", tr.port);
            }
            (Register::Status, false) => {
                let status = port.read_status()?;
                tr.set_byte(self.adjust_status(status));
            }
            (Register::Status, true) => {
                debug!("Write to input-only status register at {:#x} ignored", tr.port);
            }
            (Register::Control, false) => {
                let control = port.read_control()?;
                tr.set_byte(control);
            }
            (Register::Control, true) => port.write_control(tr.byte())?,
            (Register::Ecp(offset), _) => {
                debug!("ECP register {} access ignored", offset);
            }
            (Register::Unmapped, _) => {
                debug!("Unmapped port {:#x} access ignored", tr.port);
            }
        }
        Ok(())
    }

    fn adjust_status(&self, status: u8) -> u8 {
        if !self.force_pc3_ident {
            return status;
        }
        let ident = if self.last_data_write & 0x40 != 0 {
            0x20
        } else {
            0x80
        };
        (status & 0x5f) | ident
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Registers {
        data: Vec<u8>,
        status: u8,
        control: u8,
    }

    impl ParallelPort for Registers {
        fn handle(&self) -> u64 {
            3
        }
        fn claim(&mut self) -> Result<()> {
            Ok(())
        }
        fn release(&mut self) -> Result<()> {
            Ok(())
        }
        fn negotiate(&mut self, _mode: i32) -> Result<()> {
            Ok(())
        }
        fn write_data(&mut self, value: u8) -> Result<()> {
            self.data.push(value);
            Ok(())
        }
        fn read_status(&mut self) -> Result<u8> {
            Ok(self.status)
        }
        fn read_control(&mut self) -> Result<u8> {
            Ok(self.control)
        }
        fn write_control(&mut self, value: u8) -> Result<()> {
            self.control = value;
            Ok(())
        }
    }

    const BASES: PortBases = PortBases {
        primary: 0x10,
        auxiliary: Some(0x410),
    };

    fn transfer(port: u64, command: u64, value: u8) -> PortTransfer {
        let mut tr = PortTransfer {
            port,
            command,
            ..Default::default()
        };
        tr.set_byte(value);
        tr
    }

    #[test]
    fn test_decode() {
        assert_eq!(BASES.decode(0x10), Register::Data);
        assert_eq!(BASES.decode(0x11), Register::Status);
        assert_eq!(BASES.decode(0x12), Register::Control);
        assert_eq!(BASES.decode(0x13), Register::Unmapped);
        assert_eq!(BASES.decode(0x0f), Register::Unmapped);
        assert_eq!(BASES.decode(0x412), Register::Ecp(2));
        assert_eq!(BASES.decode(0x413), Register::Unmapped);
    }

    #[test]
    fn test_data_write_is_remembered() {
        let mut regs = Registers::default();
        let mut emu = PortEmulator::new(false);
        let mut tr = transfer(0x10, CMD_WRITE_BYTE, 0xa5);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut tr).unwrap();
        assert_eq!(regs.data, vec![0xa5]);
        assert_eq!(emu.last_data_write(), 0xa5);
    }

    #[test]
    fn test_status_read() {
        let mut regs = Registers {
            status: 0x78,
            ..Default::default()
        };
        let mut emu = PortEmulator::new(false);
        let mut tr = transfer(0x11, CMD_READ_BYTE, 0);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut tr).unwrap();
        assert_eq!(tr.byte(), 0x78);
    }

    #[test]
    fn test_forced_ident_follows_last_write() {
        let mut regs = Registers {
            status: 0xff,
            ..Default::default()
        };
        let mut emu = PortEmulator::new(true);

        let mut write = transfer(0x10, CMD_WRITE_BYTE, 0x40);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut write).unwrap();
        let mut read = transfer(0x11, CMD_READ_BYTE, 0);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut read).unwrap();
        assert_eq!(read.byte(), 0x5f | 0x20);

        let mut write = transfer(0x10, CMD_WRITE_BYTE, 0x00);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut write).unwrap();
        emu.transfer(Some(&mut regs), Some(&BASES), &mut read).unwrap();
        assert_eq!(read.byte(), 0x5f | 0x80);
    }

    #[test]
    fn test_control_round_trip() {
        let mut regs = Registers::default();
        let mut emu = PortEmulator::new(false);
        let mut write = transfer(0x12, CMD_WRITE_BYTE, 0x0c);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut write).unwrap();
        let mut read = transfer(0x12, CMD_READ_BYTE, 0);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut read).unwrap();
        assert_eq!(read.byte(), 0x0c);
    }

    #[test]
    fn test_ignored_accesses_leave_payload() {
        let mut regs = Registers::default();
        let mut emu = PortEmulator::new(false);
        for port in [0x10, 0x410, 0x999] {
            let mut tr = transfer(port, CMD_READ_BYTE, 0x33);
            emu.transfer(Some(&mut regs), Some(&BASES), &mut tr).unwrap();
            assert_eq!(tr.byte(), 0x33);
        }
        let mut tr = transfer(0x11, CMD_WRITE_BYTE, 0x01);
        emu.transfer(Some(&mut regs), Some(&BASES), &mut tr).unwrap();
        assert!(regs.data.is_empty());
    }

    #[test]
    fn test_unknown_command_rejected_without_side_effects() {
        let mut regs = Registers::default();
        let mut emu = PortEmulator::new(false);
        let mut tr = transfer(0x10, 11, 0x77);
        assert!(emu.transfer(Some(&mut regs), Some(&BASES), &mut tr).is_err());
        assert!(regs.data.is_empty());
        assert_eq!(emu.last_data_write(), 0);
    }

    #[test]
    fn test_no_port_is_accepted() {
        let mut emu = PortEmulator::new(false);
        let mut tr = transfer(0x10, CMD_WRITE_BYTE, 0x01);
        emu.transfer(None, None, &mut tr).unwrap();
        assert_eq!(emu.last_data_write(), 0);
    }
}
