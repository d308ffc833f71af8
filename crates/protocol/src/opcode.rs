//! Request codes of the emulated driver
//!
//! Client software issues requests with the two direction bits of the
//! ioctl number set; those are masked off before dispatch. Several
//! operations kept their function code across driver releases while others
//! moved, so both the legacy and the current code are recognised.

/// Sentinel stored in the first word of every envelope header
pub const MAGIC: u64 = 0xa410_b413;

/// Reserved high bits cleared from the raw request number
pub const REQUEST_RESERVED_MASK: u64 = 0xc000_0000;

/// Operation selected by a request code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Version,
    License,
    Transfer,
    MultiTransfer,
    EventUnregister,
    IntDisable,
    IntWait,
    CardRegister,
    EventRegister,
    CardUnregister,
    UsbTransfer,
    EventPull,
    UsbSetInterface,
    UsbGetDeviceData,
    IntEnable,
}

impl Opcode {
    /// Every opcode, in table order
    pub const ALL: [Opcode; 15] = [
        Opcode::Version,
        Opcode::License,
        Opcode::Transfer,
        Opcode::MultiTransfer,
        Opcode::EventUnregister,
        Opcode::IntDisable,
        Opcode::IntWait,
        Opcode::CardRegister,
        Opcode::EventRegister,
        Opcode::CardUnregister,
        Opcode::UsbTransfer,
        Opcode::EventPull,
        Opcode::UsbSetInterface,
        Opcode::UsbGetDeviceData,
        Opcode::IntEnable,
    ];

    /// Resolve a raw request number, ignoring the reserved bits
    pub fn from_request(request: u64) -> Option<Self> {
        match mask_request(request) {
            0x910 => Some(Opcode::Version),
            0x952 => Some(Opcode::License),
            0x98c | 0x903 => Some(Opcode::Transfer),
            0x98d | 0x904 => Some(Opcode::MultiTransfer),
            0x987 => Some(Opcode::EventUnregister),
            0x91f => Some(Opcode::IntDisable),
            0x94b => Some(Opcode::IntWait),
            0x9a4 | 0x97d => Some(Opcode::CardRegister),
            0x9a5 | 0x986 => Some(Opcode::EventRegister),
            0x959 => Some(Opcode::CardUnregister),
            0x942 => Some(Opcode::UsbTransfer),
            0x95a => Some(Opcode::EventPull),
            0x981 => Some(Opcode::UsbSetInterface),
            0x99a | 0x980 => Some(Opcode::UsbGetDeviceData),
            0x9b6 | 0x91e => Some(Opcode::IntEnable),
            _ => None,
        }
    }

    /// Current request code
    pub fn code(self) -> u64 {
        match self {
            Opcode::Version => 0x910,
            Opcode::License => 0x952,
            Opcode::Transfer => 0x98c,
            Opcode::MultiTransfer => 0x98d,
            Opcode::EventUnregister => 0x987,
            Opcode::IntDisable => 0x91f,
            Opcode::IntWait => 0x94b,
            Opcode::CardRegister => 0x9a4,
            Opcode::EventRegister => 0x9a5,
            Opcode::CardUnregister => 0x959,
            Opcode::UsbTransfer => 0x942,
            Opcode::EventPull => 0x95a,
            Opcode::UsbSetInterface => 0x981,
            Opcode::UsbGetDeviceData => 0x99a,
            Opcode::IntEnable => 0x9b6,
        }
    }

    /// Request code used by older driver releases, where it differs
    pub fn legacy_code(self) -> Option<u64> {
        match self {
            Opcode::Transfer => Some(0x903),
            Opcode::MultiTransfer => Some(0x904),
            Opcode::CardRegister => Some(0x97d),
            Opcode::EventRegister => Some(0x986),
            Opcode::UsbGetDeviceData => Some(0x980),
            Opcode::IntEnable => Some(0x91e),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Version => "VERSION",
            Opcode::License => "LICENSE",
            Opcode::Transfer => "TRANSFER",
            Opcode::MultiTransfer => "MULTI_TRANSFER",
            Opcode::EventUnregister => "EVENT_UNREGISTER",
            Opcode::IntDisable => "INT_DISABLE",
            Opcode::IntWait => "INT_WAIT",
            Opcode::CardRegister => "CARD_REGISTER",
            Opcode::EventRegister => "EVENT_REGISTER",
            Opcode::CardUnregister => "CARD_UNREGISTER",
            Opcode::UsbTransfer => "USB_TRANSFER",
            Opcode::EventPull => "EVENT_PULL",
            Opcode::UsbSetInterface => "USB_SET_INTERFACE",
            Opcode::UsbGetDeviceData => "USB_GET_DEVICE_DATA",
            Opcode::IntEnable => "INT_ENABLE",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Clear the direction bits of a raw request number
pub fn mask_request(request: u64) -> u64 {
    request & !REQUEST_RESERVED_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_resolve_to_themselves() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_request(op.code()), Some(op));
            if let Some(legacy) = op.legacy_code() {
                assert_eq!(Opcode::from_request(legacy), Some(op));
            }
        }
    }

    #[test]
    fn test_direction_bits_ignored() {
        assert_eq!(
            Opcode::from_request(0xc000_0000 | 0x942),
            Some(Opcode::UsbTransfer)
        );
        assert_eq!(
            Opcode::from_request(0x4000_0000 | 0x904),
            Some(Opcode::MultiTransfer)
        );
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(Opcode::from_request(0x123), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::UsbGetDeviceData.to_string(), "USB_GET_DEVICE_DATA");
    }
}
