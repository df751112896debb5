//! Status codes returned by the emulation bus driver.

use std::fmt;

/// A non-success status code reported by the bus driver. The raw value is
/// kept as-is so callers can match on codes this crate does not name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverError(pub u32);

impl DriverError {
    pub const NONE: u32 = 0x2000_0000;

    pub const BUS_NOT_FOUND: DriverError = DriverError(0xE000_0001);
    pub const NO_FREE_SLOT: DriverError = DriverError(0xE000_0002);
    pub const INVALID_TARGET: DriverError = DriverError(0xE000_0003);
    pub const REMOVAL_FAILED: DriverError = DriverError(0xE000_0004);
    pub const ALREADY_CONNECTED: DriverError = DriverError(0xE000_0005);
    pub const TARGET_UNINITIALIZED: DriverError = DriverError(0xE000_0006);
    pub const TARGET_NOT_PLUGGED_IN: DriverError = DriverError(0xE000_0007);
    pub const BUS_VERSION_MISMATCH: DriverError = DriverError(0xE000_0008);
    pub const BUS_ACCESS_FAILED: DriverError = DriverError(0xE000_0009);
    pub const CALLBACK_ALREADY_REGISTERED: DriverError = DriverError(0xE000_0010);
    pub const CALLBACK_NOT_FOUND: DriverError = DriverError(0xE000_0011);
    pub const BUS_ALREADY_CONNECTED: DriverError = DriverError(0xE000_0012);
    pub const BUS_INVALID_HANDLE: DriverError = DriverError(0xE000_0013);
    pub const XUSB_USERINDEX_OUT_OF_RANGE: DriverError = DriverError(0xE000_0014);
    pub const INVALID_PARAMETER: DriverError = DriverError(0xE000_0015);
    pub const NOT_SUPPORTED: DriverError = DriverError(0xE000_0016);

    /// Turns a raw status word into `Ok(())` or the error it names.
    #[inline]
    pub fn check(raw: u32) -> Result<(), DriverError> {
        if raw == Self::NONE { Ok(()) } else { Err(DriverError(raw)) }
    }

    #[inline]
    pub fn code(self) -> u32 {
        self.0
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::BUS_NOT_FOUND => "bus not found",
            Self::NO_FREE_SLOT => "no free slot",
            Self::INVALID_TARGET => "invalid target",
            Self::REMOVAL_FAILED => "removal failed",
            Self::ALREADY_CONNECTED => "already connected",
            Self::TARGET_UNINITIALIZED => "target uninitialized",
            Self::TARGET_NOT_PLUGGED_IN => "target not plugged in",
            Self::BUS_VERSION_MISMATCH => "bus version mismatch",
            Self::BUS_ACCESS_FAILED => "bus access failed",
            Self::CALLBACK_ALREADY_REGISTERED => "callback already registered",
            Self::CALLBACK_NOT_FOUND => "callback not found",
            Self::BUS_ALREADY_CONNECTED => "bus already connected",
            Self::BUS_INVALID_HANDLE => "bus invalid handle",
            Self::XUSB_USERINDEX_OUT_OF_RANGE => "XUSB user index out of range",
            Self::INVALID_PARAMETER => "invalid parameter",
            Self::NOT_SUPPORTED => "not supported",
            _ => "unknown driver error",
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.message(), self.0)
    }
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverError(0x{:08X})", self.0)
    }
}

impl std::error::Error for DriverError {}
