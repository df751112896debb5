#![deny(warnings)]
//! ABI-stable vocabulary shared with the emulation bus: device kinds, button
//! flags, report layouts and driver status codes.

use serde::{Deserialize, Serialize};

pub mod report;
pub mod status;

pub use report::{
    DS4_REPORT_EX_LEN, DS4_REPORT_LEN, Ds4Report, Ds4ReportEx, Ds4Touch, Report, TouchPoint,
    XUSB_REPORT_LEN, XusbReport, scale_axis_signed, scale_axis_unsigned, scale_trigger, set_dpad,
};
pub use status::DriverError;

/// Target type understood by the bus driver. Discriminants match the driver's
/// target-type enumeration.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    X360 = 0,
    DS4 = 2,
}

impl DeviceKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(DeviceKind::X360),
            2 => Some(DeviceKind::DS4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::X360 => "Xbox 360 (wired)",
            DeviceKind::DS4 => "DualShock 4 (wired)",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// XInput gamepad buttons in XUSB bit positions.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct XusbButtons: u16 {
        const DPAD_UP        = 0x0001;
        const DPAD_DOWN      = 0x0002;
        const DPAD_LEFT      = 0x0004;
        const DPAD_RIGHT     = 0x0008;
        const START          = 0x0010;
        const BACK           = 0x0020;
        const LEFT_THUMB     = 0x0040;
        const RIGHT_THUMB    = 0x0080;
        const LEFT_SHOULDER  = 0x0100;
        const RIGHT_SHOULDER = 0x0200;
        const GUIDE          = 0x0400;
        const A              = 0x1000;
        const B              = 0x2000;
        const X              = 0x4000;
        const Y              = 0x8000;
    }
}

bitflags::bitflags! {
    /// DualShock 4 face/shoulder buttons. Bits 0-3 of the same field carry the
    /// d-pad code, so no flag lives there.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Ds4Buttons: u16 {
        const SQUARE         = 1 << 4;
        const CROSS          = 1 << 5;
        const CIRCLE         = 1 << 6;
        const TRIANGLE       = 1 << 7;
        const SHOULDER_LEFT  = 1 << 8;
        const SHOULDER_RIGHT = 1 << 9;
        const TRIGGER_LEFT   = 1 << 10;
        const TRIGGER_RIGHT  = 1 << 11;
        const SHARE          = 1 << 12;
        const OPTIONS        = 1 << 13;
        const THUMB_LEFT     = 1 << 14;
        const THUMB_RIGHT    = 1 << 15;
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Ds4SpecialButtons: u8 {
        const PS       = 1 << 0;
        const TOUCHPAD = 1 << 1;
    }
}

/// DualShock 4 hat switch code, stored in the low nibble of the button field.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DPad {
    North = 0x0,
    NorthEast = 0x1,
    East = 0x2,
    SouthEast = 0x3,
    South = 0x4,
    SouthWest = 0x5,
    West = 0x6,
    NorthWest = 0x7,
    #[default]
    Neutral = 0x8,
}

impl DPad {
    pub const ALL: [DPad; 9] = [
        DPad::North,
        DPad::NorthEast,
        DPad::East,
        DPad::SouthEast,
        DPad::South,
        DPad::SouthWest,
        DPad::West,
        DPad::NorthWest,
        DPad::Neutral,
    ];

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decodes the low nibble of a DS4 button field. Codes 9-15 are not
    /// produced by real hardware and read back as `Neutral`.
    pub fn from_buttons(buttons: u16) -> Self {
        match buttons & 0x000F {
            0x0 => DPad::North,
            0x1 => DPad::NorthEast,
            0x2 => DPad::East,
            0x3 => DPad::SouthEast,
            0x4 => DPad::South,
            0x5 => DPad::SouthWest,
            0x6 => DPad::West,
            0x7 => DPad::NorthWest,
            _ => DPad::Neutral,
        }
    }
}

/// Lightbar colour requested by the host for a DS4 target.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightbarColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

const _: [(); XUSB_REPORT_LEN] = [(); size_of::<XusbReport>()];
const _: [(); 2] = [(); align_of::<XusbReport>()];
const _: [(); DS4_REPORT_LEN] = [(); size_of::<Ds4Report>()];
const _: [(); 3] = [(); size_of::<LightbarColor>()];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_kind_raw_values() {
        assert_eq!(DeviceKind::from_raw(0), Some(DeviceKind::X360));
        assert_eq!(DeviceKind::from_raw(2), Some(DeviceKind::DS4));
        assert_eq!(DeviceKind::from_raw(1), None);
        assert_eq!(DeviceKind::DS4 as u32, 2);
    }

    #[test]
    fn ds4_buttons_stay_out_of_dpad_nibble() {
        assert_eq!(Ds4Buttons::all().bits() & 0x000F, 0);
        assert_eq!(Ds4Buttons::all().bits(), 0xFFF0);
    }

    #[test]
    fn xusb_has_fifteen_buttons() {
        assert_eq!(XusbButtons::all().bits().count_ones(), 15);
        assert!(!XusbButtons::all().contains(XusbButtons::from_bits_retain(0x0800)));
    }

    #[test]
    fn dpad_nibble_decodes() {
        for d in DPad::ALL {
            assert_eq!(DPad::from_buttons(0xFFF0 | u16::from(d.code())), d);
        }
        assert_eq!(DPad::from_buttons(0x000C), DPad::Neutral);
    }
}
