use crate::{DPad, Ds4Buttons, Ds4SpecialButtons, XusbButtons};

pub const XUSB_REPORT_LEN: usize = 12;
pub const DS4_REPORT_LEN: usize = 10;
pub const DS4_REPORT_EX_LEN: usize = 63;

const DS4_STICK_CENTER: u8 = 0x80;

/// XINPUT_GAMEPAD-compatible report. Fields already carry report units, so
/// encoding is a straight little-endian copy.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XusbReport {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

impl XusbReport {
    #[inline]
    pub fn buttons(&self) -> XusbButtons {
        XusbButtons::from_bits_retain(self.buttons)
    }

    pub fn to_bytes(&self) -> [u8; XUSB_REPORT_LEN] {
        let mut b = [0u8; XUSB_REPORT_LEN];
        b[0..2].copy_from_slice(&self.buttons.to_le_bytes());
        b[2] = self.left_trigger;
        b[3] = self.right_trigger;
        b[4..6].copy_from_slice(&self.thumb_lx.to_le_bytes());
        b[6..8].copy_from_slice(&self.thumb_ly.to_le_bytes());
        b[8..10].copy_from_slice(&self.thumb_rx.to_le_bytes());
        b[10..12].copy_from_slice(&self.thumb_ry.to_le_bytes());
        b
    }
}

/// DS4 simple input report. Sticks are unsigned with 0x80 at rest; the low
/// nibble of `buttons` is the d-pad code.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ds4Report {
    pub thumb_lx: u8,
    pub thumb_ly: u8,
    pub thumb_rx: u8,
    pub thumb_ry: u8,
    pub buttons: u16,
    pub special: u8,
    pub trigger_l: u8,
    pub trigger_r: u8,
}

impl Default for Ds4Report {
    fn default() -> Self {
        Self {
            thumb_lx: DS4_STICK_CENTER,
            thumb_ly: DS4_STICK_CENTER,
            thumb_rx: DS4_STICK_CENTER,
            thumb_ry: DS4_STICK_CENTER,
            buttons: set_dpad(0, DPad::Neutral),
            special: 0,
            trigger_l: 0,
            trigger_r: 0,
        }
    }
}

impl Ds4Report {
    #[inline]
    pub fn buttons(&self) -> Ds4Buttons {
        Ds4Buttons::from_bits_truncate(self.buttons)
    }

    #[inline]
    pub fn special(&self) -> Ds4SpecialButtons {
        Ds4SpecialButtons::from_bits_retain(self.special)
    }

    #[inline]
    pub fn dpad(&self) -> DPad {
        DPad::from_buttons(self.buttons)
    }

    #[inline]
    pub fn set_dpad(&mut self, direction: DPad) {
        self.buttons = set_dpad(self.buttons, direction);
    }

    fn write_prefix(&self, b: &mut [u8]) {
        b[0] = self.thumb_lx;
        b[1] = self.thumb_ly;
        b[2] = self.thumb_rx;
        b[3] = self.thumb_ry;
        b[4..6].copy_from_slice(&self.buttons.to_le_bytes());
        b[6] = self.special;
        b[7] = self.trigger_l;
        b[8] = self.trigger_r;
    }

    /// Last byte is the C struct's tail padding and is always zero.
    pub fn to_bytes(&self) -> [u8; DS4_REPORT_LEN] {
        let mut b = [0u8; DS4_REPORT_LEN];
        self.write_prefix(&mut b);
        b
    }
}

/// One finger on the touchpad: an up/tracking byte followed by 12-bit X and
/// Y packed into three bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TouchPoint {
    /// Bit 7 set means no finger; bits 0-6 are the tracking id.
    pub is_up_tracking_num: u8,
    pub data: [u8; 3],
}

impl TouchPoint {
    pub const MAX_X: u16 = 1919;
    pub const MAX_Y: u16 = 942;

    /// `x` and `y` are truncated to 12 bits, `tracking_id` to 7.
    pub fn new(active: bool, tracking_id: u8, x: u16, y: u16) -> Self {
        let x = x & 0x0FFF;
        let y = y & 0x0FFF;
        let up = if active { 0 } else { 0x80 };
        Self {
            is_up_tracking_num: up | (tracking_id & 0x7F),
            data: [(x & 0xFF) as u8, ((x >> 8) as u8) | (((y & 0x0F) as u8) << 4), (y >> 4) as u8],
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_up_tracking_num & 0x80 == 0
    }

    #[inline]
    pub fn tracking_id(&self) -> u8 {
        self.is_up_tracking_num & 0x7F
    }

    pub fn x(&self) -> u16 {
        u16::from(self.data[0]) | (u16::from(self.data[1] & 0x0F) << 8)
    }

    pub fn y(&self) -> u16 {
        u16::from(self.data[1] >> 4) | (u16::from(self.data[2]) << 4)
    }

    fn write(&self, b: &mut [u8]) {
        b[0] = self.is_up_tracking_num;
        b[1..4].copy_from_slice(&self.data);
    }
}

/// A touchpad sample: packet counter plus two fingers. 9 bytes on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ds4Touch {
    pub packet_counter: u8,
    pub finger1: TouchPoint,
    pub finger2: TouchPoint,
}

impl Ds4Touch {
    pub const LEN: usize = 9;

    fn write(&self, b: &mut [u8]) {
        b[0] = self.packet_counter;
        self.finger1.write(&mut b[1..5]);
        self.finger2.write(&mut b[5..9]);
    }
}

/// Full DS4 v1 input report with motion and touchpad data. Serialised packed
/// into a fixed 63-byte buffer; trailing bytes are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ds4ReportEx {
    pub report: Ds4Report,
    pub timestamp: u16,
    pub battery_level: u8,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub battery_level_special: u8,
    pub touch_packets: u8,
    pub current_touch: Ds4Touch,
    pub previous_touch: [Ds4Touch; 2],
}

impl From<Ds4Report> for Ds4ReportEx {
    fn from(report: Ds4Report) -> Self {
        Self { report, ..Default::default() }
    }
}

impl Ds4ReportEx {
    pub fn to_bytes(&self) -> [u8; DS4_REPORT_EX_LEN] {
        let mut b = [0u8; DS4_REPORT_EX_LEN];
        self.report.write_prefix(&mut b[0..9]);
        b[9..11].copy_from_slice(&self.timestamp.to_le_bytes());
        b[11] = self.battery_level;
        b[12..14].copy_from_slice(&self.gyro_x.to_le_bytes());
        b[14..16].copy_from_slice(&self.gyro_y.to_le_bytes());
        b[16..18].copy_from_slice(&self.gyro_z.to_le_bytes());
        b[18..20].copy_from_slice(&self.accel_x.to_le_bytes());
        b[20..22].copy_from_slice(&self.accel_y.to_le_bytes());
        b[22..24].copy_from_slice(&self.accel_z.to_le_bytes());
        // 24..29 reserved
        b[29] = self.battery_level_special;
        // 30..32 reserved
        b[32] = self.touch_packets;
        self.current_touch.write(&mut b[33..42]);
        self.previous_touch[0].write(&mut b[42..51]);
        self.previous_touch[1].write(&mut b[51..60]);
        b
    }
}

/// A borrowed report ready for submission to one target.
#[derive(Clone, Copy, Debug)]
pub enum Report<'a> {
    X360(&'a XusbReport),
    Ds4(&'a Ds4Report),
    Ds4Ex(&'a Ds4ReportEx),
}

impl Report<'_> {
    pub fn kind(&self) -> crate::DeviceKind {
        match self {
            Report::X360(_) => crate::DeviceKind::X360,
            Report::Ds4(_) | Report::Ds4Ex(_) => crate::DeviceKind::DS4,
        }
    }

    /// Wire bytes of the report.
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Report::X360(r) => r.to_bytes().to_vec(),
            Report::Ds4(r) => r.to_bytes().to_vec(),
            Report::Ds4Ex(r) => r.to_bytes().to_vec(),
        }
    }
}

/// Replace the d-pad nibble of a DS4 button field, leaving bits 4-15 alone.
#[inline]
pub fn set_dpad(buttons: u16, direction: DPad) -> u16 {
    (buttons & !0x000F) | u16::from(direction.code())
}

// Float scaling widens to f64 before multiplying and rounds half away from
// zero (`f64::round`). Inputs are clamped to their domain first and NaN maps
// to the rest position, so results never wrap.

/// `[-1.0, 1.0]` to `i16`, symmetric: `-1.0` maps to `-32767`.
pub fn scale_axis_signed(value: f32) -> i16 {
    if value.is_nan() {
        return 0;
    }
    (f64::from(value.clamp(-1.0, 1.0)) * 32767.0).round() as i16
}

/// `[-1.0, 1.0]` to `u8` around a 128 centre: `-1.0 -> 1`, `1.0 -> 255`.
pub fn scale_axis_unsigned(value: f32) -> u8 {
    if value.is_nan() {
        return DS4_STICK_CENTER;
    }
    let offset = (f64::from(value.clamp(-1.0, 1.0)) * 127.0).round() as i16;
    (128 + offset) as u8
}

/// `[0.0, 1.0]` to `u8`.
pub fn scale_trigger(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (f64::from(value.clamp(0.0, 1.0)) * 255.0).round() as u8
}
