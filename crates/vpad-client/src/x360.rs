use tracing::{debug, info, instrument};
use vpad_protocol::{
    DeviceKind, Report, XusbButtons, XusbReport, scale_axis_signed, scale_trigger,
};

use crate::bus::Bus;
use crate::device::{DeviceHandle, PadOptions};
use crate::error::Result;
use crate::gamepad::Gamepad;

/// A virtual wired Xbox 360 controller.
pub struct X360Controller {
    handle: DeviceHandle,
    report: XusbReport,
}

impl X360Controller {
    pub fn new(bus: &Bus) -> Result<Self> {
        Self::with_options(bus, PadOptions::default())
    }

    /// Plugs in a controller and sends the neutral report. On any failure
    /// the target is removed and freed before the error is returned.
    #[instrument(level = "info", skip(bus))]
    pub fn with_options(bus: &Bus, options: PadOptions) -> Result<Self> {
        let conn = bus.get_or_create()?;
        let handle = DeviceHandle::open(&conn, DeviceKind::X360, &options)?;
        let mut pad = Self { handle, report: XusbReport::default() };
        if let Err(e) = pad.update() {
            pad.close();
            return Err(e);
        }
        info!(handle = ?pad.handle.target(), "x360 controller ready");
        Ok(pad)
    }

    /// Current logical state.
    pub fn report(&self) -> &XusbReport {
        &self.report
    }

    pub fn press_button(&mut self, button: XusbButtons) {
        self.report.buttons |= button.bits();
    }

    pub fn release_button(&mut self, button: XusbButtons) {
        self.report.buttons &= !button.bits();
    }

    pub fn left_trigger(&mut self, value: u8) {
        self.report.left_trigger = value;
    }

    pub fn right_trigger(&mut self, value: u8) {
        self.report.right_trigger = value;
    }

    /// `0.0` released, `1.0` fully pressed.
    pub fn left_trigger_float(&mut self, value: f32) {
        self.left_trigger(scale_trigger(value));
    }

    pub fn right_trigger_float(&mut self, value: f32) {
        self.right_trigger(scale_trigger(value));
    }

    pub fn left_joystick(&mut self, x: i16, y: i16) {
        self.report.thumb_lx = x;
        self.report.thumb_ly = y;
    }

    pub fn right_joystick(&mut self, x: i16, y: i16) {
        self.report.thumb_rx = x;
        self.report.thumb_ry = y;
    }

    /// `-1.0..=1.0` per axis, `0.0` centred.
    pub fn left_joystick_float(&mut self, x: f32, y: f32) {
        self.left_joystick(scale_axis_signed(x), scale_axis_signed(y));
    }

    pub fn right_joystick_float(&mut self, x: f32, y: f32) {
        self.right_joystick(scale_axis_signed(x), scale_axis_signed(y));
    }

    /// XInput slot (0-3) the host assigned to this controller.
    pub fn user_index(&self) -> Result<u32> {
        self.handle.user_index()
    }
}

impl Gamepad for X360Controller {
    fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut DeviceHandle {
        &mut self.handle
    }

    fn update(&self) -> Result<()> {
        debug!(report = ?self.report, "x360 update");
        self.handle.send(Report::X360(&self.report))
    }

    fn reset(&mut self) {
        self.report = XusbReport::default();
    }
}
