use tracing::{debug, info, instrument};
use vpad_protocol::{
    DPad, DeviceKind, Ds4Buttons, Ds4Report, Ds4ReportEx, Ds4SpecialButtons, Report,
    scale_axis_unsigned, scale_trigger,
};

use crate::bus::Bus;
use crate::device::{DeviceHandle, PadOptions};
use crate::error::Result;
use crate::gamepad::Gamepad;

/// A virtual DualShock 4 (v1) controller.
pub struct Ds4Controller {
    handle: DeviceHandle,
    report: Ds4Report,
}

impl Ds4Controller {
    pub fn new(bus: &Bus) -> Result<Self> {
        Self::with_options(bus, PadOptions::default())
    }

    /// Plugs in a controller and sends the resting report (sticks centred,
    /// d-pad neutral). On any failure the target is removed and freed.
    #[instrument(level = "info", skip(bus))]
    pub fn with_options(bus: &Bus, options: PadOptions) -> Result<Self> {
        let conn = bus.get_or_create()?;
        let handle = DeviceHandle::open(&conn, DeviceKind::DS4, &options)?;
        let mut pad = Self { handle, report: Ds4Report::default() };
        if let Err(e) = pad.update() {
            pad.close();
            return Err(e);
        }
        info!(handle = ?pad.handle.target(), "ds4 controller ready");
        Ok(pad)
    }

    pub fn report(&self) -> &Ds4Report {
        &self.report
    }

    /// Face, shoulder and thumb buttons. The d-pad nibble is never touched;
    /// use [`directional_pad`](Self::directional_pad) for that.
    pub fn press_button(&mut self, button: Ds4Buttons) {
        self.report.buttons |= button.bits();
    }

    pub fn release_button(&mut self, button: Ds4Buttons) {
        self.report.buttons &= !button.bits();
    }

    pub fn press_special_button(&mut self, button: Ds4SpecialButtons) {
        self.report.special |= button.bits();
    }

    pub fn release_special_button(&mut self, button: Ds4SpecialButtons) {
        self.report.special &= !button.bits();
    }

    pub fn directional_pad(&mut self, direction: DPad) {
        self.report.set_dpad(direction);
    }

    pub fn left_trigger(&mut self, value: u8) {
        self.report.trigger_l = value;
    }

    pub fn right_trigger(&mut self, value: u8) {
        self.report.trigger_r = value;
    }

    pub fn left_trigger_float(&mut self, value: f32) {
        self.left_trigger(scale_trigger(value));
    }

    pub fn right_trigger_float(&mut self, value: f32) {
        self.right_trigger(scale_trigger(value));
    }

    /// Raw stick position, `0x80` centred.
    pub fn left_joystick(&mut self, x: u8, y: u8) {
        self.report.thumb_lx = x;
        self.report.thumb_ly = y;
    }

    pub fn right_joystick(&mut self, x: u8, y: u8) {
        self.report.thumb_rx = x;
        self.report.thumb_ry = y;
    }

    pub fn left_joystick_float(&mut self, x: f32, y: f32) {
        self.left_joystick(scale_axis_unsigned(x), scale_axis_unsigned(y));
    }

    pub fn right_joystick_float(&mut self, x: f32, y: f32) {
        self.right_joystick(scale_axis_unsigned(x), scale_axis_unsigned(y));
    }

    /// Sends `report` as-is. The controller's own state is left alone, so
    /// the next [`update`](Gamepad::update) sends the simple report again.
    pub fn update_extended_report(&self, report: &Ds4ReportEx) -> Result<()> {
        debug!(report = ?report.report, timestamp = report.timestamp, "ds4 extended update");
        self.handle.send(Report::Ds4Ex(report))
    }
}

impl Gamepad for Ds4Controller {
    fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut DeviceHandle {
        &mut self.handle
    }

    fn update(&self) -> Result<()> {
        debug!(report = ?self.report, "ds4 update");
        self.handle.send(Report::Ds4(&self.report))
    }

    fn reset(&mut self) {
        self.report = Ds4Report::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{Call, MockDriver};
    use crate::error::Error;
    use crate::notify::Notification;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};
    use vpad_protocol::{DriverError, LightbarColor, TouchPoint};

    fn pad() -> (Arc<MockDriver>, Arc<Bus>, Ds4Controller) {
        let mock = MockDriver::new();
        let bus = Bus::new(mock.clone());
        let pad = Ds4Controller::new(&bus).unwrap();
        (mock, bus, pad)
    }

    #[test]
    fn construction_sends_resting_report() {
        let (mock, _bus, pad) = pad();
        assert_eq!(
            mock.reports(pad.handle().target()),
            vec![vec![0x80, 0x80, 0x80, 0x80, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]]
        );
        assert_eq!(pad.kind(), DeviceKind::DS4);
        assert_eq!(pad.vendor_id(), Ok(0x054C));
    }

    #[test]
    fn buttons_dpad_and_trigger() {
        let (mock, _bus, mut pad) = pad();
        pad.press_button(Ds4Buttons::TRIANGLE);
        pad.press_button(Ds4Buttons::CIRCLE);
        pad.directional_pad(DPad::North);
        pad.left_trigger_float(0.5);
        pad.update().unwrap();

        assert_eq!(pad.report().buttons, 0x00C0);
        assert_eq!(pad.report().trigger_l, 128);
        let bytes = mock.last_report(pad.handle().target()).unwrap();
        assert_eq!(bytes[4..6], [0xC0, 0x00]);
        assert_eq!(bytes[7], 128);
    }

    #[test]
    fn dpad_and_buttons_are_independent() {
        let (_mock, _bus, mut pad) = pad();
        pad.directional_pad(DPad::SouthWest);
        pad.press_button(Ds4Buttons::CROSS | Ds4Buttons::OPTIONS);
        pad.release_button(Ds4Buttons::CROSS);
        pad.release_button(Ds4Buttons::CROSS);
        assert_eq!(pad.report().dpad(), DPad::SouthWest);
        assert_eq!(pad.report().buttons(), Ds4Buttons::OPTIONS);

        pad.directional_pad(DPad::Neutral);
        assert_eq!(pad.report().buttons, 0x2008);
    }

    #[test]
    fn special_buttons() {
        let (mock, _bus, mut pad) = pad();
        pad.press_special_button(Ds4SpecialButtons::PS);
        pad.press_special_button(Ds4SpecialButtons::TOUCHPAD);
        pad.release_special_button(Ds4SpecialButtons::PS);
        pad.update().unwrap();
        assert_eq!(pad.report().special(), Ds4SpecialButtons::TOUCHPAD);
        assert_eq!(mock.last_report(pad.handle().target()).unwrap()[6], 0x02);
    }

    #[test]
    fn float_sticks_are_offset_from_centre() {
        let (_mock, _bus, mut pad) = pad();
        pad.left_joystick_float(-1.0, 1.0);
        pad.right_joystick_float(0.0, f32::NAN);
        let r = pad.report();
        assert_eq!((r.thumb_lx, r.thumb_ly), (1, 255));
        assert_eq!((r.thumb_rx, r.thumb_ry), (128, 128));
    }

    #[test]
    fn reset_restores_resting_state() {
        let (mock, _bus, mut pad) = pad();
        pad.press_button(Ds4Buttons::SQUARE);
        pad.directional_pad(DPad::East);
        pad.right_trigger(200);
        pad.left_joystick(0, 0);
        pad.reset();
        assert_eq!(*pad.report(), Ds4Report::default());
        assert_eq!(pad.report().dpad(), DPad::Neutral);
        assert_eq!(mock.reports(pad.handle().target()).len(), 1);
    }

    #[test]
    fn extended_report_is_sent_verbatim() {
        let (mock, _bus, mut pad) = pad();
        pad.press_button(Ds4Buttons::CROSS);
        let mut ex = Ds4ReportEx::from(*pad.report());
        ex.timestamp = 188;
        ex.gyro_x = -2;
        ex.current_touch.finger1 = TouchPoint::new(true, 3, 100, 200);
        pad.update_extended_report(&ex).unwrap();

        let bytes = mock.last_report(pad.handle().target()).unwrap();
        assert_eq!(bytes.len(), 63);
        assert_eq!(bytes, ex.to_bytes().to_vec());
        // the logical report is not replaced
        assert_eq!(*pad.report(), ex.report);
        pad.reset();
        assert_ne!(*pad.report(), ex.report);
    }

    #[test]
    fn update_failure_keeps_state() {
        let (mock, _bus, mut pad) = pad();
        mock.behave(|b| b.fail_update = Some(DriverError::INVALID_TARGET));
        pad.directional_pad(DPad::West);
        let err = pad.update().unwrap_err();
        assert_eq!(err.driver_code(), Some(DriverError::INVALID_TARGET));
        assert_eq!(pad.report().dpad(), DPad::West);
    }

    #[test]
    fn closed_controller_rejects_driver_calls() {
        let (mock, _bus, mut pad) = pad();
        pad.close();
        pad.press_button(Ds4Buttons::SHARE);
        assert!(pad.report().buttons().contains(Ds4Buttons::SHARE));
        assert_eq!(pad.update(), Err(Error::DeviceClosed));
        assert_eq!(
            pad.update_extended_report(&Ds4ReportEx::default()),
            Err(Error::DeviceClosed)
        );
        assert_eq!(pad.set_vendor_id(1), Err(Error::DeviceClosed));
        assert_eq!(pad.index(), Err(Error::DeviceClosed));
        pad.close();
        assert_eq!(mock.count(|c| matches!(c, Call::TargetFree(_))), 1);
    }

    #[test]
    fn bus_close_invalidates_controller() {
        let (mock, bus, pad) = pad();
        bus.close();
        assert_eq!(pad.update(), Err(Error::BusNotConnected));
        drop(pad);
        // removal is skipped on a dead bus but the target is still freed
        assert_eq!(mock.count(|c| matches!(c, Call::TargetRemove(_))), 0);
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn lightbar_feedback() {
        let (mock, _bus, mut pad) = pad();
        let seen = Arc::new(AtomicU8::new(0));
        let sink = seen.clone();
        pad.register_notification(move |n| {
            if let Notification::Ds4 { lightbar, .. } = n {
                sink.store(lightbar.blue, Ordering::SeqCst);
            }
        })
        .unwrap();

        let target = pad.handle().target();
        let color = LightbarColor { red: 0, green: 0, blue: 64 };
        assert!(mock.notify(
            target,
            Notification::Ds4 { large_motor: 0, small_motor: 0, lightbar: color }
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 64);

        pad.unregister_notification();
        assert!(!mock.has_sink(target));
    }

    #[test]
    fn ds4_has_no_user_index_but_has_bus_index() {
        let (_mock, _bus, pad) = pad();
        assert_eq!(pad.index(), Ok(1));
        assert_eq!(
            pad.handle().user_index(),
            Err(Error::UserIndexFailed(DriverError::INVALID_TARGET))
        );
    }
}
