use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use vpad_protocol::{DeviceKind, DriverError, Report};

use crate::bus::{BusConnection, LiveGuard};
use crate::driver::{BusDriver, TargetPtr};
use crate::error::{AllocTarget, Error, Result};
use crate::notify::{Notification, NotificationSink};

/// Per-device overrides applied before the target is plugged in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadOptions {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    Allocated,
    Attached,
    Freed,
}

/// One allocated target on the bus.
///
/// Holds only a weak reference to the connection; the bus outlives nothing
/// on account of its devices. The target is freed exactly once, on
/// [`close`](Self::close) or drop.
pub struct DeviceHandle {
    driver: Arc<dyn BusDriver>,
    bus: Weak<BusConnection>,
    target: TargetPtr,
    kind: DeviceKind,
    state: TargetState,
    notification: Option<Arc<NotificationSink>>,
}

impl DeviceHandle {
    /// Allocates a target of `kind` without plugging it in.
    pub fn allocate(conn: &Arc<BusConnection>, kind: DeviceKind) -> Result<Self> {
        let _live = conn.live()?;
        Self::allocate_locked(conn, kind)
    }

    fn allocate_locked(conn: &Arc<BusConnection>, kind: DeviceKind) -> Result<Self> {
        let driver = conn.driver().clone();
        let target = driver
            .target_alloc(kind)
            .ok_or(Error::AllocationFailed(AllocTarget::Target(kind)))?;
        debug!(handle = ?target, ?kind, "target allocated");
        Ok(Self {
            driver,
            bus: Arc::downgrade(conn),
            target,
            kind,
            state: TargetState::Allocated,
            notification: None,
        })
    }

    /// Allocate, apply `options`, then attach. Nothing is left allocated if
    /// any step fails. The connection cannot close part-way through.
    #[instrument(level = "debug", skip(conn))]
    pub fn open(
        conn: &Arc<BusConnection>,
        kind: DeviceKind,
        options: &PadOptions,
    ) -> Result<Self> {
        let live = conn.live()?;
        let mut handle = Self::allocate_locked(conn, kind)?;
        if let Some(vid) = options.vendor_id {
            handle.driver.target_set_vendor_id(handle.target, vid);
        }
        if let Some(pid) = options.product_id {
            handle.driver.target_set_product_id(handle.target, pid);
        }
        if let Err(e) = handle.attach_locked(conn, &live) {
            drop(live);
            handle.close();
            return Err(e);
        }
        Ok(handle)
    }

    /// Plugs an allocated target into the bus. On failure the target is
    /// freed and the handle is closed.
    pub fn attach(&mut self) -> Result<()> {
        match self.state {
            TargetState::Allocated => {}
            TargetState::Attached => return Ok(()),
            TargetState::Freed => return Err(Error::DeviceClosed),
        }
        let attached = self.connection().and_then(|conn| {
            let live = conn.live()?;
            self.attach_locked(&conn, &live)
        });
        if attached.is_err() {
            self.close();
        }
        attached
    }

    fn attach_locked(&mut self, conn: &BusConnection, _live: &LiveGuard<'_>) -> Result<()> {
        self.driver.target_add(conn.ptr(), self.target).map_err(Error::AttachFailed)?;
        if !self.driver.target_is_attached(self.target) {
            if let Err(code) = self.driver.target_remove(conn.ptr(), self.target) {
                warn!(handle = ?self.target, error = %code, "removing half-attached target failed");
            }
            return Err(Error::NotAttached);
        }
        self.state = TargetState::Attached;
        info!(handle = ?self.target, kind = ?self.kind, "target attached");
        Ok(())
    }

    #[inline]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    #[inline]
    pub fn target(&self) -> TargetPtr {
        self.target
    }

    #[inline]
    pub fn state(&self) -> TargetState {
        self.state
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == TargetState::Freed
    }

    fn connection(&self) -> Result<Arc<BusConnection>> {
        self.bus.upgrade().ok_or(Error::BusNotConnected)
    }

    fn ensure_attached(&self) -> Result<()> {
        match self.state {
            TargetState::Attached => Ok(()),
            TargetState::Allocated => Err(Error::NotAttached),
            TargetState::Freed => Err(Error::DeviceClosed),
        }
    }

    fn ensure_allocated(&self) -> Result<()> {
        if self.is_closed() { Err(Error::DeviceClosed) } else { Ok(()) }
    }

    /// Submits one report. No retry on failure.
    pub fn send(&self, report: Report<'_>) -> Result<()> {
        self.ensure_attached()?;
        let conn = self.connection()?;
        let _live = conn.live()?;
        self.driver.target_update(conn.ptr(), self.target, report).map_err(|code| {
            debug!(handle = ?self.target, error = %code, "update rejected");
            Error::UpdateFailed(code)
        })
    }

    pub fn vendor_id(&self) -> Result<u16> {
        self.ensure_allocated()?;
        Ok(self.driver.target_vendor_id(self.target))
    }

    pub fn product_id(&self) -> Result<u16> {
        self.ensure_allocated()?;
        Ok(self.driver.target_product_id(self.target))
    }

    pub fn set_vendor_id(&mut self, vid: u16) -> Result<()> {
        self.ensure_allocated()?;
        self.driver.target_set_vendor_id(self.target, vid);
        Ok(())
    }

    pub fn set_product_id(&mut self, pid: u16) -> Result<()> {
        self.ensure_allocated()?;
        self.driver.target_set_product_id(self.target, pid);
        Ok(())
    }

    /// Serial number the bus assigned when the target was attached.
    pub fn index(&self) -> Result<u32> {
        self.ensure_attached()?;
        Ok(self.driver.target_index(self.target))
    }

    pub fn user_index(&self) -> Result<u32> {
        self.ensure_attached()?;
        if self.kind != DeviceKind::X360 {
            return Err(Error::UserIndexFailed(DriverError::INVALID_TARGET));
        }
        let conn = self.connection()?;
        let _live = conn.live()?;
        self.driver.x360_user_index(conn.ptr(), self.target).map_err(Error::UserIndexFailed)
    }

    /// Installs `handler` for rumble/LED feedback, replacing any previous
    /// handler. The handler runs on a driver thread.
    #[instrument(level = "debug", skip(self, handler), fields(handle = ?self.target))]
    pub fn register_notification<F>(&mut self, handler: F) -> Result<()>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.ensure_attached()?;
        let conn = self.connection()?;
        let _live = conn.live()?;

        self.release_notification();
        let sink = NotificationSink::new(handler);
        self.driver
            .register_notification(conn.ptr(), self.target, self.kind, sink.clone())
            .map_err(Error::NotificationError)?;
        self.notification = Some(sink);
        Ok(())
    }

    pub fn has_notification(&self) -> bool {
        self.notification.is_some()
    }

    pub fn unregister_notification(&mut self) {
        self.release_notification();
    }

    fn release_notification(&mut self) {
        if let Some(sink) = self.notification.take() {
            self.driver.unregister_notification(self.target, self.kind);
            debug!(handle = ?self.target, "notification unregistered");
            // only now is the driver done with the sink
            drop(sink);
        }
    }

    /// Unplugs and frees the target. Safe to call repeatedly; later calls do
    /// nothing. Driver failures here are logged, not returned.
    #[instrument(level = "debug", skip(self), fields(handle = ?self.target))]
    pub fn close(&mut self) {
        match self.state {
            TargetState::Freed => return,
            TargetState::Allocated => {}
            TargetState::Attached => {
                self.release_notification();
                match self.bus.upgrade() {
                    Some(conn) => match conn.live() {
                        Ok(_live) => {
                            if let Err(code) = self.driver.target_remove(conn.ptr(), self.target) {
                                warn!(error = %code, "target removal failed");
                            }
                        }
                        Err(_) => debug!("bus already closed, skipping removal"),
                    },
                    None => debug!("bus gone, skipping removal"),
                }
            }
        }
        self.driver.target_free(self.target);
        self.state = TargetState::Freed;
        info!("target freed");
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::driver::mock::{Call, MockDriver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vpad_protocol::XusbReport;

    fn setup() -> (Arc<MockDriver>, Arc<Bus>, Arc<BusConnection>) {
        let mock = MockDriver::new();
        let bus = Bus::new(mock.clone());
        let conn = bus.get_or_create().unwrap();
        (mock, bus, conn)
    }

    #[test]
    fn open_attaches_and_close_frees_once() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).unwrap();
        assert_eq!(h.state(), TargetState::Attached);
        assert_eq!(mock.live_targets(), 1);

        h.close();
        h.close();
        drop(h);
        assert_eq!(mock.count(|c| matches!(c, Call::TargetRemove(_))), 1);
        assert_eq!(mock.count(|c| matches!(c, Call::TargetFree(_))), 1);
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn null_target_is_allocation_failure() {
        let (mock, _bus, conn) = setup();
        mock.behave(|b| b.fail_target_alloc = true);
        let err = DeviceHandle::open(&conn, DeviceKind::DS4, &PadOptions::default()).err();
        assert_eq!(err, Some(Error::AllocationFailed(AllocTarget::Target(DeviceKind::DS4))));
    }

    #[test]
    fn add_failure_rolls_back() {
        let (mock, _bus, conn) = setup();
        mock.behave(|b| b.fail_add = Some(DriverError::NO_FREE_SLOT));
        let err = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).err();
        assert_eq!(err, Some(Error::AttachFailed(DriverError::NO_FREE_SLOT)));
        assert_eq!(mock.live_targets(), 0);
        assert_eq!(mock.count(|c| matches!(c, Call::TargetFree(_))), 1);
    }

    #[test]
    fn silent_attach_failure_rolls_back() {
        let (mock, _bus, conn) = setup();
        mock.behave(|b| b.stay_detached = true);
        let err = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).err();
        assert_eq!(err, Some(Error::NotAttached));
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn failed_attach_frees_allocated_target() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::allocate(&conn, DeviceKind::X360).unwrap();
        mock.behave(|b| b.fail_add = Some(DriverError::NO_FREE_SLOT));

        assert_eq!(h.attach(), Err(Error::AttachFailed(DriverError::NO_FREE_SLOT)));
        assert_eq!(h.state(), TargetState::Freed);
        assert_eq!(mock.live_targets(), 0);
        assert_eq!(mock.count(|c| matches!(c, Call::TargetFree(_))), 1);
        assert_eq!(h.attach(), Err(Error::DeviceClosed));
        drop(h);
        assert_eq!(mock.count(|c| matches!(c, Call::TargetFree(_))), 1);
    }

    #[test]
    fn detached_after_add_frees_allocated_target() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::allocate(&conn, DeviceKind::DS4).unwrap();
        mock.behave(|b| b.stay_detached = true);

        assert_eq!(h.attach(), Err(Error::NotAttached));
        assert!(h.is_closed());
        assert_eq!(mock.count(|c| matches!(c, Call::TargetRemove(_))), 1);
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn attach_on_closed_bus_frees_target() {
        let (mock, bus, conn) = setup();
        let mut h = DeviceHandle::allocate(&conn, DeviceKind::X360).unwrap();
        drop(conn);
        bus.close();

        assert_eq!(h.attach(), Err(Error::BusNotConnected));
        assert!(h.is_closed());
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn options_apply_before_attach() {
        let (mock, _bus, conn) = setup();
        let opts = PadOptions { vendor_id: Some(0x1234), product_id: Some(0xABCD) };
        let h = DeviceHandle::open(&conn, DeviceKind::DS4, &opts).unwrap();
        assert_eq!(h.vendor_id(), Ok(0x1234));
        assert_eq!(h.product_id(), Ok(0xABCD));

        let calls = mock.calls();
        let pos = |want: fn(&Call) -> bool| calls.iter().position(want).unwrap();
        let add = pos(|c| matches!(c, Call::TargetAdd(_)));
        assert!(pos(|c| matches!(c, Call::SetVendorId(..))) < add);
        assert!(pos(|c| matches!(c, Call::SetProductId(..))) < add);
    }

    #[test]
    fn send_outside_attached_state() {
        let (_mock, _bus, conn) = setup();
        let mut h = DeviceHandle::allocate(&conn, DeviceKind::X360).unwrap();
        let report = XusbReport::default();
        assert_eq!(h.send(Report::X360(&report)), Err(Error::NotAttached));

        h.attach().unwrap();
        assert_eq!(h.send(Report::X360(&report)), Ok(()));

        h.close();
        assert_eq!(h.send(Report::X360(&report)), Err(Error::DeviceClosed));
        assert_eq!(h.vendor_id(), Err(Error::DeviceClosed));
        assert_eq!(h.attach(), Err(Error::DeviceClosed));
    }

    #[test]
    fn send_failure_carries_code() {
        let (mock, _bus, conn) = setup();
        let h = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).unwrap();
        mock.behave(|b| b.fail_update = Some(DriverError::BUS_INVALID_HANDLE));
        let report = XusbReport::default();
        assert_eq!(
            h.send(Report::X360(&report)),
            Err(Error::UpdateFailed(DriverError::BUS_INVALID_HANDLE))
        );
    }

    #[test]
    fn closed_bus_rejects_new_devices_and_sends() {
        let (mock, bus, conn) = setup();
        let mut h = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).unwrap();
        bus.close();

        assert!(matches!(
            DeviceHandle::allocate(&conn, DeviceKind::X360),
            Err(Error::BusNotConnected)
        ));
        let report = XusbReport::default();
        assert_eq!(h.send(Report::X360(&report)), Err(Error::BusNotConnected));

        // removal is skipped once the bus is gone, but the target is still freed
        h.close();
        assert_eq!(mock.count(|c| matches!(c, Call::TargetRemove(_))), 0);
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn notification_lifetime() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        h.register_notification(move |n| {
            assert_eq!(n.motors(), (10, 20));
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(h.has_notification());

        let n = Notification::X360 { large_motor: 10, small_motor: 20, led_number: 1 };
        assert!(mock.notify(h.target(), n));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // re-registering replaces the old handler rather than stacking it
        h.register_notification(|_| {}).unwrap();
        assert_eq!(mock.count(|c| matches!(c, Call::Unregister(_))), 1);

        h.unregister_notification();
        assert!(!h.has_notification());
        assert!(!mock.notify(h.target(), n));

        h.unregister_notification();
        assert_eq!(mock.count(|c| matches!(c, Call::Unregister(_))), 2);
    }

    #[test]
    fn register_failure_keeps_nothing() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::open(&conn, DeviceKind::DS4, &PadOptions::default()).unwrap();
        mock.behave(|b| b.fail_register = Some(DriverError::CALLBACK_ALREADY_REGISTERED));
        assert_eq!(
            h.register_notification(|_| {}),
            Err(Error::NotificationError(DriverError::CALLBACK_ALREADY_REGISTERED))
        );
        assert!(!h.has_notification());
    }

    #[test]
    fn close_unregisters_before_free() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::open(&conn, DeviceKind::DS4, &PadOptions::default()).unwrap();
        let target = h.target();
        h.register_notification(|_| {}).unwrap();
        h.close();

        let calls = mock.calls();
        let unreg = calls.iter().position(|c| *c == Call::Unregister(target)).unwrap();
        let free = calls.iter().position(|c| *c == Call::TargetFree(target)).unwrap();
        assert!(unreg < free);
    }

    #[test]
    fn removal_failure_still_frees() {
        let (mock, _bus, conn) = setup();
        let mut h = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).unwrap();
        mock.behave(|b| b.fail_remove = Some(DriverError::REMOVAL_FAILED));
        h.close();
        assert!(h.is_closed());
        assert_eq!(mock.live_targets(), 0);
    }

    #[test]
    fn user_index_is_x360_only() {
        let (_mock, _bus, conn) = setup();
        let x = DeviceHandle::open(&conn, DeviceKind::X360, &PadOptions::default()).unwrap();
        let d = DeviceHandle::open(&conn, DeviceKind::DS4, &PadOptions::default()).unwrap();
        assert_eq!(x.user_index(), Ok(0));
        assert_eq!(d.user_index(), Err(Error::UserIndexFailed(DriverError::INVALID_TARGET)));
        assert_eq!(d.index(), Ok(2));
    }
}
