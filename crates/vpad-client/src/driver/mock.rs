//! In-memory bus driver. Records every call and lets tests inject failures.

use super::{BusDriver, BusPtr, TargetPtr};
use crate::notify::{Notification, NotificationSink};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};
use std::time::Duration;
use tracing::trace;
use vpad_protocol::{DeviceKind, DriverError, Report};

/// Knobs for the next driver calls. Defaults behave like a healthy bus.
#[derive(Clone, Debug, Default)]
pub struct Behavior {
    pub fail_alloc: bool,
    pub fail_connect: Option<DriverError>,
    pub connect_delay: Duration,
    pub fail_target_alloc: bool,
    pub fail_add: Option<DriverError>,
    /// `target_add` succeeds but the target never reports attached.
    pub stay_detached: bool,
    pub fail_remove: Option<DriverError>,
    pub fail_update: Option<DriverError>,
    pub fail_register: Option<DriverError>,
    pub fail_user_index: Option<DriverError>,
}

/// One recorded driver call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Alloc(BusPtr),
    Free(BusPtr),
    Connect(BusPtr),
    Disconnect(BusPtr),
    TargetAlloc(DeviceKind, TargetPtr),
    TargetFree(TargetPtr),
    TargetAdd(TargetPtr),
    TargetRemove(TargetPtr),
    Update(TargetPtr, Vec<u8>),
    SetVendorId(TargetPtr, u16),
    SetProductId(TargetPtr, u16),
    Register(TargetPtr),
    Unregister(TargetPtr),
}

#[derive(Debug)]
struct MockTarget {
    kind: DeviceKind,
    attached: bool,
    vendor_id: u16,
    product_id: u16,
    index: u32,
    sink: Option<Arc<NotificationSink>>,
}

pub struct MockDriver {
    next: AtomicUsize,
    next_index: AtomicU32,
    live: DashMap<TargetPtr, MockTarget>,
    calls: Mutex<Vec<Call>>,
    behavior: Mutex<Behavior>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicUsize::new(0x1000),
            next_index: AtomicU32::new(1),
            live: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            behavior: Mutex::new(Behavior::default()),
        })
    }

    pub fn behave(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.behavior.lock());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Wire bytes of every report sent to `target`, oldest first.
    pub fn reports(&self, target: TargetPtr) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Update(t, bytes) if *t == target => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_report(&self, target: TargetPtr) -> Option<Vec<u8>> {
        self.reports(target).pop()
    }

    /// Targets allocated and not yet freed.
    pub fn live_targets(&self) -> usize {
        self.live.len()
    }

    pub fn has_sink(&self, target: TargetPtr) -> bool {
        self.live.get(&target).is_some_and(|t| t.sink.is_some())
    }

    /// Delivers `notification` the way the driver would, from the calling
    /// thread. Returns false when no handler is registered.
    pub fn notify(&self, target: TargetPtr, notification: Notification) -> bool {
        let sink = self.live.get(&target).and_then(|t| t.sink.clone());
        match sink {
            Some(sink) => {
                sink.deliver(notification);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: Call) {
        trace!(?call, "mock driver call");
        self.calls.lock().push(call);
    }

    fn fresh(&self) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl BusDriver for MockDriver {
    fn alloc(&self) -> Option<BusPtr> {
        if self.behavior.lock().fail_alloc {
            return None;
        }
        let bus = BusPtr(self.fresh());
        self.record(Call::Alloc(bus));
        Some(bus)
    }

    fn free(&self, bus: BusPtr) {
        self.record(Call::Free(bus));
    }

    fn connect(&self, bus: BusPtr) -> Result<(), DriverError> {
        let (delay, fail) = {
            let b = self.behavior.lock();
            (b.connect_delay, b.fail_connect)
        };
        self.record(Call::Connect(bus));
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        fail.map_or(Ok(()), Err)
    }

    fn disconnect(&self, bus: BusPtr) {
        self.record(Call::Disconnect(bus));
    }

    fn target_alloc(&self, kind: DeviceKind) -> Option<TargetPtr> {
        if self.behavior.lock().fail_target_alloc {
            return None;
        }
        let target = TargetPtr(self.fresh());
        let (vendor_id, product_id) = match kind {
            DeviceKind::X360 => (0x045E, 0x028E),
            DeviceKind::DS4 => (0x054C, 0x05C4),
        };
        self.live.insert(
            target,
            MockTarget { kind, attached: false, vendor_id, product_id, index: 0, sink: None },
        );
        self.record(Call::TargetAlloc(kind, target));
        Some(target)
    }

    fn target_free(&self, target: TargetPtr) {
        self.live.remove(&target);
        self.record(Call::TargetFree(target));
    }

    fn target_add(&self, _bus: BusPtr, target: TargetPtr) -> Result<(), DriverError> {
        self.record(Call::TargetAdd(target));
        let b = self.behavior.lock().clone();
        if let Some(code) = b.fail_add {
            return Err(code);
        }
        let mut t = self.live.get_mut(&target).ok_or(DriverError::INVALID_TARGET)?;
        t.attached = !b.stay_detached;
        t.index = self.next_index.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn target_remove(&self, _bus: BusPtr, target: TargetPtr) -> Result<(), DriverError> {
        self.record(Call::TargetRemove(target));
        if let Some(code) = self.behavior.lock().fail_remove {
            return Err(code);
        }
        if let Some(mut t) = self.live.get_mut(&target) {
            t.attached = false;
        }
        Ok(())
    }

    fn target_is_attached(&self, target: TargetPtr) -> bool {
        self.live.get(&target).is_some_and(|t| t.attached)
    }

    fn target_update(
        &self,
        _bus: BusPtr,
        target: TargetPtr,
        report: Report<'_>,
    ) -> Result<(), DriverError> {
        if let Some(code) = self.behavior.lock().fail_update {
            return Err(code);
        }
        let kind_ok = self.live.get(&target).is_some_and(|t| t.attached && t.kind == report.kind());
        if !kind_ok {
            return Err(DriverError::TARGET_NOT_PLUGGED_IN);
        }
        self.record(Call::Update(target, report.to_vec()));
        Ok(())
    }

    fn target_vendor_id(&self, target: TargetPtr) -> u16 {
        self.live.get(&target).map_or(0, |t| t.vendor_id)
    }

    fn target_set_vendor_id(&self, target: TargetPtr, vid: u16) {
        if let Some(mut t) = self.live.get_mut(&target) {
            t.vendor_id = vid;
        }
        self.record(Call::SetVendorId(target, vid));
    }

    fn target_product_id(&self, target: TargetPtr) -> u16 {
        self.live.get(&target).map_or(0, |t| t.product_id)
    }

    fn target_set_product_id(&self, target: TargetPtr, pid: u16) {
        if let Some(mut t) = self.live.get_mut(&target) {
            t.product_id = pid;
        }
        self.record(Call::SetProductId(target, pid));
    }

    fn target_index(&self, target: TargetPtr) -> u32 {
        self.live.get(&target).map_or(0, |t| t.index)
    }

    fn x360_user_index(&self, _bus: BusPtr, target: TargetPtr) -> Result<u32, DriverError> {
        if let Some(code) = self.behavior.lock().fail_user_index {
            return Err(code);
        }
        let t = self.live.get(&target).ok_or(DriverError::INVALID_TARGET)?;
        if t.kind != DeviceKind::X360 {
            return Err(DriverError::INVALID_TARGET);
        }
        // XInput slots are 0-based; bus indices start at 1
        Ok(t.index.saturating_sub(1) % 4)
    }

    fn register_notification(
        &self,
        _bus: BusPtr,
        target: TargetPtr,
        _kind: DeviceKind,
        sink: Arc<NotificationSink>,
    ) -> Result<(), DriverError> {
        self.record(Call::Register(target));
        if let Some(code) = self.behavior.lock().fail_register {
            return Err(code);
        }
        let mut t = self.live.get_mut(&target).ok_or(DriverError::INVALID_TARGET)?;
        if t.sink.is_some() {
            return Err(DriverError::CALLBACK_ALREADY_REGISTERED);
        }
        t.sink = Some(sink);
        Ok(())
    }

    fn unregister_notification(&self, target: TargetPtr, _kind: DeviceKind) {
        if let Some(mut t) = self.live.get_mut(&target) {
            t.sink = None;
        }
        self.record(Call::Unregister(target));
    }
}
