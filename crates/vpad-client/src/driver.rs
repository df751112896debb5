//! The contract this crate calls through to reach the emulation bus driver.

pub mod mock;
#[cfg(windows)]
pub mod vigem;

use std::sync::Arc;

use vpad_protocol::{DeviceKind, DriverError, Report};

use crate::notify::NotificationSink;

/// Opaque driver-side bus client handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BusPtr(pub usize);

/// Opaque driver-side target handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetPtr(pub usize);

/// Calls exposed by a bus driver. Every call blocks until the driver returns.
///
/// Implementations must tolerate calls from any thread. Handles passed in are
/// always ones this driver handed out and has not yet freed.
pub trait BusDriver: Send + Sync + 'static {
    /// `None` when the driver could not allocate a client object.
    fn alloc(&self) -> Option<BusPtr>;
    fn free(&self, bus: BusPtr);
    fn connect(&self, bus: BusPtr) -> Result<(), DriverError>;
    fn disconnect(&self, bus: BusPtr);

    fn target_alloc(&self, kind: DeviceKind) -> Option<TargetPtr>;
    fn target_free(&self, target: TargetPtr);
    fn target_add(&self, bus: BusPtr, target: TargetPtr) -> Result<(), DriverError>;
    fn target_remove(&self, bus: BusPtr, target: TargetPtr) -> Result<(), DriverError>;
    fn target_is_attached(&self, target: TargetPtr) -> bool;
    fn target_update(
        &self,
        bus: BusPtr,
        target: TargetPtr,
        report: Report<'_>,
    ) -> Result<(), DriverError>;

    fn target_vendor_id(&self, target: TargetPtr) -> u16;
    fn target_set_vendor_id(&self, target: TargetPtr, vid: u16);
    fn target_product_id(&self, target: TargetPtr) -> u16;
    fn target_set_product_id(&self, target: TargetPtr, pid: u16);
    fn target_index(&self, target: TargetPtr) -> u32;

    fn x360_user_index(&self, bus: BusPtr, target: TargetPtr) -> Result<u32, DriverError>;

    /// The driver may invoke `sink` from its own threads until
    /// `unregister_notification` returns. Callers keep `sink` alive for that
    /// whole window.
    fn register_notification(
        &self,
        bus: BusPtr,
        target: TargetPtr,
        kind: DeviceKind,
        sink: Arc<NotificationSink>,
    ) -> Result<(), DriverError>;
    fn unregister_notification(&self, target: TargetPtr, kind: DeviceKind);
}
