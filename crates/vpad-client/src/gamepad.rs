use vpad_protocol::DeviceKind;

use crate::device::DeviceHandle;
use crate::error::Result;
use crate::notify::Notification;

/// Lifecycle surface shared by every virtual controller type.
///
/// Mutators only touch in-memory state; nothing reaches the driver until
/// [`update`](Self::update). A controller is not internally synchronised:
/// callers sharing one across threads must serialise mutation and updates
/// themselves.
pub trait Gamepad {
    fn handle(&self) -> &DeviceHandle;
    fn handle_mut(&mut self) -> &mut DeviceHandle;

    /// Sends the current state as one full report. Last write wins.
    fn update(&self) -> Result<()>;

    /// Restores the default report. Does not send.
    fn reset(&mut self);

    fn kind(&self) -> DeviceKind {
        self.handle().kind()
    }

    fn close(&mut self) {
        self.handle_mut().close()
    }

    fn is_closed(&self) -> bool {
        self.handle().is_closed()
    }

    fn vendor_id(&self) -> Result<u16> {
        self.handle().vendor_id()
    }

    fn product_id(&self) -> Result<u16> {
        self.handle().product_id()
    }

    fn set_vendor_id(&mut self, vid: u16) -> Result<()> {
        self.handle_mut().set_vendor_id(vid)
    }

    fn set_product_id(&mut self, pid: u16) -> Result<()> {
        self.handle_mut().set_product_id(pid)
    }

    fn index(&self) -> Result<u32> {
        self.handle().index()
    }

    fn register_notification<F>(&mut self, handler: F) -> Result<()>
    where
        F: Fn(Notification) + Send + Sync + 'static,
        Self: Sized,
    {
        self.handle_mut().register_notification(handler)
    }

    fn unregister_notification(&mut self) {
        self.handle_mut().unregister_notification()
    }
}
