//! Backend over the user-mode ViGEm client library (`ViGEmClient.dll`),
//! resolved at runtime so the crate links without it.

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};
use vpad_protocol::{
    DS4_REPORT_EX_LEN, DeviceKind, Ds4Report, DriverError, LightbarColor, Report, XusbReport,
};
use windows::Win32::Foundation::{FreeLibrary, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::core::{PCWSTR, s, w};

use super::{BusDriver, BusPtr, TargetPtr};
use crate::error::{Error, Result};
use crate::notify::{Notification, NotificationSink};

type Handle = *mut c_void;
type ExBytes = [u8; DS4_REPORT_EX_LEN];
/// Returns a one-byte `BOOLEAN`; the rest of the return register is garbage.
type IsAttachedFn = unsafe extern "C" fn(Handle) -> u8;

type X360Callback = extern "system" fn(Handle, Handle, u8, u8, u8, *mut c_void);
type Ds4Callback = extern "system" fn(Handle, Handle, u8, u8, LightbarColor, *mut c_void);

struct Api {
    alloc: unsafe extern "C" fn() -> Handle,
    free: unsafe extern "C" fn(Handle),
    connect: unsafe extern "C" fn(Handle) -> u32,
    disconnect: unsafe extern "C" fn(Handle),
    x360_alloc: unsafe extern "C" fn() -> Handle,
    ds4_alloc: unsafe extern "C" fn() -> Handle,
    target_free: unsafe extern "C" fn(Handle),
    target_add: unsafe extern "C" fn(Handle, Handle) -> u32,
    target_remove: unsafe extern "C" fn(Handle, Handle) -> u32,
    target_is_attached: IsAttachedFn,
    x360_update: unsafe extern "C" fn(Handle, Handle, XusbReport) -> u32,
    ds4_update: unsafe extern "C" fn(Handle, Handle, Ds4Report) -> u32,
    ds4_update_ex_ptr: unsafe extern "C" fn(Handle, Handle, *const ExBytes) -> u32,
    get_vid: unsafe extern "C" fn(Handle) -> u16,
    set_vid: unsafe extern "C" fn(Handle, u16),
    get_pid: unsafe extern "C" fn(Handle) -> u16,
    set_pid: unsafe extern "C" fn(Handle, u16),
    get_index: unsafe extern "C" fn(Handle) -> u32,
    x360_user_index: unsafe extern "C" fn(Handle, Handle, *mut u32) -> u32,
    x360_register: unsafe extern "C" fn(Handle, Handle, X360Callback, *mut c_void) -> u32,
    x360_unregister: unsafe extern "C" fn(Handle),
    ds4_register: unsafe extern "C" fn(Handle, Handle, Ds4Callback, *mut c_void) -> u32,
    ds4_unregister: unsafe extern "C" fn(Handle),
}

/// Resolves one export, bailing out of the enclosing fn if it is missing.
macro_rules! export {
    ($module:expr, $name:literal) => {{
        match unsafe { GetProcAddress($module, s!($name)) } {
            // SAFETY: the declared field type matches the library's C signature
            Some(proc) => unsafe { std::mem::transmute(proc) },
            None => return Err(unavailable(concat!("missing export ", $name))),
        }
    }};
}

fn unavailable(reason: impl Into<String>) -> Error {
    Error::DriverUnavailable { reason: reason.into(), code: None }
}

pub struct ViGEmDriver {
    module: HMODULE,
    api: Api,
}

// SAFETY: the client library is thread-safe and the module handle is only
// released in Drop.
unsafe impl Send for ViGEmDriver {}
unsafe impl Sync for ViGEmDriver {}

impl ViGEmDriver {
    /// Loads `ViGEmClient.dll` from the default DLL search path.
    pub fn load() -> Result<Self> {
        let module = unsafe { LoadLibraryW(w!("ViGEmClient.dll")) }
            .map_err(|e| unavailable(format!("ViGEmClient.dll: {e}")))?;
        Self::bind(module)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let wide: Vec<u16> =
            path.to_string_lossy().encode_utf16().chain(std::iter::once(0)).collect();
        let module = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        Self::bind(module)
    }

    fn bind(module: HMODULE) -> Result<Self> {
        match Self::resolve(module) {
            Ok(api) => {
                info!("ViGEm client library loaded");
                Ok(Self { module, api })
            }
            Err(e) => {
                let _ = unsafe { FreeLibrary(module) };
                Err(e)
            }
        }
    }

    fn resolve(m: HMODULE) -> Result<Api> {
        Ok(Api {
            alloc: export!(m, "vigem_alloc"),
            free: export!(m, "vigem_free"),
            connect: export!(m, "vigem_connect"),
            disconnect: export!(m, "vigem_disconnect"),
            x360_alloc: export!(m, "vigem_target_x360_alloc"),
            ds4_alloc: export!(m, "vigem_target_ds4_alloc"),
            target_free: export!(m, "vigem_target_free"),
            target_add: export!(m, "vigem_target_add"),
            target_remove: export!(m, "vigem_target_remove"),
            target_is_attached: export!(m, "vigem_target_is_attached"),
            x360_update: export!(m, "vigem_target_x360_update"),
            ds4_update: export!(m, "vigem_target_ds4_update"),
            ds4_update_ex_ptr: export!(m, "vigem_target_ds4_update_ex_ptr"),
            get_vid: export!(m, "vigem_target_get_vid"),
            set_vid: export!(m, "vigem_target_set_vid"),
            get_pid: export!(m, "vigem_target_get_pid"),
            set_pid: export!(m, "vigem_target_set_pid"),
            get_index: export!(m, "vigem_target_get_index"),
            x360_user_index: export!(m, "vigem_target_x360_get_user_index"),
            x360_register: export!(m, "vigem_target_x360_register_notification"),
            x360_unregister: export!(m, "vigem_target_x360_unregister_notification"),
            ds4_register: export!(m, "vigem_target_ds4_register_notification"),
            ds4_unregister: export!(m, "vigem_target_ds4_unregister_notification"),
        })
    }
}

impl Drop for ViGEmDriver {
    fn drop(&mut self) {
        if let Err(e) = unsafe { FreeLibrary(self.module) } {
            error!(error = %e, "FreeLibrary failed");
        }
    }
}

fn is_attached(f: IsAttachedFn, target: Handle) -> bool {
    unsafe { f(target) != 0 }
}

#[inline]
fn h(ptr: usize) -> Handle {
    ptr as Handle
}

fn non_null(handle: Handle) -> Option<usize> {
    (!handle.is_null()).then_some(handle as usize)
}

/// Recovers the sink from the user-data pointer and hands it the event.
/// Panics stop here; they must not unwind into the driver's thread.
fn dispatch(user_data: *mut c_void, notification: Notification) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: user_data is the `Arc::as_ptr` of a sink the device handle keeps
    // alive until unregister returns.
    let sink = unsafe { &*(user_data as *const NotificationSink) };
    if catch_unwind(AssertUnwindSafe(|| sink.deliver(notification))).is_err() {
        error!("notification handler panicked");
    }
}

extern "system" fn on_x360(
    _client: Handle,
    _target: Handle,
    large_motor: u8,
    small_motor: u8,
    led_number: u8,
    user_data: *mut c_void,
) {
    dispatch(user_data, Notification::X360 { large_motor, small_motor, led_number });
}

extern "system" fn on_ds4(
    _client: Handle,
    _target: Handle,
    large_motor: u8,
    small_motor: u8,
    lightbar: LightbarColor,
    user_data: *mut c_void,
) {
    dispatch(user_data, Notification::Ds4 { large_motor, small_motor, lightbar });
}

impl BusDriver for ViGEmDriver {
    fn alloc(&self) -> Option<BusPtr> {
        non_null(unsafe { (self.api.alloc)() }).map(BusPtr)
    }

    fn free(&self, bus: BusPtr) {
        unsafe { (self.api.free)(h(bus.0)) }
    }

    fn connect(&self, bus: BusPtr) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.api.connect)(h(bus.0)) })
    }

    fn disconnect(&self, bus: BusPtr) {
        unsafe { (self.api.disconnect)(h(bus.0)) }
    }

    fn target_alloc(&self, kind: DeviceKind) -> Option<TargetPtr> {
        let raw = match kind {
            DeviceKind::X360 => unsafe { (self.api.x360_alloc)() },
            DeviceKind::DS4 => unsafe { (self.api.ds4_alloc)() },
        };
        non_null(raw).map(TargetPtr)
    }

    fn target_free(&self, target: TargetPtr) {
        unsafe { (self.api.target_free)(h(target.0)) }
    }

    fn target_add(&self, bus: BusPtr, target: TargetPtr) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.api.target_add)(h(bus.0), h(target.0)) })
    }

    fn target_remove(&self, bus: BusPtr, target: TargetPtr) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.api.target_remove)(h(bus.0), h(target.0)) })
    }

    fn target_is_attached(&self, target: TargetPtr) -> bool {
        is_attached(self.api.target_is_attached, h(target.0))
    }

    fn target_update(
        &self,
        bus: BusPtr,
        target: TargetPtr,
        report: Report<'_>,
    ) -> Result<(), DriverError> {
        let (b, t) = (h(bus.0), h(target.0));
        let status = match report {
            Report::X360(r) => unsafe { (self.api.x360_update)(b, t, *r) },
            Report::Ds4(r) => unsafe { (self.api.ds4_update)(b, t, *r) },
            Report::Ds4Ex(r) => {
                let bytes = r.to_bytes();
                unsafe { (self.api.ds4_update_ex_ptr)(b, t, &bytes) }
            }
        };
        DriverError::check(status)
    }

    fn target_vendor_id(&self, target: TargetPtr) -> u16 {
        unsafe { (self.api.get_vid)(h(target.0)) }
    }

    fn target_set_vendor_id(&self, target: TargetPtr, vid: u16) {
        unsafe { (self.api.set_vid)(h(target.0), vid) }
    }

    fn target_product_id(&self, target: TargetPtr) -> u16 {
        unsafe { (self.api.get_pid)(h(target.0)) }
    }

    fn target_set_product_id(&self, target: TargetPtr, pid: u16) {
        unsafe { (self.api.set_pid)(h(target.0), pid) }
    }

    fn target_index(&self, target: TargetPtr) -> u32 {
        unsafe { (self.api.get_index)(h(target.0)) }
    }

    fn x360_user_index(&self, bus: BusPtr, target: TargetPtr) -> Result<u32, DriverError> {
        let mut index = 0u32;
        DriverError::check(unsafe {
            (self.api.x360_user_index)(h(bus.0), h(target.0), &mut index)
        })?;
        Ok(index)
    }

    fn register_notification(
        &self,
        bus: BusPtr,
        target: TargetPtr,
        kind: DeviceKind,
        sink: Arc<NotificationSink>,
    ) -> Result<(), DriverError> {
        let user_data = Arc::as_ptr(&sink) as *mut c_void;
        let (b, t) = (h(bus.0), h(target.0));
        let status = match kind {
            DeviceKind::X360 => unsafe { (self.api.x360_register)(b, t, on_x360, user_data) },
            DeviceKind::DS4 => unsafe { (self.api.ds4_register)(b, t, on_ds4, user_data) },
        };
        DriverError::check(status)?;
        debug!(handle = ?target, ?kind, "notification callback installed");
        Ok(())
    }

    fn unregister_notification(&self, target: TargetPtr, kind: DeviceKind) {
        match kind {
            DeviceKind::X360 => unsafe { (self.api.x360_unregister)(h(target.0)) },
            DeviceKind::DS4 => unsafe { (self.api.ds4_unregister)(h(target.0)) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn detached(_: Handle) -> u8 {
        0
    }

    unsafe extern "C" fn attached(_: Handle) -> u8 {
        1
    }

    #[test]
    fn attached_flag_is_a_single_byte() {
        let target = std::ptr::null_mut();
        assert!(!is_attached(detached, target));
        assert!(is_attached(attached, target));
    }
}
