#![deny(warnings)]
//! Virtual X360 / DS4 controllers on a ViGEm-style emulation bus.
//!
//! ```no_run
//! use vpad_client::{Bus, Gamepad, X360Controller};
//! use vpad_protocol::XusbButtons;
//!
//! # fn main() -> vpad_client::Result<()> {
//! let bus = Bus::open_default()?;
//! let mut pad = X360Controller::new(&bus)?;
//! pad.press_button(XusbButtons::A);
//! pad.update()?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod device;
pub mod driver;
pub mod ds4;
pub mod error;
pub mod gamepad;
pub mod notify;
pub mod provision;
pub mod x360;

pub use bus::{Bus, BusConnection};
pub use device::{DeviceHandle, PadOptions, TargetState};
pub use driver::{BusDriver, BusPtr, TargetPtr};
pub use ds4::Ds4Controller;
pub use error::{AllocTarget, Error, Result};
pub use gamepad::Gamepad;
pub use notify::{Notification, NotificationSink};
pub use provision::{AssumeInstalled, Provisioner};
pub use x360::X360Controller;
