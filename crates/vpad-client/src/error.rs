use std::fmt;

use thiserror::Error;
use vpad_protocol::{DeviceKind, DriverError};

/// What a failed allocation was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocTarget {
    Bus,
    Target(DeviceKind),
}

impl fmt::Display for AllocTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocTarget::Bus => f.write_str("bus client"),
            AllocTarget::Target(kind) => write!(f, "{kind} target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("virtual gamepads are only supported on Windows")]
    UnsupportedPlatform,

    #[error("emulation bus unavailable: {reason}")]
    DriverUnavailable { reason: String, code: Option<DriverError> },

    #[error("driver returned a null handle allocating the {0}")]
    AllocationFailed(AllocTarget),

    #[error("failed to add target to the bus: {0}")]
    AttachFailed(DriverError),

    #[error("virtual device did not come online after being added to the bus")]
    NotAttached,

    #[error("report update rejected: {0}")]
    UpdateFailed(DriverError),

    #[error("bus connection is closed")]
    BusNotConnected,

    #[error("device has been closed")]
    DeviceClosed,

    #[error("notification registration failed: {0}")]
    NotificationError(DriverError),

    #[error("failed to query XInput user index: {0}")]
    UserIndexFailed(DriverError),
}

impl Error {
    /// The driver status code behind this error, when there is one.
    pub fn driver_code(&self) -> Option<DriverError> {
        match self {
            Error::DriverUnavailable { code, .. } => *code,
            Error::AttachFailed(c)
            | Error::UpdateFailed(c)
            | Error::NotificationError(c)
            | Error::UserIndexFailed(c) => Some(*c),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_code_is_preserved() {
        let e = Error::UpdateFailed(DriverError::TARGET_NOT_PLUGGED_IN);
        assert_eq!(e.driver_code(), Some(DriverError::TARGET_NOT_PLUGGED_IN));
        assert_eq!(e.to_string(), "report update rejected: target not plugged in (0xE0000007)");
        assert_eq!(Error::DeviceClosed.driver_code(), None);
    }

    #[test]
    fn allocation_messages_name_the_object() {
        assert_eq!(
            Error::AllocationFailed(AllocTarget::Target(DeviceKind::DS4)).to_string(),
            "driver returned a null handle allocating the DualShock 4 (wired) target"
        );
        assert_eq!(
            Error::AllocationFailed(AllocTarget::Bus).to_string(),
            "driver returned a null handle allocating the bus client"
        );
    }
}
