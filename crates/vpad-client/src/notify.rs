use std::fmt;
use std::sync::Arc;

use vpad_protocol::LightbarColor;

/// Feedback the host sent to a virtual target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    X360 { large_motor: u8, small_motor: u8, led_number: u8 },
    Ds4 { large_motor: u8, small_motor: u8, lightbar: LightbarColor },
}

impl Notification {
    pub fn motors(&self) -> (u8, u8) {
        match *self {
            Notification::X360 { large_motor, small_motor, .. }
            | Notification::Ds4 { large_motor, small_motor, .. } => (large_motor, small_motor),
        }
    }
}

type Handler = dyn Fn(Notification) + Send + Sync + 'static;

/// Owns a notification handler for as long as a registration is live. The
/// driver only sees a borrowed pointer to this value.
pub struct NotificationSink {
    handler: Box<Handler>,
}

impl NotificationSink {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        Arc::new(Self { handler: Box::new(handler) })
    }

    #[inline]
    pub fn deliver(&self, notification: Notification) {
        (self.handler)(notification)
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSink").finish_non_exhaustive()
    }
}
