//! Hook for making sure the bus driver is present before the first connect.

use crate::error::Result;

/// Checks (or arranges) that the bus driver is installed. Called once per
/// connection attempt, before anything is allocated.
pub trait Provisioner: Send + Sync + 'static {
    fn ensure_available(&self) -> Result<()>;
}

/// Trusts that the driver is installed; connection failures surface from
/// `connect` instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeInstalled;

impl Provisioner for AssumeInstalled {
    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }
}

impl<F> Provisioner for F
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    fn ensure_available(&self) -> Result<()> {
        self()
    }
}
