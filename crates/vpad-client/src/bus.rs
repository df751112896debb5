use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, instrument, warn};

use crate::driver::{BusDriver, BusPtr};
use crate::error::{AllocTarget, Error, Result};
use crate::provision::{AssumeInstalled, Provisioner};

/// Entry point to one emulation bus. Owns at most one live [`BusConnection`],
/// created on first use and shared by every controller built from this bus.
///
/// Create one `Bus` per process and hand out clones of the `Arc`.
pub struct Bus {
    driver: Arc<dyn BusDriver>,
    provisioner: Arc<dyn Provisioner>,
    state: Mutex<BusState>,
    /// Id of the most recent connection attempt that has finished.
    finished: AtomicU64,
}

struct BusState {
    slot: Slot,
    attempts: u64,
    last_failure: Option<(u64, Error)>,
}

enum Slot {
    Vacant,
    Live(Arc<BusConnection>),
    Closed,
}

impl Bus {
    pub fn new(driver: Arc<dyn BusDriver>) -> Arc<Self> {
        Self::with_provisioner(driver, Arc::new(AssumeInstalled))
    }

    pub fn with_provisioner(
        driver: Arc<dyn BusDriver>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            provisioner,
            state: Mutex::new(BusState { slot: Slot::Vacant, attempts: 0, last_failure: None }),
            finished: AtomicU64::new(0),
        })
    }

    /// Bus backed by the system's ViGEm client library.
    #[cfg(windows)]
    pub fn open_default() -> Result<Arc<Self>> {
        let driver = crate::driver::vigem::ViGEmDriver::load()?;
        Ok(Self::new(Arc::new(driver)))
    }

    #[cfg(not(windows))]
    pub fn open_default() -> Result<Arc<Self>> {
        Err(Error::UnsupportedPlatform)
    }

    pub fn driver(&self) -> &Arc<dyn BusDriver> {
        &self.driver
    }

    pub fn is_connected(&self) -> bool {
        matches!(&self.state.lock().slot, Slot::Live(conn) if conn.is_connected())
    }

    /// Returns the shared connection, connecting on first call.
    ///
    /// Concurrent first callers block on one attempt and all observe its
    /// outcome. A failed attempt is not cached: later callers start over.
    /// Once the bus is closed this fails with [`Error::BusNotConnected`].
    #[instrument(level = "debug", skip(self))]
    pub fn get_or_create(&self) -> Result<Arc<BusConnection>> {
        let seen = self.finished.load(Ordering::Acquire);
        let mut state = self.state.lock();

        match &state.slot {
            Slot::Live(conn) => return Ok(conn.clone()),
            Slot::Closed => return Err(Error::BusNotConnected),
            Slot::Vacant => {}
        }
        if let Some((attempt, err)) = &state.last_failure {
            if *attempt > seen {
                // an attempt we were queued behind already failed
                return Err(err.clone());
            }
        }

        state.attempts += 1;
        let attempt = state.attempts;
        let outcome = self.connect_new();
        match &outcome {
            Ok(conn) => {
                info!(attempt, bus = ?conn.ptr(), "bus connected");
                state.slot = Slot::Live(conn.clone());
                state.last_failure = None;
            }
            Err(e) => {
                warn!(attempt, error = %e, "bus connection failed");
                state.last_failure = Some((attempt, e.clone()));
            }
        }
        self.finished.store(attempt, Ordering::Release);
        outcome
    }

    fn connect_new(&self) -> Result<Arc<BusConnection>> {
        self.provisioner.ensure_available()?;

        let bus = self.driver.alloc().ok_or(Error::AllocationFailed(AllocTarget::Bus))?;
        if let Err(code) = self.driver.connect(bus) {
            self.driver.free(bus);
            return Err(Error::DriverUnavailable {
                reason: format!("connect failed: {code}"),
                code: Some(code),
            });
        }
        Ok(Arc::new(BusConnection {
            driver: self.driver.clone(),
            ptr: bus,
            connected: RwLock::new(true),
        }))
    }

    /// Disconnects the shared connection. The bus stays closed afterwards.
    #[instrument(level = "info", skip(self))]
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Slot::Live(conn) = std::mem::replace(&mut state.slot, Slot::Closed) {
            conn.close();
        }
    }
}

/// A live connection to the bus driver.
///
/// Device operations hold the read side of `connected` for the length of a
/// driver call, so `close` waits for them and nothing starts after it.
pub struct BusConnection {
    driver: Arc<dyn BusDriver>,
    ptr: BusPtr,
    connected: RwLock<bool>,
}

/// Proof that the connection is up, held across a driver call.
pub(crate) struct LiveGuard<'a> {
    _guard: RwLockReadGuard<'a, bool>,
}

impl BusConnection {
    #[inline]
    pub fn ptr(&self) -> BusPtr {
        self.ptr
    }

    #[inline]
    pub fn driver(&self) -> &Arc<dyn BusDriver> {
        &self.driver
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    pub(crate) fn live(&self) -> Result<LiveGuard<'_>> {
        let guard = self.connected.read();
        if *guard { Ok(LiveGuard { _guard: guard }) } else { Err(Error::BusNotConnected) }
    }

    /// Disconnects and frees the driver client. Runs at most once.
    pub fn close(&self) {
        let mut connected = self.connected.write();
        if !*connected {
            return;
        }
        self.driver.disconnect(self.ptr);
        self.driver.free(self.ptr);
        *connected = false;
        debug!(bus = ?self.ptr, "bus disconnected");
    }
}

impl fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConnection")
            .field("ptr", &self.ptr)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for BusConnection {
    fn drop(&mut self) {
        self.close();
    }
}
