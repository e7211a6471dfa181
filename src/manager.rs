//! Entry point: enumeration and open over one backend.

use crate::backends::{self, Backend, BackendKind};
use crate::config::Config;
use crate::device::{HidDevice, DEFAULT_POLL_INTERVAL};
use crate::error::{HidError, Result};
use crate::snapshot::DeviceList;
use std::time::Duration;
use tracing::{debug, info};

/// Device access over a single backend.
///
/// The manager holds no device state of its own: every enumeration queries
/// the backend afresh and every handle is independent of the manager once
/// opened.
pub struct Manager {
    backend: Box<dyn Backend>,
    poll_interval: Duration,
}

impl Manager {
    /// Manager over this build's default platform backend.
    pub fn new() -> Result<Self> {
        Self::with_config(&Config::default())
    }

    /// Manager over the backend named by `config` (or the build default).
    pub fn with_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let kind = match config.backend.kind {
            Some(kind) => kind,
            None => backends::default_kind().ok_or_else(|| {
                HidError::Config("no platform backend is compiled into this build".into())
            })?,
        };
        let backend = backends::create(kind)?;
        info!(backend = %kind, "device manager ready");
        Ok(Self {
            backend,
            poll_interval: config.read.poll_interval(),
        })
    }

    /// Manager over an explicit backend instance.
    pub fn with_backend(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the blocking-read poll interval for handles opened afterwards.
    ///
    /// Handles clamp it to [`MAX_POLL_INTERVAL_MS`](crate::config::MAX_POLL_INTERVAL_MS).
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Attached devices matching the filters. `0` on either filter matches any.
    ///
    /// An empty list is not an error.
    pub fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<DeviceList> {
        let devices: Vec<_> = self
            .backend
            .enumerate()?
            .into_iter()
            .filter(|d| d.matches_filter(vendor_id, product_id))
            .collect();
        debug!(vendor_id, product_id, found = devices.len(), "enumerated devices");
        Ok(DeviceList::new(devices))
    }

    /// Open the first device with exactly this vendor/product ID, and this
    /// serial number if one is given.
    ///
    /// With several identical devices and no serial, which one is opened
    /// depends on enumeration order; use [`open_path`](Self::open_path)
    /// when that matters.
    pub fn open(&self, vendor_id: u16, product_id: u16, serial: Option<&str>) -> Result<HidDevice> {
        let list = self.enumerate(vendor_id, product_id)?;
        let target = list
            .iter()
            .filter(|d| d.vendor_id == vendor_id && d.product_id == product_id)
            .find(|d| match serial {
                Some(s) => d.serial_number.as_deref() == Some(s),
                None => true,
            })
            .ok_or_else(|| {
                HidError::DeviceNotFound(match serial {
                    Some(s) => format!("{vendor_id:04x}:{product_id:04x} serial {s}"),
                    None => format!("{vendor_id:04x}:{product_id:04x}"),
                })
            })?;
        self.open_path(&target.path)
    }

    /// Open the device at an exact path from a prior enumeration.
    pub fn open_path(&self, path: &str) -> Result<HidDevice> {
        let raw = self.backend.open_path(path)?;
        info!(path, backend = %self.backend.kind(), "device opened");
        Ok(HidDevice::new(path, raw, self.poll_interval))
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("backend", &self.backend.kind())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
