//! Device access backends.
//!
//! Each backend implements [`Backend`] (enumeration + open by path) and hands
//! out [`RawDevice`] objects for open devices. Filtering, open-by-id
//! resolution, blocking mode, timeouts, validation, and cancellation are
//! shared and live in [`Manager`](crate::manager::Manager) and
//! [`HidDevice`](crate::device::HidDevice), so a backend only has to move bytes.
//!
//! # Feature flags
//! - **`hidraw`**: Linux kernel hidraw backend (default).
//! - **`libusb`**: low-level USB backend through libusb (`rusb`).
//! - **`hid`**: vendor-driver backend through the `hidapi` crate (Windows/macOS).
//! - **`virtual`**: in-memory backend for tests and demos (default).
//!
//! The build picks one platform backend as the default (see [`default_kind`]);
//! configuration may name any other compiled-in backend explicitly.

use crate::error::{HidError, Result};
use crate::metadata::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;

#[cfg(all(feature = "hidraw", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "hidraw", target_os = "linux"))))]
pub mod hidraw;

#[cfg(feature = "libusb")]
#[cfg_attr(docsrs, doc(cfg(feature = "libusb")))]
pub mod libusb;

#[cfg(feature = "virtual")]
#[cfg_attr(docsrs, doc(cfg(feature = "virtual")))]
pub mod virtual_hid;

/// A platform's device registry.
pub trait Backend: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Every currently attached HID device, unfiltered.
    ///
    /// Fails only when the platform query itself cannot run.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Open the device at `path` (as reported by [`Backend::enumerate`]).
    fn open_path(&self, path: &str) -> Result<Box<dyn RawDevice>>;
}

/// Backend side of an open device.
///
/// Resources are released when the value is dropped.
pub trait RawDevice: Send {
    /// Wait at most `timeout` for one input report and copy it into `buf`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time. A zero timeout polls.
    /// Reports longer than `buf` are truncated.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Send an output report. `data[0]` is the report ID (0 if unused).
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Send a feature report. `data[0]` is the report ID.
    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize>;

    /// Fetch the feature report whose ID is in `buf[0]`; the result keeps the ID in byte 0.
    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn manufacturer_string(&mut self) -> Result<Option<String>>;
    fn product_string(&mut self) -> Result<Option<String>>;
    fn serial_number_string(&mut self) -> Result<Option<String>>;

    /// Fetch string descriptor `index`.
    fn indexed_string(&mut self, _index: u8) -> Result<Option<String>> {
        Err(HidError::Unsupported(
            "indexed string descriptors are not available on this backend".into(),
        ))
    }

    /// Fixed output report size (including the report ID byte), if the
    /// transport enforces one.
    fn output_report_len(&self) -> Option<usize> {
        None
    }
}

/// Backend identifier used by configuration and the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Linux `/dev/hidrawN` through sysfs.
    Hidraw,
    /// Direct USB access through libusb.
    Libusb,
    /// Vendor driver through the `hidapi` library.
    Hidapi,
    /// In-memory devices.
    Virtual,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Hidraw,
        BackendKind::Libusb,
        BackendKind::Hidapi,
        BackendKind::Virtual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Hidraw => "hidraw",
            BackendKind::Libusb => "libusb",
            BackendKind::Hidapi => "hidapi",
            BackendKind::Virtual => "virtual",
        }
    }

    /// Whether this build contains the backend.
    pub fn is_compiled_in(&self) -> bool {
        match self {
            BackendKind::Hidraw => cfg!(all(feature = "hidraw", target_os = "linux")),
            BackendKind::Libusb => cfg!(feature = "libusb"),
            BackendKind::Hidapi => cfg!(feature = "hid"),
            BackendKind::Virtual => cfg!(feature = "virtual"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown backend `{s}` (expected hidraw, libusb, hidapi, or virtual)")
            })
    }
}

/// The platform backend this build links by default.
///
/// Explicitly enabled optional backends win over the built-in one:
/// `hid`, then `libusb`, then `hidraw` on Linux. `None` when no platform
/// backend was compiled in.
pub fn default_kind() -> Option<BackendKind> {
    if cfg!(feature = "hid") {
        Some(BackendKind::Hidapi)
    } else if cfg!(feature = "libusb") {
        Some(BackendKind::Libusb)
    } else if cfg!(all(feature = "hidraw", target_os = "linux")) {
        Some(BackendKind::Hidraw)
    } else {
        None
    }
}

/// Construct a backend by kind.
///
/// The virtual backend is created empty; tests that need to attach devices
/// construct [`virtual_hid::VirtualBackend`] directly and keep a clone.
pub fn create(kind: BackendKind) -> Result<Box<dyn Backend>> {
    match kind {
        #[cfg(all(feature = "hidraw", target_os = "linux"))]
        BackendKind::Hidraw => Ok(Box::new(hidraw::HidrawBackend::new())),
        #[cfg(feature = "libusb")]
        BackendKind::Libusb => Ok(Box::new(libusb::LibusbBackend::new()?)),
        #[cfg(feature = "hid")]
        BackendKind::Hidapi => Ok(Box::new(hid::HidapiBackend::new()?)),
        #[cfg(feature = "virtual")]
        BackendKind::Virtual => Ok(Box::new(virtual_hid::VirtualBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(HidError::Config(format!(
            "backend `{other}` is not compiled into this build"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("HIDRAW".parse::<BackendKind>(), Ok(BackendKind::Hidraw));
        assert_eq!(" libusb ".parse::<BackendKind>(), Ok(BackendKind::Libusb));
        assert!("winusb".parse::<BackendKind>().is_err());
    }

    #[test]
    fn default_kind_is_compiled_in() {
        if let Some(kind) = default_kind() {
            assert!(kind.is_compiled_in());
            assert_ne!(kind, BackendKind::Virtual);
        }
    }

    #[test]
    fn missing_backend_is_config_error() {
        for kind in BackendKind::ALL {
            if !kind.is_compiled_in() {
                assert!(matches!(create(kind), Err(HidError::Config(_))));
            }
        }
    }
}
