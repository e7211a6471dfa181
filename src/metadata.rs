//! Device descriptor produced by enumeration.
//!
//! [`DeviceInfo`] is an owned, cloneable description of one enumerable HID
//! endpoint. Backends populate what they know; unknown strings and usages
//! remain `None`.
//!
//! # Conventions
//! - `path` is opaque and platform-defined (`/dev/hidraw3`, `0001:0004:00`,
//!   `virtual:2`, ...). It is the only field guaranteed to reopen the same
//!   physical device while it stays attached.
//! - `release_number` is the BCD `bcdDevice` value (`0x0110` = 1.10), `0` when unknown.
//! - `interface_number` is `-1` when not applicable (e.g. Bluetooth).
//! - `usage_page`/`usage` describe the first top-level collection of the
//!   report descriptor when the backend can read it.
//!
//! ## Persistence notes
//! - `vendor_id`/`product_id` and `serial_number` (when present) are generally stable.
//! - `path` may change across ports and reconnects; treat it as identity only
//!   within one attach cycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport a device is attached through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    Usb,
    Bluetooth,
    I2c,
    Spi,
    Virtual,
    #[default]
    Unknown,
}

impl BusType {
    /// Map a Linux `BUS_*` code (as found in `HID_ID`) to a bus type.
    pub fn from_linux_bus(code: u16) -> Self {
        match code {
            0x03 => BusType::Usb,
            0x05 => BusType::Bluetooth,
            0x18 => BusType::I2c,
            0x1C => BusType::Spi,
            0x06 => BusType::Virtual,
            _ => BusType::Unknown,
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusType::Usb => "usb",
            BusType::Bluetooth => "bluetooth",
            BusType::I2c => "i2c",
            BusType::Spi => "spi",
            BusType::Virtual => "virtual",
            BusType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Descriptor of a single attached HID endpoint.
///
/// Immutable once produced; a new enumeration produces new values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform path used by [`Manager::open_path`](crate::manager::Manager::open_path).
    pub path: String,

    /// USB Vendor ID (VID).
    pub vendor_id: u16,

    /// USB Product ID (PID).
    pub product_id: u16,

    /// Serial number string, if the device exposes one.
    pub serial_number: Option<String>,

    /// BCD device release number.
    pub release_number: u16,

    /// Manufacturer string from the device or OS.
    pub manufacturer_string: Option<String>,

    /// Product string from the device or OS.
    pub product_string: Option<String>,

    /// HID Usage Page of the top-level collection (e.g. `0x01` Generic Desktop).
    pub usage_page: Option<u16>,

    /// HID Usage of the top-level collection (e.g. `0x06` Keyboard).
    pub usage: Option<u16>,

    /// Interface index on the parent device, `-1` when not applicable.
    pub interface_number: i32,

    /// Transport classification.
    pub bus: BusType,
}

impl DeviceInfo {
    /// Minimal descriptor; other fields default to unknown.
    pub fn new(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path: path.into(),
            vendor_id,
            product_id,
            serial_number: None,
            release_number: 0,
            manufacturer_string: None,
            product_string: None,
            usage_page: None,
            usage: None,
            interface_number: -1,
            bus: BusType::Unknown,
        }
    }

    /// Enumeration filter test. `0` on either side matches any value.
    pub fn matches_filter(&self, vendor_id: u16, product_id: u16) -> bool {
        (vendor_id == 0 || self.vendor_id == vendor_id)
            && (product_id == 0 || self.product_id == product_id)
    }

    /// Field list in sorted key order, as printed by the diagnostic listing.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        fn opt(s: &Option<String>) -> String {
            s.clone().unwrap_or_default()
        }
        fn opt_hex(v: Option<u16>) -> String {
            v.map(|v| format!("0x{v:04x}")).unwrap_or_default()
        }
        vec![
            ("bus", self.bus.to_string()),
            ("interface_number", self.interface_number.to_string()),
            ("manufacturer_string", opt(&self.manufacturer_string)),
            ("path", self.path.clone()),
            ("product_id", format!("0x{:04x}", self.product_id)),
            ("product_string", opt(&self.product_string)),
            ("release_number", format!("0x{:04x}", self.release_number)),
            ("serial_number", opt(&self.serial_number)),
            ("usage", opt_hex(self.usage)),
            ("usage_page", opt_hex(self.usage_page)),
            ("vendor_id", format!("0x{:04x}", self.vendor_id)),
        ]
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} ({})",
            self.vendor_id,
            self.product_id,
            self.product_string.as_deref().unwrap_or("Unknown"),
            self.path
        )
    }
}
