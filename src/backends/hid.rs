//! Vendor-driver backend through the `hidapi` library.
//!
//! This is the Windows/macOS path: the platform HID stack (or hidapi's own
//! hidraw/libusb build on Linux) does the work, and this module only maps
//! types and errors.

use crate::backends::{Backend, BackendKind, RawDevice};
use crate::error::{HidError, Result};
use crate::metadata::{BusType, DeviceInfo};
use hidapi::HidApi;
use parking_lot::Mutex;
use std::ffi::CString;
use std::time::Duration;
use tracing::trace;

pub struct HidapiBackend {
    api: Mutex<HidApi>,
}

impl HidapiBackend {
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| HidError::Enumeration(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

fn bus_type(bus: hidapi::BusType) -> BusType {
    match bus {
        hidapi::BusType::Usb => BusType::Usb,
        hidapi::BusType::Bluetooth => BusType::Bluetooth,
        hidapi::BusType::I2c => BusType::I2c,
        hidapi::BusType::Spi => BusType::Spi,
        _ => BusType::Unknown,
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(str::to_string)
}

fn to_info(info: &hidapi::DeviceInfo) -> DeviceInfo {
    let mut out = DeviceInfo::new(
        info.path().to_string_lossy(),
        info.vendor_id(),
        info.product_id(),
    );
    out.serial_number = non_empty(info.serial_number());
    out.release_number = info.release_number();
    out.manufacturer_string = non_empty(info.manufacturer_string());
    out.product_string = non_empty(info.product_string());
    // hidapi reports 0/0 when the platform did not parse the descriptor.
    if info.usage_page() != 0 || info.usage() != 0 {
        out.usage_page = Some(info.usage_page());
        out.usage = Some(info.usage());
    }
    out.interface_number = info.interface_number();
    out.bus = bus_type(info.bus_type());
    out
}

impl Backend for HidapiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hidapi
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| HidError::Enumeration(e.to_string()))?;
        let devices: Vec<_> = api.device_list().map(to_info).collect();
        trace!(count = devices.len(), "hidapi device list refreshed");
        Ok(devices)
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn RawDevice>> {
        let c_path = CString::new(path)
            .map_err(|_| HidError::Validation(format!("path contains a NUL byte: {path:?}")))?;
        let api = self.api.lock();
        let known = api
            .device_list()
            .any(|d| d.path().to_bytes() == c_path.as_bytes());
        let device = api.open_path(&c_path).map_err(|e| {
            let mapped = HidError::from(e);
            match mapped {
                // hidapi reports a missing path as a generic failure.
                HidError::Transfer { .. } if !known => HidError::DeviceNotFound(path.to_string()),
                other => other,
            }
        })?;
        Ok(Box::new(HidapiDevice { device }))
    }
}

pub struct HidapiDevice {
    device: hidapi::HidDevice,
}

impl RawDevice for HidapiDevice {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        Ok(self.device.read_timeout(buf, ms)?)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.device.write(data)?)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize> {
        self.device.send_feature_report(data)?;
        Ok(data.len())
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.get_feature_report(buf)?)
    }

    fn manufacturer_string(&mut self) -> Result<Option<String>> {
        Ok(self.device.get_manufacturer_string()?)
    }

    fn product_string(&mut self) -> Result<Option<String>> {
        Ok(self.device.get_product_string()?)
    }

    fn serial_number_string(&mut self) -> Result<Option<String>> {
        Ok(self.device.get_serial_number_string()?)
    }

    fn indexed_string(&mut self, index: u8) -> Result<Option<String>> {
        Ok(self.device.get_indexed_string(i32::from(index))?)
    }
}
