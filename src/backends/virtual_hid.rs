//! In-memory HID backend.
//!
//! [`VirtualBackend`] is a bus of software devices. Tests and demos attach
//! devices with [`VirtualBackend::attach`], feed input reports through the
//! returned [`VirtualDevice`], and observe what the host wrote. Everything
//! the real backends can report (strings, exclusivity, permission errors,
//! fixed report sizes, unplug mid-transfer, enumeration failure) can be
//! staged here.
//!
//! ```
//! use hidkit::backends::virtual_hid::{VirtualBackend, VirtualDeviceSpec};
//! use hidkit::{Manager, ReadOutcome};
//!
//! let bus = VirtualBackend::new();
//! let pad = bus.attach(VirtualDeviceSpec::new(0x046d, 0xc216).product("Gamepad"));
//! pad.feed(&[0x01, 0x7f]);
//!
//! let mgr = Manager::with_backend(bus.clone());
//! let dev = mgr.open(0x046d, 0xc216, None).unwrap();
//! assert_eq!(dev.read(64).unwrap(), ReadOutcome::Data(vec![0x01, 0x7f]));
//! ```

use crate::backends::{Backend, BackendKind, RawDevice};
use crate::error::{HidError, Result};
use crate::metadata::{BusType, DeviceInfo};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Static description of a virtual device.
#[derive(Clone, Debug)]
pub struct VirtualDeviceSpec {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer_string: Option<String>,
    pub product_string: Option<String>,
    pub release_number: u16,
    pub usage_page: Option<u16>,
    pub usage: Option<u16>,
    pub interface_number: i32,
    /// Fixed output report size (including the report ID byte).
    pub output_report_len: Option<usize>,
    /// Refuse a second concurrent open.
    pub exclusive: bool,
    /// Refuse every open with an access error.
    pub access_denied: bool,
    /// String descriptors by index.
    pub indexed_strings: BTreeMap<u8, String>,
}

impl VirtualDeviceSpec {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            serial_number: None,
            manufacturer_string: None,
            product_string: None,
            release_number: 0x0100,
            usage_page: None,
            usage: None,
            interface_number: 0,
            output_report_len: None,
            exclusive: false,
            access_denied: false,
            indexed_strings: BTreeMap::new(),
        }
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.serial_number = Some(serial.to_string());
        self
    }

    pub fn manufacturer(mut self, s: &str) -> Self {
        self.manufacturer_string = Some(s.to_string());
        self
    }

    pub fn product(mut self, s: &str) -> Self {
        self.product_string = Some(s.to_string());
        self
    }

    pub fn usage(mut self, usage_page: u16, usage: u16) -> Self {
        self.usage_page = Some(usage_page);
        self.usage = Some(usage);
        self
    }

    pub fn fixed_output_len(mut self, len: usize) -> Self {
        self.output_report_len = Some(len);
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn deny_access(mut self) -> Self {
        self.access_denied = true;
        self
    }

    pub fn indexed_string(mut self, index: u8, s: &str) -> Self {
        self.indexed_strings.insert(index, s.to_string());
        self
    }
}

/// Live state of one attached virtual device, shared by the bus, the test,
/// and any open handles.
struct DeviceState {
    path: String,
    spec: VirtualDeviceSpec,
    attached: AtomicBool,
    open_handles: AtomicUsize,
    input: Mutex<VecDeque<Vec<u8>>>,
    input_ready: Condvar,
    written: Mutex<Vec<Vec<u8>>>,
    features: Mutex<HashMap<u8, Vec<u8>>>,
}

impl DeviceState {
    fn info(&self) -> DeviceInfo {
        let s = &self.spec;
        DeviceInfo {
            path: self.path.clone(),
            vendor_id: s.vendor_id,
            product_id: s.product_id,
            serial_number: s.serial_number.clone(),
            release_number: s.release_number,
            manufacturer_string: s.manufacturer_string.clone(),
            product_string: s.product_string.clone(),
            usage_page: s.usage_page,
            usage: s.usage,
            interface_number: s.interface_number,
            bus: BusType::Virtual,
        }
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(HidError::disconnected(format!("{} was unplugged", self.path)))
        }
    }
}

#[derive(Default)]
struct Bus {
    devices: Vec<Arc<DeviceState>>,
    next_id: usize,
    unavailable: bool,
}

/// Shared in-memory bus. Clones refer to the same bus.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    bus: Arc<Mutex<Bus>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a new device into the bus.
    pub fn attach(&self, spec: VirtualDeviceSpec) -> VirtualDevice {
        let mut bus = self.bus.lock();
        let path = format!("virtual:{}", bus.next_id);
        bus.next_id += 1;
        let state = Arc::new(DeviceState {
            path,
            spec,
            attached: AtomicBool::new(true),
            open_handles: AtomicUsize::new(0),
            input: Mutex::new(VecDeque::new()),
            input_ready: Condvar::new(),
            written: Mutex::new(Vec::new()),
            features: Mutex::new(HashMap::new()),
        });
        debug!(path = %state.path, "virtual device attached");
        bus.devices.push(state.clone());
        VirtualDevice { state }
    }

    /// Make enumeration fail as if the bus could not be queried.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.bus.lock().unavailable = unavailable;
    }

    fn find(&self, path: &str) -> Option<Arc<DeviceState>> {
        self.bus
            .lock()
            .devices
            .iter()
            .find(|d| d.path == path && d.is_attached())
            .cloned()
    }
}

impl Backend for VirtualBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Virtual
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let bus = self.bus.lock();
        if bus.unavailable {
            return Err(HidError::Enumeration("virtual bus is unavailable".into()));
        }
        Ok(bus
            .devices
            .iter()
            .filter(|d| d.is_attached())
            .map(|d| d.info())
            .collect())
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn RawDevice>> {
        let state = self
            .find(path)
            .ok_or_else(|| HidError::DeviceNotFound(path.to_string()))?;

        if state.spec.access_denied {
            return Err(HidError::AccessDenied(path.to_string()));
        }

        if state.spec.exclusive {
            if state
                .open_handles
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(HidError::AlreadyOpen(path.to_string()));
            }
        } else {
            state.open_handles.fetch_add(1, Ordering::SeqCst);
        }

        Ok(Box::new(VirtualRawDevice { state }))
    }
}

/// Test-side view of an attached virtual device.
#[derive(Clone)]
pub struct VirtualDevice {
    state: Arc<DeviceState>,
}

impl VirtualDevice {
    pub fn path(&self) -> &str {
        &self.state.path
    }

    /// Queue one input report for the host to read.
    pub fn feed(&self, report: &[u8]) {
        self.state.input.lock().push_back(report.to_vec());
        self.state.input_ready.notify_all();
    }

    /// Reports the host has written, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().clone()
    }

    /// Stage the feature report returned for `report_id`.
    pub fn set_feature_report(&self, report_id: u8, data: &[u8]) {
        self.state.features.lock().insert(report_id, data.to_vec());
    }

    /// Last feature report the host sent for `report_id`.
    pub fn feature_report(&self, report_id: u8) -> Option<Vec<u8>> {
        self.state.features.lock().get(&report_id).cloned()
    }

    /// Number of live handles to this device.
    pub fn open_handles(&self) -> usize {
        self.state.open_handles.load(Ordering::SeqCst)
    }

    /// Physically detach the device. In-flight and later transfers fail, and
    /// the device no longer enumerates.
    pub fn unplug(&self) {
        self.state.attached.store(false, Ordering::SeqCst);
        self.state.input_ready.notify_all();
        debug!(path = %self.state.path, "virtual device unplugged");
    }
}

struct VirtualRawDevice {
    state: Arc<DeviceState>,
}

impl RawDevice for VirtualRawDevice {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.state.input.lock();
        loop {
            self.state.ensure_attached()?;
            if let Some(report) = queue.pop_front() {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                return Ok(n);
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
            self.state.input_ready.wait_until(&mut queue, deadline);
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.state.ensure_attached()?;
        self.state.written.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize> {
        self.state.ensure_attached()?;
        let report_id = data.first().copied().unwrap_or(0);
        self.state.features.lock().insert(report_id, data.to_vec());
        Ok(data.len())
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.ensure_attached()?;
        let report_id = buf.first().copied().unwrap_or(0);
        let features = self.state.features.lock();
        let report = features
            .get(&report_id)
            .ok_or_else(|| HidError::transfer(format!("no feature report {report_id:#04x}")))?;
        let n = report.len().min(buf.len());
        buf[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }

    fn manufacturer_string(&mut self) -> Result<Option<String>> {
        self.state.ensure_attached()?;
        Ok(self.state.spec.manufacturer_string.clone())
    }

    fn product_string(&mut self) -> Result<Option<String>> {
        self.state.ensure_attached()?;
        Ok(self.state.spec.product_string.clone())
    }

    fn serial_number_string(&mut self) -> Result<Option<String>> {
        self.state.ensure_attached()?;
        Ok(self.state.spec.serial_number.clone())
    }

    fn indexed_string(&mut self, index: u8) -> Result<Option<String>> {
        self.state.ensure_attached()?;
        Ok(self.state.spec.indexed_strings.get(&index).cloned())
    }

    fn output_report_len(&self) -> Option<usize> {
        self.state.spec.output_report_len
    }
}

impl Drop for VirtualRawDevice {
    fn drop(&mut self) {
        self.state.open_handles.fetch_sub(1, Ordering::SeqCst);
        debug!(path = %self.state.path, "virtual device released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_unique_per_attach() {
        let bus = VirtualBackend::new();
        let a = bus.attach(VirtualDeviceSpec::new(1, 1));
        let b = bus.attach(VirtualDeviceSpec::new(1, 1));
        assert_ne!(a.path(), b.path());
        assert_eq!(bus.enumerate().unwrap().len(), 2);
    }

    #[test]
    fn raw_read_truncates_and_times_out() {
        let bus = VirtualBackend::new();
        let dev = bus.attach(VirtualDeviceSpec::new(1, 2));
        let mut raw = bus.open_path(dev.path()).unwrap();

        dev.feed(&[1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        assert_eq!(raw.read_timeout(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(buf, [1, 2]);

        assert_eq!(raw.read_timeout(&mut buf, Duration::from_millis(5)).unwrap(), 0);
    }

    #[test]
    fn exclusive_device_releases_on_drop() {
        let bus = VirtualBackend::new();
        let dev = bus.attach(VirtualDeviceSpec::new(1, 2).exclusive());
        let first = bus.open_path(dev.path()).unwrap();
        assert!(matches!(bus.open_path(dev.path()), Err(HidError::AlreadyOpen(_))));
        drop(first);
        assert_eq!(dev.open_handles(), 0);
        assert!(bus.open_path(dev.path()).is_ok());
    }
}
