//! Linux hidraw backend.
//!
//! Enumeration walks `/sys/class/hidraw`. Each entry's `device` link points
//! at the HID device directory, whose `uevent` carries the bus and IDs and
//! whose `report_descriptor` yields the top-level usage. For USB devices the
//! interface and device directories further up the sysfs tree supply the
//! interface number, release number, and string descriptors.
//!
//! Reports move through `/dev/hidrawN` with plain `read`/`write`; feature
//! reports use the `HIDIOC[SG]FEATURE` ioctls.

use crate::backends::{Backend, BackendKind, RawDevice};
use crate::error::{HidError, Result};
use crate::metadata::{BusType, DeviceInfo};
use crate::report_descriptor;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

const SYSFS_CLASS: &str = "/sys/class/hidraw";
const DEV_ROOT: &str = "/dev";

nix::ioctl_readwrite_buf!(hidiocsfeature, b'H', 0x06, u8);
nix::ioctl_readwrite_buf!(hidiocgfeature, b'H', 0x07, u8);

pub struct HidrawBackend {
    class_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for HidrawBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HidrawBackend {
    pub fn new() -> Self {
        Self::with_paths(SYSFS_CLASS, DEV_ROOT)
    }

    /// Backend over an alternative sysfs class directory and device directory.
    pub fn with_paths(class_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            class_root: class_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn describe(&self, node: &str) -> Option<DeviceInfo> {
        let hid_dir = fs::canonicalize(self.class_root.join(node).join("device")).ok()?;
        let uevent = Uevent::read(&hid_dir.join("uevent"))?;

        let path = self.dev_root.join(node).to_string_lossy().into_owned();
        let mut info = DeviceInfo::new(path, uevent.vendor_id, uevent.product_id);
        info.bus = BusType::from_linux_bus(uevent.bus);

        if let Ok(desc) = fs::read(hid_dir.join("report_descriptor")) {
            if let Some((page, usage)) = report_descriptor::top_level_usage(&desc) {
                info.usage_page = Some(page);
                info.usage = Some(usage);
            }
        }

        let strings = SysfsStrings::lookup(&hid_dir, &uevent);
        info.manufacturer_string = strings.manufacturer;
        info.product_string = strings.product;
        info.serial_number = strings.serial;
        if let Some(release) = strings.release {
            info.release_number = release;
        }
        if let Some(iface) = strings.interface {
            info.interface_number = iface;
        }
        Some(info)
    }

    fn strings_for(&self, path: &str) -> SysfsStrings {
        Path::new(path)
            .file_name()
            .and_then(|node| fs::canonicalize(self.class_root.join(node).join("device")).ok())
            .and_then(|hid_dir| {
                let uevent = Uevent::read(&hid_dir.join("uevent"))?;
                Some(SysfsStrings::lookup(&hid_dir, &uevent))
            })
            .unwrap_or_default()
    }
}

impl Backend for HidrawBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hidraw
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let entries = match fs::read_dir(&self.class_root) {
            Ok(entries) => entries,
            // No hidraw driver loaded means no devices, not a failure.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HidError::Enumeration(format!(
                    "{}: {e}",
                    self.class_root.display()
                )))
            }
        };

        let mut nodes: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("hidraw"))
            .collect();
        nodes.sort_by_key(|n| node_index(n));

        let mut devices = Vec::with_capacity(nodes.len());
        for node in &nodes {
            match self.describe(node) {
                Some(info) => devices.push(info),
                None => trace!(node = %node, "skipping hidraw node without readable sysfs data"),
            }
        }
        Ok(devices)
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn RawDevice>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| HidError::from_open_io(path, e))?;
        let strings = self.strings_for(path);
        debug!(path, "hidraw node opened");
        Ok(Box::new(HidrawDevice { file, strings }))
    }
}

fn node_index(name: &str) -> u32 {
    name.trim_start_matches("hidraw").parse().unwrap_or(u32::MAX)
}

/// Fields of a HID device's `uevent` file.
#[derive(Debug, Default, PartialEq)]
struct Uevent {
    bus: u16,
    vendor_id: u16,
    product_id: u16,
    name: Option<String>,
    uniq: Option<String>,
}

impl Uevent {
    fn read(path: &Path) -> Option<Self> {
        Self::parse(&fs::read_to_string(path).ok()?)
    }

    fn parse(text: &str) -> Option<Self> {
        let mut out = Uevent::default();
        let mut have_id = false;
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                // HID_ID=0003:0000046D:0000C52B
                "HID_ID" => {
                    let mut parts = value.split(':');
                    let bus = u32::from_str_radix(parts.next()?, 16).ok()?;
                    let vid = u32::from_str_radix(parts.next()?, 16).ok()?;
                    let pid = u32::from_str_radix(parts.next()?, 16).ok()?;
                    out.bus = bus as u16;
                    out.vendor_id = vid as u16;
                    out.product_id = pid as u16;
                    have_id = true;
                }
                "HID_NAME" => out.name = non_empty(value),
                "HID_UNIQ" => out.uniq = non_empty(value),
                _ => {}
            }
        }
        have_id.then_some(out)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .and_then(|s| non_empty(&s))
}

fn read_hex_attr(dir: &Path, name: &str) -> Option<u16> {
    read_attr(dir, name).and_then(|s| u16::from_str_radix(&s, 16).ok())
}

/// Descriptive strings for one hidraw node, gathered from sysfs.
#[derive(Debug, Default, Clone)]
struct SysfsStrings {
    manufacturer: Option<String>,
    product: Option<String>,
    serial: Option<String>,
    release: Option<u16>,
    interface: Option<i32>,
}

impl SysfsStrings {
    fn lookup(hid_dir: &Path, uevent: &Uevent) -> Self {
        let mut out = SysfsStrings {
            product: uevent.name.clone(),
            serial: uevent.uniq.clone(),
            ..Default::default()
        };
        if BusType::from_linux_bus(uevent.bus) != BusType::Usb {
            return out;
        }

        let ancestors = || hid_dir.ancestors().skip(1);
        if let Some(iface_dir) = ancestors().find(|d| d.join("bInterfaceNumber").is_file()) {
            out.interface = read_hex_attr(iface_dir, "bInterfaceNumber").map(i32::from);
        }
        if let Some(usb_dir) = ancestors().find(|d| d.join("idVendor").is_file()) {
            out.manufacturer = read_attr(usb_dir, "manufacturer");
            if let Some(product) = read_attr(usb_dir, "product") {
                out.product = Some(product);
            }
            if let Some(serial) = read_attr(usb_dir, "serial") {
                out.serial = Some(serial);
            }
            out.release = read_hex_attr(usb_dir, "bcdDevice");
        }
        out
    }
}

pub struct HidrawDevice {
    file: File,
    strings: SysfsStrings,
}

impl RawDevice for HidrawDevice {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        if ms == 0 && !timeout.is_zero() {
            ms = 1;
        }
        let revents = {
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(0) | Err(Errno::EINTR) => return Ok(0),
                Ok(_) => fds[0].revents().unwrap_or(PollFlags::empty()),
                Err(e) => return Err(HidError::from_transfer_io(io::Error::from(e))),
            }
        };
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            return Err(HidError::disconnected("hidraw node hung up"));
        }

        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(HidError::from_transfer_io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file.write(data).map_err(HidError::from_transfer_io)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize> {
        let mut report = data.to_vec();
        // SAFETY: the buffer outlives the call and its length is encoded in the request.
        let n = unsafe { hidiocsfeature(self.file.as_raw_fd(), &mut report) }
            .map_err(|e| HidError::from_transfer_io(io::Error::from(e)))?;
        Ok(n as usize)
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        // SAFETY: as above; the kernel writes at most `buf.len()` bytes.
        let n = unsafe { hidiocgfeature(self.file.as_raw_fd(), buf) }
            .map_err(|e| HidError::from_transfer_io(io::Error::from(e)))?;
        Ok(n as usize)
    }

    fn manufacturer_string(&mut self) -> Result<Option<String>> {
        Ok(self.strings.manufacturer.clone())
    }

    fn product_string(&mut self) -> Result<Option<String>> {
        Ok(self.strings.product.clone())
    }

    fn serial_number_string(&mut self) -> Result<Option<String>> {
        Ok(self.strings.serial.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    // Keyboard: usage page 0x01, usage 0x06.
    const KEYBOARD_DESC: &[u8] = &[0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0xC0];

    struct Fixture {
        root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            fs::create_dir_all(root.path().join("class/hidraw")).unwrap();
            fs::create_dir_all(root.path().join("dev")).unwrap();
            Fixture { root }
        }

        fn backend(&self) -> HidrawBackend {
            HidrawBackend::with_paths(self.root.path().join("class/hidraw"), self.root.path().join("dev"))
        }

        fn link(&self, node: &str, hid_dir: &Path) {
            let class = self.root.path().join("class/hidraw").join(node);
            fs::create_dir_all(&class).unwrap();
            symlink(hid_dir, class.join("device")).unwrap();
            fs::write(self.root.path().join("dev").join(node), b"").unwrap();
        }

        fn add_usb(&self, node: &str, iface: u8) -> PathBuf {
            let usb = self.root.path().join("devices/usb1/1-2");
            let intf = usb.join(format!("1-2:1.{iface}"));
            let hid = intf.join(format!("0003:046D:C52B.000{iface}"));
            fs::create_dir_all(&hid).unwrap();
            fs::write(usb.join("idVendor"), "046d\n").unwrap();
            fs::write(usb.join("manufacturer"), "Logitech\n").unwrap();
            fs::write(usb.join("product"), "USB Receiver\n").unwrap();
            fs::write(usb.join("serial"), "ABC123\n").unwrap();
            fs::write(usb.join("bcdDevice"), "1211\n").unwrap();
            fs::write(intf.join("bInterfaceNumber"), format!("{iface:02x}\n")).unwrap();
            fs::write(
                hid.join("uevent"),
                "DRIVER=hid-generic\nHID_ID=0003:0000046D:0000C52B\nHID_NAME=Logitech USB Receiver\nHID_UNIQ=\n",
            )
            .unwrap();
            fs::write(hid.join("report_descriptor"), KEYBOARD_DESC).unwrap();
            self.link(node, &hid);
            hid
        }

        fn add_bluetooth(&self, node: &str) {
            let hid = self.root.path().join("devices/virtual/misc/uhid/0005:054C:09CC.0007");
            fs::create_dir_all(&hid).unwrap();
            fs::write(
                hid.join("uevent"),
                "HID_ID=0005:0000054C:000009CC\nHID_NAME=Wireless Controller\nHID_UNIQ=a4:ae:12:00:11:22\n",
            )
            .unwrap();
            self.link(node, &hid);
        }
    }

    #[test]
    fn uevent_parsing() {
        let ev = Uevent::parse("HID_ID=0018:000004F3:00002A3C\nHID_NAME=ELAN Touchscreen\n").unwrap();
        assert_eq!(ev.bus, 0x18);
        assert_eq!(ev.vendor_id, 0x04f3);
        assert_eq!(ev.product_id, 0x2a3c);
        assert_eq!(ev.name.as_deref(), Some("ELAN Touchscreen"));
        assert_eq!(ev.uniq, None);

        assert_eq!(Uevent::parse("DRIVER=hid-generic\n"), None);
    }

    #[test]
    fn enumerates_usb_and_bluetooth_nodes() {
        let fx = Fixture::new();
        fx.add_usb("hidraw10", 1);
        fx.add_usb("hidraw2", 0);
        fx.add_bluetooth("hidraw3");

        let devices = fx.backend().enumerate().unwrap();
        assert_eq!(devices.len(), 3);
        // Numeric node order, not lexical.
        assert!(devices[0].path.ends_with("hidraw2"));
        assert!(devices[2].path.ends_with("hidraw10"));

        let usb = &devices[0];
        assert_eq!((usb.vendor_id, usb.product_id), (0x046d, 0xc52b));
        assert_eq!(usb.bus, BusType::Usb);
        assert_eq!(usb.manufacturer_string.as_deref(), Some("Logitech"));
        assert_eq!(usb.product_string.as_deref(), Some("USB Receiver"));
        assert_eq!(usb.serial_number.as_deref(), Some("ABC123"));
        assert_eq!(usb.release_number, 0x1211);
        assert_eq!(usb.interface_number, 0);
        assert_eq!((usb.usage_page, usb.usage), (Some(0x01), Some(0x06)));
        assert_eq!(devices[2].interface_number, 1);

        let bt = &devices[1];
        assert_eq!(bt.bus, BusType::Bluetooth);
        assert_eq!(bt.manufacturer_string, None);
        assert_eq!(bt.product_string.as_deref(), Some("Wireless Controller"));
        assert_eq!(bt.serial_number.as_deref(), Some("a4:ae:12:00:11:22"));
        assert_eq!(bt.interface_number, -1);
        assert_eq!(bt.usage_page, None);
    }

    #[test]
    fn missing_class_dir_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let backend = HidrawBackend::with_paths(dir.path().join("nope"), dir.path());
        assert!(backend.enumerate().unwrap().is_empty());
    }

    #[test]
    fn broken_entries_are_skipped() {
        let fx = Fixture::new();
        fx.add_usb("hidraw0", 0);
        fs::create_dir_all(fx.root.path().join("class/hidraw/hidraw1")).unwrap();
        assert_eq!(fx.backend().enumerate().unwrap().len(), 1);
    }

    #[test]
    fn open_missing_node_is_not_found() {
        let fx = Fixture::new();
        let path = fx.root.path().join("dev/hidraw7");
        let err = fx.backend().open_path(&path.to_string_lossy()).err().unwrap();
        assert!(matches!(err, HidError::DeviceNotFound(_)));
    }

    #[test]
    fn open_reads_strings_from_sysfs() {
        let fx = Fixture::new();
        fx.add_usb("hidraw0", 0);
        let backend = fx.backend();
        let path = backend.enumerate().unwrap()[0].path.clone();

        let mut dev = backend.open_path(&path).unwrap();
        assert_eq!(dev.product_string().unwrap().as_deref(), Some("USB Receiver"));
        assert_eq!(dev.manufacturer_string().unwrap().as_deref(), Some("Logitech"));
        assert_eq!(dev.serial_number_string().unwrap().as_deref(), Some("ABC123"));
        assert!(matches!(dev.indexed_string(1), Err(HidError::Unsupported(_))));
    }

    #[test]
    fn read_returns_pending_bytes_then_nothing() {
        let fx = Fixture::new();
        fx.add_usb("hidraw0", 0);
        fs::write(fx.root.path().join("dev/hidraw0"), [0x01, 0x02, 0x03]).unwrap();
        let backend = fx.backend();
        let path = backend.enumerate().unwrap()[0].path.clone();

        let mut dev = backend.open_path(&path).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(dev.read_timeout(&mut buf, Duration::from_millis(10)).unwrap(), 2);
        assert_eq!(buf, [0x01, 0x02]);
        let mut rest = [0u8; 8];
        assert_eq!(dev.read_timeout(&mut rest, Duration::ZERO).unwrap(), 1);
        assert_eq!(dev.read_timeout(&mut rest, Duration::ZERO).unwrap(), 0);
    }
}
