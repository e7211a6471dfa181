//! Direct USB backend through libusb.
//!
//! Every HID-class interface of every USB device is one enumerable entry,
//! addressed as `bus:address:interface` in hex (`0001:0004:00`). Opening an
//! entry detaches the kernel driver from that interface and claims it.
//!
//! Input reports are collected by a reader thread that keeps one interrupt
//! transfer in flight and queues completed reports; the queue is bounded and
//! drops the oldest report when the host falls behind. Output reports use the
//! interrupt OUT endpoint when the interface has one and a `SET_REPORT`
//! control transfer otherwise.

use crate::backends::{Backend, BackendKind, RawDevice};
use crate::error::{HidError, Result};
use crate::metadata::{BusType, DeviceInfo};
use crate::report_descriptor;
use parking_lot::{Condvar, Mutex};
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const HID_CLASS: u8 = 0x03;
const MAX_QUEUED_REPORTS: usize = 30;
const READER_TIMEOUT: Duration = Duration::from_millis(100);
const STRING_TIMEOUT: Duration = Duration::from_millis(100);
const TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);

// HID class requests (HID 1.11, section 7.2).
const REQ_GET_REPORT: u8 = 0x01;
const REQ_SET_REPORT: u8 = 0x09;
const REPORT_TYPE_OUTPUT: u16 = 0x02;
const REPORT_TYPE_FEATURE: u16 = 0x03;
const RT_CLASS_INTERFACE_OUT: u8 = 0x21;
const RT_CLASS_INTERFACE_IN: u8 = 0xA1;
const RT_STANDARD_INTERFACE_IN: u8 = 0x81;
const REQ_GET_DESCRIPTOR: u8 = 0x06;
const DESCRIPTOR_REPORT: u16 = 0x22;

pub struct LibusbBackend {
    context: Context,
}

impl LibusbBackend {
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(|e| HidError::Enumeration(e.to_string()))?;
        Ok(Self { context })
    }

    fn device_at(&self, bus: u8, address: u8) -> Result<Device<Context>> {
        self.context
            .devices()
            .map_err(|e| HidError::Enumeration(e.to_string()))?
            .iter()
            .find(|d| d.bus_number() == bus && d.address() == address)
            .ok_or_else(|| HidError::DeviceNotFound(format!("usb {bus:03}:{address:03}")))
    }
}

/// Interrupt endpoints of one HID interface.
#[derive(Debug, Clone, Copy)]
struct Endpoints {
    input: Option<(u8, u16)>,
    output: Option<(u8, u16)>,
}

/// HID interfaces of a device's active configuration with their endpoints.
fn hid_interfaces(device: &Device<Context>) -> Vec<(u8, Endpoints)> {
    let Ok(config) = device.active_config_descriptor() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for interface in config.interfaces() {
        // Only the first alternate setting is considered.
        let Some(alt) = interface.descriptors().next() else {
            continue;
        };
        if alt.class_code() != HID_CLASS {
            continue;
        }
        let mut eps = Endpoints {
            input: None,
            output: None,
        };
        for ep in alt.endpoint_descriptors() {
            if ep.transfer_type() != TransferType::Interrupt {
                continue;
            }
            match ep.direction() {
                Direction::In if eps.input.is_none() => {
                    eps.input = Some((ep.address(), ep.max_packet_size()))
                }
                Direction::Out if eps.output.is_none() => {
                    eps.output = Some((ep.address(), ep.max_packet_size()))
                }
                _ => {}
            }
        }
        out.push((alt.interface_number(), eps));
    }
    out
}

/// Re-encode a decoded `bcdDevice` as BCD.
fn bcd(version: rusb::Version) -> u16 {
    let major = u16::from(version.major());
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | (u16::from(version.minor()) << 4)
        | u16::from(version.sub_minor())
}

#[derive(Debug, Default, Clone)]
struct Strings {
    manufacturer: Option<String>,
    product: Option<String>,
    serial: Option<String>,
}

fn read_strings(handle: &DeviceHandle<Context>, desc: &rusb::DeviceDescriptor) -> Strings {
    let Some(lang) = handle
        .read_languages(STRING_TIMEOUT)
        .ok()
        .and_then(|langs| langs.first().copied())
    else {
        return Strings::default();
    };
    let keep = |s: rusb::Result<String>| s.ok().filter(|s| !s.is_empty());
    Strings {
        manufacturer: keep(handle.read_manufacturer_string(lang, desc, STRING_TIMEOUT)),
        product: keep(handle.read_product_string(lang, desc, STRING_TIMEOUT)),
        serial: keep(handle.read_serial_number_string(lang, desc, STRING_TIMEOUT)),
    }
}

fn read_report_descriptor(handle: &DeviceHandle<Context>, iface: u8) -> Option<(u16, u16)> {
    let mut buf = vec![0u8; 4096];
    let n = handle
        .read_control(
            RT_STANDARD_INTERFACE_IN,
            REQ_GET_DESCRIPTOR,
            DESCRIPTOR_REPORT << 8,
            u16::from(iface),
            &mut buf,
            STRING_TIMEOUT,
        )
        .ok()?;
    report_descriptor::top_level_usage(&buf[..n])
}

fn format_path(bus: u8, address: u8, iface: u8) -> String {
    format!("{bus:04x}:{address:04x}:{iface:02x}")
}

fn parse_path(path: &str) -> Option<(u8, u8, u8)> {
    let mut parts = path.split(':');
    let bus = u8::from_str_radix(parts.next()?, 16).ok()?;
    let address = u8::from_str_radix(parts.next()?, 16).ok()?;
    let iface = u8::from_str_radix(parts.next()?, 16).ok()?;
    parts.next().is_none().then_some((bus, address, iface))
}

impl Backend for LibusbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Libusb
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let list = self
            .context
            .devices()
            .map_err(|e| HidError::Enumeration(e.to_string()))?;

        let mut found = Vec::new();
        for device in list.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            // HID is declared per interface; class-coded devices are not HID.
            if desc.class_code() != 0 {
                continue;
            }
            let interfaces = hid_interfaces(&device);
            if interfaces.is_empty() {
                continue;
            }

            // Unopenable devices are still listed, just without strings.
            let handle = device.open().ok();
            let strings = handle
                .as_ref()
                .map(|h| read_strings(h, &desc))
                .unwrap_or_default();

            for (iface, _) in interfaces {
                let mut info = DeviceInfo::new(
                    format_path(device.bus_number(), device.address(), iface),
                    desc.vendor_id(),
                    desc.product_id(),
                );
                info.release_number = bcd(desc.device_version());
                info.manufacturer_string = strings.manufacturer.clone();
                info.product_string = strings.product.clone();
                info.serial_number = strings.serial.clone();
                info.interface_number = i32::from(iface);
                info.bus = BusType::Usb;
                if let Some((page, usage)) =
                    handle.as_ref().and_then(|h| read_report_descriptor(h, iface))
                {
                    info.usage_page = Some(page);
                    info.usage = Some(usage);
                }
                found.push(info);
            }
        }
        Ok(found)
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn RawDevice>> {
        let (bus, address, iface) = parse_path(path)
            .ok_or_else(|| HidError::DeviceNotFound(format!("not a libusb path: {path}")))?;
        let device = self.device_at(bus, address)?;
        let desc = device.device_descriptor()?;
        let endpoints = hid_interfaces(&device)
            .into_iter()
            .find(|(n, _)| *n == iface)
            .map(|(_, eps)| eps)
            .ok_or_else(|| HidError::DeviceNotFound(path.to_string()))?;

        let mut handle = device.open()?;
        // Not every platform can detach; claiming reports the real problem.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            trace!(path, error = %e, "kernel driver auto-detach unavailable");
        }
        handle.claim_interface(iface)?;
        let strings = read_strings(&handle, &desc);
        debug!(path, ?endpoints, "usb interface claimed");

        LibusbDevice::start(path, handle, iface, endpoints, strings)
            .map(|d| Box::new(d) as Box<dyn RawDevice>)
    }
}

struct Shared {
    handle: DeviceHandle<Context>,
    queue: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
    shutdown: AtomicBool,
    disconnected: AtomicBool,
}

pub struct LibusbDevice {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    interface: u8,
    endpoints: Endpoints,
    strings: Strings,
}

impl LibusbDevice {
    fn start(
        path: &str,
        handle: DeviceHandle<Context>,
        interface: u8,
        endpoints: Endpoints,
        strings: Strings,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            handle,
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        });

        let reader = match endpoints.input {
            Some((ep, max_packet)) => {
                let shared = shared.clone();
                let name = format!("hidkit-usb-{path}");
                Some(
                    thread::Builder::new()
                        .name(name)
                        .spawn(move || reader_loop(&shared, ep, usize::from(max_packet)))
                        .map_err(|e| HidError::transfer(format!("cannot start reader: {e}")))?,
                )
            }
            None => None,
        };

        Ok(Self {
            shared,
            reader,
            interface,
            endpoints,
            strings,
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.shared.disconnected.load(Ordering::SeqCst) {
            Err(HidError::disconnected("usb device was disconnected"))
        } else {
            Ok(())
        }
    }
}

fn reader_loop(shared: &Shared, endpoint: u8, max_packet: usize) {
    let mut buf = vec![0u8; max_packet.max(1)];
    while !shared.shutdown.load(Ordering::SeqCst) {
        match shared.handle.read_interrupt(endpoint, &mut buf, READER_TIMEOUT) {
            Ok(n) => {
                let mut queue = shared.queue.lock();
                if queue.len() >= MAX_QUEUED_REPORTS {
                    queue.pop_front();
                    trace!(endpoint, "input queue full, dropped oldest report");
                }
                queue.push_back(buf[..n].to_vec());
                shared.ready.notify_all();
            }
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
            Err(rusb::Error::NoDevice) => {
                warn!(endpoint, "usb device went away");
                // Take the lock so a reader between its checks cannot miss the wakeup.
                let _queue = shared.queue.lock();
                shared.disconnected.store(true, Ordering::SeqCst);
                shared.ready.notify_all();
                return;
            }
            Err(e) => {
                debug!(endpoint, error = %e, "interrupt read failed");
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Bytes that go on the wire for output report `data`.
///
/// Unnumbered reports are sent without the leading zero. With an interrupt
/// OUT endpoint the result must fit in one packet.
fn output_payload(data: &[u8], max_packet: Option<u16>) -> Result<&[u8]> {
    let payload = match first_byte(data)? {
        0 => &data[1..],
        _ => data,
    };
    if let Some(max_packet) = max_packet {
        if payload.len() > usize::from(max_packet) {
            return Err(HidError::Validation(format!(
                "report of {} bytes does not fit the {max_packet}-byte output endpoint",
                data.len()
            )));
        }
    }
    Ok(payload)
}

fn first_byte(data: &[u8]) -> Result<u8> {
    data.first()
        .copied()
        .ok_or_else(|| HidError::Validation("report buffer is empty".into()))
}

impl RawDevice for LibusbDevice {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.reader.is_none() {
            return Err(HidError::Unsupported(
                "interface has no interrupt IN endpoint".into(),
            ));
        }
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        loop {
            if let Some(report) = queue.pop_front() {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                return Ok(n);
            }
            self.ensure_connected()?;
            if Instant::now() >= deadline {
                return Ok(0);
            }
            self.shared.ready.wait_until(&mut queue, deadline);
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_connected()?;
        let report_id = first_byte(data)?;
        let max_packet = self.endpoints.output.map(|(_, max_packet)| max_packet);
        let payload = output_payload(data, max_packet)?;
        let skipped = data.len() - payload.len();

        let sent = match self.endpoints.output {
            Some((ep, _)) => self
                .shared
                .handle
                .write_interrupt(ep, payload, TRANSFER_TIMEOUT)?,
            None => self.shared.handle.write_control(
                RT_CLASS_INTERFACE_OUT,
                REQ_SET_REPORT,
                (REPORT_TYPE_OUTPUT << 8) | u16::from(report_id),
                u16::from(self.interface),
                payload,
                TRANSFER_TIMEOUT,
            )?,
        };
        Ok(sent + skipped)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_connected()?;
        let report_id = first_byte(data)?;
        let payload = if report_id == 0 { &data[1..] } else { data };
        let sent = self.shared.handle.write_control(
            RT_CLASS_INTERFACE_OUT,
            REQ_SET_REPORT,
            (REPORT_TYPE_FEATURE << 8) | u16::from(report_id),
            u16::from(self.interface),
            payload,
            TRANSFER_TIMEOUT,
        )?;
        Ok(sent + (data.len() - payload.len()))
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_connected()?;
        let report_id = first_byte(buf)?;
        let (target, extra) = if report_id == 0 {
            (&mut buf[1..], 1)
        } else {
            (&mut buf[..], 0)
        };
        let n = self.shared.handle.read_control(
            RT_CLASS_INTERFACE_IN,
            REQ_GET_REPORT,
            (REPORT_TYPE_FEATURE << 8) | u16::from(report_id),
            u16::from(self.interface),
            target,
            TRANSFER_TIMEOUT,
        )?;
        Ok(n + extra)
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

    fn indexed_string(&mut self, index: u8) -> Result<Option<String>> {
        self.ensure_connected()?;
        if index == 0 {
            return Err(HidError::Validation(
                "string index 0 is the language table".into(),
            ));
        }
        let handle = &self.shared.handle;
        let Some(lang) = handle.read_languages(STRING_TIMEOUT)?.first().copied() else {
            return Ok(None);
        };
        match handle.read_string_descriptor(lang, index, STRING_TIMEOUT) {
            Ok(s) => Ok(Some(s)),
            // Stall on an unknown index.
            Err(rusb::Error::Pipe) | Err(rusb::Error::InvalidParam) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Upper bound for unnumbered reports; numbered ones are checked in `write`.
    fn output_report_len(&self) -> Option<usize> {
        self.endpoints
            .output
            .map(|(_, max_packet)| usize::from(max_packet) + 1)
    }
}

impl Drop for LibusbDevice {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("usb reader thread panicked");
            }
        }
        // Sole owner once the reader has exited; releasing reattaches the kernel driver.
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            if let Err(e) = shared.handle.release_interface(self.interface) {
                trace!(interface = self.interface, error = %e, "release_interface failed");
            }
        }
    }
}
