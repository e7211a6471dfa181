//! Open device handle.
//!
//! [`HidDevice`] wraps a backend [`RawDevice`] and owns everything that is
//! the same on every platform:
//! - the closed state (use-after-close and double close are errors)
//! - the blocking flag and read timeouts
//! - cancellation of a blocked read by a concurrent [`HidDevice::close`]
//! - input validation (empty writes, oversized fixed-size reports)
//! - retiring the backend device once it reports a disconnect
//!
//! All methods take `&self`, so a handle can sit behind an `Arc` and be
//! closed from a supervisory thread while another thread is blocked in
//! [`HidDevice::read`]. Other operations on one handle are expected to be
//! serialized by the caller.
//!
//! Blocking reads are carried out as a series of backend reads no longer
//! than the handle's poll interval. The closed flag is checked between
//! them, which bounds how long a cancelled read can linger.

use crate::backends::RawDevice;
use crate::config::MAX_POLL_INTERVAL_MS;
use crate::error::{HidError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default upper bound on a single backend read inside a blocking read.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of a read that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One input report, at most `max_len` bytes.
    Data(Vec<u8>),
    /// Non-blocking handle and nothing was pending.
    WouldBlock,
    /// Blocking handle and the timeout elapsed without data.
    TimedOut,
}

impl ReadOutcome {
    /// The report bytes, if any arrived.
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            ReadOutcome::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// An open HID device.
///
/// Dropping an open handle closes it.
pub struct HidDevice {
    path: String,
    raw: Mutex<Option<Box<dyn RawDevice>>>,
    closed: AtomicBool,
    blocking: AtomicBool,
    poll_interval: Duration,
}

impl HidDevice {
    /// Wrap a freshly opened backend device. Handles start in blocking mode.
    ///
    /// `poll_interval` is clamped to 1..=[`MAX_POLL_INTERVAL_MS`] milliseconds.
    pub fn new(path: impl Into<String>, raw: Box<dyn RawDevice>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            raw: Mutex::new(Some(raw)),
            closed: AtomicBool::new(false),
            blocking: AtomicBool::new(true),
            poll_interval: poll_interval.clamp(
                Duration::from_millis(1),
                Duration::from_millis(MAX_POLL_INTERVAL_MS),
            ),
        }
    }

    /// Path this handle was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::SeqCst)
    }

    /// `true` after [`close`](Self::close) (or drop of the last owner).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Switch between blocking and non-blocking reads.
    ///
    /// Affects reads started after this call; a read already waiting keeps
    /// the mode it started with.
    pub fn set_blocking(&self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        self.blocking.store(enabled, Ordering::SeqCst);
        debug!(path = %self.path, blocking = enabled, "blocking mode changed");
        Ok(())
    }

    /// Read one input report of at most `max_len` bytes, without a timeout.
    ///
    /// A blocking handle waits until a report arrives or the handle is
    /// closed; a non-blocking handle returns [`ReadOutcome::WouldBlock`]
    /// immediately when nothing is pending.
    pub fn read(&self, max_len: usize) -> Result<ReadOutcome> {
        self.read_timeout(max_len, None)
    }

    /// Like [`read`](Self::read), but a blocking handle gives up with
    /// [`ReadOutcome::TimedOut`] once `timeout` has elapsed.
    pub fn read_timeout(&self, max_len: usize, timeout: Option<Duration>) -> Result<ReadOutcome> {
        if max_len == 0 {
            return Err(HidError::Validation("read length must be non-zero".into()));
        }
        self.ensure_open()?;

        let blocking = self.is_blocking();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = vec![0u8; max_len];

        loop {
            let slice = if !blocking {
                Duration::ZERO
            } else {
                match deadline {
                    Some(d) => d
                        .saturating_duration_since(Instant::now())
                        .min(self.poll_interval),
                    None => self.poll_interval,
                }
            };

            let n = self.with_raw(|raw| raw.read_timeout(&mut buf, slice))?;
            if n > 0 {
                buf.truncate(n);
                return Ok(ReadOutcome::Data(buf));
            }

            if !blocking {
                return Ok(ReadOutcome::WouldBlock);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Ok(ReadOutcome::TimedOut);
                }
            }
        }
    }

    /// Write an output report. `data[0]` is the report ID (0 if the device
    /// does not use numbered reports).
    ///
    /// Returns the number of bytes accepted. Reports longer than a fixed
    /// output size are rejected before anything is sent.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(HidError::Validation("write buffer is empty".into()));
        }
        self.with_raw(|raw| {
            if let Some(limit) = raw.output_report_len() {
                if data.len() > limit {
                    return Err(HidError::Validation(format!(
                        "report of {} bytes exceeds the fixed output report size of {limit}",
                        data.len()
                    )));
                }
            }
            raw.write(data)
        })
    }

    /// Send a feature report. `data[0]` is the report ID.
    pub fn send_feature_report(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(HidError::Validation("feature report is empty".into()));
        }
        self.with_raw(|raw| raw.send_feature_report(data))
    }

    /// Fetch feature report `report_id`. The returned bytes start with the report ID.
    pub fn get_feature_report(&self, report_id: u8, max_len: usize) -> Result<Vec<u8>> {
        if max_len == 0 {
            return Err(HidError::Validation("feature report length must be non-zero".into()));
        }
        let mut buf = vec![0u8; max_len];
        buf[0] = report_id;
        let n = self.with_raw(|raw| raw.get_feature_report(&mut buf))?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn manufacturer_string(&self) -> Result<Option<String>> {
        self.with_raw(|raw| raw.manufacturer_string())
    }

    pub fn product_string(&self) -> Result<Option<String>> {
        self.with_raw(|raw| raw.product_string())
    }

    pub fn serial_number_string(&self) -> Result<Option<String>> {
        self.with_raw(|raw| raw.serial_number_string())
    }

    /// String descriptor by index, where the backend supports it.
    pub fn indexed_string(&self, index: u8) -> Result<Option<String>> {
        self.with_raw(|raw| raw.indexed_string(index))
    }

    /// Release the device.
    ///
    /// A read blocked on another thread returns [`HidError::HandleClosed`].
    /// Closing twice is an error.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(HidError::HandleClosed);
        }
        let raw = self.raw.lock().take();
        debug!(path = %self.path, released = raw.is_some(), "device closed");
        drop(raw);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(HidError::HandleClosed)
        } else {
            Ok(())
        }
    }

    /// Run `f` against the backend device, retiring it if it reports a disconnect.
    fn with_raw<T>(&self, f: impl FnOnce(&mut dyn RawDevice) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        let mut guard = self.raw.lock();
        // Re-check under the lock: close() may have won the race.
        self.ensure_open()?;
        let raw = guard.as_mut().ok_or(HidError::HandleClosed)?;
        let result = f(raw.as_mut());
        if let Err(e) = &result {
            if e.is_disconnect() {
                warn!(path = %self.path, error = %e, "device disconnected");
                guard.take();
            }
        }
        result
    }
}

impl Drop for HidDevice {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(path = %self.path, "device handle dropped while open");
        }
    }
}

impl std::fmt::Debug for HidDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidDevice")
            .field("path", &self.path)
            .field("blocking", &self.is_blocking())
            .field("closed", &self.is_closed())
            .finish()
    }
}
