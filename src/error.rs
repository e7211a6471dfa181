//! Error taxonomy for device access.
//!
//! Every failing operation reports one of these synchronously. Nothing is
//! retried internally; retry policy belongs to the caller.

use std::io;
use thiserror::Error;

/// Errors produced by enumeration, open, transfers, and handle lifecycle.
#[derive(Error, Debug)]
pub enum HidError {
    /// The platform device registry/bus could not be queried.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// No attached device matched the open request.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but the platform refused access.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The platform enforces a single consumer and another handle is live.
    #[error("device already open: {0}")]
    AlreadyOpen(String),

    /// The handle was closed (explicitly, concurrently, or after the device went away).
    #[error("handle is closed")]
    HandleClosed,

    /// Backend I/O failure during read, write, or a string/feature query.
    ///
    /// `disconnected` is set when the failure means the device is gone; the
    /// handle is unusable afterwards.
    #[error("transfer failed: {message}")]
    Transfer { message: String, disconnected: bool },

    /// Malformed input (empty write, oversized fixed-size report, zero-length read).
    #[error("invalid input: {0}")]
    Validation(String),

    /// The operation is not available on this backend.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid configuration, or a backend that was not compiled in.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HidError>;

impl HidError {
    /// Transfer failure that leaves the device usable.
    pub fn transfer(message: impl Into<String>) -> Self {
        HidError::Transfer {
            message: message.into(),
            disconnected: false,
        }
    }

    /// Transfer failure caused by the device disappearing.
    pub fn disconnected(message: impl Into<String>) -> Self {
        HidError::Transfer {
            message: message.into(),
            disconnected: true,
        }
    }

    /// `true` if this error means the device is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            HidError::Transfer {
                disconnected: true,
                ..
            }
        )
    }

    /// Map an `io::Error` raised while opening `path`.
    pub fn from_open_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => HidError::DeviceNotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => {
                HidError::AccessDenied(format!("{path}: {err}"))
            }
            _ if is_busy(&err) => HidError::AlreadyOpen(path.to_string()),
            _ if is_gone(&err) => HidError::DeviceNotFound(path.to_string()),
            _ => HidError::transfer(format!("open {path}: {err}")),
        }
    }

    /// Map an `io::Error` raised during a transfer.
    pub fn from_transfer_io(err: io::Error) -> Self {
        if is_gone(&err) {
            HidError::disconnected(err.to_string())
        } else {
            HidError::transfer(err.to_string())
        }
    }
}

#[cfg(target_os = "linux")]
fn is_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EBUSY)
}

#[cfg(not(target_os = "linux"))]
fn is_busy(_err: &io::Error) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_gone(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENODEV) | Some(libc::ENXIO) | Some(libc::ESHUTDOWN)
    )
}

#[cfg(not(target_os = "linux"))]
fn is_gone(_err: &io::Error) -> bool {
    false
}

#[cfg(feature = "hid")]
impl From<hidapi::HidError> for HidError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") || msg.contains("EACCES")
        {
            HidError::AccessDenied(msg)
        } else {
            HidError::transfer(msg)
        }
    }
}

#[cfg(feature = "libusb")]
impl From<rusb::Error> for HidError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::NoDevice => HidError::disconnected(e.to_string()),
            rusb::Error::NotFound => HidError::DeviceNotFound(e.to_string()),
            rusb::Error::Access => HidError::AccessDenied(e.to_string()),
            rusb::Error::Busy => HidError::AlreadyOpen(e.to_string()),
            rusb::Error::InvalidParam | rusb::Error::Overflow => {
                HidError::Validation(e.to_string())
            }
            rusb::Error::NotSupported => HidError::Unsupported(e.to_string()),
            _ => HidError::transfer(e.to_string()),
        }
    }
}
