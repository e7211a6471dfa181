//! Cross-platform HID device access.
//!
//! ```no_run
//! use hidkit::{Manager, ReadOutcome};
//! use std::time::Duration;
//!
//! # fn main() -> hidkit::Result<()> {
//! let manager = Manager::new()?;
//! for info in manager.enumerate(0, 0)?.iter() {
//!     println!("{info}");
//! }
//!
//! let dev = manager.open(0x046d, 0xc52b, None)?;
//! if let ReadOutcome::Data(report) = dev.read_timeout(64, Some(Duration::from_millis(500)))? {
//!     println!("{report:02x?}");
//! }
//! dev.close()?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod logger;
pub mod manager;
pub mod metadata;
pub mod poll;
pub mod report_descriptor;
pub mod snapshot;

pub use backends::BackendKind;
pub use config::Config;
pub use device::{HidDevice, ReadOutcome};
pub use error::{HidError, Result};
pub use manager::Manager;
pub use metadata::{BusType, DeviceInfo};
pub use snapshot::DeviceList;
