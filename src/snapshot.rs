//! Result of one enumeration pass.
//!
//! [`DeviceList`] is an **owned**, read-only view of the devices that were
//! attached when [`Manager::enumerate`](crate::manager::Manager::enumerate) ran.
//!
//! # Semantics
//! - A list is **immutable** and never refreshed. Enumerate again to observe
//!   devices that attached/detached since.
//! - Order is backend-defined and not stable across calls.
//! - Two lists never share state; holding one has no effect on the bus.
//!
//! # Examples
//! ```no_run
//! use hidkit::Manager;
//!
//! let mgr = Manager::new().expect("backend");
//! let list = mgr.enumerate(0, 0).expect("enumerate");
//! for info in list.iter() {
//!     println!("{info}");
//! }
//! ```

use crate::metadata::DeviceInfo;
use serde::{Deserialize, Serialize};

/// Owned snapshot of enumerated devices. Serializes as a plain array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceList(Vec<DeviceInfo>);

impl DeviceList {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self(devices)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate descriptors in enumeration order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, DeviceInfo> {
        self.0.iter()
    }

    /// Find the descriptor with exactly this path.
    pub fn find_path(&self, path: &str) -> Option<&DeviceInfo> {
        self.0.iter().find(|d| d.path == path)
    }

    /// Consume the list and return the inner vector.
    #[inline]
    pub fn into_inner(self) -> Vec<DeviceInfo> {
        self.0
    }

    /// Human-readable listing: one `key : value` block per device, blank line between.
    ///
    /// An empty list renders as an empty string.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for info in &self.0 {
            for (key, value) in info.fields() {
                out.push_str(key);
                out.push_str(" : ");
                out.push_str(&value);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

impl IntoIterator for DeviceList {
    type Item = DeviceInfo;
    type IntoIter = std::vec::IntoIter<DeviceInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a DeviceInfo;
    type IntoIter = std::slice::Iter<'a, DeviceInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
