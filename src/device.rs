use std::{
    fmt::Display,
    hash::{Hash, Hasher},
    io,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::ports::PortEnumerator;

/// In-memory devices.
pub mod mock;

/// Real serial ports.
pub mod serial;

/// The live state of one open device.
pub(crate) mod session;

/// The name of a device, e.g. `COM6` or `/dev/ttyACM0`.
///
/// Names compare case-insensitively, so `com6` and `COM6` are the same device.
/// The spelling it was created with is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceName(String);

impl DeviceName {
    /// A new name.
    pub fn new(name: &str) -> Self {
        Self(name.into())
    }

    /// Borrowed form, as spelled when created.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this names the same device as `other`.
    pub fn matches(&self, other: &str) -> bool {
        self.0.to_lowercase() == other.to_lowercase()
    }
}

impl PartialEq for DeviceName {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for DeviceName {}

impl Hash for DeviceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_lowercase().hash(state);
    }
}

impl PartialOrd for DeviceName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeviceName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.to_lowercase().cmp(&other.0.to_lowercase())
    }
}

impl Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: AsRef<str>> From<T> for DeviceName {
    fn from(string_like: T) -> Self {
        Self::new(string_like.as_ref())
    }
}

/// A byte stream to a device which can also signal a break.
///
/// Closing the transport is dropping it.
pub trait DeviceTransport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Start transmitting a break condition.
    fn set_break(&mut self) -> io::Result<()>;

    /// Stop transmitting a break condition.
    fn clear_break(&mut self) -> io::Result<()>;
}

/// An owned, type erased [`DeviceTransport`].
pub type BoxedTransport = Box<dyn DeviceTransport>;

/// Opens devices by name.
pub trait DeviceOpener: Send + Sync {
    /// Open the named device at the given baud rate.
    fn open(&self, name: &str, baud: u32) -> io::Result<BoxedTransport>;
}

/// Where devices come from: how to open them and how to list them.
#[derive(Clone)]
pub struct Backend {
    pub(crate) opener: Arc<dyn DeviceOpener>,
    pub(crate) enumerator: Arc<dyn PortEnumerator>,
}

impl Backend {
    /// A backend from any opener and enumerator.
    pub fn new(
        opener: impl DeviceOpener + 'static,
        enumerator: impl PortEnumerator + 'static,
    ) -> Self {
        Self {
            opener: Arc::new(opener),
            enumerator: Arc::new(enumerator),
        }
    }

    /// The serial ports of this host.
    pub fn serial() -> Self {
        Self::new(serial::SerialOpener, serial::SerialEnumerator)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(DeviceName::new("COM6"), DeviceName::new("com6"));
        assert_ne!(DeviceName::new("COM6"), DeviceName::new("COM7"));

        let mut h = HashSet::new();
        h.insert(DeviceName::new("COM6"));
        assert!(h.contains(&DeviceName::new("cOm6")));
    }

    #[test]
    fn names_keep_spelling() {
        assert_eq!(DeviceName::new("CoM6").to_string(), "CoM6");
    }
}
