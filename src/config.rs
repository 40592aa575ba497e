use std::{net::SocketAddr, path::Path, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{device::session::SessionSettings, error::Error};

/// The default address to serve on.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8989";

/// The default baud rate of devices opened at startup.
pub const DEFAULT_BAUD: u32 = 115_200;

/// A device to open when the server starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupDevice {
    /// The device name.
    /// Likely "/dev/ttyACMx" or "COMx".
    pub name: String,

    /// The baud rate to open it at.
    pub baud: u32,
}

impl StartupDevice {
    /// A device to open at the given baud.
    pub fn new(name: &str, baud: u32) -> Self {
        Self {
            name: name.into(),
            baud,
        }
    }
}

/// The configuration used for running the server.
///
/// Every field may be omitted from a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where to serve the websocket.
    pub listen: SocketAddr,

    /// Devices opened when the server starts.
    pub devices: Vec<StartupDevice>,

    /// How many frames may wait for a client before it is
    /// considered too slow and disconnected.
    pub client_queue_capacity: usize,

    /// How long a single frame write to a client may take.
    pub client_write_timeout_ms: u64,

    /// The largest message accepted from a client, in bytes.
    pub client_max_message_size: usize,

    /// How many bytes to read from a device at most per chunk.
    pub device_read_chunk: usize,

    /// How long a break condition is held.
    pub break_duration_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8989)),
            devices: vec![],
            client_queue_capacity: 256 * 10,
            client_write_timeout_ms: 10_000,
            client_max_message_size: 512,
            device_read_chunk: 1024,
            break_duration_ms: 400,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Ok(Self::ron().from_str::<Config>(input)?)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            devices: vec![
                StartupDevice::new("/dev/ttyACM0", DEFAULT_BAUD),
                StartupDevice::new("COM6", 9600),
            ],
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .expect("Serialize should work")
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    /// The per-write deadline for client frames.
    pub fn client_write_timeout(&self) -> Duration {
        Duration::from_millis(self.client_write_timeout_ms)
    }

    pub(crate) fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            read_chunk: self.device_read_chunk,
            break_duration: Duration::from_millis(self.break_duration_ms),
        }
    }

    fn check_duplicate_devices(&self) -> Result<(), Error> {
        let duplicates = self
            .devices
            .iter()
            .map(|device| device.name.to_lowercase())
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!("A device can only be opened once, but these are listed more than once (names are not case sensitive): {duplicates:?}")))
        }
    }

    fn check_device_bauds(&self) -> Result<(), Error> {
        match self.devices.iter().find(|device| device.baud == 0) {
            Some(device) => Err(Error::BadConfig(format!(
                "The device `{}` has a baud rate of zero.",
                device.name
            ))),
            None => Ok(()),
        }
    }

    fn check_client_settings(&self) -> Result<(), Error> {
        if self.client_queue_capacity < 3 {
            return Err(Error::BadConfig(format!("The client queue capacity is {}, but it must hold at least the two greeting frames and one more.", self.client_queue_capacity)));
        }

        if self.client_write_timeout_ms == 0 {
            return Err(Error::BadConfig(
                "The client write timeout can not be zero.".into(),
            ));
        }

        Ok(())
    }

    fn check_device_settings(&self) -> Result<(), Error> {
        if self.device_read_chunk == 0 {
            return Err(Error::BadConfig(
                "The device read chunk size can not be zero.".into(),
            ));
        }

        Ok(())
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_client_settings()?;
        self.check_device_settings()?;
        self.check_device_bauds()?;
        self.check_duplicate_devices()?;

        Ok(())
    }
}
