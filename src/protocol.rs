//! Frames the relay sends to connected clients.
//!
//! Every frame is one websocket text message holding compact JSON.
//! The field names are PascalCase (or single letters for device data)
//! since existing browser frontends expect exactly these.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One text message on a client websocket.
pub type Frame = String;

/// The version of the relay, as reported to clients.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The capabilities announced to every client right after it connects.
pub const COMMANDS: [&str; 9] = [
    "list",
    "open [portName] [baud]",
    "send [portName] [cmd]",
    "close [portName]",
    "baudrates",
    "restart",
    "exit",
    "hostname",
    "version",
];

/// The `major.minor` part of the crate version as a number,
/// used for the `Ver` field of port list entries.
pub fn version_number() -> f32 {
    semver::Version::parse(VERSION)
        .ok()
        .and_then(|version| format!("{}.{}", version.major, version.minor).parse().ok())
        .unwrap_or_default()
}

fn to_frame<T: Serialize>(value: &T) -> Frame {
    serde_json::to_string(value).expect("Serialize should work")
}

/// Sent first to every new client.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VersionFrame {
    /// See [`VERSION`].
    pub version: String,
}

impl VersionFrame {
    /// The version frame of this build.
    pub fn current() -> Self {
        Self {
            version: VERSION.into(),
        }
    }

    /// Serialize for the wire.
    pub fn to_frame(&self) -> Frame {
        to_frame(self)
    }
}

/// Sent second to every new client.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CommandsFrame {
    /// Human readable command synopses.
    pub commands: Vec<String>,
}

impl CommandsFrame {
    /// The commands frame listing [`COMMANDS`].
    pub fn current() -> Self {
        Self {
            commands: COMMANDS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Serialize for the wire.
    pub fn to_frame(&self) -> Frame {
        to_frame(self)
    }
}

/// What happened to a device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceChange {
    /// The device was opened.
    Open,

    /// The device was closed.
    Close,
}

impl DeviceChange {
    fn description(self) -> &'static str {
        match self {
            DeviceChange::Open => "Got register/open on port.",
            DeviceChange::Close => "Got unregister/close on port.",
        }
    }
}

/// Broadcast whenever a device session starts or ends.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceEventFrame {
    /// Opened or closed.
    pub cmd: DeviceChange,

    /// A human readable description.
    pub desc: String,

    /// The device name.
    pub port: String,

    /// The baud rate the session was opened with.
    pub baud: u32,
}

impl DeviceEventFrame {
    /// A new event for the given device.
    pub fn new(change: DeviceChange, port: impl Display, baud: u32) -> Self {
        Self {
            cmd: change,
            desc: change.description().into(),
            port: port.to_string(),
            baud,
        }
    }

    /// Serialize for the wire.
    pub fn to_frame(&self) -> Frame {
        to_frame(self)
    }
}

/// A chunk of output from a device.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataFrame {
    /// The device name.
    #[serde(rename = "P")]
    pub port: String,

    /// The chunk, bad utf8 replaced.
    #[serde(rename = "D")]
    pub data: String,
}

impl DataFrame {
    /// Wrap raw device bytes.
    pub fn new_lossy(port: impl Display, bytes: &[u8]) -> Self {
        Self {
            port: port.to_string(),
            data: String::from_utf8_lossy(bytes).to_string(),
        }
    }

    /// Serialize for the wire.
    pub fn to_frame(&self) -> Frame {
        to_frame(self)
    }
}

/// One row of the port list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SerialPortEntry {
    /// The device name, e.g. `/dev/ttyACM0` or `COM6`.
    pub name: String,

    /// A shorter or more descriptive name.
    pub friendly: String,

    /// The serial number, if known.
    pub serial_number: String,

    /// The device class, if known.
    pub device_class: String,

    /// Whether the relay has a live session for this device.
    pub is_open: bool,

    /// Always false.
    pub is_primary: bool,

    /// Other names of the same physical device.
    pub related_names: Vec<String>,

    /// The baud of the live session, zero when closed.
    pub baud: u32,

    /// Always empty.
    pub buffer_algorithm: String,

    /// Always empty.
    pub available_buffer_algorithms: Vec<String>,

    /// See [`version_number`].
    pub ver: f32,

    /// USB vendor id, if known.
    pub usb_vid: String,

    /// USB product id, if known.
    pub usb_pid: String,
}

/// The port list broadcast.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SerialPortList {
    /// All known ports.
    pub serial_ports: Vec<SerialPortEntry>,
}

impl SerialPortList {
    /// Serialize for the wire.
    pub fn to_frame(&self) -> Frame {
        to_frame(self)
    }

    /// An example list with one open and one closed port.
    pub fn example() -> Self {
        let entry = |name: &str, is_open, baud| SerialPortEntry {
            name: name.into(),
            friendly: name.trim_start_matches("/dev/").into(),
            serial_number: String::new(),
            device_class: String::new(),
            is_open,
            is_primary: false,
            related_names: vec![],
            baud,
            buffer_algorithm: String::new(),
            available_buffer_algorithms: vec![],
            ver: version_number(),
            usb_vid: String::new(),
            usb_pid: String::new(),
        };

        Self {
            serial_ports: vec![
                entry("/dev/ttyACM0", true, 115_200),
                entry("/dev/ttyUSB1", false, 0),
            ],
        }
    }
}
