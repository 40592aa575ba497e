//! Listing the serial ports of the host,
//! merged with the devices the relay has open.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    device::DeviceName,
    error::Error,
    protocol::{self, SerialPortEntry, SerialPortList},
};

/// What the host knows about a serial port.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortDescriptor {
    /// The device name, e.g. `/dev/ttyACM0` or `COM6`.
    pub name: String,

    /// A shorter or more descriptive name.
    pub friendly_name: String,

    /// The serial number, if known.
    pub serial_number: String,

    /// The device class, if known.
    pub device_class: String,

    /// USB vendor id, if known.
    pub vendor_id: String,

    /// USB product id, if known.
    pub product_id: String,

    /// Other names of the same physical device.
    pub related_names: Vec<String>,
}

impl PortDescriptor {
    /// A descriptor knowing only the name.
    /// The friendly name is the name without any `/dev/` prefix.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            friendly_name: name.trim_start_matches("/dev/").into(),
            ..Default::default()
        }
    }
}

/// What one look at the host's serial ports found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// The ports currently present.
    pub ports: Vec<PortDescriptor>,

    /// Extra information about present ports.
    /// Entries are matched to `ports` by name.
    pub metadata: Vec<PortDescriptor>,
}

/// Lists serial ports.
pub trait PortEnumerator: Send + Sync {
    /// The ports currently present, and what is known about them.
    fn enumerate(&self) -> Result<Enumeration, Error>;
}

/// A device with a live session, as seen when listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDevice {
    /// Its name.
    pub name: DeviceName,

    /// The baud it was opened with.
    pub baud: u32,
}

/// Merge enumerated ports with open devices.
///
/// Open devices the enumeration did not report go first.
/// Every name appears once, compared case-insensitively.
pub(crate) fn merge(
    enumerated: Vec<PortDescriptor>,
    metadata: &[PortDescriptor],
    open: &[OpenDevice],
) -> SerialPortList {
    let synthesized = open
        .iter()
        .filter(|device| !enumerated.iter().any(|port| device.name.matches(&port.name)))
        .sorted_by(|a, b| a.name.cmp(&b.name))
        .map(|device| {
            info!(name = %device.name, "Open device not enumerated, adding it to the list");
            PortDescriptor {
                name: device.name.to_string(),
                friendly_name: device.name.to_string(),
                ..Default::default()
            }
        })
        .collect::<Vec<_>>();

    let ver = protocol::version_number();

    let serial_ports = synthesized
        .into_iter()
        .chain(enumerated)
        .unique_by(|port| port.name.to_lowercase())
        .map(|port| {
            let port = match metadata
                .iter()
                .find(|meta| DeviceName::new(&meta.name).matches(&port.name))
            {
                Some(meta) => {
                    debug!(name = %port.name, "Using metadata");
                    PortDescriptor {
                        name: port.name,
                        ..meta.clone()
                    }
                }
                None => port,
            };

            let session = open.iter().find(|device| device.name.matches(&port.name));

            SerialPortEntry {
                name: port.name,
                friendly: port.friendly_name,
                serial_number: port.serial_number,
                device_class: port.device_class,
                is_open: session.is_some(),
                is_primary: false,
                related_names: port.related_names,
                baud: session.map(|device| device.baud).unwrap_or_default(),
                buffer_algorithm: String::new(),
                available_buffer_algorithms: vec![],
                ver,
                usb_vid: port.vendor_id,
                usb_pid: port.product_id,
            }
        })
        .collect();

    SerialPortList { serial_ports }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn open(name: &str, baud: u32) -> OpenDevice {
        OpenDevice {
            name: DeviceName::new(name),
            baud,
        }
    }

    fn names(list: &SerialPortList) -> Vec<&str> {
        list.serial_ports
            .iter()
            .map(|entry| entry.name.as_str())
            .collect()
    }

    #[test]
    fn friendly_name_strips_dev() {
        assert_eq!(
            PortDescriptor::named("/dev/ttyACM0").friendly_name,
            "ttyACM0"
        );
        assert_eq!(PortDescriptor::named("COM6").friendly_name, "COM6");
    }

    #[test]
    fn nothing_open() {
        let list = merge(
            vec![PortDescriptor::named("COM1"), PortDescriptor::named("COM6")],
            &[],
            &[],
        );

        assert_eq!(names(&list), ["COM1", "COM6"]);
        assert!(list.serial_ports.iter().all(|entry| !entry.is_open));
        assert!(list.serial_ports.iter().all(|entry| entry.baud == 0));
    }

    #[test]
    fn open_devices_are_marked_case_insensitively() {
        let list = merge(
            vec![PortDescriptor::named("COM1"), PortDescriptor::named("COM6")],
            &[],
            &[open("com6", 9600)],
        );

        assert_eq!(names(&list), ["COM1", "COM6"]);
        assert!(!list.serial_ports[0].is_open);
        assert!(list.serial_ports[1].is_open);
        assert_eq!(list.serial_ports[1].baud, 9600);
    }

    #[test]
    fn open_but_not_enumerated_is_prepended() {
        let list = merge(
            vec![PortDescriptor::named("COM1")],
            &[],
            &[open("COM9", 115_200), open("COM3", 4800)],
        );

        assert_eq!(names(&list), ["COM3", "COM9", "COM1"]);
        assert_eq!(list.serial_ports[0].friendly, "COM3");
        assert!(list.serial_ports[0].is_open);
        assert_eq!(list.serial_ports[1].baud, 115_200);
    }

    #[test]
    fn duplicates_are_removed() {
        let list = merge(
            vec![
                PortDescriptor::named("COM1"),
                PortDescriptor::named("com1"),
                PortDescriptor::named("COM2"),
            ],
            &[],
            &[],
        );

        assert_eq!(names(&list), ["COM1", "COM2"]);
    }

    #[test]
    fn metadata_enriches() {
        let meta = PortDescriptor {
            name: "/dev/ttyACM0".into(),
            friendly_name: "Some Board".into(),
            serial_number: "1234".into(),
            device_class: "usb".into(),
            vendor_id: "2341".into(),
            product_id: "0043".into(),
            related_names: vec![],
        };

        let list = merge(
            vec![
                PortDescriptor::named("/dev/ttyACM0"),
                PortDescriptor::named("/dev/ttyS0"),
            ],
            &[meta],
            &[],
        );

        let entry = &list.serial_ports[0];
        assert_eq!(entry.friendly, "Some Board");
        assert_eq!(entry.serial_number, "1234");
        assert_eq!(entry.usb_vid, "2341");
        assert_eq!(entry.usb_pid, "0043");

        assert_eq!(list.serial_ports[1].friendly, "ttyS0");
    }
}
