//! Serial port devices, via `tokio-serial`.

use std::io;

use serialport::{SerialPortInfo, SerialPortType};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use super::{BoxedTransport, DeviceOpener, DeviceTransport};
use crate::{
    error::Error,
    ports::{Enumeration, PortDescriptor, PortEnumerator},
};

impl DeviceTransport for SerialStream {
    fn set_break(&mut self) -> io::Result<()> {
        SerialPort::set_break(&*self).map_err(io::Error::from)
    }

    fn clear_break(&mut self) -> io::Result<()> {
        SerialPort::clear_break(&*self).map_err(io::Error::from)
    }
}

/// Opens serial ports as 8N1 without flow control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl DeviceOpener for SerialOpener {
    fn open(&self, name: &str, baud: u32) -> io::Result<BoxedTransport> {
        info!(%name, %baud, "Opening serial port");

        let stream = tokio_serial::new(name, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;

        Ok(Box::new(stream))
    }
}

/// Lists the serial ports of this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialEnumerator;

impl PortEnumerator for SerialEnumerator {
    fn enumerate(&self) -> Result<Enumeration, Error> {
        let available =
            serialport::available_ports().map_err(|e| Error::Enumeration(e.to_string()))?;
        if available.is_empty() {
            info!("No serial ports available");
        }

        let enumeration = describe(available);
        debug!(metadata = ?enumeration.metadata, "Got metadata on ports");

        Ok(enumeration)
    }
}

/// Both the plain and the detailed view of the same ports.
fn describe(available: Vec<SerialPortInfo>) -> Enumeration {
    let ports = available
        .iter()
        .map(|info| PortDescriptor::named(&info.port_name))
        .collect();

    let metadata = available
        .into_iter()
        .map(|info| {
            let mut descriptor = PortDescriptor::named(&info.port_name);

            match info.port_type {
                SerialPortType::UsbPort(usb) => {
                    if let Some(product) = usb.product {
                        descriptor.friendly_name = product;
                    }
                    descriptor.serial_number = usb.serial_number.unwrap_or_default();
                    descriptor.device_class = "usb".into();
                    descriptor.vendor_id = format!("{:04x}", usb.vid);
                    descriptor.product_id = format!("{:04x}", usb.pid);
                }
                SerialPortType::PciPort => descriptor.device_class = "pci".into(),
                SerialPortType::BluetoothPort => descriptor.device_class = "bluetooth".into(),
                SerialPortType::Unknown => {}
            }

            descriptor
        })
        .collect();

    Enumeration { ports, metadata }
}
