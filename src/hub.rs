use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

use crate::{
    config::Config,
    connection_broker::{ConnectionBroker, ConnectionBrokerHandle},
    device::Backend,
    device_broker::{DeviceBroker, DeviceBrokerHandle},
};

/// Handles to both brokers.
///
/// Created once at startup, then cloned into every websocket.
#[derive(Debug, Clone)]
pub struct Hub {
    /// Client membership, fan-out and command intake.
    pub connections: ConnectionBrokerHandle,

    /// Device sessions.
    pub devices: DeviceBrokerHandle,
}

impl Hub {
    /// Spawn both brokers, then open the configured startup devices.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config, backend: Backend) -> Self {
        let (connections_tx, connections_rx) = mpsc::unbounded_channel();
        let (devices_tx, devices_rx) = mpsc::unbounded_channel();

        let connections = ConnectionBrokerHandle::new(connections_tx);
        let devices = DeviceBrokerHandle::new(devices_tx);

        let mut connection_broker = ConnectionBroker::new(connections_rx, devices.clone());
        tokio::spawn(
            async move { connection_broker.run().await }
                .instrument(info_span!("ConnectionBroker")),
        );

        let mut device_broker = DeviceBroker::new(
            devices_rx,
            devices.clone(),
            connections.clone(),
            backend,
            config.session_settings(),
        );
        tokio::spawn(
            async move { device_broker.run().await }.instrument(info_span!("DeviceBroker")),
        );

        for device in &config.devices {
            info!(name = %device.name, baud = device.baud, "Opening startup device");
            devices.open(device.name.as_str().into(), device.baud);
        }

        Self {
            connections,
            devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::StartupDevice, device::mock::MockBackend, ports::OpenDevice};

    #[tokio::test]
    async fn startup_devices_are_opened() {
        let (mock, mut opened) = MockBackend::new(&["COM6"]);
        let config = Config {
            devices: vec![
                StartupDevice::new("COM6", 9600),
                StartupDevice::new("/dev/ttyUSB0", 115_200),
            ],
            ..Default::default()
        };

        let hub = Hub::start(&config, mock.backend());

        let first = opened.recv().await.unwrap();
        let second = opened.recv().await.unwrap();
        assert_eq!((first.name.as_str(), first.baud), ("COM6", 9600));
        assert_eq!((second.name.as_str(), second.baud), ("/dev/ttyUSB0", 115_200));

        assert_eq!(
            hub.devices.open_devices().await,
            vec![
                OpenDevice {
                    name: "/dev/ttyUSB0".into(),
                    baud: 115_200
                },
                OpenDevice {
                    name: "COM6".into(),
                    baud: 9600
                },
            ]
        );
        assert!(hub.connections.live_connections().await.is_empty());
    }
}
