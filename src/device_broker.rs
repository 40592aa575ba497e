//! The device broker owns every open device session.
//!
//! Opening, closing, writing and listing all happen here, one request at a time,
//! which is what keeps a device name from ever having two live sessions.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::{
    connection_broker::ConnectionBrokerHandle,
    device::{
        session::{DeviceSession, SessionId, SessionSettings},
        Backend, DeviceName,
    },
    error::Error,
    ports::{self, Enumeration, OpenDevice},
    protocol::{DeviceChange, DeviceEventFrame},
};

#[derive(Debug)]
pub(crate) enum DeviceBrokerMessage {
    Open {
        name: DeviceName,
        baud: u32,
    },
    Close(DeviceName),
    Write {
        name: DeviceName,
        payload: String,
    },
    List,
    SessionEnded {
        name: DeviceName,
        session: SessionId,
    },
    OpenDevices(oneshot::Sender<Vec<OpenDevice>>),
}

/// Talk to the device broker.
#[derive(Debug, Clone)]
pub struct DeviceBrokerHandle(mpsc::UnboundedSender<DeviceBrokerMessage>);

impl DeviceBrokerHandle {
    pub(crate) fn new(sender: mpsc::UnboundedSender<DeviceBrokerMessage>) -> Self {
        Self(sender)
    }

    fn send(&self, message: DeviceBrokerMessage) {
        if let Err(e) = self.0.send(message) {
            warn!(message = ?e.0, "Device broker is gone");
        }
    }

    /// Open a device, closing any session it already has.
    pub fn open(&self, name: DeviceName, baud: u32) {
        self.send(DeviceBrokerMessage::Open { name, baud });
    }

    /// Close a device if it is open.
    pub fn close(&self, name: DeviceName) {
        self.send(DeviceBrokerMessage::Close(name));
    }

    /// Write a line to an open device.
    /// The payload `BREAK` (any case) sends a break instead.
    pub fn write(&self, name: DeviceName, payload: String) {
        self.send(DeviceBrokerMessage::Write { name, payload });
    }

    /// Broadcast the port list to all clients.
    pub fn list(&self) {
        self.send(DeviceBrokerMessage::List);
    }

    /// The devices with a live session, sorted by name.
    pub async fn open_devices(&self) -> Vec<OpenDevice> {
        let (tx, rx) = oneshot::channel();
        self.send(DeviceBrokerMessage::OpenDevices(tx));

        rx.await.unwrap_or_default()
    }

    pub(crate) fn session_ended(&self, name: DeviceName, session: SessionId) {
        self.send(DeviceBrokerMessage::SessionEnded { name, session });
    }
}

pub(crate) struct DeviceBroker {
    messages: mpsc::UnboundedReceiver<DeviceBrokerMessage>,

    // Given to sessions so they can report ending on their own.
    handle: DeviceBrokerHandle,

    connections: ConnectionBrokerHandle,
    backend: Backend,
    settings: SessionSettings,
    sessions: HashMap<DeviceName, DeviceSession>,
    next_session: SessionId,
}

impl DeviceBroker {
    pub(crate) fn new(
        messages: mpsc::UnboundedReceiver<DeviceBrokerMessage>,
        handle: DeviceBrokerHandle,
        connections: ConnectionBrokerHandle,
        backend: Backend,
        settings: SessionSettings,
    ) -> Self {
        Self {
            messages,
            handle,
            connections,
            backend,
            settings,
            sessions: HashMap::new(),
            next_session: 0,
        }
    }

    fn announce(&self, change: DeviceChange, name: &DeviceName, baud: u32) {
        self.connections
            .broadcast(DeviceEventFrame::new(change, name, baud).to_frame());
    }

    async fn close_session(&mut self, session: DeviceSession) {
        let (name, baud) = (session.name.clone(), session.baud);

        session.close().await;
        info!(%name, "Closed device");

        self.announce(DeviceChange::Close, &name, baud);
    }

    async fn open(&mut self, name: DeviceName, baud: u32) {
        if let Some(existing) = self.sessions.remove(&name) {
            info!(%name, old_baud = existing.baud, "Device already open, closing it first");
            self.close_session(existing).await;
        }

        let transport = match self.backend.opener.open(name.as_str(), baud) {
            Ok(transport) => Some(transport),
            Err(source) => {
                let e = Error::Device {
                    name: name.to_string(),
                    source,
                };
                error!(?e, "Could not open device");
                None
            }
        };

        self.announce(DeviceChange::Open, &name, baud);

        let id = self.next_session;
        self.next_session += 1;

        info!(%name, %baud, session = id, "Starting device session");
        let session = DeviceSession::start(
            id,
            name.clone(),
            baud,
            transport,
            self.settings.clone(),
            self.connections.clone(),
            self.handle.clone(),
        );

        self.sessions.insert(name, session);
    }

    async fn close(&mut self, name: DeviceName) {
        match self.sessions.remove(&name) {
            Some(session) => self.close_session(session).await,
            None => info!(%name, "Close requested but device is not open"),
        }
    }

    fn write(&mut self, name: DeviceName, payload: String) {
        let Some(session) = self.sessions.get(&name) else {
            let e = Error::NoSuchDevice(name.to_string());
            warn!(%e, "Dropping write");
            return;
        };

        if payload.eq_ignore_ascii_case("BREAK") {
            session.send_break();
        } else {
            trace!(%name, %payload, "Writing line");

            let mut bytes = payload.into_bytes();
            bytes.push(b'\r');
            session.write(bytes);
        }
    }

    fn list(&self) {
        let enumeration = self.backend.enumerator.enumerate().unwrap_or_else(|e| {
            error!(?e, "Listing ports failed");
            Enumeration::default()
        });
        let Enumeration {
            ports: enumerated,
            metadata,
        } = enumeration;

        let list = ports::merge(enumerated, &metadata, &self.open_devices());
        debug!(ports = list.serial_ports.len(), "Broadcasting port list");

        self.connections.broadcast(list.to_frame());
    }

    fn session_ended(&mut self, name: DeviceName, session: SessionId) {
        match self.sessions.get(&name) {
            Some(current) if current.id == session => {
                let baud = current.baud;
                self.sessions.remove(&name);

                info!(%name, "Device session ended on its own");
                self.announce(DeviceChange::Close, &name, baud);
            }
            _ => debug!(%name, session, "Stale session end, ignoring"),
        }
    }

    fn open_devices(&self) -> Vec<OpenDevice> {
        let mut open = self
            .sessions
            .values()
            .map(|session| OpenDevice {
                name: session.name.clone(),
                baud: session.baud,
            })
            .collect::<Vec<_>>();
        open.sort_by(|a, b| a.name.cmp(&b.name));

        open
    }

    pub(crate) async fn run(&mut self) {
        while let Some(message) = self.messages.recv().await {
            match message {
                DeviceBrokerMessage::Open { name, baud } => self.open(name, baud).await,
                DeviceBrokerMessage::Close(name) => self.close(name).await,
                DeviceBrokerMessage::Write { name, payload } => self.write(name, payload),
                DeviceBrokerMessage::List => self.list(),
                DeviceBrokerMessage::SessionEnded { name, session } => {
                    self.session_ended(name, session)
                }
                DeviceBrokerMessage::OpenDevices(reply) => {
                    if reply.send(self.open_devices()).is_err() {
                        debug!("Nobody waited for the open devices");
                    }
                }
            }
        }

        debug!("All device broker handles dropped");
    }
}
