//! A device session owns the transport of one open device.
//!
//! Its task moves through these states:
//!
//! - Reading: waits for either device output or a control message.
//!   Output is wrapped in a [`DataFrame`] and broadcast.
//! - Closing: a close was requested. Whatever the pending read yields is discarded.
//! - Closed: the transport is dropped and nothing more is sent.
//!
//! If the transport fails while Reading, the device broker is told so that it can
//! unregister the session.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use super::{BoxedTransport, DeviceName};
use crate::{
    connection_broker::ConnectionBrokerHandle, device_broker::DeviceBrokerHandle,
    protocol::DataFrame,
};

/// Distinguishes sessions of the same device over time.
pub(crate) type SessionId = u64;

/// Tunables for device sessions.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    /// How many bytes to read at most per chunk.
    pub(crate) read_chunk: usize,

    /// How long a break condition is held.
    pub(crate) break_duration: Duration,
}

#[derive(Debug)]
enum Control {
    Write(Vec<u8>),
    Break,
    Close,
}

enum Event {
    Control(Option<Control>),
    FromWire(std::io::Result<usize>),
}

enum Exit {
    Closed,
    Failed,
}

pub(crate) struct DeviceSession {
    pub(crate) id: SessionId,
    pub(crate) name: DeviceName,
    pub(crate) baud: u32,
    closing: Arc<AtomicBool>,
    controls: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

struct ReadLoop {
    id: SessionId,
    name: DeviceName,
    transport: Option<BoxedTransport>,
    controls: mpsc::UnboundedReceiver<Control>,
    closing: Arc<AtomicBool>,
    settings: SessionSettings,
    connections: ConnectionBrokerHandle,
    devices: DeviceBrokerHandle,
}

impl DeviceSession {
    /// Start the session task.
    ///
    /// A missing transport means opening the device failed.
    /// The session still starts, but ends right away.
    pub(crate) fn start(
        id: SessionId,
        name: DeviceName,
        baud: u32,
        transport: Option<BoxedTransport>,
        settings: SessionSettings,
        connections: ConnectionBrokerHandle,
        devices: DeviceBrokerHandle,
    ) -> Self {
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let read_loop = ReadLoop {
            id,
            name: name.clone(),
            transport,
            controls: controls_rx,
            closing: closing.clone(),
            settings,
            connections,
            devices,
        };

        let span = info_span!("Device", %name, %baud, session = id);
        let task = tokio::spawn(read_loop.run().instrument(span));

        Self {
            id,
            name,
            baud,
            closing,
            controls: controls_tx,
            task,
        }
    }

    fn control(&self, control: Control) {
        if self.controls.send(control).is_err() {
            warn!(name = %self.name, "Device session already ended, dropping request");
        }
    }

    /// Put these bytes on the wire.
    pub(crate) fn write(&self, bytes: Vec<u8>) {
        self.control(Control::Write(bytes));
    }

    /// Hold a break condition on the line.
    pub(crate) fn send_break(&self) {
        self.control(Control::Break);
    }

    /// Stop the session.
    /// Returns when the transport has been dropped.
    pub(crate) async fn close(self) {
        self.closing.store(true, Ordering::SeqCst);

        if self.controls.send(Control::Close).is_err() {
            debug!(name = %self.name, "Device session had already ended");
        }

        if let Err(e) = self.task.await {
            warn!(?e, name = %self.name, "Device task join error");
        }
    }
}

impl ReadLoop {
    async fn run(mut self) {
        match self.pump().await {
            Exit::Closed => debug!("Device session closed"),
            Exit::Failed if self.closing.load(Ordering::SeqCst) => {
                debug!("Device session failed while closing")
            }
            Exit::Failed => {
                info!("Device session ended, unregistering");
                self.devices.session_ended(self.name.clone(), self.id);
            }
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn pump(&mut self) -> Exit {
        let Some(mut transport) = self.transport.take() else {
            warn!("No transport, the device did not open");
            return Exit::Failed;
        };

        let mut buf = vec![0; self.settings.read_chunk];

        loop {
            let event = tokio::select! {
                biased;

                control = self.controls.recv() => Event::Control(control),
                read = transport.read(&mut buf) => Event::FromWire(read),
            };

            match event {
                Event::Control(Some(Control::Write(bytes))) => {
                    trace!("Writing {} byte(s)", bytes.len());

                    let written = match transport.write_all(&bytes).await {
                        Ok(()) => transport.flush().await,
                        Err(e) => Err(e),
                    };

                    if let Err(e) = written {
                        error!(?e, "Device write error, exiting");
                        return Exit::Failed;
                    }
                }
                Event::Control(Some(Control::Break)) => {
                    debug!(duration = ?self.settings.break_duration, "Sending break");

                    if let Err(e) = transport.set_break() {
                        warn!(?e, "Could not set break");
                        continue;
                    }

                    tokio::time::sleep(self.settings.break_duration).await;

                    if let Err(e) = transport.clear_break() {
                        warn!(?e, "Could not clear break");
                    }
                }
                Event::Control(Some(Control::Close)) | Event::Control(None) => {
                    return Exit::Closed;
                }
                Event::FromWire(_) if self.is_closing() => {
                    return Exit::Closed;
                }
                Event::FromWire(Ok(0)) => {
                    info!("Device reached end of stream");
                    return Exit::Failed;
                }
                Event::FromWire(Ok(n)) => {
                    trace!("Read {n} byte(s): `{:?}`", &buf[..n.min(32)]);

                    self.connections
                        .broadcast(DataFrame::new_lossy(&self.name, &buf[..n]).to_frame());
                }
                Event::FromWire(Err(e)) => {
                    error!(?e, "Device read error, exiting");
                    return Exit::Failed;
                }
            }
        }
    }
}
