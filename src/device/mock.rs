//! Mock devices, useful to exercise the relay without serial ports.
//!
//! Opening a mock device creates an in-memory duplex pipe.
//! The relay gets one end, and a [`MockPeer`] holding the other end
//! is handed out on the channel returned by [`MockBackend::new`].
//! Writing to the peer looks like device output to the relay,
//! reading from it shows what the relay wrote to the device.

use std::{
    collections::HashSet,
    io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf},
    sync::mpsc,
};
use tracing::{debug, info};

use super::{Backend, BoxedTransport, DeviceName, DeviceOpener, DeviceTransport};
use crate::{
    error::Error,
    ports::{Enumeration, PortDescriptor, PortEnumerator},
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Break line transitions seen by a mock device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakSignal {
    /// The break condition was asserted.
    Set,

    /// The break condition was released.
    Clear,
}

/// The far end of an opened mock device.
#[derive(Debug)]
pub struct MockPeer {
    /// The name the device was opened with.
    pub name: String,

    /// The baud the device was opened with.
    pub baud: u32,

    /// The other end of the device's byte stream.
    pub io: DuplexStream,

    /// Break transitions, in order.
    pub breaks: mpsc::UnboundedReceiver<BreakSignal>,
}

/// The relay's end of a mock device.
#[derive(Debug)]
pub struct MockTransport {
    io: DuplexStream,
    breaks: mpsc::UnboundedSender<BreakSignal>,
}

impl MockTransport {
    fn signal(&self, signal: BreakSignal) -> io::Result<()> {
        self.breaks
            .send(signal)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mock peer is gone"))
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

impl DeviceTransport for MockTransport {
    fn set_break(&mut self) -> io::Result<()> {
        self.signal(BreakSignal::Set)
    }

    fn clear_break(&mut self) -> io::Result<()> {
        self.signal(BreakSignal::Clear)
    }
}

#[derive(Debug)]
struct MockState {
    ports: Vec<PortDescriptor>,
    metadata: Vec<PortDescriptor>,
    failing: HashSet<DeviceName>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    opened: mpsc::UnboundedSender<MockPeer>,
}

/// Mock devices which both open and enumerate.
#[derive(Debug, Clone)]
pub struct MockBackend(Arc<Shared>);

impl MockBackend {
    /// A backend enumerating the given port names.
    ///
    /// Any name may be opened, enumerated or not.
    /// The peers of opened devices arrive on the returned receiver.
    pub fn new<S: AsRef<str>>(ports: &[S]) -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();

        let state = MockState {
            ports: ports
                .iter()
                .map(|name| PortDescriptor::named(name.as_ref()))
                .collect(),
            metadata: vec![],
            failing: HashSet::new(),
        };

        let backend = Self(Arc::new(Shared {
            state: Mutex::new(state),
            opened: opened_tx,
        }));

        (backend, opened_rx)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Make opening this device fail.
    pub fn fail_opening(&self, name: &str) {
        self.with_state(|state| state.failing.insert(DeviceName::new(name)));
    }

    /// Provide metadata for enumerated ports.
    pub fn set_metadata(&self, metadata: Vec<PortDescriptor>) {
        self.with_state(|state| state.metadata = metadata);
    }

    /// Use as a relay [`Backend`].
    pub fn backend(&self) -> Backend {
        Backend::new(self.clone(), self.clone())
    }
}

impl DeviceOpener for MockBackend {
    fn open(&self, name: &str, baud: u32) -> io::Result<BoxedTransport> {
        if self.with_state(|state| state.failing.contains(&DeviceName::new(name))) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("mock device {name} refuses to open"),
            ));
        }

        info!(%name, %baud, "Opening mock device");

        let (device, peer) = tokio::io::duplex(PIPE_CAPACITY);
        let (breaks_tx, breaks_rx) = mpsc::unbounded_channel();

        let peer = MockPeer {
            name: name.into(),
            baud,
            io: peer,
            breaks: breaks_rx,
        };

        if self.0.opened.send(peer).is_err() {
            debug!(%name, "Nobody is watching mock devices open");
        }

        Ok(Box::new(MockTransport {
            io: device,
            breaks: breaks_tx,
        }))
    }
}

impl PortEnumerator for MockBackend {
    fn enumerate(&self) -> Result<Enumeration, Error> {
        Ok(self.with_state(|state| Enumeration {
            ports: state.ports.clone(),
            metadata: state.metadata.clone(),
        }))
    }
}
