//! The connection broker owns the set of connected clients.
//!
//! It is the only place client queues are written to or closed.
//! Everything reaches it as a message, and messages are handled one at a time.

use std::{collections::HashMap, fmt::Display};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    commands::CommandDispatcher,
    device_broker::DeviceBrokerHandle,
    protocol::{CommandsFrame, Frame, VersionFrame},
};

/// Identifies one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A new unique id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client as seen by the broker: an id and the sending end of its outbound queue.
///
/// Dropping this closes the queue,
/// which lets the client's writer drain what is left and hang up.
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    queue: mpsc::Sender<Frame>,
}

impl ClientConnection {
    /// A connection writing to the given bounded queue.
    pub fn new(id: ConnectionId, queue: mpsc::Sender<Frame>) -> Self {
        Self { id, queue }
    }

    /// The id of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue without waiting.
    /// Returns false if the client should be considered dead.
    fn offer(&self, frame: Frame) -> bool {
        match self.queue.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(id = %self.id, "Client queue full, dropping client");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(id = %self.id, "Client writer gone, dropping client");
                false
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum ConnectionBrokerMessage {
    Register(ClientConnection),
    Unregister(ConnectionId),
    Broadcast(Frame),
    Command(String),
    LiveConnections(oneshot::Sender<Vec<ConnectionId>>),
}

/// Talk to the connection broker.
#[derive(Debug, Clone)]
pub struct ConnectionBrokerHandle(mpsc::UnboundedSender<ConnectionBrokerMessage>);

impl ConnectionBrokerHandle {
    pub(crate) fn new(sender: mpsc::UnboundedSender<ConnectionBrokerMessage>) -> Self {
        Self(sender)
    }

    fn send(&self, message: ConnectionBrokerMessage) {
        if let Err(e) = self.0.send(message) {
            warn!(message = ?e.0, "Connection broker is gone");
        }
    }

    /// Add a client.
    /// It is greeted, and a fresh port list is broadcast.
    pub fn register(&self, connection: ClientConnection) {
        self.send(ConnectionBrokerMessage::Register(connection));
    }

    /// Remove a client, closing its queue.
    /// Unknown or already removed clients are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        self.send(ConnectionBrokerMessage::Unregister(id));
    }

    /// Offer a frame to every client.
    pub fn broadcast(&self, frame: Frame) {
        self.send(ConnectionBrokerMessage::Broadcast(frame));
    }

    /// A line of command text from a client.
    pub fn command(&self, text: String) {
        self.send(ConnectionBrokerMessage::Command(text));
    }

    /// The clients currently connected.
    pub async fn live_connections(&self) -> Vec<ConnectionId> {
        let (tx, rx) = oneshot::channel();
        self.send(ConnectionBrokerMessage::LiveConnections(tx));

        rx.await.unwrap_or_default()
    }
}

pub(crate) struct ConnectionBroker {
    messages: mpsc::UnboundedReceiver<ConnectionBrokerMessage>,
    connections: HashMap<ConnectionId, ClientConnection>,
    dispatcher: CommandDispatcher,
    devices: DeviceBrokerHandle,
}

impl ConnectionBroker {
    pub(crate) fn new(
        messages: mpsc::UnboundedReceiver<ConnectionBrokerMessage>,
        devices: DeviceBrokerHandle,
    ) -> Self {
        Self {
            messages,
            connections: HashMap::new(),
            dispatcher: CommandDispatcher::new(devices.clone()),
            devices,
        }
    }

    fn register(&mut self, connection: ClientConnection) {
        let id = connection.id();
        info!(%id, "Registering client");

        let greeted = [VersionFrame::current().to_frame(), CommandsFrame::current().to_frame()]
            .into_iter()
            .all(|frame| connection.offer(frame));

        if greeted {
            self.connections.insert(id, connection);
            self.devices.list();
        } else {
            warn!(%id, "Could not greet client, not registering");
        }
    }

    fn unregister(&mut self, id: ConnectionId) {
        match self.connections.remove(&id) {
            Some(_) => info!(%id, "Unregistered client"),
            None => debug!(%id, "Client already unregistered"),
        }
    }

    fn broadcast(&mut self, frame: Frame) {
        trace!(clients = self.connections.len(), "Broadcasting");

        self.connections
            .retain(|_, connection| connection.offer(frame.clone()));
    }

    fn command(&mut self, text: String) {
        if text.is_empty() {
            return;
        }

        debug!(%text, "Client command");
        self.dispatcher.dispatch(&text);
    }

    pub(crate) async fn run(&mut self) {
        while let Some(message) = self.messages.recv().await {
            match message {
                ConnectionBrokerMessage::Register(connection) => self.register(connection),
                ConnectionBrokerMessage::Unregister(id) => self.unregister(id),
                ConnectionBrokerMessage::Broadcast(frame) => self.broadcast(frame),
                ConnectionBrokerMessage::Command(text) => self.command(text),
                ConnectionBrokerMessage::LiveConnections(reply) => {
                    let mut live = self.connections.keys().copied().collect::<Vec<_>>();
                    live.sort();

                    if reply.send(live).is_err() {
                        debug!("Nobody waited for the live connections");
                    }
                }
            }
        }

        debug!("All connection broker handles dropped");
    }
}
