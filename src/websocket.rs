use std::{fmt::Debug, net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinError};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    config::Config,
    connection_broker::{ClientConnection, ConnectionBrokerHandle, ConnectionId},
    hub::Hub,
    protocol::Frame,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(hub): Extension<Hub>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.max_message_size(config.client_max_message_size)
        .on_upgrade(move |socket| {
            let id = ConnectionId::new();
            let span = info_span!("Client", %id, %addr);

            handle_websocket(socket, id, hub, config).instrument(span)
        })
}

/// Forward everything the client says to the connection broker.
/// Returns when the client closes or the socket fails.
pub(crate) async fn read<S>(mut receiver: S, connections: ConnectionBrokerHandle)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                trace!(%text, "client text");
                connections.command(text);
            }
            Ok(Message::Binary(bytes)) => {
                trace!("client sent {} binary byte(s)", bytes.len());
                connections.command(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(Message::Ping(_)) => {
                trace!("socket ping");
            }
            Ok(Message::Pong(_)) => {
                trace!("socket pong");
            }
            Ok(Message::Close(_)) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                debug!(?e, "client read error");
                return;
            }
        }
    }

    debug!("client stream ended");
}

/// Drain the client's queue onto the socket.
///
/// Returns on the first failed or overdue write.
/// When the queue is closed a close frame is sent first.
pub(crate) async fn write<S>(mut sender: S, mut queue: mpsc::Receiver<Frame>, deadline: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Debug,
{
    while let Some(frame) = queue.recv().await {
        match tokio::time::timeout(deadline, sender.send(Message::Text(frame))).await {
            Ok(Ok(())) => trace!("Frame flushed"),
            Ok(Err(e)) => {
                debug!(?e, "client write failed");
                return;
            }
            Err(_) => {
                warn!(?deadline, "client write timed out");
                return;
            }
        }
    }

    debug!("Queue closed, saying goodbye");
    match tokio::time::timeout(deadline, sender.send(Message::Close(None))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(?e, "Could not send close frame"),
        Err(_) => debug!("Close frame timed out"),
    }
}

fn report(task: &str, joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => debug!("{task} task joined"),
        Err(e) if e.is_cancelled() => debug!("{task} task cancelled"),
        Err(e) => warn!("{task} task join error: {e:?}"),
    }
}

pub(crate) async fn handle_websocket(
    websocket: WebSocket,
    id: ConnectionId,
    hub: Hub,
    config: Config,
) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (queue_sender, queue_receiver) = mpsc::channel(config.client_queue_capacity);

    hub.connections
        .register(ClientConnection::new(id, queue_sender));

    let mut read_handle = tokio::spawn(
        read(stream_receiver, hub.connections.clone()).instrument(info_span!("Read")),
    );
    let mut write_handle = tokio::spawn(
        write(stream_sender, queue_receiver, config.client_write_timeout())
            .instrument(info_span!("Write")),
    );

    let write_done = tokio::select! {
        joined = &mut read_handle => {
            report("Read", joined);
            false
        }
        joined = &mut write_handle => {
            report("Write", joined);
            true
        }
    };

    // Closes the queue, so a live writer drains it, sends close and returns.
    hub.connections.unregister(id);

    debug!("Stopping read task");
    read_handle.abort();

    if !write_done {
        report("Write", write_handle.await);
    }

    info!("Client session over");
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as futures_mpsc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::connection_broker::ConnectionBrokerMessage;

    async fn commands_read_from(messages: Vec<Result<Message, axum::Error>>) -> Vec<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        read(
            futures::stream::iter(messages),
            ConnectionBrokerHandle::new(tx),
        )
        .await;

        let mut commands = vec![];
        while let Some(message) = rx.recv().await {
            if let ConnectionBrokerMessage::Command(text) = message {
                commands.push(text);
            }
        }

        commands
    }

    #[tokio::test]
    async fn reader_forwards_text_verbatim_until_close() {
        let commands = commands_read_from(vec![
            Ok(Message::Text("open COM6 9600\n".into())),
            Ok(Message::Ping(vec![1, 2])),
            Ok(Message::Binary(b"send COM6 \xffhi".to_vec())),
            Ok(Message::Pong(vec![])),
            Ok(Message::Close(None)),
            Ok(Message::Text("list".into())),
        ])
        .await;

        assert_eq!(commands, ["open COM6 9600\n", "send COM6 \u{fffd}hi"]);
    }

    #[tokio::test]
    async fn reader_stops_on_error() {
        let commands = commands_read_from(vec![
            Ok(Message::Text("list".into())),
            Err(axum::Error::new(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            ))),
            Ok(Message::Text("close COM6".into())),
        ])
        .await;

        assert_eq!(commands, ["list"]);
    }

    #[tokio::test]
    async fn writer_drains_queue_then_closes() {
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (sink, stream) = futures_mpsc::unbounded();

        for frame in ["one", "two", "three"] {
            queue_tx.send(frame.into()).await.unwrap();
        }
        drop(queue_tx);

        write(sink, queue_rx, Duration::from_secs(1)).await;

        let sent = stream.collect::<Vec<_>>().await;
        assert_eq!(sent.len(), 4);
        for (message, expected) in sent.iter().zip(["one", "two", "three"]) {
            assert!(matches!(message, Message::Text(text) if text == expected));
        }
        assert!(matches!(sent[3], Message::Close(None)));
    }

    #[tokio::test]
    async fn writer_stops_when_socket_is_gone() {
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (sink, stream) = futures_mpsc::unbounded::<Message>();
        drop(stream);

        queue_tx.send("lost".into()).await.unwrap();

        // The queue stays open, so only the failed write can end the writer.
        tokio::time::timeout(
            Duration::from_secs(5),
            write(sink, queue_rx, Duration::from_secs(1)),
        )
        .await
        .expect("Writer should give up");
    }

    #[tokio::test]
    async fn writer_gives_up_on_stuck_socket() {
        let (queue_tx, queue_rx) = mpsc::channel(8);

        // Room for one message, and nobody reads it.
        let (sink, _stream) = futures_mpsc::channel::<Message>(0);

        for frame in ["one", "two", "three"] {
            queue_tx.send(frame.into()).await.unwrap();
        }

        tokio::time::timeout(
            Duration::from_secs(5),
            write(sink, queue_rx, Duration::from_millis(50)),
        )
        .await
        .expect("Writer should time out");
    }
}
