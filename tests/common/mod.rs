#![allow(dead_code)]

use std::time::Duration;

use axum::http::StatusCode;
use color_eyre::{eyre::eyre, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use serial_relay::{
    config::Config,
    device::mock::{MockBackend, MockPeer},
    hub::Hub,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running server with mock devices.
pub struct Relay {
    pub port: u16,
    pub hub: Hub,
    pub mock: MockBackend,
    opened: mpsc::UnboundedReceiver<MockPeer>,
}

pub async fn start_relay(ports: &[&str]) -> Relay {
    start_relay_with_config(
        Config {
            break_duration_ms: 10,
            ..Default::default()
        },
        ports,
    )
    .await
}

pub async fn start_relay_with_config(config: Config, ports: &[&str]) -> Relay {
    let (mock, opened) = MockBackend::new(ports);
    let (port_tx, port_rx) = oneshot::channel();

    let backend = mock.backend();
    tokio::spawn(async move { serial_relay::server::run_any_port(config, backend, port_tx).await });

    let (port, hub) = port_rx
        .await
        .expect("Server should reply with allocated port");

    Relay {
        port,
        hub,
        mock,
        opened,
    }
}

impl Relay {
    pub async fn connect(&self) -> Result<Client> {
        info!("Connecting to server on port {}", self.port);
        let (stream, http_response) =
            tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", self.port)).await?;

        assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

        Ok(stream)
    }

    /// Connect, and get past the version, commands and port list frames.
    pub async fn connect_greeted(&self) -> Result<Client> {
        let mut client = self.connect().await?;

        assert!(receive_json(&mut client).await?.get("Version").is_some());
        assert!(receive_json(&mut client).await?.get("Commands").is_some());
        assert!(receive_json(&mut client).await?.get("SerialPorts").is_some());

        Ok(client)
    }

    /// The next mock device opened by the server.
    pub async fn peer(&mut self) -> Result<MockPeer> {
        timeout(Duration::from_secs(5), self.opened.recv())
            .await?
            .ok_or_else(|| eyre!("Mock backend gone"))
    }

    /// A plain HTTP GET, returning the body.
    pub async fn get(&self, path: &str) -> Result<String> {
        let mut stream = TcpStream::connect(("127.0.0.1", self.port)).await?;
        stream
            .write_all(format!("GET {path} HTTP/1.0\r\nHost: localhost\r\n\r\n").as_bytes())
            .await?;

        let mut response = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

        let (head, body) = response
            .split_once("\r\n\r\n")
            .ok_or_else(|| eyre!("No body in {response:?}"))?;
        assert!(head.starts_with("HTTP/1.0 200") || head.starts_with("HTTP/1.1 200"));

        Ok(body.into())
    }
}

pub async fn receive(client: &mut Client) -> Result<String> {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await?
            .ok_or_else(|| eyre!("Stream closed"))??;

        match message {
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            message => return Ok(message.into_text()?),
        }
    }
}

pub async fn receive_json(client: &mut Client) -> Result<Value> {
    Ok(serde_json::from_str(&receive(client).await?)?)
}

pub async fn send(client: &mut Client, text: &str) -> Result<()> {
    client.send(tungstenite::Message::Text(text.into())).await?;

    Ok(())
}

/// What an open or close event should look like.
pub fn event(cmd: &str, port: &str, baud: u32) -> Value {
    let desc = match cmd {
        "Open" => "Got register/open on port.",
        _ => "Got unregister/close on port.",
    };

    serde_json::json!({"Cmd": cmd, "Desc": desc, "Port": port, "Baud": baud})
}

/// Wait until the server has this many clients.
pub async fn live_connections(relay: &Relay, expected: usize) -> Result<()> {
    let settled = async {
        while relay.hub.connections.live_connections().await.len() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    };

    timeout(Duration::from_secs(5), settled)
        .await
        .map_err(|_| eyre!("Never got to {expected} live connection(s)"))
}

/// Read exactly this many bytes written to a mock device.
pub async fn read_device(peer: &mut MockPeer, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    timeout(Duration::from_secs(5), peer.io.read_exact(&mut buf)).await??;

    Ok(buf)
}
