use std::net::SocketAddr;

use axum::{response::IntoResponse, routing::get, Extension, Router};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{config::Config, device::Backend, error::Error, hub::Hub, protocol, websocket};

async fn run(
    config: Config,
    backend: Backend,
    addr: SocketAddr,
    allocated_port: Option<oneshot::Sender<(u16, Hub)>>,
) -> Result<(), Error> {
    config.validate()?;

    let hub = Hub::start(&config, backend);
    let running = hub.clone();

    let app = Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each websocket needs to be able to reach the brokers
                .layer(Extension(hub))
                // Client limits live in the config
                .layer(Extension(config.clone())),
        );

    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Bind {
            addr: addr.to_string(),
            problem: e.to_string(),
        })?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send((addr.port(), running)).is_err() {
            warn!("Nobody wanted to know which port was allocated");
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Bind {
        addr: addr.to_string(),
        problem: e.to_string(),
    })
}

/// Start the server on an arbitrary available port on localhost.
/// The port allocated will be sent on the provided channel,
/// along with the [`Hub`] the server runs.
///
/// The configured listen address is ignored.
pub async fn run_any_port(
    config: Config,
    backend: Backend,
    allocated_port: oneshot::Sender<(u16, Hub)>,
) -> Result<(), Error> {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));

    run(config, backend, addr, Some(allocated_port)).await
}

/// Start the server on the configured listen address.
pub async fn run_on_addr(config: Config, backend: Backend) -> Result<(), Error> {
    let addr = config.listen;

    run(config, backend, addr, None).await
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Relay v{}\n", protocol::VERSION)
}
