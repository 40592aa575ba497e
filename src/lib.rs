#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Code relating to setting up the server which accepts websockets and serves the hub.
pub mod server;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Logging/tracing setup.
pub mod logging;

/// Possible errors in this library.
pub mod error;

/// The JSON frames sent to clients.
pub mod protocol;

/// The text commands clients send, and turning them into device requests.
pub mod commands;

/// Runs on the server.
///
/// Owns the connected clients and fans device output out to them.
pub mod connection_broker;

/// Runs on the server.
///
/// Owns the open devices.
pub mod device_broker;

/// Both brokers, started together.
pub mod hub;

/// Devices: their names, how they are opened, and the drivers.
pub mod device;

/// Listing serial ports.
pub mod ports;

/// Handles incoming websockets.
pub(crate) mod websocket;
