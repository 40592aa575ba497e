use std::io;

use thiserror::Error;

/// Errors thay may occur in this library.
///
/// None of these stop the relay.
/// They are logged where they happen and the offending command,
/// write or connection is dropped.
#[derive(Debug, Error)]
pub enum Error {
    /// A command line from a client could not be parsed.
    #[error("Could not parse {verb} command `{line}`. Problem: {problem}")]
    BadCommand {
        /// The verb the line was recognized as.
        verb: &'static str,

        /// The offending line.
        line: String,

        /// What was wrong with it.
        problem: String,
    },

    /// The line did not start with a known verb.
    #[error("Unknown command `{0}`")]
    UnknownCommand(String),

    /// No device with this name is open.
    #[error("The device `{0}` is not open")]
    NoSuchDevice(String),

    /// Device I/O failed.
    #[error("Device `{name}` I/O problem")]
    Device {
        /// The device name.
        name: String,

        /// The underlying problem.
        #[source]
        source: io::Error,
    },

    /// Listing the serial ports of the host failed.
    #[error("Could not enumerate serial ports: {0}")]
    Enumeration(String),

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The configuration is not valid RON.
    #[error("Configuration syntax problem")]
    ConfigSyntax(#[from] ron::error::SpannedError),

    /// Other IO related errors.
    #[error("Underlying IO problem")]
    Io(#[from] io::Error),

    /// The listening endpoint could not be set up.
    #[error("Could not serve on `{addr}`. Problem: {problem}")]
    Bind {
        /// The address we tried to bind.
        addr: String,

        /// Why it failed.
        problem: String,
    },
}

impl Error {
    /// Unpack the problem description of a [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}
