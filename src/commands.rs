//! The line based command protocol clients use to drive devices.
//!
//! ```text
//! open  <name> <baud>
//! close <name>
//! send  <name> <data...>
//! list
//! ```
//!
//! Verbs are matched case-insensitively by prefix, in the order above.

use tracing::{trace, warn};

use crate::{device::DeviceName, device_broker::DeviceBrokerHandle, error::Error};

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open (or reopen) a device.
    Open {
        /// Which device.
        name: DeviceName,

        /// At which baud rate.
        baud: u32,
    },

    /// Close a device.
    Close {
        /// Which device.
        name: DeviceName,
    },

    /// Write a line to a device.
    Send {
        /// Which device.
        name: DeviceName,

        /// The rest of the line, verbatim.
        data: String,
    },

    /// Broadcast the port list.
    List,
}

const VERBS: [&str; 4] = ["open", "close", "send", "list"];

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.get(..prefix.len())
        .map_or(false, |start| start.eq_ignore_ascii_case(prefix))
}

fn bad(verb: &'static str, line: &str, problem: impl Into<String>) -> Error {
    Error::BadCommand {
        verb,
        line: line.into(),
        problem: problem.into(),
    }
}

impl Command {
    /// Parse one line of client text.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim_start().trim_end_matches(['\r', '\n']);

        let verb = VERBS
            .into_iter()
            .find(|verb| starts_with_ignore_case(line, verb))
            .ok_or_else(|| Error::UnknownCommand(line.into()))?;

        match verb {
            "open" => Self::parse_open(line),
            "close" => Self::parse_close(line),
            "send" => Self::parse_send(line),
            _ => Ok(Self::List),
        }
    }

    fn parse_open(line: &str) -> Result<Self, Error> {
        let tokens = line.split_whitespace().collect::<Vec<_>>();

        let [_, name, baud] = tokens[..] else {
            return Err(bad(
                "open",
                line,
                format!("expected `open <name> <baud>`, got {} token(s)", tokens.len()),
            ));
        };

        let baud = baud
            .parse::<u32>()
            .map_err(|e| bad("open", line, format!("baud `{baud}`: {e}")))?;

        if baud == 0 {
            return Err(bad("open", line, "baud can not be zero"));
        }

        Ok(Self::Open {
            name: name.into(),
            baud,
        })
    }

    fn parse_close(line: &str) -> Result<Self, Error> {
        let tokens = line.split_whitespace().collect::<Vec<_>>();

        match tokens[..] {
            [_, name] => Ok(Self::Close { name: name.into() }),
            _ => Err(bad(
                "close",
                line,
                format!("expected `close <name>`, got {} token(s)", tokens.len()),
            )),
        }
    }

    fn parse_send(line: &str) -> Result<Self, Error> {
        let missing = || bad("send", line, "expected `send <name> <data>`");

        let (_, rest) = line.split_once(char::is_whitespace).ok_or_else(missing)?;
        let (name, data) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(missing)?;

        let data = data.trim_start();
        if data.is_empty() {
            return Err(missing());
        }

        Ok(Self::Send {
            name: name.into(),
            data: data.into(),
        })
    }
}

/// Turns command text into device broker requests.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    devices: DeviceBrokerHandle,
}

impl CommandDispatcher {
    /// A dispatcher sending requests to the given device broker.
    pub fn new(devices: DeviceBrokerHandle) -> Self {
        Self { devices }
    }

    /// Parse a line and act on it.
    /// Lines which do not parse are logged and dropped.
    pub fn dispatch(&self, line: &str) {
        match Command::parse(line) {
            Ok(Command::Open { name, baud }) => self.devices.open(name, baud),
            Ok(Command::Close { name }) => self.devices.close(name),
            Ok(Command::Send { name, data }) => self.devices.write(name, data),
            Ok(Command::List) => self.devices.list(),
            Err(Error::UnknownCommand(line)) => trace!(%line, "Ignoring unknown command"),
            Err(e) => warn!(%e, "Dropping command"),
        }
    }
}
