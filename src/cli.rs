use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    config::{Config, StartupDevice, DEFAULT_BAUD},
    protocol::{CommandsFrame, DataFrame, SerialPortList, VersionFrame},
};

/// The command line interface for serial relay.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Address to serve on, overrides the configuration
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// A serial port to open at startup
    #[arg(long)]
    pub port: Option<String>,

    /// Baud rate of the port opened at startup
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// How much to log to stdout
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to a daily rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Let the command line override a configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.listen = addr;
        }

        if let Some(port) = &self.port {
            // The flag's baud wins over a configured one.
            config
                .devices
                .retain(|device| !device.name.eq_ignore_ascii_case(port));
            config.devices.push(StartupDevice::new(port, self.baud));
        }
    }

    /// Where and at what level to log to a file, if at all.
    pub fn file_logging(&self) -> Option<(Level, PathBuf)> {
        self.log_dir.clone().map(|dir| (self.log_level, dir))
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone, Debug)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show the frames every client gets right after connecting.
    Greeting,

    /// Show an example JSON port list.
    PortList,

    /// Show an example JSON frame of device output.
    Data,

    /// Show the text commands clients may send.
    Commands,
}

const COMMAND_HELP: &str = "\
open  <name> <baud>     open or reopen a device at the given baud rate
close <name>            close a device
send  <name> <data...>  write data and a carriage return to the device (\"BREAK\" sends a break instead)
list                    broadcast the current device list (also sent on connect)";

/// Print what the command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => println!("{}", Config::example().serialize_pretty()),
            Examples::Greeting => {
                println!("{}", VersionFrame::current().to_frame());
                println!("{}", CommandsFrame::current().to_frame());
            }
            Examples::PortList => println!("{}", SerialPortList::example().to_frame()),
            Examples::Data => println!(
                "{}",
                DataFrame::new_lossy("/dev/ttyACM0", b"ok T:21.3 /0.0\n").to_frame()
            ),
            Examples::Commands => println!("{COMMAND_HELP}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_change_nothing() {
        let cli = Cli::parse_from(["serial-relay"]);
        let mut config = Config::default();

        cli.apply(&mut config);

        assert_eq!(config, Config::default());
        assert_eq!(cli.log_level, Level::INFO);
        assert!(cli.file_logging().is_none());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "serial-relay",
            "relay.ron",
            "--addr",
            "127.0.0.1:9999",
            "--port",
            "com6",
            "--baud",
            "9600",
            "--log-dir",
            "logs",
        ]);
        let mut config = Config::example();

        cli.apply(&mut config);

        assert_eq!(cli.config, Some(PathBuf::from("relay.ron")));
        assert_eq!(config.listen, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(
            config.devices,
            [
                StartupDevice::new("/dev/ttyACM0", DEFAULT_BAUD),
                StartupDevice::new("com6", 9600)
            ]
        );
        assert_eq!(
            cli.file_logging(),
            Some((Level::INFO, PathBuf::from("logs")))
        );
    }

    #[test]
    fn examples_subcommand() {
        let cli = Cli::parse_from(["serial-relay", "examples", "port-list"]);

        assert!(matches!(
            cli.command,
            Some(Commands::Examples(Examples::PortList))
        ));
    }
}
