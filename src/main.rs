use clap::Parser;
use color_eyre::Result;
use serial_relay::{cli, config::Config, device::Backend, logging, server};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    hangup.recv().await;

    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    std::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(cli.log_level, cli.file_logging()).await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);
    config.validate()?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = hangup() => {
            result?;
            info!("Told to hang up, quitting")
        }
        result = server::run_on_addr(config, Backend::serial()) => {
            error!("Server returned");
            logging::shutdown();
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    logging::shutdown();

    Ok(())
}
