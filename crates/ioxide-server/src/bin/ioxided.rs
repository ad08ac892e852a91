use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ioxide_reactor::{Dispatcher, ReactorError};
use ioxide_server::{init_logging, ServerConfig, SessionServer};
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "Serve Scheme REPL sessions over TCP", long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Port, port@host or host:port to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Config file to use instead of the platform default
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scheme file each session loads before its first prompt
    #[arg(short, long)]
    init: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = match &cli.config {
        Some(path) => ServerConfig::load_from(path),
        None => ServerConfig::load(),
    }
    .context("loading configuration")?;
    config.apply_env();
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(init) = cli.init {
        config.server.init_file = Some(init);
    }

    let _guard = init_logging("ioxided", cli.debug, config.logging.file)?;
    info!("Starting ioxided with {}", source);

    let dispatcher = Dispatcher::new();
    let server = SessionServer::start(&dispatcher, &config.server)
        .with_context(|| format!("listening on {}", config.server.listen))?;
    info!("Serving sessions on {}", server.name());

    loop {
        match dispatcher.monitor(None) {
            Ok(()) => {}
            Err(ReactorError::Exhausted) if server.listening_watch().is_none() => {
                info!("Nothing left to serve");
                return Ok(());
            }
            Err(err) => {
                error!("Dispatcher failed: {}", err);
                return Err(err.into());
            }
        }
    }
}
