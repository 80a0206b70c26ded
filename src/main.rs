use std::process::ExitCode;

use tidepool::config::{validate_config, ConfigParser};
use tidepool::error::Result;
use tidepool::server::Server;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: tidepool <config-file>");
        return ExitCode::from(2);
    };

    match run(&config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str) -> Result<()> {
    let config = ConfigParser::parse_file(config_path)?;
    validate_config(&config)?;

    let mut server = Server::new(config)?;
    server.run()
}
