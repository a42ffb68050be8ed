use clap::Parser;
use switchlink_server::{Cli, ServerError};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::default().add_directive(LevelFilter::from(cli.log_level()).into())
        }))
        .init();

    switchlink_server::run(cli)
}
