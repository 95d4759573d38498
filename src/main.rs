use clap::Parser;

use dicechain::config::Config;
use dicechain::{logging, Result};

mod app_config;
mod commands;

use app_config::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Keygen => commands::keygen(),
        Commands::Fingerprint { public_key } => commands::fingerprint(&public_key)?,
        Commands::Simulate { players, drop_rate, seed } => {
            let drop_rate = commands::check_drop_rate(drop_rate)?;
            commands::simulate(&config, players, drop_rate, seed).await?;
        }
        #[cfg(feature = "ws-client")]
        Commands::Play { secret_key, peers } => commands::play(&config, &secret_key, &peers).await?,
    }
    Ok(())
}
