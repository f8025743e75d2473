//! dmsctl - root-cause diagnosis for DMS replication tasks

use clap::Parser;
use dmsctl::cli::{Cli, Commands};
use dmsctl::errors::exit_code;
use dmsctl::{commands, logging, output};
use dms_doctor::DoctorConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = DoctorConfig::resolve(cli.config.as_deref());
    logging::init(cli.verbose, config.as_ref().ok().map(|c| c.log.level.as_str()));

    let result = match config {
        Ok(config) => match &cli.command {
            Commands::Diagnose(args) => commands::diagnose(config, args).await,
            Commands::Rules { json } => commands::rules(&config, *json),
            Commands::CheckConfig => commands::check_config(&config),
        },
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::display_error(&format!("{:#}", e));
            std::process::exit(exit_code(&e));
        }
    }
}
