//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(apguard_config::config_path);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
        }
        ConfigCommand::Show => {
            let mut config = apguard_config::load_config_from(&path)?;
            if config.controller.token.is_some() {
                config.controller.token = Some("<redacted>".into());
            }
            print!("{}", apguard_config::to_toml(&config)?);
        }
        ConfigCommand::Check => {
            apguard_config::load_config_from(&path)?;
            if path.exists() {
                println!("{}: ok", path.display());
            } else {
                println!("{}: not found, defaults are valid", path.display());
            }
        }
    }
    Ok(())
}
