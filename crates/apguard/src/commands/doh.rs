//! DoH proxy helpers.

use apguard_config::Config;
use apguard_core::ProcessBackend;

use crate::cli::{DohArgs, DohCommand};
use crate::error::CliError;

pub async fn handle(args: &DohArgs, config: &Config) -> Result<(), CliError> {
    match args.command {
        DohCommand::Render => {
            let backend = ProcessBackend::load(apguard_config::to_backend_config(config)?).await?;
            print!("{}", backend.render()?);
            Ok(())
        }
    }
}
