//! Command dispatch.

pub mod config_cmd;
pub mod conntrack;
pub mod doh;
pub mod rules;
pub mod run;

use apguard_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a config-bound command to its handler.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(config).await,
        Command::Rules(args) => rules::handle(&args, global),
        Command::Conntrack(args) => conntrack::handle(&args, config).await,
        Command::Doh(args) => doh::handle(&args, config).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
