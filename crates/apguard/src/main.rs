mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;

use apguard_config::{Config, LoggingSection};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "apguard", &mut std::io::stdout());
            Ok(())
        }

        // Config inspection must work even when the file is broken
        Command::Config(args) => {
            let _guard = logging::init(cli.global.verbose, &quiet_logging());
            commands::config_cmd::handle(&args, &cli.global)
        }

        cmd => {
            let config = load(&cli.global)?;
            let section = if matches!(cmd, Command::Run) {
                config.logging.clone()
            } else {
                quiet_logging()
            };
            let _guard = logging::init(cli.global.verbose, &section);

            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &config, &cli.global).await
        }
    }
}

/// Load the config from `--config` or the platform path.
fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let config = match &global.config {
        Some(path) => apguard_config::load_config_from(path)?,
        None => apguard_config::load_config()?,
    };
    Ok(config)
}

/// One-shot commands log warnings to stderr only.
fn quiet_logging() -> LoggingSection {
    LoggingSection {
        level: "warn".into(),
        ..LoggingSection::default()
    }
}
