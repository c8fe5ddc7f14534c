//! Clap derive structures for the `apguard` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// apguard -- keeps access-point stations, DNS-over-HTTPS scopes, and
/// controller rules in line with the policy directory
#[derive(Debug, Parser)]
#[command(
    name = "apguard",
    version,
    about = "Access-point policy daemon",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config path)
    #[arg(long, short = 'c', env = "APGUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon until interrupted
    Run,

    /// Inspect the configuration
    Config(ConfigArgs),

    /// Offline checks against policy rule files
    Rules(RulesArgs),

    /// Offline conntrack translation
    Conntrack(ConntrackArgs),

    /// DoH proxy helpers
    Doh(DohArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the effective configuration (file + environment)
    Show,
    /// Load and validate the configuration
    Check,
}

// ── Rules ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Report which rules in a JSON array the controller can enforce
    Check {
        /// JSON file holding an array of policy rules
        file: PathBuf,
    },
}

// ── Conntrack ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConntrackArgs {
    #[command(subcommand)]
    pub command: ConntrackCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConntrackCommand {
    /// Translate a conntrack batch into connection-log lines on stdout
    Translate {
        /// JSON file holding an array of conntrack records
        file: PathBuf,

        /// Inventory used for local-address filtering and MAC lookup
        /// (defaults to the configured inventory)
        #[arg(long)]
        inventory: Option<PathBuf>,
    },
}

// ── DoH ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DohArgs {
    #[command(subcommand)]
    pub command: DohCommand,
}

#[derive(Debug, Subcommand)]
pub enum DohCommand {
    /// Print the proxy config the backend would write
    Render,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
